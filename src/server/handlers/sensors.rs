use actix_web::{web, HttpResponse};
use serde_json::json;

use super::round_tenths;
use crate::agriha::unix_time;
use crate::server::{auth, ApiState};

/// Latest sensor cache.
///
/// URI: `GET /api/sensors`
///
/// `updated_at` is a UNIX timestamp; 0 with `age_sec: null` means nothing
/// has arrived yet. Entries never expire: staleness shows only in the
/// per-payload timestamps.
pub async fn handler(state: web::Data<ApiState>, _key: auth::ApiKey) -> HttpResponse {
    let (sensors, updated_at) = state.cache.snapshot();
    let age_sec = if updated_at > 0.0 {
        json!(round_tenths(unix_time() - updated_at))
    } else {
        serde_json::Value::Null
    };
    HttpResponse::Ok().json(json!({
        "sensors": sensors,
        "updated_at": updated_at,
        "age_sec": age_sec,
    }))
}

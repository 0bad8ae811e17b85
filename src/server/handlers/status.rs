use std::sync::PoisonError;

use actix_web::{web, HttpResponse};
use serde_json::json;

use super::round_tenths;
use crate::agriha::unix_time;
use crate::server::{auth, ApiState};

/// Daemon status.
///
/// URI: `GET /api/status`
///
/// The per-channel map comes from the physical register; an I²C error
/// degrades it to `relay_state: null` but the endpoint still answers 200.
pub async fn handler(state: web::Data<ApiState>, _key: auth::ApiKey) -> HttpResponse {
    let relay_state = match state
        .relay
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_mask()
    {
        Ok(mask) => {
            let mut channels = serde_json::Map::new();
            for channel in 1..=8u8 {
                channels.insert(format!("ch{}", channel), json!((mask >> (8 - channel)) & 1 == 1));
            }
            serde_json::Value::Object(channels)
        }
        Err(err) => {
            tracing::warn!("relay state read failed: {}", err);
            serde_json::Value::Null
        }
    };

    HttpResponse::Ok().json(json!({
        "house_id": state.house_id,
        "uptime_sec": state.start.elapsed().as_secs(),
        "locked_out": state.gate.is_locked_out(),
        "lockout_remaining_sec": round_tenths(state.gate.remaining_lockout().as_secs_f64()),
        "relay_state": relay_state,
        "ts": unix_time(),
    }))
}

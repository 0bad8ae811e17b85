use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::server::{auth, ApiState};

/// Force-unlocks the emergency lockout.
///
/// URI: `POST /api/emergency/clear`
pub async fn handler(state: web::Data<ApiState>, _key: auth::ApiKey) -> HttpResponse {
    let was_locked_out = state.gate.is_locked_out();
    state.gate.clear_lockout();
    tracing::info!("emergency lockout cleared via REST (was_locked_out={})", was_locked_out);
    HttpResponse::Ok().json(json!({
        "cleared": true,
        "was_locked_out": was_locked_out,
    }))
}

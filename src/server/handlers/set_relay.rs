use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::round_tenths;
use crate::server::{auth, ApiState};

#[derive(Debug, Deserialize)]
pub struct RelaySetRequest {
    /// 0 = off, 1 = on
    pub value: i64,
    /// Auto-off after this many seconds (0 = no timer)
    #[serde(default)]
    pub duration_sec: f64,
    /// Free-text control reason, logged and forwarded
    #[serde(default)]
    pub reason: String,
}

/// Queues a relay command.
///
/// URI: `POST /api/relay/{ch}`
///
/// While the emergency lockout runs the command is refused with 423 and
/// nothing is published; otherwise the command goes out on the per-channel
/// set topic and the relay bridge actuates it asynchronously.
pub async fn handler(
    state: web::Data<ApiState>,
    path: web::Path<u8>,
    body: web::Json<RelaySetRequest>,
    _key: auth::ApiKey,
) -> HttpResponse {
    let channel = path.into_inner();
    if !(1..=8).contains(&channel) {
        return HttpResponse::UnprocessableEntity().json(json!({
            "error": "invalid_channel",
            "message": "channel must be 1-8",
        }));
    }
    if !(0..=1).contains(&body.value) {
        return HttpResponse::UnprocessableEntity().json(json!({
            "error": "invalid_value",
            "message": "value must be 0 or 1",
        }));
    }

    if state.gate.is_locked_out() {
        return HttpResponse::build(StatusCode::LOCKED).json(json!({
            "error": "locked_out",
            "message": "locked out by emergency switch",
            "remaining_sec": round_tenths(state.gate.remaining_lockout().as_secs_f64()),
        }));
    }

    let publisher = match state.publisher {
        Some(ref publisher) => publisher,
        None => {
            tracing::error!("REST relay cmd: broker unavailable");
            return HttpResponse::ServiceUnavailable().json(json!({
                "error": "mqtt_unavailable",
                "message": "broker not connected",
            }));
        }
    };

    let topic = format!("agriha/{}/relay/{}/set", state.house_id, channel);
    let payload = json!({
        "value": body.value,
        "duration_sec": body.duration_sec,
        "reason": body.reason,
    })
    .to_string();

    if let Err(err) = publisher.publish(&topic, payload, 1, false) {
        tracing::error!("REST relay publish failed: {}", err);
        return HttpResponse::ServiceUnavailable().json(json!({
            "error": "mqtt_unavailable",
            "message": "publish could not be queued",
        }));
    }

    tracing::info!(
        "REST relay cmd: ch{} value={} duration={:.1}s -> {}",
        channel,
        body.value,
        body.duration_sec,
        topic
    );
    HttpResponse::Accepted().json(json!({
        "ch": channel,
        "value": body.value,
        "queued": true,
    }))
}

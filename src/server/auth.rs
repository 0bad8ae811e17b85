//! `X-API-Key` authentication for the REST surface.
//!
//! An empty configured key disables the check; otherwise the header must
//! match byte for byte.

use std::fmt;
use std::future::{ready, Ready};

use actix_web::http::StatusCode;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use serde_json::json;

use super::ApiState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Authentication error returned by the API-key extractor.
#[derive(Debug)]
pub struct AuthenticationError;

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid API key")
    }
}

impl std::error::Error for AuthenticationError {}

impl ResponseError for AuthenticationError {
    fn status_code(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::Forbidden().json(json!({
            "error": "unauthorized",
            "message": "Invalid API key",
        }))
    }
}

/// Extractor guarding every endpoint.
pub struct ApiKey;

impl FromRequest for ApiKey {
    type Error = AuthenticationError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let configured = match req.app_data::<web::Data<ApiState>>() {
            Some(state) => state.api_key.clone(),
            None => String::new(),
        };
        if configured.is_empty() {
            return ready(Ok(ApiKey));
        }
        let presented = req
            .headers()
            .get(API_KEY_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        if presented == configured.as_bytes() {
            ready(Ok(ApiKey))
        } else {
            ready(Err(AuthenticationError))
        }
    }
}

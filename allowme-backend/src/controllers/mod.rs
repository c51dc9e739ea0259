pub mod health;
pub mod profile;

use actix_web::http::StatusCode;
use actix_web::{error, HttpRequest, HttpResponse};

use crate::error::StoreError;

/// Shared failure body for API handlers: `{ "success": false, "error": ... }`
pub fn failure(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "success": false,
        "error": message
    }))
}

/// Map a store error onto the matching failure response
pub fn store_failure(err: &StoreError) -> HttpResponse {
    if !err.is_constraint_violation() {
        log::error!("Store error: {}", err);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
    }
    let status = match err {
        StoreError::UserNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::CONFLICT,
    };
    failure(status, &err.to_string())
}

/// Reject malformed JSON bodies with the same shape as other failures
pub fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> error::Error {
    let response = failure(StatusCode::BAD_REQUEST, &format!("Invalid request body: {}", err));
    error::InternalError::from_response(err, response).into()
}

//! Uniform error responses: `{ "error": { code, message, requestId?, ... } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use prg_domain::error::GatewayError;
use serde_json::json;

pub fn error_response(err: &GatewayError, request_id: &str) -> Response {
    let status = StatusCode::from_u16(err.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut error = json!({
        "code": err.code.as_str(),
        "message": err.message,
        "requestId": request_id,
    });
    if err.retryable {
        error["retryable"] = json!(true);
    }
    if let Some(details) = &err.details {
        error["details"] = details.clone();
    }

    (status, Json(json!({ "error": error }))).into_response()
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prg_domain::error::ErrorCode;

    #[test]
    fn status_comes_from_the_error() {
        let err = GatewayError::new(ErrorCode::ErrRateLimitExceeded, "slow down");
        let response = error_response(&err, "req_1");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}

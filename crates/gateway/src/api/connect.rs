//! Public pairing surface: `POST /api/connect/prepare`.
//!
//! Unauthenticated by design (the connect code is the credential), so it
//! sits behind the per-IP rate limit when one is configured.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;

use prg_domain::error::{ErrorCode, GatewayError};
use prg_pairing::PrepareRequest;

use crate::api::error::{error_response, new_request_id};
use crate::state::AppState;

pub async fn prepare(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = new_request_id();

    let parsed: Result<PrepareRequest, _> = serde_json::from_slice(&body);
    let request = match parsed {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                &GatewayError::new(ErrorCode::ErrInvalidJson, format!("prepare body: {e}")),
                &request_id,
            );
        }
    };

    match state.pairing.prepare(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

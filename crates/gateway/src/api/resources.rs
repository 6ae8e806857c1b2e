//! Data-plane handlers.
//!
//! Two equivalent addressings feed the same pipeline:
//! - `POST /r/<type>/<provider>/v1/chat/completions`
//! - `POST /v1/chat/completions` + `x-gateway-resource: <type>:<provider>`

use axum::body::Body;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::error::{error_response, new_request_id};
use crate::pipeline::{self, InboundRequest, PipelineResponse};
use crate::state::AppState;

pub const RESOURCE_HEADER: &str = "x-gateway-resource";

const ACTION_CHAT_COMPLETIONS: &str = "chat.completions";

/// `POST /r/:rtype/:provider/v1/chat/completions`
pub async fn chat_completions_by_path(
    State(state): State<AppState>,
    Path((rtype, provider)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resource = Some((
        format!("{rtype}:{provider}"),
        ACTION_CHAT_COMPLETIONS.to_string(),
    ));
    dispatch(state, uri, method, headers, body, resource).await
}

/// `POST /v1/chat/completions` with the resource named in a header.
pub async fn chat_completions_by_header(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resource = headers
        .get(RESOURCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|id| (id.trim().to_string(), ACTION_CHAT_COMPLETIONS.to_string()));
    dispatch(state, uri, method, headers, body, resource).await
}

async fn dispatch(
    state: AppState,
    uri: axum::http::Uri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    resource: Option<(String, String)>,
) -> Response {
    let request_id = new_request_id();

    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{query}", uri.path()),
        None => uri.path().to_string(),
    };
    let inbound = InboundRequest {
        method: method.as_str().to_string(),
        endpoint: uri.path().to_string(),
        path_and_query,
        resource,
        headers,
        body,
    };

    // The token only fires on the configured deadline; client disconnects
    // are observed as dropped futures/streams and logged as cancellations.
    let cancel = CancellationToken::new();
    if let Some(deadline) = state.config.server.request_deadline_secs {
        let deadline_token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(deadline)).await;
            deadline_token.cancel();
        });
    }

    match pipeline::handle(&state, inbound, cancel).await {
        Ok(PipelineResponse::Complete { response, .. }) => {
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(PipelineResponse::Stream {
            stream,
            content_type,
        }) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(err) => error_response(&err, &request_id),
    }
}

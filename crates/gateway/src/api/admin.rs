//! Admin surface.
//!
//! Everything the owner needs to operate the gateway without the (out of
//! scope) web UI: pairing codes, session approval, app lifecycle, upstream
//! credentials, request logs and usage. All handlers sit behind the bearer
//! token middleware in [`crate::api::auth`].

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use prg_domain::app::AppStatus;
use prg_domain::error::{ErrorCode, GatewayError};
use prg_domain::pairing::ConnectSessionStatus;
use prg_domain::secret::{ResourceSecret, SecretStatus};
use prg_store::Repository;

use crate::api::error::{error_response, new_request_id};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Public liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": "resgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pairing codes & sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/admin/pairing-codes` — mint a code + pairing string.
pub async fn create_pairing_code(State(state): State<AppState>) -> Response {
    let request_id = new_request_id();
    match state.pairing.issue_code().await {
        Ok((code, pairing_string)) => (
            StatusCode::OK,
            Json(json!({
                "code": code.code,
                "pairingString": pairing_string,
                "expiresAt": code.expires_at,
            })),
        )
            .into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    /// `pending|approved|rejected|expired`; absent = all.
    pub status: Option<String>,
}

/// `GET /api/admin/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Response {
    let request_id = new_request_id();

    let status = match filter.status.as_deref() {
        None => None,
        Some("pending") => Some(ConnectSessionStatus::Pending),
        Some("approved") => Some(ConnectSessionStatus::Approved),
        Some("rejected") => Some(ConnectSessionStatus::Rejected),
        Some("expired") => Some(ConnectSessionStatus::Expired),
        Some(other) => {
            return error_response(
                &GatewayError::new(
                    ErrorCode::ErrInvalidRequest,
                    format!("unknown status filter '{other}'"),
                ),
                &request_id,
            );
        }
    };

    match state.repo.list_connect_sessions(status).await {
        Ok(sessions) => (StatusCode::OK, Json(json!({ "sessions": sessions }))).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    /// Constraint overrides keyed by resource id; replaces the requested
    /// constraints for that resource.
    #[serde(default)]
    pub constraint_overrides: HashMap<String, Value>,
}

/// `POST /api/admin/sessions/:token/approve`
pub async fn approve_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Response {
    let request_id = new_request_id();
    let overrides = body.map(|Json(b)| b.constraint_overrides).unwrap_or_default();

    match state.pairing.approve(&token, &overrides).await {
        Ok((app, redirect_url)) => (
            StatusCode::OK,
            Json(json!({
                "appId": app.id,
                "appName": app.name,
                "redirectUrl": redirect_url,
            })),
        )
            .into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

/// `POST /api/admin/sessions/:token/reject`
pub async fn reject_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    let request_id = new_request_id();
    match state.pairing.reject(&token).await {
        Ok(redirect_url) => {
            (StatusCode::OK, Json(json!({ "redirectUrl": redirect_url }))).into_response()
        }
        Err(err) => error_response(&err, &request_id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Apps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `GET /api/admin/apps`
pub async fn list_apps(State(state): State<AppState>) -> Response {
    let request_id = new_request_id();
    match state.repo.list_apps().await {
        Ok(apps) => (StatusCode::OK, Json(json!({ "apps": apps }))).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: AppStatus,
}

/// `POST /api/admin/apps/:id/status` — suspend, revoke or reactivate.
pub async fn set_app_status(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Response {
    let request_id = new_request_id();
    match state.repo.set_app_status(&app_id, body.status).await {
        Ok(()) => {
            tracing::info!(app_id = %app_id, status = ?body.status, "app status changed");
            (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
        }
        Err(err) => error_response(&err, &request_id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resource secrets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBody {
    pub api_key: String,
    /// Adapter-specific settings stored next to the credential.
    #[serde(default)]
    pub config: Option<Value>,
}

/// `PUT /api/admin/resources/:rtype/:provider/secret`
pub async fn put_resource_secret(
    State(state): State<AppState>,
    Path((rtype, provider)): Path<(String, String)>,
    Json(body): Json<SecretBody>,
) -> Response {
    let request_id = new_request_id();
    let resource_id = format!("{rtype}:{provider}");

    if state.adapters.get(&resource_id).is_none() {
        return error_response(
            &GatewayError::new(
                ErrorCode::ErrUnknownResource,
                format!("no adapter registered for '{resource_id}'"),
            ),
            &request_id,
        );
    }

    let sealed = match state.vault.seal(&body.api_key) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!(resource = %resource_id, error = %e, "secret seal failed");
            return error_response(&GatewayError::internal("could not encrypt secret"), &request_id);
        }
    };

    let secret = ResourceSecret {
        resource_id: resource_id.clone(),
        status: SecretStatus::Active,
        encrypted_key: sealed.ciphertext_b64,
        key_iv: sealed.iv_b64,
        config: body.config,
        created_at: Utc::now(),
    };
    match state.repo.upsert_resource_secret(secret).await {
        Ok(()) => {
            tracing::info!(resource = %resource_id, "resource secret stored");
            (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
        }
        Err(err) => error_response(&err, &request_id),
    }
}

/// `DELETE /api/admin/resources/:rtype/:provider/secret` — disable, keep
/// the ciphertext.
pub async fn disable_resource_secret(
    State(state): State<AppState>,
    Path((rtype, provider)): Path<(String, String)>,
) -> Response {
    let request_id = new_request_id();
    let resource_id = format!("{rtype}:{provider}");
    match state
        .repo
        .set_resource_secret_status(&resource_id, SecretStatus::Disabled)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logs & usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// `GET /api/admin/logs`
pub async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let request_id = new_request_id();
    let limit = query.limit.unwrap_or(100).min(1000);
    match state.repo.recent_request_logs(limit).await {
        Ok(logs) => (StatusCode::OK, Json(json!({ "logs": logs }))).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

/// `GET /api/admin/usage` — token-usage counter snapshot.
pub async fn usage_snapshot(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "usage": state.counters.usage_snapshot() }))
}

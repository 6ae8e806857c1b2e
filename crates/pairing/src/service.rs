//! The pairing/approval state machine over the repository.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use prg_domain::app::{App, AppMetadata};
use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_domain::pairing::{ConnectSession, ConnectSessionStatus, PairingCode, RequestedPermission};
use prg_domain::permission::{is_valid_resource_id, PermissionInput};
use prg_store::{ConsumeOutcome, Repository};

use crate::codes::{new_connect_code, new_session_token};
use crate::string::build_pairing_string;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One permission ask on the prepare wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedPermissionInput {
    pub resource_id: String,
    pub actions: Vec<String>,
    #[serde(default)]
    pub constraints: Option<serde_json::Value>,
    /// Requested permission lifetime in seconds.
    #[serde(default)]
    pub requested_duration: Option<u64>,
}

/// Body of `POST /api/connect/prepare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    pub connect_code: String,
    pub app: AppMetadata,
    /// Ed25519 verifying key, 32 bytes, standard base64.
    pub public_key: String,
    pub requested_permissions: Vec<RequestedPermissionInput>,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub approval_url: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PairingService {
    repo: Arc<dyn Repository>,
    /// Resource ids with a registered adapter; asks outside this set are
    /// rejected at prepare time.
    registered_resources: HashSet<String>,
    proxy_url: String,
    code_ttl_secs: u64,
    session_ttl_secs: u64,
}

impl PairingService {
    pub fn new(
        repo: Arc<dyn Repository>,
        registered_resources: HashSet<String>,
        proxy_url: String,
        code_ttl_secs: u64,
        session_ttl_secs: u64,
    ) -> Self {
        Self {
            repo,
            registered_resources,
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            code_ttl_secs,
            session_ttl_secs,
        }
    }

    // ── Issue ────────────────────────────────────────────────────────

    /// Mint a pairing code and the pairing string the owner hands out.
    pub async fn issue_code(&self) -> Result<(PairingCode, String)> {
        let now = Utc::now();
        let code = PairingCode {
            id: format!("pc_{}", Uuid::new_v4().simple()),
            code: new_connect_code(),
            expires_at: now + Duration::seconds(self.code_ttl_secs as i64),
            consumed_at: None,
            created_at: now,
        };
        self.repo.insert_pairing_code(code.clone()).await?;
        let pairing_string = build_pairing_string(&self.proxy_url, &code.code);
        tracing::info!(pairing_code_id = %code.id, "pairing code issued");
        Ok((code, pairing_string))
    }

    // ── Prepare ──────────────────────────────────────────────────────

    pub async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse> {
        self.validate_prepare(&request)?;

        let now = Utc::now();
        let pairing_code_id = match self
            .repo
            .consume_pairing_code(&request.connect_code, now)
            .await?
        {
            ConsumeOutcome::Consumed(id) => id,
            ConsumeOutcome::AlreadyConsumed => {
                return Err(GatewayError::new(
                    ErrorCode::ErrInvalidConnectCode,
                    "connect code already used",
                ));
            }
            ConsumeOutcome::Expired => {
                return Err(GatewayError::new(
                    ErrorCode::ErrInvalidConnectCode,
                    "connect code expired",
                ));
            }
            ConsumeOutcome::NotFound => {
                return Err(GatewayError::new(
                    ErrorCode::ErrInvalidConnectCode,
                    "unknown connect code",
                ));
            }
        };

        let token = new_session_token();
        let expires_at = now + Duration::seconds(self.session_ttl_secs as i64);
        let session = ConnectSession {
            token: token.clone(),
            pairing_code_id,
            public_key: request.public_key.clone(),
            app: request.app.clone(),
            requested_permissions: dedup_requested(&request.requested_permissions),
            redirect_uri: request.redirect_uri.clone(),
            status: ConnectSessionStatus::Pending,
            bound_app_id: None,
            expires_at,
            created_at: now,
        };
        self.repo.create_connect_session(session).await?;

        tracing::info!(app_name = %request.app.name, "connect session created");
        Ok(PrepareResponse {
            approval_url: format!("{}/connect/approve?session={token}", self.proxy_url),
            session_token: token,
            expires_at,
        })
    }

    fn validate_prepare(&self, request: &PrepareRequest) -> Result<()> {
        let invalid = |why: String| GatewayError::new(ErrorCode::ErrInvalidRequest, why);

        if request.app.name.trim().is_empty() {
            return Err(invalid("app.name is required".into()));
        }

        // Public key must decode to a valid 32-byte Ed25519 point.
        let key_bytes = STANDARD
            .decode(&request.public_key)
            .map_err(|_| invalid("publicKey is not valid base64".into()))?;
        let arr: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("publicKey must be 32 bytes, got {}", key_bytes.len())))?;
        ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|_| invalid("publicKey is not a valid Ed25519 key".into()))?;

        let redirect = Url::parse(&request.redirect_uri)
            .map_err(|_| invalid("redirectUri must be an absolute URL".into()))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(invalid("redirectUri must be http(s)".into()));
        }

        if request.requested_permissions.is_empty() {
            return Err(invalid("requestedPermissions must not be empty".into()));
        }
        for permission in &request.requested_permissions {
            if !is_valid_resource_id(&permission.resource_id) {
                return Err(invalid(format!(
                    "'{}' is not a valid resource id",
                    permission.resource_id
                )));
            }
            if !self.registered_resources.contains(&permission.resource_id) {
                return Err(GatewayError::new(
                    ErrorCode::ErrUnknownResource,
                    format!("no adapter registered for '{}'", permission.resource_id),
                ));
            }
            if permission.actions.is_empty() {
                return Err(invalid(format!(
                    "'{}' requests no actions",
                    permission.resource_id
                )));
            }
        }

        Ok(())
    }

    // ── Approve / reject ─────────────────────────────────────────────

    /// Approve a pending session. `constraint_overrides` replaces the
    /// requested constraints per resource id when the owner tightened them.
    /// Returns the new app and the redirect URL for the app's callback.
    pub async fn approve(
        &self,
        token: &str,
        constraint_overrides: &HashMap<String, serde_json::Value>,
    ) -> Result<(App, String)> {
        let session = self.load_pending(token).await?;

        let now = Utc::now();
        let mut inputs = Vec::new();
        for requested in &session.requested_permissions {
            let constraints = constraint_overrides
                .get(&requested.resource_id)
                .cloned()
                .or_else(|| requested.constraints.clone())
                .unwrap_or(serde_json::Value::Null);
            let expires_at = requested
                .requested_duration_secs
                .map(|secs| now + Duration::seconds(secs as i64));
            for action in &requested.actions {
                inputs.push(PermissionInput {
                    resource_id: requested.resource_id.clone(),
                    action: action.clone(),
                    constraints: constraints.clone(),
                    valid_from: None,
                    expires_at,
                    time_window: None,
                    rate_limit_requests: None,
                    rate_limit_window_secs: None,
                    daily_quota: None,
                    monthly_quota: None,
                });
            }
        }

        let app = self
            .repo
            .approve_session(token, &session.app, &session.public_key, &inputs)
            .await?;

        tracing::info!(app_id = %app.id, app_name = %app.name, "connect session approved");
        let redirect = redirect_with(&session.redirect_uri, "approved", Some(&app.id))?;
        Ok((app, redirect))
    }

    /// Reject a pending session; returns the redirect URL for the callback.
    pub async fn reject(&self, token: &str) -> Result<String> {
        let session = self.load_pending(token).await?;
        self.repo
            .set_connect_session_status(token, ConnectSessionStatus::Rejected, None)
            .await?;
        tracing::info!(app_name = %session.app.name, "connect session rejected");
        redirect_with(&session.redirect_uri, "rejected", None)
    }

    /// Load a session that is still actionable, lazily expiring it when its
    /// deadline passed.
    async fn load_pending(&self, token: &str) -> Result<ConnectSession> {
        let session = self
            .repo
            .find_connect_session(token)
            .await?
            .ok_or_else(|| {
                GatewayError::new(ErrorCode::ErrInvalidRequest, "unknown session token")
            })?;

        if session.status != ConnectSessionStatus::Pending {
            return Err(GatewayError::new(
                ErrorCode::ErrSessionExpired,
                "session already settled",
            ));
        }
        if session.expires_at <= Utc::now() {
            self.repo
                .set_connect_session_status(token, ConnectSessionStatus::Expired, None)
                .await?;
            return Err(GatewayError::new(
                ErrorCode::ErrSessionExpired,
                "session expired before a decision",
            ));
        }
        Ok(session)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Collapse duplicate `(resourceId, action)` pairs, keeping first-seen
/// constraints for each resource.
fn dedup_requested(requested: &[RequestedPermissionInput]) -> Vec<RequestedPermission> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut result: Vec<RequestedPermission> = Vec::new();

    for ask in requested {
        let mut actions = Vec::new();
        for action in &ask.actions {
            if seen.insert((ask.resource_id.clone(), action.clone())) {
                actions.push(action.clone());
            }
        }
        if actions.is_empty() {
            continue;
        }
        result.push(RequestedPermission {
            resource_id: ask.resource_id.clone(),
            actions,
            constraints: ask.constraints.clone(),
            requested_duration_secs: ask.requested_duration,
        });
    }

    result
}

fn redirect_with(redirect_uri: &str, status: &str, app_id: Option<&str>) -> Result<String> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|_| GatewayError::internal("stored redirect URI no longer parses"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("status", status);
        if let Some(id) = app_id {
            query.append_pair("app_id", id);
        }
    }
    Ok(url.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use prg_store::MemoryRepository;

    fn test_public_key() -> String {
        // Any valid Ed25519 point; derived from a fixed secret.
        let sk = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        STANDARD.encode(sk.verifying_key().as_bytes())
    }

    fn service(repo: Arc<dyn Repository>) -> PairingService {
        PairingService::new(
            repo,
            HashSet::from(["llm:groq".to_string(), "llm:gemini".to_string()]),
            "https://gw.example.net/".into(),
            600,
            900,
        )
    }

    fn prepare_request(connect_code: &str) -> PrepareRequest {
        PrepareRequest {
            connect_code: connect_code.into(),
            app: AppMetadata {
                name: "test app".into(),
                description: Some("a test".into()),
                homepage: None,
            },
            public_key: test_public_key(),
            requested_permissions: vec![RequestedPermissionInput {
                resource_id: "llm:groq".into(),
                actions: vec!["chat.completions".into()],
                constraints: Some(serde_json::json!({"allowedModels": ["llama-3.1-8b-instant"]})),
                requested_duration: None,
            }],
            redirect_uri: "https://app.example/cb".into(),
        }
    }

    #[tokio::test]
    async fn issue_prepare_approve_end_to_end() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo.clone());

        let (code, pairing_string) = service.issue_code().await.unwrap();
        assert!(pairing_string.starts_with("pair::https://gw.example.net::"));

        let prepared = service.prepare(prepare_request(&code.code)).await.unwrap();
        assert!(prepared.approval_url.contains(&prepared.session_token));

        let (app, redirect) = service
            .approve(&prepared.session_token, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(app.name, "test app");
        assert_eq!(
            redirect,
            format!("https://app.example/cb?status=approved&app_id={}", app.id)
        );

        let permission = repo
            .find_permission(&app.id, "llm:groq", "chat.completions")
            .await
            .unwrap()
            .unwrap();
        assert!(permission.constraints.get("allowedModels").is_some());
    }

    #[tokio::test]
    async fn connect_code_is_single_use() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo);

        let (code, _) = service.issue_code().await.unwrap();
        service.prepare(prepare_request(&code.code)).await.unwrap();

        let err = service
            .prepare(prepare_request(&code.code))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidConnectCode);
    }

    #[tokio::test]
    async fn unknown_code_rejected() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo);
        let err = service
            .prepare(prepare_request("never-issued-0123456789"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrInvalidConnectCode);
    }

    #[tokio::test]
    async fn prepare_validation_rejects_bad_input() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo);
        let (code, _) = service.issue_code().await.unwrap();

        let mut bad_key = prepare_request(&code.code);
        bad_key.public_key = "bm90LXRoaXJ0eS10d28=".into();
        assert_eq!(
            service.prepare(bad_key).await.unwrap_err().code,
            ErrorCode::ErrInvalidRequest
        );

        let mut bad_redirect = prepare_request(&code.code);
        bad_redirect.redirect_uri = "/relative/path".into();
        assert_eq!(
            service.prepare(bad_redirect).await.unwrap_err().code,
            ErrorCode::ErrInvalidRequest
        );

        let mut unknown_resource = prepare_request(&code.code);
        unknown_resource.requested_permissions[0].resource_id = "llm:unregistered".into();
        assert_eq!(
            service.prepare(unknown_resource).await.unwrap_err().code,
            ErrorCode::ErrUnknownResource
        );

        let mut bad_id = prepare_request(&code.code);
        bad_id.requested_permissions[0].resource_id = "LLM:Groq".into();
        assert_eq!(
            service.prepare(bad_id).await.unwrap_err().code,
            ErrorCode::ErrInvalidRequest
        );
    }

    #[tokio::test]
    async fn duplicate_permission_pairs_collapse() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo.clone());
        let (code, _) = service.issue_code().await.unwrap();

        let mut request = prepare_request(&code.code);
        request
            .requested_permissions
            .push(request.requested_permissions[0].clone());
        let prepared = service.prepare(request).await.unwrap();

        let session = repo
            .find_connect_session(&prepared.session_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.requested_permissions.len(), 1);
        assert_eq!(session.requested_permissions[0].actions.len(), 1);
    }

    #[tokio::test]
    async fn reject_redirects_without_app_id() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo);
        let (code, _) = service.issue_code().await.unwrap();
        let prepared = service.prepare(prepare_request(&code.code)).await.unwrap();

        let redirect = service.reject(&prepared.session_token).await.unwrap();
        assert_eq!(redirect, "https://app.example/cb?status=rejected");

        // A settled session cannot be approved afterwards.
        let err = service
            .approve(&prepared.session_token, &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrSessionExpired);
    }

    #[tokio::test]
    async fn admin_override_replaces_constraints() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let service = service(repo.clone());
        let (code, _) = service.issue_code().await.unwrap();
        let prepared = service.prepare(prepare_request(&code.code)).await.unwrap();

        let overrides = HashMap::from([(
            "llm:groq".to_string(),
            serde_json::json!({"allowedModels": ["llama-3.1-70b-versatile"], "maxOutputTokens": 512}),
        )]);
        let (app, _) = service.approve(&prepared.session_token, &overrides).await.unwrap();

        let permission = repo
            .find_permission(&app.id, "llm:groq", "chat.completions")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(permission.constraints["maxOutputTokens"], 512);
    }
}

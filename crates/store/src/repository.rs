//! The narrow persistence surface the core consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use prg_domain::app::{App, AppMetadata, AppStatus};
use prg_domain::error::Result;
use prg_domain::log::RequestLog;
use prg_domain::pairing::{ConnectSession, ConnectSessionStatus, PairingCode};
use prg_domain::permission::{PermissionInput, ResourcePermission};
use prg_domain::secret::{ResourceSecret, SecretStatus};

/// Outcome of a pairing-code consumption attempt.
///
/// `consume_pairing_code` must be serializable: of N concurrent calls with
/// the same code, exactly one observes [`ConsumeOutcome::Consumed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(String),
    AlreadyConsumed,
    Expired,
    NotFound,
}

/// Abstract CRUD over the gateway's entities.
///
/// Implementations must provide serializable semantics for
/// [`consume_pairing_code`](Repository::consume_pairing_code) and
/// [`approve_session`](Repository::approve_session); every other operation
/// only needs per-call atomicity.
#[async_trait]
pub trait Repository: Send + Sync {
    // ── Apps ─────────────────────────────────────────────────────────

    /// Look up an app regardless of status (the pipeline distinguishes
    /// "unknown app" from "disabled app").
    async fn find_app(&self, id: &str) -> Result<Option<App>>;

    /// Look up an app, filtering to `status = ACTIVE`.
    async fn find_app_by_id_active(&self, id: &str) -> Result<Option<App>> {
        Ok(self
            .find_app(id)
            .await?
            .filter(|app| app.status == AppStatus::Active))
    }

    async fn list_apps(&self) -> Result<Vec<App>>;

    async fn set_app_status(&self, id: &str, status: AppStatus) -> Result<()>;

    /// Insert a new app bound to `public_key`. Used by the approval flow;
    /// direct callers outside approval exist only in tests.
    async fn insert_app(&self, public_key: &str, metadata: &AppMetadata) -> Result<App>;

    // ── Permissions ──────────────────────────────────────────────────

    /// Attach permissions to an app, one row per `(resource_id, action)`.
    async fn bind_permissions(&self, app_id: &str, inputs: &[PermissionInput]) -> Result<()>;

    async fn find_permission(
        &self,
        app_id: &str,
        resource_id: &str,
        action: &str,
    ) -> Result<Option<ResourcePermission>>;

    async fn list_permissions(&self, app_id: &str) -> Result<Vec<ResourcePermission>>;

    // ── Resource secrets ─────────────────────────────────────────────

    async fn find_resource_secret(&self, resource_id: &str) -> Result<Option<ResourceSecret>>;

    async fn upsert_resource_secret(&self, secret: ResourceSecret) -> Result<()>;

    async fn set_resource_secret_status(
        &self,
        resource_id: &str,
        status: SecretStatus,
    ) -> Result<()>;

    // ── Pairing codes ────────────────────────────────────────────────

    async fn insert_pairing_code(&self, code: PairingCode) -> Result<()>;

    /// Consume a pairing code: exactly one concurrent caller wins.
    /// Returns the pairing-code id on success.
    async fn consume_pairing_code(&self, code: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome>;

    // ── Connect sessions ─────────────────────────────────────────────

    async fn create_connect_session(&self, session: ConnectSession) -> Result<()>;

    async fn find_connect_session(&self, token: &str) -> Result<Option<ConnectSession>>;

    async fn list_connect_sessions(
        &self,
        status: Option<ConnectSessionStatus>,
    ) -> Result<Vec<ConnectSession>>;

    async fn set_connect_session_status(
        &self,
        token: &str,
        status: ConnectSessionStatus,
        bound_app_id: Option<String>,
    ) -> Result<()>;

    /// Transactional approval: insert the app, bind the permissions and flip
    /// the session to `APPROVED` as one unit. Failure anywhere leaves no
    /// partial state behind.
    async fn approve_session(
        &self,
        token: &str,
        metadata: &AppMetadata,
        public_key: &str,
        permissions: &[PermissionInput],
    ) -> Result<App>;

    // ── Request logs ─────────────────────────────────────────────────

    /// Best-effort append; failures are logged by the implementation and
    /// must never surface to the request path.
    async fn append_request_log(&self, entry: RequestLog) -> Result<()>;

    async fn recent_request_logs(&self, limit: usize) -> Result<Vec<RequestLog>>;
}

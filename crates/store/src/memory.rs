//! In-process repository.
//!
//! Durable entities (apps, permissions, secrets) live in a single
//! `state.json` under the configured state path, loaded at construction and
//! rewritten after each mutation. Request logs append to `logs.jsonl` with a
//! bounded in-memory tail for the admin surface. Pairing codes, connect
//! sessions and everything counter-shaped are memory-only: correctness never
//! depends on their persistence.
//!
//! A single `RwLock` over the whole state is what makes
//! `consume_pairing_code` and `approve_session` serializable.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prg_domain::app::{App, AppMetadata, AppStatus};
use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_domain::log::RequestLog;
use prg_domain::pairing::{ConnectSession, ConnectSessionStatus, PairingCode};
use prg_domain::permission::{PermissionInput, PermissionStatus, ResourcePermission};
use prg_domain::secret::{ResourceSecret, SecretStatus};

use crate::repository::{ConsumeOutcome, Repository};

/// Request-log entries kept in memory for `recent_request_logs`.
const LOG_TAIL: usize = 1000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The slice of state that survives restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DurableState {
    apps: HashMap<String, App>,
    permissions: Vec<ResourcePermission>,
    secrets: HashMap<String, ResourceSecret>,
}

#[derive(Default)]
struct State {
    durable: DurableState,
    /// Keyed by code value.
    pairing_codes: HashMap<String, PairingCode>,
    /// Keyed by session token.
    sessions: HashMap<String, ConnectSession>,
    log_tail: VecDeque<RequestLog>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryRepository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryRepository {
    state: RwLock<State>,
    /// `None` = ephemeral (tests); `Some(dir)` = persist under `dir`.
    state_path: Option<PathBuf>,
}

impl MemoryRepository {
    /// Ephemeral repository with no file backing.
    pub fn ephemeral() -> Self {
        Self {
            state: RwLock::new(State::default()),
            state_path: None,
        }
    }

    /// Load or create the persistent repository under `state_path`.
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(|e| {
            GatewayError::internal(format!(
                "creating state dir {}: {e}",
                state_path.display()
            ))
        })?;

        let file = state_path.join("state.json");
        let durable = if file.exists() {
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| GatewayError::internal(format!("reading {}: {e}", file.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| GatewayError::internal(format!("parsing {}: {e}", file.display())))?
        } else {
            DurableState::default()
        };

        tracing::info!(
            path = %state_path.display(),
            apps = durable.apps.len(),
            secrets = durable.secrets.len(),
            "repository state loaded"
        );

        Ok(Self {
            state: RwLock::new(State {
                durable,
                ..State::default()
            }),
            state_path: Some(state_path.to_path_buf()),
        })
    }

    // ── Persistence helpers ──────────────────────────────────────────

    /// Rewrite `state.json`. Failures are logged, never propagated: the
    /// in-memory state is authoritative for the running process.
    fn persist(&self, durable: &DurableState) {
        let Some(dir) = &self.state_path else {
            return;
        };
        let file = dir.join("state.json");
        match serde_json::to_string_pretty(durable) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&file, json) {
                    tracing::warn!(path = %file.display(), error = %e, "state persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "state serialize failed"),
        }
    }

    fn append_log_line(&self, entry: &RequestLog) {
        let Some(dir) = &self.state_path else {
            return;
        };
        let file = dir.join("logs.jsonl");
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "request log serialize failed");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(path = %file.display(), error = %e, "request log append failed");
        }
    }

    // ── Locked mutations shared by trait methods ─────────────────────

    fn insert_app_locked(
        durable: &mut DurableState,
        public_key: &str,
        metadata: &AppMetadata,
    ) -> App {
        let app = App {
            id: format!("app_{}", Uuid::new_v4().simple()),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            homepage: metadata.homepage.clone(),
            public_key: public_key.to_string(),
            status: AppStatus::Active,
            created_at: Utc::now(),
        };
        durable.apps.insert(app.id.clone(), app.clone());
        app
    }

    fn bind_permissions_locked(
        durable: &mut DurableState,
        app_id: &str,
        inputs: &[PermissionInput],
    ) {
        for input in inputs {
            // (app, resource, action) is unique; a rebind replaces the row.
            durable.permissions.retain(|p| {
                !(p.app_id == app_id
                    && p.resource_id == input.resource_id
                    && p.action == input.action)
            });
            durable.permissions.push(ResourcePermission {
                id: format!("perm_{}", Uuid::new_v4().simple()),
                app_id: app_id.to_string(),
                resource_id: input.resource_id.clone(),
                action: input.action.clone(),
                status: PermissionStatus::Active,
                constraints: input.constraints.clone(),
                valid_from: input.valid_from,
                expires_at: input.expires_at,
                time_window: input.time_window.clone(),
                rate_limit_requests: input.rate_limit_requests,
                rate_limit_window_secs: input.rate_limit_window_secs,
                burst_limit: None,
                burst_window_secs: None,
                daily_quota: input.daily_quota,
                monthly_quota: input.monthly_quota,
                daily_token_budget: None,
                monthly_token_budget: None,
                created_at: Utc::now(),
            });
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    // ── Apps ─────────────────────────────────────────────────────────

    async fn find_app(&self, id: &str) -> Result<Option<App>> {
        Ok(self.state.read().durable.apps.get(id).cloned())
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        let mut apps: Vec<App> = self.state.read().durable.apps.values().cloned().collect();
        apps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(apps)
    }

    async fn set_app_status(&self, id: &str, status: AppStatus) -> Result<()> {
        let mut state = self.state.write();
        let app = state
            .durable
            .apps
            .get_mut(id)
            .ok_or_else(|| GatewayError::new(ErrorCode::ErrAppNotFound, format!("no app '{id}'")))?;
        app.status = status;
        self.persist(&state.durable);
        Ok(())
    }

    async fn insert_app(&self, public_key: &str, metadata: &AppMetadata) -> Result<App> {
        let mut state = self.state.write();
        let app = Self::insert_app_locked(&mut state.durable, public_key, metadata);
        self.persist(&state.durable);
        Ok(app)
    }

    // ── Permissions ──────────────────────────────────────────────────

    async fn bind_permissions(&self, app_id: &str, inputs: &[PermissionInput]) -> Result<()> {
        let mut state = self.state.write();
        Self::bind_permissions_locked(&mut state.durable, app_id, inputs);
        self.persist(&state.durable);
        Ok(())
    }

    async fn find_permission(
        &self,
        app_id: &str,
        resource_id: &str,
        action: &str,
    ) -> Result<Option<ResourcePermission>> {
        Ok(self
            .state
            .read()
            .durable
            .permissions
            .iter()
            .find(|p| p.app_id == app_id && p.resource_id == resource_id && p.action == action)
            .cloned())
    }

    async fn list_permissions(&self, app_id: &str) -> Result<Vec<ResourcePermission>> {
        Ok(self
            .state
            .read()
            .durable
            .permissions
            .iter()
            .filter(|p| p.app_id == app_id)
            .cloned()
            .collect())
    }

    // ── Resource secrets ─────────────────────────────────────────────

    async fn find_resource_secret(&self, resource_id: &str) -> Result<Option<ResourceSecret>> {
        Ok(self.state.read().durable.secrets.get(resource_id).cloned())
    }

    async fn upsert_resource_secret(&self, secret: ResourceSecret) -> Result<()> {
        let mut state = self.state.write();
        state
            .durable
            .secrets
            .insert(secret.resource_id.clone(), secret);
        self.persist(&state.durable);
        Ok(())
    }

    async fn set_resource_secret_status(
        &self,
        resource_id: &str,
        status: SecretStatus,
    ) -> Result<()> {
        let mut state = self.state.write();
        let secret = state.durable.secrets.get_mut(resource_id).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ErrResourceNotConfigured,
                format!("no secret for '{resource_id}'"),
            )
        })?;
        secret.status = status;
        self.persist(&state.durable);
        Ok(())
    }

    // ── Pairing codes ────────────────────────────────────────────────

    async fn insert_pairing_code(&self, code: PairingCode) -> Result<()> {
        self.state
            .write()
            .pairing_codes
            .insert(code.code.clone(), code);
        Ok(())
    }

    async fn consume_pairing_code(&self, code: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let mut state = self.state.write();
        let Some(record) = state.pairing_codes.get_mut(code) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if record.consumed_at.is_some() {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        if record.expires_at <= now {
            return Ok(ConsumeOutcome::Expired);
        }
        record.consumed_at = Some(now);
        Ok(ConsumeOutcome::Consumed(record.id.clone()))
    }

    // ── Connect sessions ─────────────────────────────────────────────

    async fn create_connect_session(&self, session: ConnectSession) -> Result<()> {
        self.state
            .write()
            .sessions
            .insert(session.token.clone(), session);
        Ok(())
    }

    async fn find_connect_session(&self, token: &str) -> Result<Option<ConnectSession>> {
        Ok(self.state.read().sessions.get(token).cloned())
    }

    async fn list_connect_sessions(
        &self,
        status: Option<ConnectSessionStatus>,
    ) -> Result<Vec<ConnectSession>> {
        let state = self.state.read();
        let mut sessions: Vec<ConnectSession> = state
            .sessions
            .values()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn set_connect_session_status(
        &self,
        token: &str,
        status: ConnectSessionStatus,
        bound_app_id: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let session = state.sessions.get_mut(token).ok_or_else(|| {
            GatewayError::new(ErrorCode::ErrInvalidRequest, "unknown session token")
        })?;
        session.status = status;
        if bound_app_id.is_some() {
            session.bound_app_id = bound_app_id;
        }
        Ok(())
    }

    async fn approve_session(
        &self,
        token: &str,
        metadata: &AppMetadata,
        public_key: &str,
        permissions: &[PermissionInput],
    ) -> Result<App> {
        let mut state = self.state.write();
        let State {
            durable, sessions, ..
        } = &mut *state;

        // Re-check under the lock: a concurrent approve/reject/expire must
        // not leave a second app behind.
        let session = sessions.get_mut(token).ok_or_else(|| {
            GatewayError::new(ErrorCode::ErrInvalidRequest, "unknown session token")
        })?;
        if session.status != ConnectSessionStatus::Pending {
            return Err(GatewayError::new(
                ErrorCode::ErrSessionExpired,
                "session is no longer pending",
            ));
        }

        let app = Self::insert_app_locked(durable, public_key, metadata);
        Self::bind_permissions_locked(durable, &app.id, permissions);
        session.status = ConnectSessionStatus::Approved;
        session.bound_app_id = Some(app.id.clone());

        self.persist(durable);
        Ok(app)
    }

    // ── Request logs ─────────────────────────────────────────────────

    async fn append_request_log(&self, entry: RequestLog) -> Result<()> {
        self.append_log_line(&entry);
        let mut state = self.state.write();
        state.log_tail.push_back(entry);
        while state.log_tail.len() > LOG_TAIL {
            state.log_tail.pop_front();
        }
        Ok(())
    }

    async fn recent_request_logs(&self, limit: usize) -> Result<Vec<RequestLog>> {
        let state = self.state.read();
        Ok(state
            .log_tail
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

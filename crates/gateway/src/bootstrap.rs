//! AppState construction and background-task spawning.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sha2::{Digest, Sha256};

use prg_adapters::{AdapterRegistry, ResourceAdapter};
use prg_counters::CounterStore;
use prg_domain::config::{Config, ConfigSeverity};
use prg_domain::pairing::ConnectSessionStatus;
use prg_pairing::PairingService;
use prg_pop::MemoryNonceStore;
use prg_store::{MemoryRepository, Repository};
use prg_vault::{MasterKey, SecretVault};

use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Vault ────────────────────────────────────────────────────────
    let master_key_hex = std::env::var(&config.vault.master_key_env).with_context(|| {
        format!(
            "vault master key env var '{}' is not set (generate one with `resgate keygen`)",
            config.vault.master_key_env
        )
    })?;
    let master_key = MasterKey::from_hex(&master_key_hex)
        .map_err(|e| anyhow::anyhow!("vault master key: {e}"))?;
    let vault = Arc::new(SecretVault::new(&master_key));
    tracing::info!("secret vault ready");

    // ── Repository ───────────────────────────────────────────────────
    let repo: Arc<dyn Repository> = Arc::new(
        MemoryRepository::open(&config.store.state_path)
            .map_err(|e| anyhow::anyhow!("opening repository: {e}"))?,
    );

    // ── Adapters ─────────────────────────────────────────────────────
    let adapters = Arc::new(AdapterRegistry::from_config(&config));
    if adapters.is_empty() {
        anyhow::bail!("no resource adapters registered");
    }

    // ── Pairing ──────────────────────────────────────────────────────
    let registered: HashSet<String> = adapters
        .list()
        .iter()
        .map(|a| a.descriptor().id.clone())
        .collect();
    let pairing = Arc::new(PairingService::new(
        repo.clone(),
        registered,
        config.pairing.proxy_url.clone(),
        config.pairing.code_ttl_secs,
        config.pairing.session_ttl_secs,
    ));

    // ── Admin token (read once at startup) ───────────────────────────
    let admin_token_hash = match std::env::var(&config.admin.token_env) {
        Ok(token) if !token.trim().is_empty() => {
            Some(Sha256::digest(token.trim().as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env = %config.admin.token_env,
                "no admin token configured — admin endpoints are open (dev mode)"
            );
            None
        }
    };

    Ok(AppState {
        config,
        repo,
        adapters,
        nonces: Arc::new(MemoryNonceStore::new()),
        vault,
        counters: Arc::new(CounterStore::new()),
        pairing,
        admin_token_hash,
    })
}

/// Flip pending connect sessions past their deadline to `EXPIRED`.
/// Approval/reject also expire lazily; this keeps the admin listing honest
/// for sessions nobody touches.
pub fn spawn_session_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let pending = match state
                .repo
                .list_connect_sessions(Some(ConnectSessionStatus::Pending))
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!(error = %e, "session sweep listing failed");
                    continue;
                }
            };

            let now = Utc::now();
            for session in pending {
                if session.expires_at <= now {
                    if let Err(e) = state
                        .repo
                        .set_connect_session_status(
                            &session.token,
                            ConnectSessionStatus::Expired,
                            None,
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "session expiry failed");
                    } else {
                        tracing::info!(app_name = %session.app.name, "connect session expired");
                    }
                }
            }
        }
    });
}

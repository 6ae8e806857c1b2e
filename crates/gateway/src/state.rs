use std::sync::Arc;

use prg_adapters::AdapterRegistry;
use prg_counters::CounterStore;
use prg_domain::config::Config;
use prg_pairing::PairingService;
use prg_pop::MemoryNonceStore;
use prg_store::Repository;
use prg_vault::SecretVault;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, repository, adapters
/// - **Auth** — nonce store, vault
/// - **Limits** — counter store
/// - **Pairing** — the prepare/approve service
/// - **Security (startup-computed)** — admin token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub adapters: Arc<AdapterRegistry>,

    // ── Auth ──────────────────────────────────────────────────────────
    pub nonces: Arc<MemoryNonceStore>,
    pub vault: Arc<SecretVault>,

    // ── Limits ────────────────────────────────────────────────────────
    pub counters: Arc<CounterStore>,

    // ── Pairing ───────────────────────────────────────────────────────
    pub pairing: Arc<PairingService>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the admin bearer token (read once at startup).
    /// `None` = dev mode (admin endpoints accessible without auth).
    pub admin_token_hash: Option<Vec<u8>>,
}

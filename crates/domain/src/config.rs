//! Gateway configuration.
//!
//! Loaded from a TOML file, overridable per field by the CLI. Secrets (the
//! vault master key, the admin token) are **not** stored here; the config
//! only names the environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Per-resource overrides keyed by resource id (e.g. `"llm:groq"`).
    #[serde(default)]
    pub resources: HashMap<String, ResourceConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8420")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP rate limit for the public connect surface. `None` disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<IpRateLimitConfig>,
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
    /// Hard deadline for one data-plane request, streaming included.
    /// `None` = no deadline beyond client disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_deadline_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8420,
            host: "127.0.0.1".into(),
            cors: CorsConfig::default(),
            rate_limit: None,
            max_concurrent_requests: 256,
            request_deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PoP auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum |now − x-ts| accepted, in seconds.
    #[serde(default = "d_300")]
    pub clock_skew_secs: u64,
    /// How long a `(appId, nonce)` pair is remembered.
    #[serde(default = "d_600")]
    pub nonce_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: 300,
            nonce_ttl_secs: 600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault / store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the 32-byte hex master key.
    #[serde(default = "d_master_key_env")]
    pub master_key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: d_master_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for persisted gateway state (apps, permissions, secrets, logs).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fallbacks applied when a permission carries no limits of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "d_60")]
    pub default_rate_limit_requests: u64,
    #[serde(default = "d_60")]
    pub default_rate_limit_window_secs: u64,
    #[serde(default = "d_1000")]
    pub default_daily_budget: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_monthly_budget: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_requests: 60,
            default_rate_limit_window_secs: 60,
            default_daily_budget: 1000,
            default_monthly_budget: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pairing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Lifetime of a freshly minted pairing code.
    #[serde(default = "d_600")]
    pub code_ttl_secs: u64,
    /// Lifetime of a pending connect session.
    #[serde(default = "d_900")]
    pub session_ttl_secs: u64,
    /// Public base URL of this gateway, used in pairing strings and
    /// approval URLs (e.g. `https://gateway.example.net`).
    #[serde(default = "d_proxy_url")]
    pub proxy_url: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: 600,
            session_ttl_secs: 900,
            proxy_url: d_proxy_url(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token. Unset or empty
    /// = dev mode (admin endpoints accessible without auth).
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-resource overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceConfig {
    /// Overrides the adapter's built-in upstream base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Resource-wide rate limit, any action. Sits between a permission's
    /// own limit and the global default; both fields must be set together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Check the config for problems a server boot would hit later.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.auth.clock_skew_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "auth.clock_skew_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if self.auth.nonce_ttl_secs < self.auth.clock_skew_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "auth.nonce_ttl_secs".into(),
                message: "must be >= auth.clock_skew_secs or replays inside the skew window go undetected".into(),
            });
        }
        if self.limits.default_rate_limit_requests == 0
            || self.limits.default_rate_limit_window_secs == 0
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "limits".into(),
                message: "default rate limit and window must be > 0".into(),
            });
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit".into(),
                    message: "requests_per_second and burst_size must be > 0".into(),
                });
            }
        }
        if self.pairing.proxy_url == d_proxy_url() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "pairing.proxy_url".into(),
                message: "using the localhost default; pairing strings will not work from other machines".into(),
            });
        } else if !self.pairing.proxy_url.starts_with("http://")
            && !self.pairing.proxy_url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "pairing.proxy_url".into(),
                message: "must be an absolute http(s) URL".into(),
            });
        }
        for (resource_id, resource) in &self.resources {
            if !crate::permission::is_valid_resource_id(resource_id) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("resources.\"{resource_id}\""),
                    message: "not a valid <type>:<provider> resource id".into(),
                });
            }
            match (
                resource.rate_limit_requests,
                resource.rate_limit_window_secs,
            ) {
                (None, None) => {}
                (Some(max), Some(window)) if max > 0 && window > 0 => {}
                _ => issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("resources.\"{resource_id}\""),
                    message: "rate_limit_requests and rate_limit_window_secs must be set together and > 0".into(),
                }),
            }
        }

        issues
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8420() -> u16 {
    8420
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_256() -> usize {
    256
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_900() -> u64 {
    900
}
fn d_1000() -> u64 {
    1000
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8420".into(),
        "http://127.0.0.1:8420".into(),
    ]
}
fn d_master_key_env() -> String {
    "PRG_MASTER_KEY".into()
}
fn d_admin_token_env() -> String {
    "PRG_ADMIN_TOKEN".into()
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_proxy_url() -> String {
    "http://127.0.0.1:8420".into()
}

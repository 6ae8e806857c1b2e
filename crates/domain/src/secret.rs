use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretStatus {
    Active,
    Disabled,
}

/// An envelope-encrypted upstream credential for one resource.
///
/// `encrypted_key` is AES-256-GCM ciphertext (tag appended), `key_iv` the
/// 12-byte nonce; both standard base64. The plaintext only ever exists in
/// memory for the duration of one upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSecret {
    pub resource_id: String,
    pub status: SecretStatus,
    pub encrypted_key: String,
    pub key_iv: String,
    /// Adapter-specific settings, e.g. a custom `baseUrl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

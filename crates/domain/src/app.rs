use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration state of an app. Only `ACTIVE` apps authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Active,
    Suspended,
    Revoked,
}

/// A registered third-party application bound to an Ed25519 public key.
///
/// Created exclusively by the pairing approval flow; the key never changes
/// after binding. Apps are soft-retained while request logs reference them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Ed25519 verifying key, 32 bytes, standard base64.
    pub public_key: String,
    pub status: AppStatus,
    pub created_at: DateTime<Utc>,
}

/// Metadata an app supplies about itself during pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&AppStatus::Suspended).unwrap(),
            r#""SUSPENDED""#
        );
    }
}

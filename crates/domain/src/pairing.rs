//! Pairing-flow entities: single-use pairing codes and the pending
//! connect sessions they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppMetadata;

/// A single-use code minted by the owner and consumed by `prepare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingCode {
    pub id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectSessionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ConnectSessionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One permission ask inside a prepare request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedPermission {
    pub resource_id: String,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<serde_json::Value>,
    /// Requested lifetime in seconds; the owner may shorten it at approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_duration_secs: Option<u64>,
}

/// A pending approval created by `prepare`.
///
/// The token is an opaque correlation handle; it is never accepted on the
/// data plane and derives no key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSession {
    pub token: String,
    pub pairing_code_id: String,
    /// Ed25519 verifying key the app presented, standard base64.
    pub public_key: String,
    pub app: AppMetadata,
    pub requested_permissions: Vec<RequestedPermission>,
    pub redirect_uri: String,
    pub status: ConnectSessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_app_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_not_terminal() {
        assert!(!ConnectSessionStatus::Pending.is_terminal());
        assert!(ConnectSessionStatus::Approved.is_terminal());
        assert!(ConnectSessionStatus::Rejected.is_terminal());
        assert!(ConnectSessionStatus::Expired.is_terminal());
    }
}

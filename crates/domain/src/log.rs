use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a data-plane request attempt. Written exactly once per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allowed,
    DeniedAuth,
    DeniedPermission,
    DeniedConstraint,
    DeniedRateLimit,
    DeniedBudget,
    Error,
}

/// Token usage extracted from an upstream response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Model the provider reports having served, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Append-only audit record for one request attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    /// Absent when the request failed before an app was identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub resource_id: String,
    pub action: String,
    pub endpoint: String,
    pub method: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_wire_format() {
        assert_eq!(
            serde_json::to_string(&Decision::DeniedRateLimit).unwrap(),
            r#""DENIED_RATE_LIMIT""#
        );
        assert_eq!(
            serde_json::to_string(&Decision::Allowed).unwrap(),
            r#""ALLOWED""#
        );
    }
}

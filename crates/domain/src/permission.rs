//! Resource permissions: the per-app grants the enforcement engine and
//! counter layer read their inputs from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resource IDs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `<resourceType>:<provider>`, e.g. `llm:groq`.
pub const RESOURCE_ID_PATTERN: &str = "^[a-z]+:[a-z0-9-]+$";

/// Whether `id` is a well-formed resource id (`<type>:<provider>`).
pub fn is_valid_resource_id(id: &str) -> bool {
    // Equivalent to RESOURCE_ID_PATTERN without compiling a regex per call.
    let Some((ty, provider)) = id.split_once(':') else {
        return false;
    };
    !ty.is_empty()
        && !provider.is_empty()
        && ty.bytes().all(|b| b.is_ascii_lowercase())
        && provider
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Split a resource id into `(resource_type, provider)`.
pub fn split_resource_id(id: &str) -> Option<(&str, &str)> {
    if is_valid_resource_id(id) {
        id.split_once(':')
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionStatus {
    Active,
    Revoked,
}

/// Hour-of-day window in a named timezone, with optional weekday filter.
///
/// `start_hour > end_hour` wraps overnight (e.g. 22–6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// IANA timezone name, e.g. `"Europe/Paris"`.
    pub timezone: String,
    pub start_hour: u8,
    pub end_hour: u8,
    /// Weekday numbers 0 (Sunday) through 6. Empty = every day.
    #[serde(default)]
    pub allowed_days: Vec<u8>,
}

/// A grant of one `(resource, action)` pair to one app.
///
/// `constraints` is an opaque policy blob interpreted by the enforcement
/// engine; the core never inspects it beyond the recognised keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub id: String,
    pub app_id: String,
    pub resource_id: String,
    pub action: String,
    pub status: PermissionStatus,
    #[serde(default)]
    pub constraints: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_quota: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quota: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_token_budget: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_token_budget: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Input for binding a permission at approval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionInput {
    pub resource_id: String,
    pub action: String,
    #[serde(default)]
    pub constraints: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_quota: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quota: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_resource_ids() {
        assert!(is_valid_resource_id("llm:groq"));
        assert!(is_valid_resource_id("llm:gemini-1"));
        assert!(is_valid_resource_id("mail:fastmail"));
    }

    #[test]
    fn invalid_resource_ids() {
        assert!(!is_valid_resource_id("llm"));
        assert!(!is_valid_resource_id("llm:"));
        assert!(!is_valid_resource_id(":groq"));
        assert!(!is_valid_resource_id("LLM:groq"));
        assert!(!is_valid_resource_id("llm:Groq"));
        assert!(!is_valid_resource_id("llm:gro q"));
        assert!(!is_valid_resource_id("llm:groq:extra"));
    }

    #[test]
    fn matches_published_pattern() {
        let re = regex::Regex::new(RESOURCE_ID_PATTERN).unwrap();
        for id in ["llm:groq", "llm:gemini-15", "a:b", "LLM:x", "llm:", "x"] {
            assert_eq!(re.is_match(id), is_valid_resource_id(id), "{id}");
        }
    }

    #[test]
    fn split_gives_type_and_provider() {
        assert_eq!(split_resource_id("llm:groq"), Some(("llm", "groq")));
        assert_eq!(split_resource_id("bogus"), None);
    }
}

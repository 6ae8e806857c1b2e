//! Counter key derivation.
//!
//! Keys are plain strings so a future external counter service (Redis or
//! similar) can take them as-is.

use chrono::{DateTime, Utc};

use crate::store::BudgetPeriod;

/// `rl:<appId>[:<resourceId>[:<action|*>]]` — most specific wins at the
/// call site; this only formats.
pub fn rate_limit_key(app_id: &str, resource_id: Option<&str>, action: Option<&str>) -> String {
    match (resource_id, action) {
        (Some(resource), Some(action)) => format!("rl:{app_id}:{resource}:{action}"),
        (Some(resource), None) => format!("rl:{app_id}:{resource}:*"),
        _ => format!("rl:{app_id}"),
    }
}

/// `rlm:<appId>:<resourceId>:<action>:<model>`
pub fn model_rate_limit_key(app_id: &str, resource_id: &str, action: &str, model: &str) -> String {
    format!("rlm:{app_id}:{resource_id}:{action}:{model}")
}

/// `bud:<appId>:<DAILY|MONTHLY>`
pub fn budget_key(app_id: &str, period: BudgetPeriod) -> String {
    format!("bud:{app_id}:{period}")
}

/// `tok:<appId>:<resourceId>:<model>:<yyyymmdd>`
pub fn token_key(app_id: &str, resource_id: &str, model: &str, day: DateTime<Utc>) -> String {
    format!(
        "tok:{app_id}:{resource_id}:{model}:{}",
        day.format("%Y%m%d")
    )
}

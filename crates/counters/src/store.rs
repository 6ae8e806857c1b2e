//! In-memory counter store.
//!
//! Single-node implementation: a lock per counter family. A multi-node
//! deployment replaces this with an external atomic counter service behind
//! the same operations.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Days of per-model token usage kept before pruning on write.
const TOKEN_RETENTION_DAYS: i64 = 45;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one fixed-window rate check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: u64,
    /// When the current window rolls over.
    pub reset_at: DateTime<Utc>,
}

/// Result of one budget check.
#[derive(Debug, Clone)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub used: u64,
    pub limit: u64,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPeriod {
    Daily,
    Monthly,
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "DAILY",
            Self::Monthly => "MONTHLY",
        })
    }
}

/// One row of the admin usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TokenUsageRow {
    pub key: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WindowEntry {
    window_start: DateTime<Utc>,
    count: u64,
}

struct BudgetEntry {
    period_start: DateTime<Utc>,
    used: u64,
}

struct TokenEntry {
    day: DateTime<Utc>,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CounterStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CounterStore {
    windows: Mutex<HashMap<String, WindowEntry>>,
    budgets: Mutex<HashMap<String, BudgetEntry>>,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            budgets: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    // ── Rate limits ──────────────────────────────────────────────────

    /// Fixed-window check: increment the key's counter, deny once the count
    /// exceeds `limit`. `reset_at` is always `window_start + window`.
    pub fn check_rate(&self, key: &str, limit: u64, window_secs: u64, now: DateTime<Utc>) -> RateDecision {
        let window = Duration::seconds(window_secs as i64);
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            window_start: now,
            count: 0,
        });

        if now - entry.window_start >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;

        RateDecision {
            allowed: entry.count <= limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.window_start + window,
        }
    }

    // ── Budgets ──────────────────────────────────────────────────────

    /// Conditional atomic increment: deny (and do not count) when one more
    /// request would cross `limit` in the current period.
    pub fn check_budget(
        &self,
        key: &str,
        limit: u64,
        period: BudgetPeriod,
        now: DateTime<Utc>,
    ) -> BudgetDecision {
        let start = period_start(period, now);
        let resets_at = period_end(period, now);

        let mut budgets = self.budgets.lock();
        let entry = budgets.entry(key.to_string()).or_insert(BudgetEntry {
            period_start: start,
            used: 0,
        });
        if entry.period_start != start {
            entry.period_start = start;
            entry.used = 0;
        }

        if entry.used + 1 > limit {
            return BudgetDecision {
                allowed: false,
                used: entry.used,
                limit,
                resets_at,
            };
        }
        entry.used += 1;
        BudgetDecision {
            allowed: true,
            used: entry.used,
            limit,
            resets_at,
        }
    }

    // ── Token usage (observational) ──────────────────────────────────

    /// Accumulate token usage for a day-scoped key. Never consulted for
    /// deny decisions in this core.
    pub fn record_tokens(
        &self,
        key: &str,
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
        now: DateTime<Utc>,
    ) {
        let mut tokens = self.tokens.lock();

        let cutoff = now - Duration::days(TOKEN_RETENTION_DAYS);
        tokens.retain(|_, entry| entry.day > cutoff);

        let entry = tokens.entry(key.to_string()).or_insert(TokenEntry {
            day: now,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        });
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.total_tokens += total_tokens;
    }

    /// Sorted snapshot for the admin usage endpoint.
    pub fn usage_snapshot(&self) -> Vec<TokenUsageRow> {
        let tokens = self.tokens.lock();
        let mut rows: Vec<TokenUsageRow> = tokens
            .iter()
            .map(|(key, entry)| TokenUsageRow {
                key: key.clone(),
                input_tokens: entry.input_tokens,
                output_tokens: entry.output_tokens,
                total_tokens: entry.total_tokens,
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Period arithmetic ────────────────────────────────────────────────

fn period_start(period: BudgetPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let start = match period {
        BudgetPeriod::Daily => date,
        BudgetPeriod::Monthly => date.with_day(1).unwrap_or(date),
    };
    Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn period_end(period: BudgetPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        BudgetPeriod::Daily => period_start(period, now) + Duration::days(1),
        BudgetPeriod::Monthly => {
            let date = now.date_naive();
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            let first = chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date);
            Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap_or_default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

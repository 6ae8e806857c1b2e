//! Rate-limit, budget and token-usage counters.
//!
//! All counters are keyed by derived strings (`rl:`/`rlm:`/`bud:`/`tok:`)
//! and mutate atomically under a per-store lock, so N workers racing on one
//! key observe exactly the limit. Nothing here persists across restarts;
//! only current-window accuracy is lost on reboot, never correctness.

pub mod keys;
pub mod store;

pub use keys::{budget_key, model_rate_limit_key, rate_limit_key, token_key};
pub use store::{BudgetDecision, BudgetPeriod, CounterStore, RateDecision, TokenUsageRow};

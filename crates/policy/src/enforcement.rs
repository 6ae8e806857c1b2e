//! Policy derivation and fail-closed rule evaluation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use prg_domain::error::{ErrorCode, GatewayError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An additional fixed-window limit applying to a single model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRateLimit {
    pub model: String,
    pub max: u64,
    /// Window length in seconds.
    pub window: u64,
}

/// The recognised keys of a constraints blob, everything else ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnforcementPolicy {
    pub allowed_models: Vec<String>,
    pub max_output_tokens: Option<u64>,
    pub allow_tools: Option<bool>,
    pub allow_streaming: Option<bool>,
    pub model_rate_limits: Vec<ModelRateLimit>,
}

impl EnforcementPolicy {
    /// Extract the policy from an opaque constraints blob.
    ///
    /// Unknown keys and values of the wrong shape are skipped, not errors:
    /// constraints are owner-supplied JSON and the deny logic must not be
    /// disabled by a typo in an unrelated key.
    pub fn from_constraints(constraints: &Value) -> Self {
        let Some(obj) = constraints.as_object() else {
            return Self::default();
        };

        let allowed_models = obj
            .get("allowedModels")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let max_output_tokens = obj
            .get("maxOutputTokens")
            .and_then(Value::as_u64)
            .filter(|&n| n > 0);

        let allow_tools = obj.get("allowTools").and_then(Value::as_bool);
        let allow_streaming = obj.get("allowStreaming").and_then(Value::as_bool);

        let model_rate_limits = obj
            .get("modelRateLimits")
            .and_then(Value::as_array)
            .map(|limits| {
                limits
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .filter(|l: &ModelRateLimit| l.max > 0 && l.window > 0)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            allowed_models,
            max_output_tokens,
            allow_tools,
            allow_streaming,
            model_rate_limits,
        }
    }
}

/// Whether any constraint in `constraints` can deny a request. When false
/// the pipeline skips enforcement (and the enforcement-side body parse)
/// entirely.
pub fn has_enforceable_constraints(constraints: &Value) -> bool {
    let policy = EnforcementPolicy::from_constraints(constraints);
    !policy.allowed_models.is_empty()
        || policy.max_output_tokens.is_some()
        || policy.allow_tools == Some(false)
        || policy.allow_streaming == Some(false)
        || !policy.model_rate_limits.is_empty()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enforcement fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The adapter's normalised view of one request, consumed by [`enforce`].
/// The engine never re-parses the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnforcementFields {
    /// Bare model name (`models/` prefix stripped).
    pub model: Option<String>,
    pub stream: Option<bool>,
    pub uses_tools: Option<bool>,
    /// The output cap the request asked for. `None` when the request left
    /// it to the provider default (the adapter clamps shaping either way).
    pub max_output_tokens: Option<u64>,
}

/// `models/gemini-1.5-flash` and `gemini-1.5-flash` name the same model.
fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

fn model_matches(allowed: &str, requested: &str) -> bool {
    bare_model(allowed) == bare_model(requested)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate the fail-closed rules in order, returning the first violation.
pub fn enforce(policy: &EnforcementPolicy, fields: &EnforcementFields) -> Result<(), GatewayError> {
    // 1. Model allow-list.
    if !policy.allowed_models.is_empty() {
        match &fields.model {
            None => {
                return Err(GatewayError::new(
                    ErrorCode::ErrPolicyViolation,
                    "allowedModels is set but the request's model could not be determined",
                ));
            }
            Some(model) => {
                if !policy.allowed_models.iter().any(|a| model_matches(a, model)) {
                    return Err(GatewayError::new(
                        ErrorCode::ErrModelNotAllowed,
                        format!("model '{model}' is not in the permission's allow-list"),
                    ));
                }
            }
        }
    }

    // 2. Output-token cap.
    if let (Some(cap), Some(requested)) = (policy.max_output_tokens, fields.max_output_tokens) {
        if requested > cap {
            return Err(GatewayError::new(
                ErrorCode::ErrMaxTokensExceeded,
                format!("requested {requested} output tokens, permission caps at {cap}"),
            ));
        }
    }

    // 3. Tools gate.
    if policy.allow_tools == Some(false) {
        match fields.uses_tools {
            None => {
                return Err(GatewayError::new(
                    ErrorCode::ErrPolicyViolation,
                    "allowTools=false but tool usage could not be determined",
                ));
            }
            Some(true) => {
                return Err(GatewayError::new(
                    ErrorCode::ErrToolsNotAllowed,
                    "this permission does not allow tool use",
                ));
            }
            Some(false) => {}
        }
    }

    // 4. Streaming gate.
    if policy.allow_streaming == Some(false) {
        match fields.stream {
            None => {
                return Err(GatewayError::new(
                    ErrorCode::ErrPolicyViolation,
                    "allowStreaming=false but streaming intent could not be determined",
                ));
            }
            Some(true) => {
                return Err(GatewayError::new(
                    ErrorCode::ErrStreamingNotAllowed,
                    "this permission does not allow streaming",
                ));
            }
            Some(false) => {}
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! The shared chat-completions contract.
//!
//! Both LLM adapters accept the OpenAI-style `ChatCompletionRequest` wire
//! shape. Validation is schema-first: a request is well-formed or it is
//! rejected with `ERR_CONSTRAINT_VIOLATION` and a human-readable reason.
//! Shaping fixes the effective output cap into the body and is a fixed
//! point, so shaping a shaped request changes nothing.

use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_policy::{EnforcementFields, EnforcementPolicy};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::traits::Validated;

/// The one action chat adapters support today.
pub const ACTION_CHAT_COMPLETIONS: &str = "chat.completions";

pub const VALID_ROLES: [&str; 4] = ["system", "user", "assistant", "tool"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw request view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fields validation looks at. Everything else passes through the
/// shaped body untouched.
#[derive(Debug, Default, Deserialize)]
struct RawChatRequest {
    model: Option<Value>,
    messages: Option<Value>,
    temperature: Option<Value>,
    top_p: Option<Value>,
    n: Option<Value>,
    max_tokens: Option<Value>,
    max_completion_tokens: Option<Value>,
    stream: Option<Value>,
    tools: Option<Value>,
    tool_choice: Option<Value>,
    response_format: Option<Value>,
    stop: Option<Value>,
    seed: Option<Value>,
}

fn violation(message: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorCode::ErrConstraintViolation, message)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation + shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a chat-completions body and produce the shaped payload plus the
/// enforcement fields the policy engine consumes.
///
/// `provider_default_max_tokens` is the adapter's cap when neither the
/// request nor the constraints specify one.
pub fn validate_chat_request(
    input: &Value,
    constraints: &Value,
    provider_default_max_tokens: u64,
) -> Result<Validated> {
    let obj = input
        .as_object()
        .ok_or_else(|| violation("request body must be a JSON object"))?;

    let raw: RawChatRequest = serde_json::from_value(input.clone())
        .map_err(|e| violation(format!("malformed request: {e}")))?;

    // ── model ────────────────────────────────────────────────────────
    let model = match &raw.model {
        Some(Value::String(m)) if !m.trim().is_empty() => m.trim().to_string(),
        Some(Value::String(_)) => return Err(violation("'model' must not be empty")),
        Some(_) => return Err(violation("'model' must be a string")),
        None => return Err(violation("'model' is required")),
    };

    // ── messages ─────────────────────────────────────────────────────
    let messages = match &raw.messages {
        Some(Value::Array(msgs)) if !msgs.is_empty() => msgs,
        Some(Value::Array(_)) => return Err(violation("'messages' must not be empty")),
        Some(_) => return Err(violation("'messages' must be an array")),
        None => return Err(violation("'messages' is required")),
    };
    for (i, message) in messages.iter().enumerate() {
        validate_message(i, message)?;
    }

    // ── sampling params ──────────────────────────────────────────────
    if let Some(v) = &raw.temperature {
        let t = v
            .as_f64()
            .ok_or_else(|| violation("'temperature' must be a number"))?;
        if !(0.0..=2.0).contains(&t) {
            return Err(violation("'temperature' must be between 0 and 2"));
        }
    }
    if let Some(v) = &raw.top_p {
        let p = v.as_f64().ok_or_else(|| violation("'top_p' must be a number"))?;
        if !(0.0..=1.0).contains(&p) {
            return Err(violation("'top_p' must be between 0 and 1"));
        }
    }
    if let Some(v) = &raw.n {
        let n = v.as_i64().ok_or_else(|| violation("'n' must be an integer"))?;
        if !(1..=10).contains(&n) {
            return Err(violation("'n' must be between 1 and 10"));
        }
    }
    if let Some(v) = &raw.seed {
        if v.as_i64().is_none() {
            return Err(violation("'seed' must be an integer"));
        }
    }
    if let Some(v) = &raw.stop {
        let ok = matches!(v, Value::String(_))
            || v.as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false);
        if !ok {
            return Err(violation("'stop' must be a string or an array of strings"));
        }
    }
    if let Some(v) = &raw.response_format {
        if !v.is_object() {
            return Err(violation("'response_format' must be an object"));
        }
    }

    // ── output caps ──────────────────────────────────────────────────
    let requested_cap = positive_int(&raw.max_tokens, "max_tokens")?
        .or(positive_int(&raw.max_completion_tokens, "max_completion_tokens")?);

    // ── stream / tools ───────────────────────────────────────────────
    let stream = match &raw.stream {
        Some(v) => v
            .as_bool()
            .ok_or_else(|| violation("'stream' must be a boolean"))?,
        None => false,
    };

    let tools_declared = match &raw.tools {
        Some(Value::Array(tools)) => !tools.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => return Err(violation("'tools' must be an array")),
    };
    let tool_choice_forces = matches!(
        &raw.tool_choice,
        Some(v) if !v.is_null() && v.as_str() != Some("none")
    );
    let uses_tools = tools_declared || tool_choice_forces;

    // ── shaping ──────────────────────────────────────────────────────
    let policy = EnforcementPolicy::from_constraints(constraints);
    let effective_cap = match (requested_cap, policy.max_output_tokens) {
        (Some(requested), Some(cap)) => requested.min(cap),
        (Some(requested), None) => requested,
        (None, Some(cap)) => cap,
        (None, None) => provider_default_max_tokens,
    };

    let mut shaped: Map<String, Value> = obj.clone();
    shaped.insert("max_tokens".into(), Value::from(effective_cap));
    // Folded into max_tokens above; two caps in one body is ambiguous.
    shaped.remove("max_completion_tokens");

    let enforcement = EnforcementFields {
        model: Some(bare_model(&model).to_string()),
        stream: Some(stream),
        uses_tools: Some(uses_tools),
        max_output_tokens: requested_cap,
    };

    Ok(Validated {
        shaped: Value::Object(shaped),
        enforcement,
    })
}

fn validate_message(index: usize, message: &Value) -> Result<()> {
    let obj = message
        .as_object()
        .ok_or_else(|| violation(format!("messages[{index}] must be an object")))?;

    let role = obj
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| violation(format!("messages[{index}].role is required")))?;
    if !VALID_ROLES.contains(&role) {
        return Err(violation(format!(
            "messages[{index}].role '{role}' is not one of system|user|assistant|tool"
        )));
    }

    // Content may be a string, an array of typed parts, or null (assistant
    // tool-call messages).
    match obj.get("content") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(Value::Array(parts)) => {
            for (j, part) in parts.iter().enumerate() {
                let part_obj = part.as_object().ok_or_else(|| {
                    violation(format!("messages[{index}].content[{j}] must be an object"))
                })?;
                if part_obj.get("type").and_then(Value::as_str).is_none() {
                    return Err(violation(format!(
                        "messages[{index}].content[{j}] is missing 'type'"
                    )));
                }
            }
        }
        Some(_) => {
            return Err(violation(format!(
                "messages[{index}].content must be a string, array of parts, or null"
            )));
        }
    }

    Ok(())
}

fn positive_int(value: &Option<Value>, field: &str) -> Result<Option<u64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .filter(|&n| n > 0)
                .ok_or_else(|| violation(format!("'{field}' must be a positive integer")))?;
            Ok(Some(n))
        }
    }
}

/// `models/gemini-1.5-flash` → `gemini-1.5-flash`.
pub fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

/// Concatenate the text of a message `content` value (string or parts).
pub fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| {
                if p.get("type").and_then(Value::as_str) == Some("text") {
                    p.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

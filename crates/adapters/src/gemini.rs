//! Google Gemini adapter.
//!
//! Speaks the Gemini `generateContent` / `streamGenerateContent` API and
//! translates both directions so clients only ever see the OpenAI shape:
//! requests are rewritten into `contents[]` + `generationConfig`, responses
//! and SSE chunks come back as `chat.completion` objects. Auth is an API
//! key in the query string, which the adapter redacts before logging.

use chrono::Utc;
use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_domain::log::Usage;
use serde_json::{json, Value};

use crate::chat::{bare_model, extract_text, validate_chat_request, ACTION_CHAT_COMPLETIONS};
use crate::sse::{translate_sse_stream, StreamEnd};
use crate::traits::{
    AdapterDescriptor, AdapterResponse, ExecuteContext, ExecuteOptions, ResourceAdapter, Validated,
};
use crate::util::{from_reqwest, redact_url_key};

/// Output cap applied when neither the request nor the constraints set one.
const DEFAULT_MAX_TOKENS: u64 = 8192;

pub struct GeminiAdapter {
    descriptor: AdapterDescriptor,
    default_base_url: String,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        let descriptor = AdapterDescriptor {
            id: "llm:gemini".into(),
            resource_type: "llm".into(),
            provider: "gemini".into(),
            actions: vec![ACTION_CHAT_COMPLETIONS.into()],
            supports_enforcement: true,
            credential_schema: Some(json!({
                "type": "object",
                "properties": {
                    "apiKey": {"type": "string", "title": "API key"},
                },
                "required": ["apiKey"],
            })),
        };
        Self {
            descriptor,
            default_base_url: "https://generativelanguage.googleapis.com".into(),
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self, ctx: &ExecuteContext) -> String {
        ctx.config
            .as_ref()
            .and_then(|c| c.get("baseUrl"))
            .and_then(Value::as_str)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.default_base_url.clone())
    }

    fn generate_url(&self, ctx: &ExecuteContext, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={}",
                self.base_url(ctx),
                ctx.secret
            )
        } else {
            format!(
                "{}/v1beta/models/{model}:generateContent?key={}",
                self.base_url(ctx),
                ctx.secret
            )
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request translation (OpenAI shape → Gemini wire)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn translate_request(shaped: &Value) -> Value {
    let mut contents: Vec<Value> = Vec::new();
    let mut system_texts: Vec<String> = Vec::new();

    if let Some(messages) = shaped.get("messages").and_then(Value::as_array) {
        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = message
                .get("content")
                .map(extract_text)
                .unwrap_or_default();
            match role {
                "system" => system_texts.push(text),
                "assistant" => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": text}],
                })),
                // Gemini has no tool role; tool results travel as user turns.
                _ => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": text}],
                })),
            }
        }
    }

    let mut body = json!({ "contents": contents });

    if !system_texts.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{"text": system_texts.join("\n")}],
        });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = shaped.get("temperature").and_then(Value::as_f64) {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = shaped.get("top_p").and_then(Value::as_f64) {
        generation_config.insert("topP".into(), json!(p));
    }
    if let Some(max) = shaped.get("max_tokens").and_then(Value::as_u64) {
        generation_config.insert("maxOutputTokens".into(), json!(max));
    }
    match shaped.get("stop") {
        Some(Value::String(s)) => {
            generation_config.insert("stopSequences".into(), json!([s]));
        }
        Some(Value::Array(stops)) => {
            generation_config.insert("stopSequences".into(), json!(stops));
        }
        _ => {}
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response translation (Gemini wire → OpenAI shape)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}

fn candidate_text(candidate: &Value) -> String {
    candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn translate_usage(body: &Value) -> Option<Value> {
    let meta = body.get("usageMetadata")?;
    let prompt = meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let completion = meta
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let total = meta
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + completion);
    Some(json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": total,
    }))
}

/// Rewrite a complete `generateContent` response as a `chat.completion`.
fn translate_response(gemini: &Value, model: &str, now_ms: i64) -> Value {
    let candidate = gemini
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|a| a.first());

    let (content, finish_reason) = match candidate {
        Some(c) => (
            candidate_text(c),
            c.get("finishReason")
                .and_then(Value::as_str)
                .map(map_finish_reason)
                .unwrap_or("stop"),
        ),
        None => (String::new(), "stop"),
    };

    let mut response = json!({
        "id": format!("chatcmpl-{now_ms}"),
        "object": "chat.completion",
        "created": now_ms / 1000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
    });
    if let Some(usage) = translate_usage(gemini) {
        response["usage"] = usage;
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Line-buffered SSE translator state. One instance per stream; the first
/// chunk carries the assistant role delta the OpenAI contract expects.
pub(crate) struct GeminiStreamTranslator {
    model: String,
    stream_id: String,
    created: i64,
    first_chunk: bool,
}

impl GeminiStreamTranslator {
    pub(crate) fn new(model: &str, now_ms: i64) -> Self {
        Self {
            model: model.to_string(),
            stream_id: format!("chatcmpl-{now_ms}"),
            created: now_ms / 1000,
            first_chunk: true,
        }
    }

    /// Translate one upstream `data:` payload into zero or more outbound
    /// SSE frames. Unparseable payloads are skipped silently.
    pub(crate) fn translate(&mut self, data: &str) -> Vec<String> {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };
        let Some(candidate) = value
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
        else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        let text = candidate_text(candidate);
        let finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(map_finish_reason);

        if !text.is_empty() || self.first_chunk {
            let mut delta = serde_json::Map::new();
            if self.first_chunk {
                delta.insert("role".into(), json!("assistant"));
                self.first_chunk = false;
            }
            if !text.is_empty() {
                delta.insert("content".into(), json!(text));
            }
            frames.push(self.frame(Value::Object(delta), None));
        }

        if let Some(reason) = finish {
            frames.push(self.frame(json!({}), Some(reason)));
        }

        frames
    }

    fn frame(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let chunk = json!({
            "id": self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        format!("data: {chunk}\n\n")
    }
}

fn usage_from_sse_data(data: &str) -> Option<Usage> {
    let value: Value = serde_json::from_str(data).ok()?;
    let usage = translate_usage(&value)?;
    Some(Usage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        model: None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ResourceAdapter for GeminiAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn validate_and_shape(
        &self,
        action: &str,
        input: &Value,
        constraints: &Value,
    ) -> Result<Validated> {
        if action != ACTION_CHAT_COMPLETIONS {
            return Err(GatewayError::new(
                ErrorCode::ErrUnsupportedAction,
                format!("'{}' does not support action '{action}'", self.descriptor.id),
            ));
        }
        validate_chat_request(input, constraints, DEFAULT_MAX_TOKENS)
    }

    async fn execute(
        &self,
        _action: &str,
        shaped: &Value,
        ctx: &ExecuteContext,
        opts: ExecuteOptions,
    ) -> Result<AdapterResponse> {
        let model = shaped
            .get("model")
            .and_then(Value::as_str)
            .map(bare_model)
            .ok_or_else(|| {
                GatewayError::new(ErrorCode::ErrConstraintViolation, "'model' is required")
            })?
            .to_string();

        let url = self.generate_url(ctx, &model, opts.stream);
        let body = translate_request(shaped);

        tracing::debug!(
            resource = %self.descriptor.id,
            url = %redact_url_key(&url),
            stream = opts.stream,
            "forwarding chat completion"
        );

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        let resp = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(GatewayError::cancelled()),
            resp = request.send() => resp.map_err(from_reqwest)?,
        };

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(self.map_error(status.as_u16(), &err_text));
        }

        let now_ms = Utc::now().timestamp_millis();

        if opts.stream {
            let mut translator = GeminiStreamTranslator::new(&model, now_ms);
            let on_done: Box<dyn FnOnce(StreamEnd) + Send> =
                opts.on_stream_end.unwrap_or_else(|| Box::new(|_| {}));
            return Ok(AdapterResponse::Stream {
                stream: translate_sse_stream(
                    resp,
                    opts.cancel,
                    move |data| translator.translate(data),
                    usage_from_sse_data,
                    on_done,
                ),
                content_type: "text/event-stream",
            });
        }

        let resp_text = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(GatewayError::cancelled()),
            text = resp.text() => text.map_err(from_reqwest)?,
        };
        let gemini: Value = serde_json::from_str(&resp_text).map_err(|e| {
            GatewayError::new(
                ErrorCode::ErrUpstreamError,
                format!("gemini: invalid JSON from upstream: {e}"),
            )
        })?;

        let response = translate_response(&gemini, &model, now_ms);
        let usage = self.extract_usage(&response);

        Ok(AdapterResponse::Complete {
            response,
            content_type: "application/json",
            usage: Some(usage),
        })
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        // Called on the already-translated OpenAI-shaped response.
        let usage = response.get("usage");
        Usage {
            input_tokens: usage
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .and_then(|u| u.get("completion_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: usage
                .and_then(|u| u.get("total_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            model: response.get("model").and_then(Value::as_str).map(String::from),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

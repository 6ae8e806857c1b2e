//! OpenAI-compatible adapter.
//!
//! Works against any endpoint speaking the OpenAI chat-completions contract
//! (Groq, OpenAI itself, Together, vLLM, ...). The shaped body is forwarded
//! unchanged; non-streaming responses come back verbatim and streaming
//! responses pass through as raw SSE bytes.

use prg_domain::error::{ErrorCode, GatewayError, Result};
use prg_domain::log::Usage;
use serde_json::Value;

use crate::chat::{validate_chat_request, ACTION_CHAT_COMPLETIONS};
use crate::sse::{passthrough_sse_stream, StreamEnd};
use crate::traits::{
    AdapterDescriptor, AdapterResponse, ExecuteContext, ExecuteOptions, ResourceAdapter, Validated,
};
use crate::util::from_reqwest;

/// Output cap applied when neither the request nor the constraints set one.
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct OpenAiCompatAdapter {
    descriptor: AdapterDescriptor,
    default_base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(provider: &str, base_url: &str) -> Self {
        let descriptor = AdapterDescriptor {
            id: format!("llm:{provider}"),
            resource_type: "llm".into(),
            provider: provider.into(),
            actions: vec![ACTION_CHAT_COMPLETIONS.into()],
            supports_enforcement: true,
            credential_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "apiKey": {"type": "string", "title": "API key"},
                    "baseUrl": {"type": "string", "title": "Base URL override"},
                },
                "required": ["apiKey"],
            })),
        };
        Self {
            descriptor,
            default_base_url: base_url.trim_end_matches('/').to_string(),
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
}

/// Usage from an OpenAI-shaped response or final stream chunk.
fn parse_openai_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    Some(Usage {
        input_tokens: usage.get("prompt_tokens")?.as_u64()?,
        output_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
        model: value.get("model").and_then(Value::as_str).map(String::from),
    })
}

fn usage_from_sse_data(data: &str) -> Option<Usage> {
    let value: Value = serde_json::from_str(data).ok()?;
    parse_openai_usage(&value)
}

#[async_trait::async_trait]
impl ResourceAdapter for OpenAiCompatAdapter {
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
        let url = format!("{}/chat/completions", self.base_url(ctx));

        let mut body = shaped.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".into(), Value::Bool(opts.stream));
        }

        tracing::debug!(
            resource = %self.descriptor.id,
            url = %url,
            stream = opts.stream,
            "forwarding chat completion"
        );

        let request = self
            .client
            .post(&url)
            .bearer_auth(&ctx.secret)
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

        if opts.stream {
            let on_done: Box<dyn FnOnce(StreamEnd) + Send> =
                opts.on_stream_end.unwrap_or_else(|| Box::new(|_| {}));
            return Ok(AdapterResponse::Stream {
                stream: passthrough_sse_stream(resp, opts.cancel, usage_from_sse_data, on_done),
                content_type: "text/event-stream",
            });
        }

        let resp_text = tokio::select! {
            _ = opts.cancel.cancelled() => return Err(GatewayError::cancelled()),
            text = resp.text() => text.map_err(from_reqwest)?,
        };
        let response: Value = serde_json::from_str(&resp_text).map_err(|e| {
            GatewayError::new(
                ErrorCode::ErrUpstreamError,
                format!("{}: invalid JSON from upstream: {e}", self.descriptor.provider),
            )
        })?;
        let usage = parse_openai_usage(&response);

        Ok(AdapterResponse::Complete {
            response,
            content_type: "application/json",
            usage,
        })
    }

    fn extract_usage(&self, response: &Value) -> Usage {
        parse_openai_usage(response).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::new("groq", "https://api.groq.com/openai/v1/")
    }

    #[test]
    fn descriptor_identity() {
        let a = adapter();
        assert_eq!(a.descriptor().id, "llm:groq");
        assert_eq!(a.descriptor().provider, "groq");
        assert_eq!(a.descriptor().actions, vec!["chat.completions"]);
        // Trailing slash trimmed at construction.
        assert_eq!(a.default_base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn unsupported_action_rejected() {
        let err = adapter()
            .validate_and_shape("embeddings", &json!({}), &Value::Null)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrUnsupportedAction);
    }

    #[test]
    fn base_url_override_from_secret_config() {
        let a = adapter();
        let ctx = ExecuteContext {
            secret: "sk".into(),
            config: Some(json!({"baseUrl": "http://localhost:11434/v1/"})),
        };
        assert_eq!(a.base_url(&ctx), "http://localhost:11434/v1");

        let ctx = ExecuteContext {
            secret: "sk".into(),
            config: None,
        };
        assert_eq!(a.base_url(&ctx), "https://api.groq.com/openai/v1");
    }

    #[test]
    fn usage_extraction() {
        let response = json!({
            "model": "llama-3.1-8b-instant",
            "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21},
        });
        let usage = adapter().extract_usage(&response);
        assert_eq!(usage.input_tokens, 9);
        assert_eq!(usage.output_tokens, 12);
        assert_eq!(usage.total_tokens, 21);
        assert_eq!(usage.model.as_deref(), Some("llama-3.1-8b-instant"));

        assert_eq!(adapter().extract_usage(&json!({})).total_tokens, 0);
    }

    #[test]
    fn upstream_errors_follow_the_shared_table() {
        let a = adapter();
        assert!(a.map_error(429, "slow down").retryable);
        assert!(a.map_error(503, "flaky").retryable);
        assert!(!a.map_error(401, "bad key").retryable);
        assert_eq!(a.map_error(404, "gone").http_status(), 404);
    }

    #[test]
    fn stream_usage_chunk_parsed() {
        let data = r#"{"choices":[],"model":"m","usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#;
        let usage = usage_from_sse_data(data).unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert!(usage_from_sse_data("not json").is_none());
        assert!(usage_from_sse_data(r#"{"choices":[]}"#).is_none());
    }
}

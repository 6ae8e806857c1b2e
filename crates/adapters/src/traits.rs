use std::pin::Pin;

use prg_domain::error::Result;
use prg_domain::log::Usage;
use prg_policy::EnforcementFields;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supporting types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A boxed byte stream, the shape upstream SSE bodies travel in.
pub type ByteStream =
    Pin<Box<dyn futures_core::Stream<Item = std::io::Result<bytes::Bytes>> + Send>>;

/// Static facts about an adapter, serialized by discovery.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    /// `<resourceType>:<provider>`.
    pub id: String,
    pub resource_type: String,
    pub provider: String,
    pub actions: Vec<String>,
    /// Whether `validate_and_shape` emits enforcement fields.
    pub supports_enforcement: bool,
    /// JSON schema describing the credential the admin surface collects.
    pub credential_schema: Option<Value>,
}

/// Output of a successful `validate_and_shape`.
#[derive(Debug, Clone)]
pub struct Validated {
    /// The capped/normalised payload `execute` forwards upstream. Shaping is
    /// a fixed point: shaping a shaped input changes nothing.
    pub shaped: Value,
    pub enforcement: EnforcementFields,
}

/// What `execute` needs besides the payload.
pub struct ExecuteContext {
    /// The decrypted upstream credential. Lives only for this call.
    pub secret: String,
    /// Per-resource settings from the secret record (e.g. `baseUrl`).
    pub config: Option<Value>,
}

pub struct ExecuteOptions {
    pub stream: bool,
    /// Derived from the inbound request lifetime; upstream work stops when
    /// it fires.
    pub cancel: CancellationToken,
    /// Invoked exactly once when a streaming response finishes (or is
    /// cancelled), carrying any usage scanned from the final SSE event.
    /// Ignored for non-streaming executions.
    pub on_stream_end: Option<Box<dyn FnOnce(crate::sse::StreamEnd) + Send>>,
}

impl ExecuteOptions {
    pub fn new(stream: bool, cancel: CancellationToken) -> Self {
        Self {
            stream,
            cancel,
            on_stream_end: None,
        }
    }
}

/// An upstream result: either a complete JSON response or a byte stream.
pub enum AdapterResponse {
    Complete {
        response: Value,
        content_type: &'static str,
        usage: Option<Usage>,
    },
    Stream {
        stream: ByteStream,
        content_type: &'static str,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The contract every resource adapter implements.
///
/// `validate_and_shape` is synchronous and pure; `execute` performs the
/// upstream I/O. The enforcement engine consumes the fields emitted here and
/// never re-parses the body.
#[async_trait::async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn descriptor(&self) -> &AdapterDescriptor;

    /// Reject malformed input, emit enforcement fields, and produce the
    /// shaped payload `execute` will forward.
    fn validate_and_shape(
        &self,
        action: &str,
        input: &Value,
        constraints: &Value,
    ) -> Result<Validated>;

    /// Perform the upstream call with the already-shaped payload.
    async fn execute(
        &self,
        action: &str,
        shaped: &Value,
        ctx: &ExecuteContext,
        opts: ExecuteOptions,
    ) -> Result<AdapterResponse>;

    /// Pull token usage out of a complete upstream response.
    fn extract_usage(&self, response: &Value) -> Usage;

    /// Map a non-2xx upstream response to the shared error table
    /// (400→BAD_REQUEST … 429/5xx retryable). Providers with bespoke error
    /// bodies can override this.
    fn map_error(&self, status: u16, body: &str) -> prg_domain::error::GatewayError {
        crate::util::map_upstream_status(&self.descriptor().provider, status, body)
    }
}

//! Usage recording.
//!
//! Every data-plane attempt produces exactly one request log, written
//! asynchronously so the response path never blocks on it. Streaming
//! responses defer the write until the stream ends (or dies), which is also
//! where usage scanned from the final SSE event lands.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::runtime::Handle;
use uuid::Uuid;

use prg_adapters::sse::StreamEnd;
use prg_counters::{token_key, CounterStore};
use prg_domain::log::{Decision, RequestLog, Usage};
use prg_store::Repository;

/// One pending request-log entry, armed at pipeline entry.
///
/// `finish` consumes it with an explicit outcome. If the holder is dropped
/// without finishing (client disconnect mid-pipeline, task abort), the drop
/// impl records `ERROR/cancelled`, keeping the exactly-once guarantee.
pub struct RequestRecord {
    repo: Arc<dyn Repository>,
    counters: Arc<CounterStore>,
    inner: Option<Inner>,
}

struct Inner {
    app_id: Option<String>,
    resource_id: String,
    action: String,
    endpoint: String,
    method: String,
    model: Option<String>,
    started: Instant,
}

impl RequestRecord {
    pub fn new(
        repo: Arc<dyn Repository>,
        counters: Arc<CounterStore>,
        resource_id: String,
        action: String,
        endpoint: String,
        method: String,
    ) -> Self {
        Self {
            repo,
            counters,
            inner: Some(Inner {
                app_id: None,
                resource_id,
                action,
                endpoint,
                method,
                model: None,
                started: Instant::now(),
            }),
        }
    }

    /// A record that will never log: stands in after the live record moved
    /// into a stream's end callback.
    pub fn disarmed(repo: Arc<dyn Repository>, counters: Arc<CounterStore>) -> Self {
        Self {
            repo,
            counters,
            inner: None,
        }
    }

    /// Attach the authenticated app once stage 2 identified it.
    pub fn set_app_id(&mut self, app_id: &str) {
        if let Some(inner) = &mut self.inner {
            inner.app_id = Some(app_id.to_string());
        }
    }

    /// Attach the effective model once validation determined it.
    pub fn set_model(&mut self, model: &str) {
        if let Some(inner) = &mut self.inner {
            inner.model = Some(model.to_string());
        }
    }

    /// Write the log entry (and token counters, on success) in the
    /// background.
    pub fn finish(mut self, decision: Decision, reason: Option<String>, usage: Option<Usage>) {
        if let Some(inner) = self.inner.take() {
            write_log(&self.repo, &self.counters, inner, decision, reason, usage);
        }
    }

    /// Turn this record into the `on_stream_end` callback for a streaming
    /// response. The callback logs `ALLOWED` with the scanned usage, or
    /// `ERROR/cancelled` when the stream was cut short. Dropping the
    /// callback unfired (client walked away) logs the cancellation too.
    pub fn into_stream_callback(self) -> Box<dyn FnOnce(StreamEnd) + Send> {
        let mut guard = self;
        Box::new(move |end: StreamEnd| {
            if let Some(inner) = guard.inner.take() {
                if end.cancelled {
                    write_log(
                        &guard.repo,
                        &guard.counters,
                        inner,
                        Decision::Error,
                        Some("cancelled".into()),
                        None,
                    );
                } else {
                    // No usage in the final event → record zeros, the
                    // attempt still happened.
                    let usage = end.usage.or_else(|| Some(Usage::default()));
                    write_log(&guard.repo, &guard.counters, inner, Decision::Allowed, None, usage);
                }
            }
        })
    }
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            write_log(
                &self.repo,
                &self.counters,
                inner,
                Decision::Error,
                Some("cancelled".into()),
                None,
            );
        }
    }
}

/// Fire-and-forget write of the log entry plus observational token
/// counters. Failures are logged locally and never surface.
fn write_log(
    repo: &Arc<dyn Repository>,
    counters: &Arc<CounterStore>,
    inner: Inner,
    decision: Decision,
    reason: Option<String>,
    usage: Option<Usage>,
) {
    let now = Utc::now();

    if decision == Decision::Allowed {
        if let (Some(app_id), Some(usage)) = (&inner.app_id, &usage) {
            let model = usage
                .model
                .as_deref()
                .or(inner.model.as_deref())
                .unwrap_or("unknown");
            counters.record_tokens(
                &token_key(app_id, &inner.resource_id, model, now),
                usage.input_tokens,
                usage.output_tokens,
                usage.total_tokens,
                now,
            );
        }
    }

    let entry = RequestLog {
        id: format!("log_{}", Uuid::new_v4().simple()),
        app_id: inner.app_id,
        resource_id: inner.resource_id,
        action: inner.action,
        endpoint: inner.endpoint,
        method: inner.method,
        decision,
        decision_reason: reason,
        latency_ms: Some(inner.started.elapsed().as_millis() as u64),
        model: usage.as_ref().and_then(|u| u.model.clone()).or(inner.model),
        tokens_in: usage.as_ref().map(|u| u.input_tokens),
        tokens_out: usage.as_ref().map(|u| u.output_tokens),
        created_at: now,
    };

    let repo = repo.clone();
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = repo.append_request_log(entry).await {
                    tracing::warn!(error = %e, "request log append failed");
                }
            });
        }
        // No runtime (drop during shutdown): the entry is lost, which
        // best-effort allows.
        Err(_) => tracing::debug!("request log dropped outside runtime"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prg_store::MemoryRepository;

    fn record(repo: &Arc<MemoryRepository>, counters: &Arc<CounterStore>) -> RequestRecord {
        let repo: Arc<dyn Repository> = repo.clone();
        RequestRecord::new(
            repo,
            counters.clone(),
            "llm:groq".into(),
            "chat.completions".into(),
            "/r/llm/groq/v1/chat/completions".into(),
            "POST".into(),
        )
    }

    async fn drain(repo: &Arc<MemoryRepository>) -> Vec<RequestLog> {
        // Let the spawned writer run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        repo.recent_request_logs(10).await.unwrap()
    }

    #[tokio::test]
    async fn allowed_with_usage_records_tokens() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let counters = Arc::new(CounterStore::new());
        let mut r = record(&repo, &counters);
        r.set_app_id("app_1");
        r.set_model("llama-3.1-8b-instant");
        r.finish(
            Decision::Allowed,
            None,
            Some(Usage {
                input_tokens: 3,
                output_tokens: 4,
                total_tokens: 7,
                model: Some("llama-3.1-8b-instant".into()),
            }),
        );

        let logs = drain(&repo).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].decision, Decision::Allowed);
        assert_eq!(logs[0].tokens_in, Some(3));
        assert_eq!(logs[0].model.as_deref(), Some("llama-3.1-8b-instant"));

        let snap = counters.usage_snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].key.starts_with("tok:app_1:llm:groq:llama-3.1-8b-instant:"));
        assert_eq!(snap[0].total_tokens, 7);
    }

    #[tokio::test]
    async fn denial_records_reason_without_tokens() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let counters = Arc::new(CounterStore::new());
        let mut r = record(&repo, &counters);
        r.set_app_id("app_1");
        r.finish(
            Decision::DeniedConstraint,
            Some("ERR_MODEL_NOT_ALLOWED: model 'x'".into()),
            None,
        );

        let logs = drain(&repo).await;
        assert_eq!(logs[0].decision, Decision::DeniedConstraint);
        assert!(counters.usage_snapshot().is_empty());
    }

    #[tokio::test]
    async fn dropped_record_logs_cancellation() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let counters = Arc::new(CounterStore::new());
        drop(record(&repo, &counters));

        let logs = drain(&repo).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].decision, Decision::Error);
        assert_eq!(logs[0].decision_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn stream_callback_logs_once() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let counters = Arc::new(CounterStore::new());
        let mut r = record(&repo, &counters);
        r.set_app_id("app_1");
        let callback = r.into_stream_callback();
        callback(StreamEnd {
            usage: Some(Usage {
                input_tokens: 1,
                output_tokens: 2,
                total_tokens: 3,
                model: None,
            }),
            cancelled: false,
        });

        let logs = drain(&repo).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].decision, Decision::Allowed);
        assert_eq!(logs[0].tokens_out, Some(2));
    }

    #[tokio::test]
    async fn stream_callback_dropped_unfired_logs_cancellation() {
        let repo = Arc::new(MemoryRepository::ephemeral());
        let counters = Arc::new(CounterStore::new());
        let callback = record(&repo, &counters).into_stream_callback();
        drop(callback);

        let logs = drain(&repo).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].decision_reason.as_deref(), Some("cancelled"));
    }
}

//! Shared SSE streaming infrastructure for the provider adapters.
//!
//! Both adapters receive a `reqwest::Response` whose body is an SSE stream.
//! The OpenAI-compatible adapter forwards the bytes unchanged; the Gemini
//! adapter rewrites each `data:` payload into an OpenAI-shaped chunk. Both
//! share the same pump: buffer chunks, drain complete `data:` payloads,
//! honour cancellation, and report the observed usage once the stream ends.

use bytes::Bytes;
use prg_domain::log::Usage;
use tokio_util::sync::CancellationToken;

use crate::traits::ByteStream;

/// The SSE terminator frame the data plane emits to clients.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// How a stream finished, handed to the completion callback exactly once.
pub struct StreamEnd {
    /// Usage scanned from the final event, when the provider emitted one.
    pub usage: Option<Usage>,
    pub cancelled: bool,
}

/// Pull every complete `data:` payload out of an SSE read buffer.
///
/// Upstream chunks split events arbitrarily, so the buffer holds whatever
/// arrived so far; anything after the last `\n\n` boundary is an unfinished
/// event and stays put for the next read. `event:`/`id:`/`retry:` lines are
/// metadata the gateway has no use for.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(boundary) = buffer.find("\n\n") {
        let event: String = buffer.drain(..boundary + 2).collect();
        for line in event.lines() {
            let Some(rest) = line.trim_start().strip_prefix("data:") else {
                continue;
            };
            let payload = rest.trim();
            if !payload.is_empty() {
                payloads.push(payload.to_string());
            }
        }
    }

    payloads
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pass-through pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Forward an upstream SSE body byte-for-byte while scanning a parallel
/// buffer for usage, so the recorder can account for streamed responses.
pub(crate) fn passthrough_sse_stream<U, D>(
    response: reqwest::Response,
    cancel: CancellationToken,
    mut extract_usage: U,
    on_done: D,
) -> ByteStream
where
    U: FnMut(&str) -> Option<Usage> + Send + 'static,
    D: FnOnce(StreamEnd) + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut usage: Option<Usage> = None;
        let mut cancelled = false;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_sse_data(&mut buffer) {
                        if let Some(found) = extract_usage(&data) {
                            usage = Some(found);
                        }
                    }
                    yield Ok(bytes);
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }

        on_done(StreamEnd { usage, cancelled });
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Translating pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rewrite each upstream `data:` payload through `translate` and emit the
/// returned frames. `translate` returns complete SSE frames (including the
/// `data: `/`\n\n` framing) and may return none for payloads it skips.
///
/// An upstream `[DONE]` passes through; when the upstream never sends one,
/// the pump appends it, so clients always see a final `data: [DONE]`.
pub(crate) fn translate_sse_stream<T, U, D>(
    response: reqwest::Response,
    cancel: CancellationToken,
    mut translate: T,
    mut extract_usage: U,
    on_done: D,
) -> ByteStream
where
    T: FnMut(&str) -> Vec<String> + Send + 'static,
    U: FnMut(&str) -> Option<Usage> + Send + 'static,
    D: FnOnce(StreamEnd) + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut usage: Option<Usage> = None;
        let mut cancelled = false;
        let mut done_sent = false;

        'outer: loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_sse_data(&mut buffer) {
                        if data == "[DONE]" {
                            yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
                            done_sent = true;
                            break 'outer;
                        }
                        if let Some(found) = extract_usage(&data) {
                            usage = Some(found);
                        }
                        for frame in translate(&data) {
                            yield Ok(Bytes::from(frame));
                        }
                    }
                }
                Ok(None) => {
                    // Flush a trailing partial event before closing.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_sse_data(&mut buffer) {
                            if data == "[DONE]" {
                                continue;
                            }
                            if let Some(found) = extract_usage(&data) {
                                usage = Some(found);
                            }
                            for frame in translate(&data) {
                                yield Ok(Bytes::from(frame));
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }

        if !done_sent && !cancelled {
            yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
        }

        on_done(StreamEnd { usage, cancelled });
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: &str = r#"{"object":"chat.completion.chunk","choices":[{"delta":{"content":"hi"}}]}"#;
    const USAGE_CHUNK: &str =
        r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#;

    #[test]
    fn complete_event_yields_its_payload() {
        let mut buf = format!("data: {CHUNK}\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec![CHUNK]);
        assert!(buf.is_empty());
    }

    #[test]
    fn one_read_may_hold_several_events() {
        let mut buf = format!("data: {CHUNK}\n\ndata: {USAGE_CHUNK}\n\ndata: [DONE]\n\n");
        assert_eq!(
            drain_sse_data(&mut buf),
            vec![CHUNK, USAGE_CHUNK, "[DONE]"]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn unfinished_event_waits_for_the_next_read() {
        // A provider chunk boundary can land mid-event.
        let mut buf = format!("data: {USAGE_CHUNK}\n\ndata: {{\"object\":\"chat.comp");
        assert_eq!(drain_sse_data(&mut buf), vec![USAGE_CHUNK]);
        assert_eq!(buf, "data: {\"object\":\"chat.comp");

        buf.push_str("letion.chunk\"}\n\n");
        assert_eq!(
            drain_sse_data(&mut buf),
            vec![r#"{"object":"chat.completion.chunk"}"#]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn event_metadata_lines_are_dropped() {
        let mut buf = format!("event: message\nid: 7\nretry: 3000\ndata: {CHUNK}\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec![CHUNK]);
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_data_lines_yield_nothing() {
        let mut buf = String::from("data: \n\n: keep-alive comment\n\n");
        assert!(drain_sse_data(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    // ── Pump tests over canned responses ─────────────────────────────

    use futures_util::StreamExt;
    use std::sync::{Arc, Mutex};

    fn canned_response(body: &'static str) -> reqwest::Response {
        reqwest::Response::from(http::Response::new(body))
    }

    async fn collect(stream: ByteStream) -> String {
        let mut out = String::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            out.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
        }
        out
    }

    #[tokio::test]
    async fn translate_pump_appends_done_when_upstream_omits_it() {
        let upstream = "data: one\n\ndata: two\n\n";
        let seen_end: Arc<Mutex<Option<StreamEnd>>> = Arc::new(Mutex::new(None));
        let seen = seen_end.clone();

        let stream = translate_sse_stream(
            canned_response(upstream),
            CancellationToken::new(),
            |data| vec![format!("data: <{data}>\n\n")],
            |_| None,
            move |end| *seen.lock().unwrap() = Some(end),
        );

        let out = collect(stream).await;
        assert_eq!(out, "data: <one>\n\ndata: <two>\n\ndata: [DONE]\n\n");
        let end = seen_end.lock().unwrap().take().unwrap();
        assert!(!end.cancelled);
        assert!(end.usage.is_none());
    }

    #[tokio::test]
    async fn translate_pump_passes_upstream_done_through() {
        let upstream = "data: x\n\ndata: [DONE]\n\ndata: ignored\n\n";
        let stream = translate_sse_stream(
            canned_response(upstream),
            CancellationToken::new(),
            |data| vec![format!("data: <{data}>\n\n")],
            |_| None,
            |_| {},
        );

        let out = collect(stream).await;
        // Exactly one [DONE], nothing after it.
        assert_eq!(out, "data: <x>\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn passthrough_pump_forwards_bytes_and_scans_usage() {
        let upstream = "data: {\"usage\":{\"total\":9}}\n\ndata: [DONE]\n\n";
        let seen_end: Arc<Mutex<Option<StreamEnd>>> = Arc::new(Mutex::new(None));
        let seen = seen_end.clone();

        let stream = passthrough_sse_stream(
            canned_response(upstream),
            CancellationToken::new(),
            |data| {
                serde_json::from_str::<serde_json::Value>(data)
                    .ok()
                    .and_then(|v| v.get("usage")?.get("total")?.as_u64())
                    .map(|total| Usage {
                        input_tokens: 0,
                        output_tokens: 0,
                        total_tokens: total,
                        model: None,
                    })
            },
            move |end| *seen.lock().unwrap() = Some(end),
        );

        let out = collect(stream).await;
        assert_eq!(out, upstream);
        let end = seen_end.lock().unwrap().take().unwrap();
        assert_eq!(end.usage.unwrap().total_tokens, 9);
    }
}

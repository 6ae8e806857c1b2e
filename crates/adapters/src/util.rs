//! Shared helpers for provider adapters.

use prg_domain::error::{ErrorCode, GatewayError};

/// Convert a [`reqwest::Error`] into a gateway error. Timeouts are
/// retryable; everything else is a plain upstream failure.
pub(crate) fn from_reqwest(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::new(ErrorCode::ErrUpstreamError, format!("upstream timeout: {e}")).retryable()
    } else {
        GatewayError::new(ErrorCode::ErrUpstreamError, format!("upstream request failed: {e}"))
    }
}

/// Map a non-2xx upstream status to the shared adapter error table.
///
/// 429 and 5xx are retryable; the gateway itself never retries, it only
/// tells the client it may.
pub(crate) fn map_upstream_status(provider: &str, status: u16, body: &str) -> GatewayError {
    let summary = truncate(body, 300);
    let (label, retryable) = match status {
        400 => ("BAD_REQUEST", false),
        401 => ("UNAUTHORIZED", false),
        403 => ("FORBIDDEN", false),
        404 => ("NOT_FOUND", false),
        429 => ("RATE_LIMITED", true),
        500 | 502 | 503 => ("PROVIDER_ERROR", true),
        _ => ("UNKNOWN", false),
    };

    let err = GatewayError::new(
        ErrorCode::ErrUpstreamError,
        format!("{provider}: {label} (HTTP {status}) - {summary}"),
    )
    .with_status(status);
    if retryable {
        err.retryable()
    } else {
        err
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Redact API key query parameters from URLs before they reach logs.
pub(crate) fn redact_url_key(url: &str) -> String {
    if let Some(idx) = url.find("key=") {
        let prefix = &url[..idx + 4];
        let rest = &url[idx + 4..];
        let end = rest.find('&').unwrap_or(rest.len());
        format!("{prefix}[REDACTED]{}", &rest[end..])
    } else {
        url.to_string()
    }
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message, so raw secrets never leak into logs or admin responses.
pub(crate) fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_matches_contract() {
        for (status, retryable) in [
            (400u16, false),
            (401, false),
            (403, false),
            (404, false),
            (429, true),
            (500, true),
            (502, true),
            (503, true),
            (418, false),
        ] {
            let err = map_upstream_status("groq", status, "body");
            assert_eq!(err.retryable, retryable, "status {status}");
            assert_eq!(err.http_status(), status);
            assert_eq!(err.code, ErrorCode::ErrUpstreamError);
        }
    }

    #[test]
    fn redacts_key_param() {
        assert_eq!(
            redact_url_key("https://g/v1beta/models/m:generateContent?key=sk-123&alt=sse"),
            "https://g/v1beta/models/m:generateContent?key=[REDACTED]&alt=sse"
        );
        assert_eq!(redact_url_key("https://g/path"), "https://g/path");
    }

    #[test]
    fn masks_key_shaped_words() {
        let masked = mask_secrets("auth failed for key gsk_live_0123456789abcdefghij");
        assert!(!masked.contains("gsk_live_0123456789abcdefghij"));
        assert!(masked.contains("gsk_"));
    }

    #[test]
    fn short_words_left_alone() {
        assert_eq!(mask_secrets("HTTP 401 unauthorized"), "HTTP 401 unauthorized");
    }
}

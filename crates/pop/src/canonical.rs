//! PoP v1 canonical request string.
//!
//! ```text
//! v1\n<METHOD>\n<PATH_WITH_QUERY>\n<APP_ID>\n<TS>\n<NONCE>\n<BODY_HASH>\n
//! ```
//!
//! The signature covers the UTF-8 bytes of this string and nothing else, so
//! both sides must produce it byte-identically.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Protocol version tag for the canonical string and `x-pop-v` header.
pub const POP_VERSION: &str = "1";

/// `base64url(SHA-256(body))`, unpadded. The empty body hashes the empty
/// byte string, it is never skipped.
pub fn body_hash(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

/// Build the canonical string an app signs.
///
/// `path_with_query` is `pathname + search` where search keeps its leading
/// `?` when present. `method` is upper-cased here so verification does not
/// depend on how the HTTP layer spells it.
pub fn build_canonical(
    method: &str,
    path_with_query: &str,
    app_id: &str,
    ts: i64,
    nonce: &str,
    body_hash: &str,
) -> String {
    format!(
        "v{POP_VERSION}\n{}\n{path_with_query}\n{app_id}\n{ts}\n{nonce}\n{body_hash}\n",
        method.to_ascii_uppercase(),
    )
}

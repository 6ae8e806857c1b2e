//! Proof-of-possession (PoP v1) authentication.
//!
//! An app proves control of its Ed25519 private key by signing a canonical
//! representation of each request. This crate owns the canonical string,
//! header parsing, signature verification and the single-use nonce store.
//! It performs no I/O; the pipeline wires the pieces in order.

pub mod canonical;
pub mod headers;
pub mod nonce;
pub mod verify;

pub use canonical::{body_hash, build_canonical};
pub use headers::{PopHeaders, HEADER_APP_ID, HEADER_NONCE, HEADER_SIG, HEADER_TS, HEADER_VERSION};
pub use nonce::{MemoryNonceStore, NonceStore, Reservation};
pub use verify::{check_timestamp, decode_public_key, verify_signature};

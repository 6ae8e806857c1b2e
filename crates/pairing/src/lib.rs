//! Pairing and approval.
//!
//! An owner mints a pairing string, hands it to an app out of band, the app
//! calls `prepare` with its public key and permission asks, and the owner
//! approves or rejects the resulting connect session. Approval atomically
//! becomes an [`prg_domain::app::App`] plus its permissions.

pub mod codes;
pub mod service;
pub mod string;

pub use codes::{new_connect_code, new_session_token};
pub use service::{PairingService, PrepareRequest, PrepareResponse, RequestedPermissionInput};
pub use string::{build_pairing_string, parse_pairing_string, PairingString};

//! Policy enforcement.
//!
//! Schema-first and fail-closed: a policy is derived from the recognised
//! keys of a permission's constraints blob, the adapter reports what the
//! request actually asks for as typed [`EnforcementFields`], and the engine
//! compares the two. When a constraint is set but the adapter could not
//! determine the corresponding field, the request is denied rather than
//! waved through.

pub mod enforcement;
pub mod time_window;

pub use enforcement::{
    enforce, has_enforceable_constraints, EnforcementFields, EnforcementPolicy, ModelRateLimit,
};
pub use time_window::check_permission_validity;

//! Resource adapters.
//!
//! An adapter owns everything provider-specific about one `<type>:<provider>`
//! resource: request validation and shaping, the upstream call, usage
//! extraction and error mapping. Adapters are plain values assembled into an
//! immutable [`registry::AdapterRegistry`] at process start; the pipeline
//! only ever sees the [`traits::ResourceAdapter`] contract.

pub mod chat;
pub mod gemini;
pub mod openai_compat;
pub mod registry;
pub mod sse;
pub mod traits;
pub mod util;

pub use registry::AdapterRegistry;
pub use traits::{
    AdapterDescriptor, AdapterResponse, ByteStream, ExecuteContext, ExecuteOptions,
    ResourceAdapter, Validated,
};

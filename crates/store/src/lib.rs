//! Persistence boundary of the gateway.
//!
//! The core only ever talks to the [`Repository`] trait; everything else
//! (schema, files, a future SQL binding) hides behind it. The bundled
//! [`MemoryRepository`] keeps state in memory with JSON-file persistence
//! for the durable entities.

pub mod memory;
pub mod repository;

pub use memory::MemoryRepository;
pub use repository::{ConsumeOutcome, Repository};

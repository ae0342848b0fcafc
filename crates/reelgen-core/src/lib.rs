//! reelgen-core: shared types, IDs, and errors.
//!
//! This crate is the foundational dependency for the other reelgen crates,
//! providing type-safe identifiers, the error taxonomy that drives retry
//! decisions, and the domain value types shared between the queue, the
//! pipeline, and the API surface.

pub mod error;
pub mod ids;
pub mod types;

// Re-export the most commonly used items at the crate root.
pub use error::{best_effort, classify_message, is_transient_message, Error, ErrorKind, Result};
pub use ids::*;
pub use types::*;

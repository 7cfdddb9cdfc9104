//! Node types for mlld source documents.
//!
//! The parser (an external collaborator) turns a Markdown-with-directives
//! document into a flat array of [`Node`]s; the runtime only consumes them.
//! Everything here is plain data: serde-derived structs and enums with no
//! evaluation behavior.

pub mod directives;
pub mod location;
pub mod nodes;
pub mod values;

pub use directives::*;
pub use location::{Position, Span};
pub use nodes::*;
pub use values::*;

//! Operational transforms for collaborative text editing.
//!
//! [`text`] holds the pure transform/apply engine over insert, delete,
//! and comment operations; [`ranges`] tracks comment ranges as a
//! document changes.  Neither module persists anything — callers feed in
//! documents and operations and persist the resulting snapshots through
//! the blob store.

pub mod ranges;
pub mod text;

pub use text::{Side, TextOp};

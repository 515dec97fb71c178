//! Blob metadata persistence layer.
//!
//! The [`backend::MetadataBackend`] trait defines the interface; the
//! [`document::DocumentBackend`] (bucketed per-project documents with a
//! sharded overflow tier) and [`relational::RelationalBackend`] (one row
//! per project/hash pair) are the two implementations, selected by the
//! shape of the project id.

pub mod backend;
pub mod document;
pub mod relational;

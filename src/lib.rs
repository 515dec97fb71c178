//! Inkstore library — content-addressed blob storage for collaborative editing.
//!
//! This crate provides the storage core for a collaborative document
//! platform: a content-addressed blob store with two metadata backends
//! (document-oriented and relational) selected by project-id shape, a
//! streaming object persistor abstraction, and an operational-transform
//! engine for concurrent text edits with comment-range tracking.

pub mod blob;
pub mod config;
pub mod errors;
pub mod hash;
pub mod maintenance;
pub mod metadata;
pub mod ot;
pub mod storage;
pub mod store;

pub use blob::Blob;
pub use errors::BlobError;
pub use metadata::backend::ProjectId;
pub use store::{BlobStore, BlobStoreServices};

//! Object storage layer.
//!
//! The [`persistor::ObjectPersistor`] trait abstracts over where blob
//! bytes physically live.  Implementations include local disk and an
//! in-memory store for tests and ephemeral deployments.

pub mod local;
pub mod memory;
pub mod persistor;

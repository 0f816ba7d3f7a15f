//! Storage layer for testvault
//!
//! Durable JSON documents keyed by logical path. No locking happens here;
//! see [`crate::lock`] and [`crate::store`].

pub mod document_store;

pub use document_store::DocumentStore;

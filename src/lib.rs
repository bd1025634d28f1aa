//! Embeddable content-addressed block store.
//!
//! Callers hand the store opaque byte keys and values. Keys are reduced to
//! their SHA-256; values land in append-only pack files, each paired with a
//! sorted fanout index, staged under a processing directory and published
//! into the pack directory by atomic rename. Deletions append to a
//! tombstone log that every read consults first. Hot blocks are served from
//! a bounded in-memory cache.
//!
//! The main entry point is [`Datastore`]; the underlying pieces (pack and
//! index formats, tombstone, registry, transactional writer) are public for
//! direct embedding.

pub mod cache;
pub mod config;
pub mod datastore;
pub mod error;
pub mod fsio;
pub mod hash;
pub mod index;
pub mod pack;
pub mod packpack;
pub mod processing;
pub mod tombstone;

pub use config::DatastoreConfig;
pub use datastore::{Batch, Datastore};
pub use error::{Error, Result};

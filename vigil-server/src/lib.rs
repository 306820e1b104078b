//! # Vigil Detection Server Library (vigil-server)
//!
//! Detection-event pipeline: per-source capture workers feed one bounded
//! event store, which remote viewers drain over a line-oriented TCP protocol.
//! Detection frames are persisted as artifacts and served by a second
//! protocol server.
//!
//! **Architecture:** many `SourceWorker` tasks → `EventStore` ←
//! `EventServer` → network; artifacts flow worker → filesystem →
//! `ArtifactServer` → network.

pub mod config;
pub mod detector;
pub mod error;
pub mod protocol;
pub mod source;
pub mod store;
pub mod supervisor;

pub use error::{Error, Result};
pub use store::{AppendOutcome, EventStore, OverflowPolicy};

//! # Vigil Common Library
//!
//! Shared code for the Vigil server and client including:
//! - Detection event model (`DetectionEvent`)
//! - Socket protocol: command grammar, event wire codec, artifact framing
//! - Artifact name validation and generation
//! - Configuration file resolution
//! - Timestamp utilities

pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod time;

pub use error::{Error, Result};
pub use event::DetectionEvent;

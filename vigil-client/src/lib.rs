//! # Vigil Protocol Client (vigil-client)
//!
//! Consumer side of the Vigil socket protocols: drains detection events from
//! the event server and downloads detection images from the artifact server.

pub mod client;
pub mod error;

pub use client::{ProtocolClient, DEFAULT_MAX_ARTIFACT_SIZE, DEFAULT_TIMEOUT};
pub use error::{ClientError, Result};

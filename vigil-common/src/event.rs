//! Detection event model
//!
//! A `DetectionEvent` is created by a capture worker once a detector result
//! clears the confidence threshold. It is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One detection reported by one source
///
/// Serde names follow the wire format keys (`camara`, `objeto`, `fecha`,
/// `imagen`, `confidence`). Serialization for the socket protocol goes through
/// [`crate::protocol::wire`], which fixes field order and the two-decimal
/// confidence rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Identifier of the camera / video source
    #[serde(rename = "camara")]
    pub source_id: String,

    /// Detected object class
    #[serde(rename = "objeto")]
    pub label: String,

    /// Local time of detection, `DD/MM/YYYY HH:MM:SS`
    #[serde(rename = "fecha")]
    pub timestamp: String,

    /// File name of the persisted frame in the artifact directory
    #[serde(rename = "imagen")]
    pub artifact_name: String,

    /// Detector confidence (0.0-1.0), held at the two decimals the wire carries
    #[serde(default)]
    pub confidence: f64,
}

impl DetectionEvent {
    /// Create an event stamped with the current local time
    pub fn new(
        source_id: impl Into<String>,
        label: impl Into<String>,
        artifact_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::with_timestamp(
            source_id,
            label,
            crate::time::event_timestamp_now(),
            artifact_name,
            confidence,
        )
    }

    /// Create an event with an explicit timestamp
    ///
    /// `confidence` is rounded to two decimals so an event decoded from the
    /// wire compares equal to the one that was sent.
    pub fn with_timestamp(
        source_id: impl Into<String>,
        label: impl Into<String>,
        timestamp: impl Into<String>,
        artifact_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            label: label.into(),
            timestamp: timestamp.into(),
            artifact_name: artifact_name.into(),
            confidence: round_confidence(confidence),
        }
    }
}

/// Round a confidence to two decimals
pub fn round_confidence(confidence: f64) -> f64 {
    (confidence * 100.0).round() / 100.0
}

impl fmt::Display for DetectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} detected: {} ({:.2}%) - {}",
            self.timestamp,
            self.source_id,
            self.label,
            self.confidence * 100.0,
            self.artifact_name
        )
    }
}

//! Event wire codec
//!
//! Pending events travel as one line holding a JSON array:
//!
//! ```text
//! [{"camara":"CAM1","objeto":"CARRO","fecha":"16/11/2025 14:00:00","imagen":"<uuid>.jpg","confidence":0.95}]
//! ```
//!
//! Key order is fixed and `confidence` always carries two decimals, so the
//! encoder writes objects directly instead of going through `serde_json`'s
//! float formatting. Decoding is lenient: any JSON whitespace is accepted and
//! malformed input yields an empty list.

use crate::event::DetectionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// `GET_COUNT` response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Encode events as a single-line JSON array
pub fn encode_events(events: &[DetectionEvent]) -> String {
    let mut out = String::with_capacity(2 + events.len() * 128);
    out.push('[');
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        encode_event(&mut out, event);
    }
    out.push(']');
    out
}

fn encode_event(out: &mut String, event: &DetectionEvent) {
    let confidence = if event.confidence.is_finite() {
        event.confidence
    } else {
        0.0
    };

    out.push_str("{\"camara\":");
    out.push_str(&json_string(&event.source_id));
    out.push_str(",\"objeto\":");
    out.push_str(&json_string(&event.label));
    out.push_str(",\"fecha\":");
    out.push_str(&json_string(&event.timestamp));
    out.push_str(",\"imagen\":");
    out.push_str(&json_string(&event.artifact_name));
    out.push_str(",\"confidence\":");
    out.push_str(&format!("{:.2}", confidence));
    out.push('}');
}

fn json_string(value: &str) -> String {
    Value::String(value.to_owned()).to_string()
}

/// Decode a `GET_LOGS` response line
///
/// Never fails: an empty line, a non-array document, or unparsable JSON
/// decodes to an empty list. Array elements that are not event objects are
/// skipped individually.
pub fn decode_events(line: &str) -> Vec<DetectionEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let elements = match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(elements)) => elements,
        Ok(other) => {
            debug!("Event payload is not an array: {}", other);
            return Vec::new();
        }
        Err(e) => {
            debug!("Malformed event payload: {}", e);
            return Vec::new();
        }
    };

    elements
        .into_iter()
        .filter_map(|element| match serde_json::from_value::<DetectionEvent>(element) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Skipping malformed event element: {}", e);
                None
            }
        })
        .collect()
}

/// Encode a `GET_COUNT` response line
pub fn encode_count(count: usize) -> String {
    format!("{{\"count\":{}}}", count)
}

/// Decode a `GET_COUNT` response line
pub fn decode_count(line: &str) -> crate::Result<usize> {
    serde_json::from_str::<CountResponse>(line.trim())
        .map(|response| response.count)
        .map_err(|e| crate::Error::Protocol(format!("Invalid count response '{}': {}", line.trim(), e)))
}

//! Detector output parser
//!
//! Grammar, one detection per line:
//!
//! ```text
//! LABEL,CONFIDENCE[,extra fields ignored]
//! CARRO,0.95,100,200,50,30
//! ```
//!
//! Lines that do not fit (no comma, empty label, non-numeric or out-of-range
//! confidence, status lines such as `NO_DETECTIONS`) are skipped one by one;
//! they never fail the whole parse.

use tracing::trace;

/// Minimum confidence for a detection to become an event
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// One parsed detector result
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

/// Parse detector output, keeping detections with `confidence >= threshold`
pub fn parse_detections(output: &str, threshold: f64) -> Vec<Detection> {
    output
        .lines()
        .filter_map(parse_line)
        .filter(|detection| detection.confidence >= threshold)
        .collect()
}

/// Parse a single result line; `None` for anything outside the grammar
fn parse_line(line: &str) -> Option<Detection> {
    let line = line.trim();
    let mut fields = line.split(',');

    let label = fields.next()?.trim();
    let Some(confidence) = fields.next() else {
        trace!("Skipping detector line without comma: {:?}", line);
        return None;
    };

    if label.is_empty() {
        trace!("Skipping detector line with empty label: {:?}", line);
        return None;
    }

    let confidence = match confidence.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && (0.0..=1.0).contains(&value) => value,
        _ => {
            trace!("Skipping detector line with invalid confidence: {:?}", line);
            return None;
        }
    };

    Some(Detection {
        label: label.to_string(),
        confidence,
    })
}

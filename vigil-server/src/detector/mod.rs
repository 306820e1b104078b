//! External object detector integration
//!
//! - [`invoker`]: runs the detector on a saved frame and returns its stdout
//! - [`parser`]: turns `LABEL,CONFIDENCE[,...]` lines into detections

pub mod invoker;
pub mod parser;

pub use invoker::{CommandInvoker, DetectionInvoker, DetectorError};
pub use parser::{parse_detections, Detection, DEFAULT_CONFIDENCE_THRESHOLD};

pub mod client;
pub mod encoder;
pub mod prompt;
pub mod scan;

pub use client::{AnalysisOutcome, AnalysisProvider, HttpAnalysisClient};
pub use scan::{CaptureStart, ScanPhase, ScanSession};

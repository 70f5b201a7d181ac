use thiserror::Error;

/// Failure kinds a scan can hit. Read and service failures terminate the
/// current run; persistence corruption is recovered at load time and never
/// reaches the user.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("captured image could not be read: {0}")]
    ReadFailure(String),
    #[error("analysis service call failed: {0}")]
    ServiceFailure(String),
    #[error("persisted history is corrupt: {0}")]
    PersistenceCorruption(String),
}

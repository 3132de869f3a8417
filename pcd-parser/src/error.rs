use thiserror::Error;

#[derive(Debug, Error)]
pub enum LasError {
    #[error("LAS read/write failed: {0}")]
    Las(#[from] las::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("point index {0} out of range")]
    PointOutOfRange(u64),
    #[error("no input LAS files")]
    NoInput,
}

use thiserror::Error;

use pcd_core::error::CoordinateError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("coordinate conversion failed: {0}")]
    Coordinate(#[from] CoordinateError),
    #[error("tile metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("draco encoder '{program}' failed ({status}): {stderr}")]
    Encoder {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("cannot generate a tileset for a leaf node")]
    LeafTileset,
    #[error("sibling tiles map to the same directory '{0}'")]
    ChildPathCollision(String),
    #[error("{failed} export worker(s) failed; first error: {first}")]
    Workers { failed: usize, first: String },
}

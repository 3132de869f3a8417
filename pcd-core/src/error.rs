use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("octree already built")]
    AlreadyBuilt,
    #[error("octree not built, data structure not initialized")]
    NotBuilt,
    #[error("points-max-num must be at least 8 times points-min-num")]
    InvalidPointBudget,
    #[error("a merged root can absorb at most 8 chunk roots, got {0}")]
    ChildSlotOverflow(usize),
}

/// Failure of a source-frame to internal-frame point conversion. The ingest
/// path logs these and drops the offending point instead of aborting.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CoordinateError(pub String);

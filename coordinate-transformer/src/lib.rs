pub mod elevation;
pub mod error;
pub mod geoid;
pub mod pipeline;
pub mod transformer;

pub use error::ProjError;
pub use pipeline::InternalFrameTransform;
pub use transformer::{
    Coordinate, CrsTransformer, EpsgCode, EPSG_WGS84_GEOCENTRIC, EPSG_WGS84_GEOGRAPHIC,
    EPSG_WGS84_GEOGRAPHIC_3D, EPSG_WORLD_MERCATOR,
};

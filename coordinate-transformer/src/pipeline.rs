use pcd_core::error::CoordinateError;
use pcd_core::octree::tree::PointTransform;
use pcd_core::octree::INTERNAL_CRS_EPSG;

use crate::elevation::ElevationCorrector;
use crate::transformer::{Coordinate, CrsTransformer, EPSG_WGS84_GEOGRAPHIC};

/// The ingestion-side conversion chain: source SRID to WGS84 to obtain the
/// geographic position, elevation correction there, then source SRID to the
/// internal metric frame with the corrected elevation.
pub struct InternalFrameTransform {
    crs: CrsTransformer,
    elevation: Box<dyn ElevationCorrector>,
}

impl InternalFrameTransform {
    pub fn new(crs: CrsTransformer, elevation: Box<dyn ElevationCorrector>) -> Self {
        Self { crs, elevation }
    }
}

impl PointTransform for InternalFrameTransform {
    fn to_internal(
        &self,
        srid: u16,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<(f64, f64, f64), CoordinateError> {
        let geographic = self
            .crs
            .convert(srid, EPSG_WGS84_GEOGRAPHIC, Coordinate::new(x, y, z))
            .map_err(|err| CoordinateError(err.to_string()))?;
        let corrected = self
            .elevation
            .correct(geographic.x, geographic.y, geographic.z);
        let internal = self
            .crs
            .convert(srid, INTERNAL_CRS_EPSG, Coordinate::new(x, y, corrected))
            .map_err(|err| CoordinateError(err.to_string()))?;
        Ok((internal.x, internal.y, internal.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::{OffsetCorrector, PipelineCorrector};

    fn transform_with_offset(offset: f64) -> InternalFrameTransform {
        InternalFrameTransform::new(
            CrsTransformer::new().unwrap(),
            Box::new(PipelineCorrector::new(vec![Box::new(
                OffsetCorrector::new(offset),
            )])),
        )
    }

    #[test]
    fn geographic_point_reaches_the_internal_frame() {
        let transform = transform_with_offset(0.0);
        let (x, y, z) = transform
            .to_internal(4326, 13.7995147, 42.3306312, 1.0)
            .unwrap();
        assert!(x > 1_000_000.0);
        assert!(y > 1_000_000.0);
        assert!((z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn offset_is_applied_before_the_internal_conversion() {
        let transform = transform_with_offset(10.0);
        let (_, _, z) = transform
            .to_internal(4326, 13.7995147, 42.3306312, 1.0)
            .unwrap();
        assert!((z - 11.0).abs() < 1e-9);
    }

    #[test]
    fn projected_input_matches_the_geographic_equivalent() {
        // the same physical point through EPSG:32633 and EPSG:4326
        let transform = transform_with_offset(0.0);
        let from_projected = transform
            .to_internal(32633, 401094.30, 4687184.70, 1.0)
            .unwrap();
        let from_geographic = transform
            .to_internal(4326, 13.7995147, 42.3306312, 1.0)
            .unwrap();
        assert!((from_projected.0 - from_geographic.0).abs() < 0.5);
        assert!((from_projected.1 - from_geographic.1).abs() < 0.5);
    }

    #[test]
    fn unknown_srid_surfaces_as_a_coordinate_error() {
        let transform = transform_with_offset(0.0);
        assert!(transform.to_internal(1, 0.0, 0.0, 0.0).is_err());
    }
}

use coordinate_transformer::{Coordinate, CrsTransformer};
use pcd_core::error::CoordinateError;
use pcd_core::octree::INTERNAL_CRS_EPSG;
use pcd_core::pointcloud::bounds::BoundingBox;

/// Emit-side coordinate conversions: internal frame to ECEF for point
/// payloads, internal bounding boxes to WGS84 regions for tile metadata.
/// Consumers each hold their own instance.
pub trait EmitTransform {
    fn to_ecef(&self, x: f64, y: f64, z: f64) -> Result<(f64, f64, f64), CoordinateError>;
    fn region_for(&self, bbox: &BoundingBox) -> Result<[f64; 6], CoordinateError>;
}

impl EmitTransform for CrsTransformer {
    fn to_ecef(&self, x: f64, y: f64, z: f64) -> Result<(f64, f64, f64), CoordinateError> {
        let ecef = CrsTransformer::to_ecef(self, Coordinate::new(x, y, z), INTERNAL_CRS_EPSG)
            .map_err(|err| CoordinateError(err.to_string()))?;
        Ok((ecef.x, ecef.y, ecef.z))
    }

    fn region_for(&self, bbox: &BoundingBox) -> Result<[f64; 6], CoordinateError> {
        self.bbox_to_wgs84_region(
            (bbox.xmin, bbox.ymin),
            (bbox.xmax, bbox.ymax),
            bbox.zmin,
            bbox.zmax,
            INTERNAL_CRS_EPSG,
        )
        .map_err(|err| CoordinateError(err.to_string()))
    }
}
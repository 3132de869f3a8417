use std::path::Path;

use anyhow::Context as _;

use coordinate_transformer::elevation::{
    ElevationCorrector, GeoidCorrector, OffsetCorrector, PipelineCorrector,
};
use coordinate_transformer::geoid::GridGeoidModel;
use coordinate_transformer::{CrsTransformer, InternalFrameTransform};
use pcd_core::error::CoordinateError;
use pcd_exporter::draco::DracoEncoder;
use pcd_exporter::transform::EmitTransform;
use pcd_exporter::TransformFactory;

/// Builds the ingestion conversion chain: projection plus the configured
/// elevation correction stages.
pub fn ingest_transform(
    zoffset: f64,
    geoid_model: Option<&Path>,
) -> anyhow::Result<InternalFrameTransform> {
    let crs = CrsTransformer::new().context("projection context")?;

    let mut stages: Vec<Box<dyn ElevationCorrector>> = vec![Box::new(OffsetCorrector::new(zoffset))];
    if let Some(path) = geoid_model {
        let model = GridGeoidModel::from_ascii_grid(path)
            .with_context(|| format!("loading geoid grid {}", path.display()))?;
        stages.push(Box::new(GeoidCorrector::new(Box::new(model))));
    }

    Ok(InternalFrameTransform::new(
        crs,
        Box::new(PipelineCorrector::new(stages)),
    ))
}

/// One projection context per export worker; PROJ handles cannot be shared
/// across threads.
pub fn emit_factory() -> Box<TransformFactory> {
    Box::new(|| {
        let crs = CrsTransformer::new().map_err(|err| CoordinateError(err.to_string()))?;
        Ok(Box::new(crs) as Box<dyn EmitTransform>)
    })
}

pub fn draco_encoder(enabled: bool, program: Option<&Path>) -> Option<DracoEncoder> {
    if !enabled {
        return None;
    }
    program.map(|path| DracoEncoder::new(path.to_path_buf()))
}

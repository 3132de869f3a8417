use pcd_core::octree::tree::GridTree;
use pcd_parser::source::LasSource;
use pcd_parser::writer::merge_las_files;

use crate::files;
use crate::transform;
use crate::VerifyArgs;

/// Tolerance for header-bounds containment checks, generous enough to
/// swallow coordinate quantization.
const BOUNDS_EPSILON: f64 = 1e-6;

/// Runs the whole LAS through the ingestion pipeline and the tree build,
/// then re-scans every record by random access, checking it sits inside
/// the header bounding box.
pub fn run_verify_las(args: &VerifyArgs) -> anyhow::Result<()> {
    let common = &args.common;
    let mut source = LasSource::open(&common.input)?;

    let ingest = transform::ingest_transform(
        common.zoffset,
        common.geoid.then_some(common.geoid_model.as_deref()).flatten(),
    )?;
    let mut tree = GridTree::new(Box::new(ingest), common.grid_max_size, common.grid_min_size);
    let read = source.read_into(&tree, common.srid, common.eight_bit)?;
    tree.build()?;

    let root = tree.root()?;
    log::info!(
        "tree built: {} points total, {} in the root, {} dropped",
        root.total_count(),
        root.local_count(),
        tree.dropped_points()
    );
    anyhow::ensure!(
        root.total_count() + tree.dropped_points() == read,
        "tree lost points: read {read}, indexed {}, dropped {}",
        root.total_count(),
        tree.dropped_points()
    );

    let bounds = source.header().bounds();
    let count = source.point_count();
    let mut invalid = 0u64;
    for index in 0..count {
        let point = source.point(index)?;
        let inside = point.x >= bounds.min.x - BOUNDS_EPSILON
            && point.x <= bounds.max.x + BOUNDS_EPSILON
            && point.y >= bounds.min.y - BOUNDS_EPSILON
            && point.y <= bounds.max.y + BOUNDS_EPSILON
            && point.z >= bounds.min.z - BOUNDS_EPSILON
            && point.z <= bounds.max.z + BOUNDS_EPSILON;
        if !inside {
            invalid += 1;
            log::warn!(
                "point {index} outside header bounds: ({}, {}, {})",
                point.x,
                point.y,
                point.z
            );
        }
    }
    anyhow::ensure!(invalid == 0, "{invalid} points outside the header bounding box");
    log::info!("verified {count} points in {}", common.input.display());
    Ok(())
}

/// Concatenates every `content.las` companion under the input folder and
/// checks the merged file reads back with the expected point count.
pub fn run_verify_las_merge(args: &VerifyArgs) -> anyhow::Result<()> {
    let input = &args.common.input;
    let las_files = files::find_all_content_las(input)?;
    anyhow::ensure!(
        !las_files.is_empty(),
        "no {} files under {}",
        files::CONTENT_LAS,
        input.display()
    );

    let merged = tempfile::Builder::new()
        .prefix("verify-merged-")
        .suffix(".las")
        .tempfile()?;
    let written = merge_las_files(&las_files, merged.path())?;

    let merged_source = LasSource::open(merged.path())?;
    anyhow::ensure!(
        merged_source.point_count() == written,
        "merged LAS reports {} points, wrote {written}",
        merged_source.point_count()
    );
    log::info!(
        "merged {} files, {written} points verified",
        las_files.len()
    );
    Ok(())
}

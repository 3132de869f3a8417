use std::path::Path;

use anyhow::Context as _;

use pcd_core::octree::tree::GridTree;
use pcd_exporter::pipeline::{run_export, ExportOptions};
use pcd_parser::source::LasSource;
use pcd_parser::writer::write_point_subset;

use crate::files::{self, CHUNK_TILESET_PREFIX, CONTENT_LAS};
use crate::transform;
use crate::IndexArgs;

/// The `index` flow: for each input LAS, build the grid octree, rebalance
/// it, export the tileset and re-emit the root sample as a LAS companion.
pub fn run_index(args: &IndexArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output folder {}", args.output.display()))?;

    let las_files = files::discover_las(&args.common.input, args.common.folder, args.common.recursive)?;
    anyhow::ensure!(
        !las_files.is_empty(),
        "no LAS files found under {}",
        args.common.input.display()
    );
    for (i, path) in las_files.iter().enumerate() {
        log::info!("processing file {}/{}: {}", i + 1, las_files.len(), path.display());
        process_las_file(path, args)
            .with_context(|| format!("processing {}", path.display()))?;
    }
    log::info!("conversion completed");
    Ok(())
}

fn process_las_file(path: &Path, args: &IndexArgs) -> anyhow::Result<()> {
    let mut source = LasSource::open(path)?;

    let ingest = transform::ingest_transform(
        args.common.zoffset,
        args.common
            .geoid
            .then_some(args.common.geoid_model.as_deref())
            .flatten(),
    )?;
    let mut tree = GridTree::new(
        Box::new(ingest),
        args.common.grid_max_size,
        args.common.grid_min_size,
    );
    let (edge_x, edge_y, edge_z) = source.edges();
    tree.set_chunk_edges(edge_x, edge_y, edge_z, args.use_edge_calculate);
    tree.set_error_scale(args.geometric_error_scale);

    log::info!("reading {} points...", source.point_count());
    let read = source.read_into(&tree, args.common.srid, args.common.eight_bit)?;
    if tree.dropped_points() > 0 {
        log::warn!(
            "{} of {read} points dropped by coordinate conversion",
            tree.dropped_points()
        );
    }

    log::info!("building data structure...");
    tree.build()?;
    tree.split_big_nodes(args.points_max_num, args.points_min_num)?;
    tree.merge_small_nodes(args.points_min_num)?;

    let root = tree.root()?;
    log::info!(
        "root node holds {} of {} points",
        root.local_count(),
        root.total_count()
    );

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cloud".to_string());
    let chunk_dir = args.output.join(format!("{CHUNK_TILESET_PREFIX}{stem}"));

    let options = ExportOptions {
        base_dir: chunk_dir.clone(),
        refine: args.common.refine_mode,
        draco: transform::draco_encoder(
            args.common.draco,
            args.common.draco_encoder_path.as_deref(),
        ),
        meta: tree.error_meta(),
        root_only: false,
    };
    run_export(tree.root()?, &options, &transform::emit_factory())?;

    let root = tree.root()?;
    let indices: Vec<u64> = root.points().iter().map(|p| p.source_index).collect();
    write_point_subset(&mut source, indices, &chunk_dir.join(CONTENT_LAS))?;

    log::info!("done processing {}", path.display());
    Ok(())
}

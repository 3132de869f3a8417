use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use pcd_core::octree::tree::GridTree;
use pcd_exporter::pipeline::{run_export, ExportOptions};
use pcd_exporter::tileset::{read_tileset, write_tileset, ChildTile, Content};
use pcd_parser::source::LasSource;
use pcd_parser::writer::{merge_las_files, write_point_subset};

use crate::files::{self, CHUNK_TILESET_PREFIX, CONTENT_LAS};
use crate::transform;
use crate::MergeArgs;

/// Directory levels deeper than this are left alone by the merge-tree walk.
const MAX_MERGE_DEPTH: usize = 10;

pub fn run_merge_children(args: &MergeArgs) -> anyhow::Result<()> {
    merge_children_dir(&args.input, args)?;
    log::info!("done merging children of {}", args.input.display());
    Ok(())
}

/// Consolidates the chunk tilesets directly under `dir` into one parent
/// tileset written at `dir` itself: a coarsely decimated root sample over
/// the union of the children, child descriptors pointing at the existing
/// child tilesets, and a root LAS companion.
fn merge_children_dir(dir: &Path, args: &MergeArgs) -> anyhow::Result<()> {
    let child_las = files::find_child_las(dir)?;
    anyhow::ensure!(
        !child_las.is_empty(),
        "no child tilesets with {CONTENT_LAS} under {}",
        dir.display()
    );
    for (i, path) in child_las.iter().enumerate() {
        log::info!("child {}/{}: {}", i + 1, child_las.len(), path.display());
    }

    let merged_las = tempfile::Builder::new()
        .prefix("merged-")
        .suffix(".las")
        .tempfile()
        .context("creating merged LAS scratch file")?;
    merge_las_files(&child_las, merged_las.path())?;

    // the merged tree provides the root's decimated sample
    let mut merged_source = LasSource::open(merged_las.path())?;
    let mut tree = new_merge_tree(args)?;
    merged_source.read_into(&tree, args.srid, args.eight_bit)?;
    tree.build()?;

    // each child LAS becomes a subtree wholesale
    let mut child_roots = Vec::with_capacity(child_las.len());
    for path in &child_las {
        let mut child_source = LasSource::open(path)?;
        let mut child_tree = new_merge_tree(args)?;
        child_source.read_into(&child_tree, args.srid, args.eight_bit)?;
        child_tree.build()?;
        child_roots.push(child_tree.into_root()?);
    }
    tree.root_mut()?.set_children(child_roots)?;

    let options = ExportOptions {
        base_dir: dir.to_path_buf(),
        refine: args.refine_mode,
        draco: transform::draco_encoder(args.draco, args.draco_encoder_path.as_deref()),
        meta: tree.error_meta(),
        root_only: true,
    };
    run_export(tree.root()?, &options, &transform::emit_factory())?;

    repair_tileset_metadata(dir, &child_las)?;

    let indices: Vec<u64> = tree
        .root()?
        .points()
        .iter()
        .map(|p| p.source_index)
        .collect();
    write_point_subset(&mut merged_source, indices, &dir.join(CONTENT_LAS))?;

    Ok(())
}

fn new_merge_tree(args: &MergeArgs) -> anyhow::Result<GridTree> {
    let ingest = transform::ingest_transform(
        args.zoffset,
        args.geoid.then_some(args.geoid_model.as_deref()).flatten(),
    )?;
    Ok(GridTree::new(
        Box::new(ingest),
        args.grid_max_size,
        args.grid_min_size,
    ))
}

/// Rewrites the parent's tileset.json: one child descriptor per merged
/// tileset carrying the child's own region and geometric error, a root
/// region covering them all, and the root error doubled from the largest
/// child.
fn repair_tileset_metadata(dir: &Path, child_las: &[PathBuf]) -> anyhow::Result<()> {
    let root_path = dir.join("tileset.json");
    let mut root_tileset =
        read_tileset(&root_path).with_context(|| format!("reading {}", root_path.display()))?;

    let mut children = Vec::with_capacity(child_las.len());
    let mut max_child_error = 0.0f64;
    let mut region = root_tileset.root.bounding_volume.region;
    for las_path in child_las {
        let child_dir = las_path
            .parent()
            .context("child LAS has no parent directory")?;
        let child_tileset = read_tileset(&child_dir.join("tileset.json"))
            .with_context(|| format!("reading {}/tileset.json", child_dir.display()))?;
        let relative = child_dir
            .strip_prefix(dir)
            .context("child tileset outside the merge root")?
            .join("tileset.json");

        let child_region = child_tileset.root.bounding_volume.region;
        region[0] = region[0].min(child_region[0]);
        region[1] = region[1].min(child_region[1]);
        region[2] = region[2].max(child_region[2]);
        region[3] = region[3].max(child_region[3]);
        region[4] = region[4].min(child_region[4]);
        region[5] = region[5].max(child_region[5]);
        max_child_error = max_child_error.max(child_tileset.root.geometric_error);

        children.push(ChildTile {
            content: Content {
                url: relative.to_string_lossy().into_owned(),
            },
            bounding_volume: child_tileset.root.bounding_volume.clone(),
            geometric_error: child_tileset.root.geometric_error,
            refine: "REPLACE".to_string(),
        });
    }

    root_tileset.root.children = children;
    root_tileset.root.geometric_error = 2.0 * max_child_error;
    root_tileset.root.bounding_volume.region = region;
    write_tileset(&root_path, &root_tileset)?;
    Ok(())
}

/// Scales the root tile's geometric error after a level merge so the top
/// of the hierarchy stays visible at low zoom.
fn adjust_root_geometric_error(dir: &Path, scale: f64) -> anyhow::Result<()> {
    let path = dir.join("tileset.json");
    let mut tileset = read_tileset(&path)?;
    tileset.root.geometric_error *= scale;
    write_tileset(&path, &tileset)?;
    Ok(())
}

pub fn run_merge_tree(args: &MergeArgs) -> anyhow::Result<()> {
    let root_dir = &args.input;

    let mut levels: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    levels.entry(0).or_default().push(root_dir.clone());
    collect_merge_dirs(root_dir, 0, &mut levels)?;

    for (level, dirs) in &levels {
        log::info!("level {level}: {} folder(s)", dirs.len());
    }
    let Some(&max_level) = levels.keys().max() else {
        return Ok(());
    };

    let mut cell_size = args.grid_max_size;
    for level in (0..=max_level).rev() {
        for dir in levels.get(&level).map(Vec::as_slice).unwrap_or_default() {
            let mut level_args = args.clone();
            level_args.grid_min_size = cell_size;
            level_args.grid_max_size = cell_size * 2.0;

            // folders without chunk children are containers only; skip them
            if let Err(err) = merge_children_dir(dir, &level_args) {
                log::warn!("skipping {}: {err:#}", dir.display());
                continue;
            }
            if level == 1 {
                adjust_root_geometric_error(dir, 2.0)?;
            } else if level == 0 {
                adjust_root_geometric_error(dir, 4.0)?;
            }
        }
        cell_size *= 2.0;
    }

    log::info!("done merging tree {}", root_dir.display());
    Ok(())
}

/// Collects the container directories to merge, grouped by depth. Chunk
/// tileset directories (prefix plus `content.las`) are the leaves of the
/// walk and are not descended into.
fn collect_merge_dirs(
    dir: &Path,
    depth: usize,
    levels: &mut BTreeMap<usize, Vec<PathBuf>>,
) -> anyhow::Result<()> {
    if depth >= MAX_MERGE_DEPTH {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let is_chunk = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with(CHUNK_TILESET_PREFIX))
            && path.join(CONTENT_LAS).is_file();
        if is_chunk {
            continue;
        }
        levels.entry(depth + 1).or_default().push(path.clone());
        collect_merge_dirs(&path, depth + 1, levels)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pcd_exporter::tileset::{Asset, BoundingVolume, Root, Tileset};

    fn tileset_fixture(region: [f64; 6], geometric_error: f64) -> Tileset {
        Tileset {
            asset: Asset {
                version: "1.0".to_string(),
            },
            geometric_error,
            root: Root {
                content: Content {
                    url: "content.pnts".to_string(),
                },
                bounding_volume: BoundingVolume { region },
                geometric_error,
                refine: "ADD".to_string(),
                children: Vec::new(),
            },
        }
    }

    #[test]
    fn repair_rewrites_root_children_and_region() {
        let dir = tempfile::tempdir().unwrap();
        write_tileset(
            &dir.path().join("tileset.json"),
            &tileset_fixture([0.2, 0.7, 0.21, 0.71, 0.0, 5.0], 1.0),
        )
        .unwrap();

        let mut child_las = Vec::new();
        for (name, region, error) in [
            ("chunk-tileset-a", [0.19, 0.69, 0.20, 0.70, -1.0, 3.0], 4.0),
            ("chunk-tileset-b", [0.21, 0.71, 0.23, 0.73, 0.0, 9.0], 6.0),
        ] {
            let chunk = dir.path().join(name);
            std::fs::create_dir_all(&chunk).unwrap();
            write_tileset(
                &chunk.join("tileset.json"),
                &tileset_fixture(region, error),
            )
            .unwrap();
            std::fs::write(chunk.join(CONTENT_LAS), b"").unwrap();
            child_las.push(chunk.join(CONTENT_LAS));
        }

        repair_tileset_metadata(dir.path(), &child_las).unwrap();

        let repaired = read_tileset(&dir.path().join("tileset.json")).unwrap();
        assert_eq!(repaired.root.children.len(), 2);
        assert_eq!(
            repaired.root.children[0].content.url,
            "chunk-tileset-a/tileset.json"
        );
        assert_eq!(repaired.root.children[1].geometric_error, 6.0);
        assert_eq!(repaired.root.children[0].refine, "REPLACE");
        // doubled largest child error
        assert_eq!(repaired.root.geometric_error, 12.0);
        // region covers the union of root and children
        let region = repaired.root.bounding_volume.region;
        assert_eq!(region[0], 0.19);
        assert_eq!(region[2], 0.23);
        assert_eq!(region[4], -1.0);
        assert_eq!(region[5], 9.0);
    }

    #[test]
    fn adjust_scales_only_the_root_tile_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tileset.json");
        write_tileset(&path, &tileset_fixture([0.0; 6], 3.0)).unwrap();

        adjust_root_geometric_error(dir.path(), 4.0).unwrap();

        let adjusted = read_tileset(&path).unwrap();
        assert_eq!(adjusted.root.geometric_error, 12.0);
        assert_eq!(adjusted.geometric_error, 3.0);
    }

    #[test]
    fn merge_walk_stops_at_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("zone");
        let chunk = zone.join("chunk-tileset-a");
        let inside_chunk = chunk.join("0");
        std::fs::create_dir_all(&inside_chunk).unwrap();
        std::fs::write(chunk.join(CONTENT_LAS), b"").unwrap();
        let plain = zone.join("not-a-chunk");
        std::fs::create_dir_all(&plain).unwrap();

        let mut levels = BTreeMap::new();
        collect_merge_dirs(dir.path(), 0, &mut levels).unwrap();

        let level1 = &levels[&1];
        assert_eq!(level1, &vec![zone.clone()]);
        let level2 = &levels[&2];
        assert_eq!(level2, &vec![plain]);
        assert!(levels.get(&3).is_none());
    }

    #[test]
    fn chunk_dirs_without_las_are_still_descended() {
        let dir = tempfile::tempdir().unwrap();
        let incomplete = dir.path().join("chunk-tileset-broken");
        std::fs::create_dir_all(incomplete.join("sub")).unwrap();

        let mut levels = BTreeMap::new();
        collect_merge_dirs(dir.path(), 0, &mut levels).unwrap();
        assert!(levels[&1].contains(&incomplete));
    }
}

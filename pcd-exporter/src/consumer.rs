use std::fs;

use crossbeam_channel::{Receiver, Sender};

use pcd_core::octree::node::GeometricErrorMeta;

use crate::draco::DracoEncoder;
use crate::error::ExportError;
use crate::ply::{write_ascii_ply, PlyVertex};
use crate::pnts::{build_pnts, build_pnts_draco, collect_tile_points, tile_data};
use crate::tileset::{tileset_for_node, write_tileset, RefineMode};
use crate::transform::EmitTransform;
use crate::work::WorkUnit;

/// Pulls work units off the channel and writes one tile each: the binary
/// `content.pnts` plus, for non-leaf (or root) nodes, the `tileset.json`
/// describing it and its children. The first failure is surfaced on the
/// error channel and ends this consumer.
pub struct Consumer {
    pub refine: RefineMode,
    pub draco: Option<DracoEncoder>,
    pub meta: GeometricErrorMeta,
}

impl Consumer {
    pub fn consume(
        &self,
        work: Receiver<WorkUnit>,
        errors: Sender<ExportError>,
        transform: Box<dyn EmitTransform>,
    ) {
        for unit in work.iter() {
            if let Err(err) = self.emit(&unit, transform.as_ref()) {
                log::error!("failed to emit {}: {err}", unit.dir.display());
                let _ = errors.send(err);
                return;
            }
        }
    }

    fn emit(&self, unit: &WorkUnit, transform: &dyn EmitTransform) -> Result<(), ExportError> {
        fs::create_dir_all(&unit.dir)?;

        let points = collect_tile_points(unit, self.refine);
        let data = tile_data(&points, transform)?;

        let bytes = match &self.draco {
            Some(encoder) => {
                let ply_path = unit.dir.join("content.ply");
                let drc_path = unit.dir.join("content.drc");
                let vertices: Vec<PlyVertex> = data
                    .positions
                    .chunks_exact(3)
                    .zip(data.colors.chunks_exact(3))
                    .map(|(position, color)| PlyVertex {
                        x: position[0],
                        y: position[1],
                        z: position[2],
                        r: color[0],
                        g: color[1],
                        b: color[2],
                    })
                    .collect();

                let encoded = (|| -> Result<Vec<u8>, ExportError> {
                    write_ascii_ply(&ply_path, &vertices)?;
                    encoder.encode(&ply_path, &drc_path)?;
                    Ok(fs::read(&drc_path)?)
                })();
                // temporaries go away on success and failure alike
                let _ = fs::remove_file(&ply_path);
                let _ = fs::remove_file(&drc_path);

                build_pnts_draco(data.count, data.rtc_center, &encoded?)?
            }
            None => build_pnts(&data)?,
        };
        fs::write(unit.dir.join("content.pnts"), bytes)?;

        if !unit.node.is_leaf() || unit.node.is_root() {
            let tileset = tileset_for_node(unit.node, transform, &self.meta, self.refine)?;
            write_tileset(&unit.dir.join("tileset.json"), &tileset)?;
        }
        Ok(())
    }
}

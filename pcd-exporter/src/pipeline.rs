use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;

use pcd_core::error::CoordinateError;
use pcd_core::octree::node::{GeometricErrorMeta, GridNode};

use crate::consumer::Consumer;
use crate::draco::DracoEncoder;
use crate::error::ExportError;
use crate::producer::Producer;
use crate::tileset::RefineMode;
use crate::transform::EmitTransform;

/// Builds one emit-side transform per consumer thread; projection handles
/// are not shareable across threads.
pub type TransformFactory =
    dyn Fn() -> Result<Box<dyn EmitTransform>, CoordinateError> + Send + Sync;

pub struct ExportOptions {
    pub base_dir: PathBuf,
    pub refine: RefineMode,
    pub draco: Option<DracoEncoder>,
    pub meta: GeometricErrorMeta,
    /// Merge mode: emit only the (synthetic) root tile.
    pub root_only: bool,
}

/// Exports the built tree rooted at `root` as a 3D Tiles tileset: one
/// producer walks the tree, one consumer per CPU writes tiles. The bounded
/// work channel (five units per consumer) backpressures the producer.
pub fn run_export(
    root: &GridNode,
    options: &ExportOptions,
    transform_factory: &TransformFactory,
) -> Result<(), ExportError> {
    let consumer_count = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    let (work_tx, work_rx) = crossbeam_channel::bounded(consumer_count * 5);
    let (error_tx, error_rx) = crossbeam_channel::unbounded();

    log::info!(
        "exporting tileset to {} with {consumer_count} workers",
        options.base_dir.display()
    );

    thread::scope(|scope| {
        let producer = if options.root_only {
            Producer::root_only(options.base_dir.clone())
        } else {
            Producer::new(options.base_dir.clone())
        };
        {
            let error_tx = error_tx.clone();
            scope.spawn(move || {
                if let Err(err) = producer.produce(root, &work_tx) {
                    let _ = error_tx.send(err);
                }
                // dropping the sender closes the channel; consumers drain
                // what is left and stop
            });
        }

        for _ in 0..consumer_count {
            let work_rx = work_rx.clone();
            let error_tx = error_tx.clone();
            let consumer = Consumer {
                refine: options.refine,
                draco: options.draco.clone(),
                meta: options.meta,
            };
            scope.spawn(move || {
                let transform = match transform_factory() {
                    Ok(transform) => transform,
                    Err(err) => {
                        let _ = error_tx.send(ExportError::Coordinate(err));
                        return;
                    }
                };
                consumer.consume(work_rx, error_tx, transform);
            });
        }
    });
    drop(error_tx);

    let errors: Vec<ExportError> = error_rx.try_iter().collect();
    if let Some(first) = errors.first() {
        return Err(ExportError::Workers {
            failed: errors.len(),
            first: first.to_string(),
        });
    }
    Ok(())
}

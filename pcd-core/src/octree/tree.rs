use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crate::error::{CoordinateError, TreeError};
use crate::loader::SequentialLoader;
use crate::pointcloud::bounds::BoundingBox;
use crate::pointcloud::point::{Point, SourcePoint};

use super::node::{GeometricErrorMeta, GridNode};

/// Converts raw source-frame coordinates into the internal metric frame,
/// applying elevation correction along the way. Implemented on top of the
/// projection library by the coordinate transformer crate; tests stub it.
pub trait PointTransform: Send {
    fn to_internal(&self, srid: u16, x: f64, y: f64, z: f64)
        -> Result<(f64, f64, f64), CoordinateError>;
}

/// An octree of points built with the grid decimation algorithm. Owns the
/// ingestion loader and the root node; built at most once, after which
/// mutation is limited to the rewrite passes.
pub struct GridTree {
    root: Option<GridNode>,
    loader: SequentialLoader,
    transform: Box<dyn PointTransform>,
    built: bool,
    max_cell_size: f64,
    min_cell_size: f64,
    edge_x: f64,
    edge_y: f64,
    edge_z: f64,
    use_edges: bool,
    error_scale: f64,
    dropped: AtomicU64,
}

impl GridTree {
    pub fn new(transform: Box<dyn PointTransform>, max_cell_size: f64, min_cell_size: f64) -> Self {
        Self {
            root: None,
            loader: SequentialLoader::new(),
            transform,
            built: false,
            max_cell_size,
            min_cell_size,
            edge_x: 0.0,
            edge_y: 0.0,
            edge_z: 0.0,
            use_edges: false,
            error_scale: 32.0,
            dropped: AtomicU64::new(0),
        }
    }

    /// Records the edge lengths of the originating LAS bounding box, used
    /// by the edge-scaled geometric error formula.
    pub fn set_chunk_edges(&mut self, edge_x: f64, edge_y: f64, edge_z: f64, use_edges: bool) {
        self.edge_x = edge_x;
        self.edge_y = edge_y;
        self.edge_z = edge_z;
        self.use_edges = use_edges;
    }

    pub fn set_error_scale(&mut self, error_scale: f64) {
        self.error_scale = error_scale;
    }

    /// Converts a raw record to the internal frame and queues it for the
    /// build. Conversion failures are logged and the point is dropped; the
    /// rest of the ingestion continues.
    pub fn add_point(&self, srid: u16, point: SourcePoint) {
        match self
            .transform
            .to_internal(srid, point.x, point.y, point.z)
        {
            Ok((x, y, z)) => self.loader.add(Point {
                x,
                y,
                z,
                r: point.r,
                g: point.g,
                b: point.b,
                intensity: point.intensity,
                classification: point.classification,
                source_index: point.source_index,
            }),
            Err(err) => {
                log::warn!("dropping point {}: {err}", point.source_index);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of points dropped by failed coordinate conversions.
    pub fn dropped_points(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Builds the hierarchical structure: determines the dataset bounds,
    /// drains the loader into the root from one worker per CPU, then
    /// flattens the cells into per-node point slices.
    pub fn build(&mut self) -> Result<(), TreeError> {
        if self.built {
            return Err(TreeError::AlreadyBuilt);
        }

        let bounds = self.loader.bounds();
        log::info!(
            "tree bounds x: [{:.3}, {:.3}] y: [{:.3}, {:.3}] z: [{:.3}, {:.3}]",
            bounds[0],
            bounds[1],
            bounds[2],
            bounds[3],
            bounds[4],
            bounds[5]
        );
        let bounding_box =
            BoundingBox::new(bounds[0], bounds[1], bounds[2], bounds[3], bounds[4], bounds[5]);
        let root = GridNode::new(bounding_box, self.max_cell_size, self.min_cell_size, true);
        self.loader.initialize();

        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        thread::scope(|scope| {
            for _ in 0..workers {
                let loader = &self.loader;
                let root = &root;
                scope.spawn(move || loop {
                    match loader.next() {
                        (Some(point), more) => {
                            root.add_point(point, true);
                            if !more {
                                break;
                            }
                        }
                        (None, true) => continue,
                        (None, false) => break,
                    }
                });
            }
        });
        self.loader.clear();

        let mut root = root;
        root.build_points();
        self.root = Some(root);
        self.built = true;
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn root(&self) -> Result<&GridNode, TreeError> {
        self.root.as_ref().ok_or(TreeError::NotBuilt)
    }

    pub fn root_mut(&mut self) -> Result<&mut GridNode, TreeError> {
        self.root.as_mut().ok_or(TreeError::NotBuilt)
    }

    /// Takes the root out of the tree, e.g. to graft it under a merged
    /// parent tree.
    pub fn into_root(self) -> Result<GridNode, TreeError> {
        self.root.ok_or(TreeError::NotBuilt)
    }

    /// Runs the split pass. `max_points` must allow at least `min_points`
    /// per octant, otherwise splitting could never settle between the two
    /// rewrite passes.
    pub fn split_big_nodes(&mut self, max_points: u32, min_points: u32) -> Result<(), TreeError> {
        if max_points < 8 * min_points {
            return Err(TreeError::InvalidPointBudget);
        }
        log::info!("splitting leaves above {max_points} points");
        self.root_mut()?.split_big(max_points);
        Ok(())
    }

    /// Runs the merge pass.
    pub fn merge_small_nodes(&mut self, min_points: u32) -> Result<(), TreeError> {
        log::info!("merging nodes below {min_points} points");
        self.root_mut()?.merge_small_children(min_points as u64);
        Ok(())
    }

    pub fn error_meta(&self) -> GeometricErrorMeta {
        GeometricErrorMeta {
            use_edges: self.use_edges,
            edge_x: self.edge_x,
            edge_y: self.edge_y,
            edge_z: self.edge_z,
            root_cell_size: self.max_cell_size,
            error_scale: self.error_scale,
        }
    }
}

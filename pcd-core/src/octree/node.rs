use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};

use crate::error::TreeError;
use crate::pointcloud::bounds::BoundingBox;
use crate::pointcloud::point::Point;

use super::cell::{GridCell, GridIndex};

/// Tree-level inputs to the per-node geometric error formulas.
#[derive(Debug, Clone, Copy)]
pub struct GeometricErrorMeta {
    /// Switches from the classic cell-size formula to the edge-scaled one.
    pub use_edges: bool,
    pub edge_x: f64,
    pub edge_y: f64,
    pub edge_z: f64,
    pub root_cell_size: f64,
    /// Divisor of the edge-scaled formula. Tied to the viewer's maximum
    /// screen space error tuning, hence configurable.
    pub error_scale: f64,
}

impl Default for GeometricErrorMeta {
    fn default() -> Self {
        Self {
            use_edges: false,
            edge_x: 0.0,
            edge_y: 0.0,
            edge_z: 0.0,
            root_cell_size: 1.0,
            error_scale: 32.0,
        }
    }
}

/// Returns the octant index holding the given point within the bounding
/// box: `((x > xmid) << 0) | ((y > ymid) << 1) | ((z > zmid) << 2)`. Ties go
/// to the lower octant.
pub(crate) fn octant_index(point: &Point, bbox: &BoundingBox) -> u8 {
    let mut index = 0u8;
    if point.x > bbox.xmid {
        index |= 1;
    }
    if point.y > bbox.ymid {
        index |= 2;
    }
    if point.z > bbox.zmid {
        index |= 4;
    }
    index
}

/// A node of the octree. Each node subdivides its bounding box into cubic
/// grid cells and only retains the points those cells keep, demoting the
/// rejected ones to the child of the matching octant, which uses cells of
/// half the side.
///
/// Ingestion is concurrent: the cell map takes a short write lock on cell
/// creation, individual cells serialize their own updates, and the counters
/// and leaf flag are atomics. Everything after
/// [`build_points`](Self::build_points) happens on `&mut self`.
#[derive(Debug)]
pub struct GridNode {
    bounding_box: BoundingBox,
    root: bool,
    cell_size: f64,
    min_cell_size: f64,
    cells: RwLock<HashMap<GridIndex, Mutex<GridCell>>>,
    children: OnceLock<Box<[GridNode; 8]>>,
    child_paths: [String; 8],
    points: Vec<Point>,
    local_count: AtomicU32,
    total_count: AtomicU64,
    leaf: AtomicBool,
}

impl GridNode {
    pub fn new(bounding_box: BoundingBox, cell_size: f64, min_cell_size: f64, root: bool) -> Self {
        Self {
            bounding_box,
            root,
            cell_size,
            min_cell_size,
            cells: RwLock::new(HashMap::new()),
            children: OnceLock::new(),
            child_paths: std::array::from_fn(|octant| octant.to_string()),
            points: Vec::new(),
            local_count: AtomicU32::new(0),
            total_count: AtomicU64::new(0),
            leaf: AtomicBool::new(true),
        }
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.load(Ordering::SeqCst)
    }

    /// Number of points retained by this node itself.
    pub fn local_count(&self) -> u32 {
        self.local_count.load(Ordering::SeqCst)
    }

    /// Number of points retained by this node and all of its descendants.
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::SeqCst)
    }

    /// The node's flattened points. Empty until [`build_points`](Self::build_points).
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn children(&self) -> Option<&[GridNode; 8]> {
        self.children.get().map(|children| &**children)
    }

    /// Directory label of the given child slot. Single digit initially,
    /// possibly a concatenation after the merge pass (e.g. "047").
    pub fn child_path(&self, index: usize) -> &str {
        &self.child_paths[index]
    }

    /// Adds a point, demoting the one its grid cell pushes out (if any) to
    /// the child octant that contains it.
    pub fn add_point(&self, point: Point, follow_size_threshold: bool) {
        let children = self.ensure_children();

        match self.push_point_to_cell(point, follow_size_threshold) {
            Some(rejected) => {
                let octant = octant_index(&rejected, &self.bounding_box) as usize;
                children[octant].add_point(rejected, true);
                self.leaf.store(false, Ordering::SeqCst);
            }
            None => {
                self.local_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.total_count.fetch_add(1, Ordering::SeqCst);
    }

    fn ensure_children(&self) -> &[GridNode; 8] {
        self.children.get_or_init(|| {
            Box::new(std::array::from_fn(|octant| {
                GridNode::new(
                    self.bounding_box.octant(octant as u8),
                    self.cell_size / 2.0,
                    self.min_cell_size,
                    false,
                )
            }))
        })
    }

    fn push_point_to_cell(&self, point: Point, follow_size_threshold: bool) -> Option<Point> {
        let index = GridIndex::of(&point, self.cell_size);
        {
            let cells = self.cells.read().unwrap();
            if let Some(cell) = cells.get(&index) {
                return cell.lock().unwrap().push(point, follow_size_threshold);
            }
        }
        let mut cells = self.cells.write().unwrap();
        let cell = cells
            .entry(index)
            .or_insert_with(|| Mutex::new(GridCell::new(index, self.cell_size, self.min_cell_size)));
        cell.get_mut().unwrap().push(point, follow_size_threshold)
    }

    /// Flattens every cell's stored points into the node slice and releases
    /// the cell map, recursing into the children.
    pub fn build_points(&mut self) {
        let cells = std::mem::take(&mut *self.cells.get_mut().unwrap());
        let mut points = Vec::with_capacity(self.local_count() as usize);
        for (_, cell) in cells {
            points.extend(cell.into_inner().unwrap().into_points());
        }
        self.points = points;

        if let Some(children) = self.children.get_mut() {
            for child in children.iter_mut() {
                child.build_points();
            }
        }
    }

    /// The single scalar a viewer compares against its screen space error to
    /// decide when to refine this tile.
    pub fn geometric_error(&self, meta: &GeometricErrorMeta) -> f64 {
        if !meta.use_edges {
            if self.root {
                return self.bounding_box.diagonal();
            }
            // maximum possible distance between two points in a cell, doubled
            return self.cell_size * 3f64.sqrt() * 2.0;
        }

        let diagonal =
            (meta.edge_x.powi(2) + meta.edge_y.powi(2) + meta.edge_z.powi(2)).sqrt();

        // leaves that the split pass subdivided below the normal threshold
        // would report a vanishing error; scale them back up, damped per
        // doubling step
        let mut cell_size = self.cell_size;
        if 2.0 * cell_size < self.min_cell_size {
            let mut doublings = 0u32;
            while 2.0 * cell_size < self.min_cell_size {
                cell_size *= 2.0;
                doublings += 1;
            }
            cell_size *= 1.0 - 0.1 * doublings as f64;
        }

        cell_size / meta.root_cell_size * diagonal / meta.error_scale
    }

    /// Wipes the node in place after its contents moved elsewhere. The slot
    /// is skipped by every traversal from here on.
    fn clear(&mut self) {
        self.points = Vec::new();
        self.cells.get_mut().unwrap().clear();
        self.local_count.store(0, Ordering::SeqCst);
        self.total_count.store(0, Ordering::SeqCst);
        self.leaf.store(true, Ordering::SeqCst);
    }

    /// Replaces this node's children with the given roots, used when
    /// stitching per-chunk trees under a merged parent. The bounding box
    /// grows to cover every absorbed root.
    pub fn set_children(&mut self, roots: Vec<GridNode>) -> Result<(), TreeError> {
        if roots.len() > 8 {
            return Err(TreeError::ChildSlotOverflow(roots.len()));
        }
        let _ = self.ensure_children();
        let local_count = self.local_count();
        let children = self.children.get_mut().unwrap();
        for child in children.iter_mut() {
            child.clear();
        }
        self.total_count
            .store(local_count as u64, Ordering::SeqCst);

        let mut bounding_box = self.bounding_box;
        for (slot, root) in roots.into_iter().enumerate() {
            self.total_count
                .fetch_add(root.total_count(), Ordering::SeqCst);
            bounding_box = bounding_box.union(root.bounding_box());
            children[slot] = root;
        }
        self.bounding_box = bounding_box;
        Ok(())
    }

    /// Split pass: subdivides every leaf holding more than `max_points`
    /// local points by re-adding its points with the size threshold
    /// disabled, so the cells keep one point each and the overflow spills
    /// into the children.
    pub(crate) fn split_big(&mut self, max_points: u32) {
        if self.is_leaf() {
            self.split_big_leaf(max_points);
            return;
        }
        if let Some(children) = self.children.get_mut() {
            for child in children.iter_mut() {
                child.split_big(max_points);
            }
        }
    }

    fn split_big_leaf(&mut self, max_points: u32) {
        if self.local_count() <= max_points {
            return;
        }
        log::debug!(
            "splitting leaf with {} points (cell size {})",
            self.local_count(),
            self.cell_size
        );

        let points = std::mem::take(&mut self.points);
        self.cells.get_mut().unwrap().clear();
        self.local_count.store(0, Ordering::SeqCst);
        self.total_count.store(0, Ordering::SeqCst);
        self.leaf.store(true, Ordering::SeqCst);

        for point in points {
            self.add_point(point, false);
        }
        self.build_points();

        if let Some(children) = self.children.get_mut() {
            for child in children.iter_mut() {
                child.split_big(max_points);
            }
        }
    }

    /// Merge pass: absorbs under-populated leaf siblings into each other
    /// (smallest first) and, when a single sparse leaf child remains under a
    /// sparse parent, folds it into the parent. Preserves the total point
    /// count of the tree.
    pub(crate) fn merge_small_children(&mut self, min_points: u64) {
        if self.is_leaf() {
            return;
        }
        let Some(children) = self.children.get_mut() else {
            return;
        };

        for child in children.iter_mut() {
            if !child.is_leaf() {
                child.merge_small_children(min_points);
            }
        }

        struct Wrap {
            total: u64,
            indices: Vec<usize>,
        }

        let mut branch_children = 0usize;
        let mut wraps: Vec<Wrap> = Vec::new();
        for (index, child) in children.iter().enumerate() {
            if child.total_count() == 0 {
                continue;
            }
            if !child.is_leaf() {
                branch_children += 1;
                continue;
            }
            wraps.push(Wrap {
                total: child.total_count(),
                indices: vec![index],
            });
        }

        // pair the two smallest leaves while both caps hold
        while wraps.len() >= 2 {
            wraps.sort_by(|a, b| {
                a.total
                    .cmp(&b.total)
                    .then_with(|| b.indices[0].cmp(&a.indices[0]))
            });
            if wraps[0].total > 4 * min_points
                || wraps[0].total + wraps[1].total > 8 * min_points
            {
                break;
            }
            let absorbed = wraps.remove(0);
            wraps[0].total += absorbed.total;
            wraps[0].indices.extend(absorbed.indices);
        }

        for wrap in &wraps {
            if wrap.indices.len() < 2 {
                continue;
            }
            let survivor = wrap.indices[0];
            for &index in &wrap.indices[1..] {
                let absorbed_points = std::mem::take(&mut children[index].points);
                let absorbed_local = children[index].local_count();
                let absorbed_total = children[index].total_count();
                let absorbed_bbox = children[index].bounding_box;
                children[index].clear();

                let target = &mut children[survivor];
                target
                    .local_count
                    .fetch_add(absorbed_local, Ordering::SeqCst);
                target
                    .total_count
                    .fetch_add(absorbed_total, Ordering::SeqCst);
                target.points.extend(absorbed_points);
                target.bounding_box = target.bounding_box.union(&absorbed_bbox);

                let absorbed_path = self.child_paths[index].clone();
                self.child_paths[survivor].push_str(&absorbed_path);
            }
        }

        // a lone sparse leaf under a sparse parent folds upwards
        if branch_children == 0 && wraps.len() == 1 {
            let index = wraps[0].indices[0];
            let child_total = children[index].total_count();
            let parent_total = self.total_count.load(Ordering::SeqCst);
            if parent_total <= 4 * min_points && parent_total + child_total <= 8 * min_points {
                let absorbed_points = std::mem::take(&mut children[index].points);
                let absorbed_local = children[index].local_count();
                children[index].clear();

                self.local_count
                    .fetch_add(absorbed_local, Ordering::SeqCst);
                self.points.extend(absorbed_points);
                self.leaf.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64, z: f64) -> Point {
        Point {
            x,
            y,
            z,
            r: 0,
            g: 0,
            b: 0,
            intensity: 0,
            classification: 0,
            source_index: 0,
        }
    }

    fn unit_node(cell_size: f64, min_cell_size: f64) -> GridNode {
        GridNode::new(
            BoundingBox::new(0.0, 8.0, 0.0, 8.0, 0.0, 8.0),
            cell_size,
            min_cell_size,
            true,
        )
    }

    fn assert_count_invariant(node: &GridNode) {
        let child_total: u64 = node
            .children()
            .map(|children| children.iter().map(|c| c.total_count()).sum())
            .unwrap_or(0);
        assert_eq!(
            node.total_count(),
            node.local_count() as u64 + child_total,
            "total must equal local plus descendant totals"
        );
        if let Some(children) = node.children() {
            for child in children {
                assert_count_invariant(child);
            }
        }
    }

    fn assert_points_match_counts(node: &GridNode) {
        assert_eq!(node.points().len(), node.local_count() as usize);
        if let Some(children) = node.children() {
            for child in children {
                assert_points_match_counts(child);
            }
        }
    }

    fn leaf_max_local(node: &GridNode) -> u32 {
        let mut max = if node.is_leaf() { node.local_count() } else { 0 };
        if let Some(children) = node.children() {
            for child in children {
                max = max.max(leaf_max_local(child));
            }
        }
        max
    }

    #[test]
    fn octant_routing_respects_midpoints() {
        let bbox = BoundingBox::new(0.0, 2.0, 0.0, 2.0, 0.0, 2.0);
        assert_eq!(octant_index(&point(0.5, 0.5, 0.5), &bbox), 0);
        assert_eq!(octant_index(&point(1.5, 0.5, 0.5), &bbox), 1);
        assert_eq!(octant_index(&point(0.5, 1.5, 0.5), &bbox), 2);
        assert_eq!(octant_index(&point(1.5, 1.5, 1.5), &bbox), 7);
        // ties go to the lower octant
        assert_eq!(octant_index(&point(1.0, 1.0, 1.0), &bbox), 0);
    }

    #[test]
    fn demoted_points_land_inside_the_child_box() {
        let mut node = unit_node(4.0, 0.5);
        // both fall in the same cell; the second is closer to its center
        // and pushes the first one down to octant 0
        node.add_point(point(0.5, 0.5, 0.5), true);
        node.add_point(point(2.0, 2.0, 2.0), true);
        node.build_points();

        assert_eq!(node.local_count(), 1);
        assert_eq!(node.points()[0].x, 2.0);
        assert!(!node.is_leaf());

        let children = node.children().unwrap();
        assert_eq!(children[0].total_count(), 1);
        let demoted = children[0].points()[0];
        assert!(children[0]
            .bounding_box()
            .contains(demoted.x, demoted.y, demoted.z));
    }

    #[test]
    fn counts_stay_consistent_under_ingestion() {
        let node = unit_node(2.0, 0.15);
        let mut state = 1u64;
        for i in 0..5000 {
            // cheap deterministic pseudo-random coordinates
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let z = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            let mut p = point(x, y, z);
            p.source_index = i;
            node.add_point(p, true);
        }
        assert_eq!(node.total_count(), 5000);
        assert_count_invariant(&node);
    }

    #[test]
    fn build_points_flattens_cells() {
        let mut node = unit_node(2.0, 0.15);
        for i in 0..100 {
            node.add_point(point(i as f64 * 0.08, 1.0, 1.0), true);
        }
        node.build_points();
        assert_points_match_counts(&node);
        let mut total = 0u64;
        let mut walk = vec![&node];
        while let Some(n) = walk.pop() {
            total += n.points().len() as u64;
            if let Some(children) = n.children() {
                walk.extend(children.iter());
            }
        }
        assert_eq!(total, 100);
    }

    #[test]
    fn split_pass_caps_leaf_sizes() {
        let mut node = unit_node(8.0, 16.0); // every cell is "small": all points pile up in the root
        let mut state = 7u64;
        for _ in 0..4000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let z = (state >> 11) as f64 / (1u64 << 53) as f64 * 8.0;
            node.add_point(point(x, y, z), true);
        }
        node.build_points();
        assert!(node.is_leaf());
        assert_eq!(node.local_count(), 4000);

        node.split_big(500);
        assert!(leaf_max_local(&node) <= 500);
        assert_eq!(node.total_count(), 4000);
        assert_count_invariant(&node);
        assert_points_match_counts(&node);
    }

    #[test]
    fn merge_pass_preserves_total_count_and_labels() {
        let node = unit_node(4.0, 0.15);
        // a couple of points per octant, well below any merge threshold
        for octant in 0..8u8 {
            let base = point(
                if octant & 1 == 0 { 1.0 } else { 5.0 },
                if octant & 2 == 0 { 1.0 } else { 5.0 },
                if octant & 4 == 0 { 1.0 } else { 5.0 },
            );
            for i in 0..4 {
                let mut p = base;
                p.x += i as f64 * 0.4;
                node.add_point(p, true);
            }
        }
        let mut node = node;
        node.build_points();
        let before = node.total_count();

        node.merge_small_children(10_000);
        assert_eq!(node.total_count(), before);
        assert_count_invariant(&node);

        // surviving child labels are concatenations of disjoint digit sets
        if let Some(children) = node.children() {
            let mut seen = std::collections::HashSet::new();
            for (i, child) in children.iter().enumerate() {
                if child.total_count() == 0 {
                    continue;
                }
                for digit in node.child_path(i).chars() {
                    assert!(seen.insert(digit), "digit {digit} appears twice");
                }
            }
        }
    }

    #[test]
    fn lone_sparse_leaf_folds_into_parent() {
        let node = unit_node(4.0, 0.15);
        node.add_point(point(1.0, 1.0, 1.0), true);
        node.add_point(point(1.1, 1.05, 1.0), true); // same cell, demoted to child 0
        let mut node = node;
        node.build_points();
        assert!(!node.is_leaf());

        node.merge_small_children(10_000);
        assert!(node.is_leaf());
        assert_eq!(node.local_count(), 2);
        assert_eq!(node.total_count(), 2);
        assert_eq!(node.points().len(), 2);
    }

    #[test]
    fn classic_geometric_error_uses_diagonal_for_root() {
        let meta = GeometricErrorMeta::default();
        let root = unit_node(4.0, 0.15);
        assert!((root.geometric_error(&meta) - (3.0f64 * 64.0).sqrt()).abs() < 1e-12);

        let child = GridNode::new(
            BoundingBox::new(0.0, 4.0, 0.0, 4.0, 0.0, 4.0),
            2.0,
            0.15,
            false,
        );
        assert!((child.geometric_error(&meta) - 2.0 * 3f64.sqrt() * 2.0).abs() < 1e-12);
    }

    #[test]
    fn edge_scaled_geometric_error_damps_oversplit_leaves() {
        let meta = GeometricErrorMeta {
            use_edges: true,
            edge_x: 30.0,
            edge_y: 40.0,
            edge_z: 0.0,
            root_cell_size: 4.0,
            error_scale: 32.0,
        };
        let node = GridNode::new(
            BoundingBox::new(0.0, 4.0, 0.0, 4.0, 0.0, 4.0),
            2.0,
            0.15,
            false,
        );
        assert!((node.geometric_error(&meta) - 2.0 / 4.0 * 50.0 / 32.0).abs() < 1e-12);

        // cell size below the threshold: doubled once, damped by 0.9
        let deep = GridNode::new(
            BoundingBox::new(0.0, 4.0, 0.0, 4.0, 0.0, 4.0),
            0.04,
            0.15,
            false,
        );
        let expected = (0.08 * 0.9) / 4.0 * 50.0 / 32.0;
        assert!((deep.geometric_error(&meta) - expected).abs() < 1e-12);
    }
}

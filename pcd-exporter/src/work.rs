use std::path::PathBuf;

use pcd_core::octree::node::GridNode;

/// Everything a consumer needs to emit one tile: the node, its ancestor
/// chain (root first, used by the REPLACE refine mode) and the directory
/// the tile's files go to.
pub struct WorkUnit<'a> {
    pub node: &'a GridNode,
    pub ancestors: Vec<&'a GridNode>,
    pub dir: PathBuf,
}

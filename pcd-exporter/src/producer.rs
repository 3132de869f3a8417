use std::collections::HashSet;
use std::path::PathBuf;

use crossbeam_channel::Sender;

use pcd_core::octree::node::GridNode;

use crate::error::ExportError;
use crate::tileset::canonical_label;
use crate::work::WorkUnit;

/// Walks the built tree pre-order and submits one work unit per node that
/// holds points. Children land in subdirectories named after their
/// canonical child path label; two siblings resolving to the same label is
/// an error rather than a silent overwrite.
pub struct Producer {
    base_dir: PathBuf,
    /// Merge mode only re-emits the synthetic root tile.
    root_only: bool,
}

impl Producer {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            root_only: false,
        }
    }

    pub fn root_only(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            root_only: true,
        }
    }

    /// Submits all work units. The channel closes when the sender is
    /// dropped by the caller's thread after this returns.
    pub fn produce<'a>(
        &self,
        root: &'a GridNode,
        work: &Sender<WorkUnit<'a>>,
    ) -> Result<(), ExportError> {
        let mut ancestors = Vec::new();
        self.produce_node(self.base_dir.clone(), root, &mut ancestors, work)
    }

    fn produce_node<'a>(
        &self,
        dir: PathBuf,
        node: &'a GridNode,
        ancestors: &mut Vec<&'a GridNode>,
        work: &Sender<WorkUnit<'a>>,
    ) -> Result<(), ExportError> {
        if node.local_count() > 0 {
            let unit = WorkUnit {
                node,
                ancestors: ancestors.clone(),
                dir: dir.clone(),
            };
            // a failed send means every consumer is gone; stop quietly and
            // let their error surface
            if work.send(unit).is_err() {
                return Ok(());
            }
        }
        if self.root_only {
            return Ok(());
        }
        let Some(children) = node.children() else {
            return Ok(());
        };

        ancestors.push(node);
        let mut labels = HashSet::new();
        for (index, child) in children.iter().enumerate() {
            if child.total_count() == 0 {
                continue;
            }
            let label = canonical_label(node.child_path(index));
            if !labels.insert(label.clone()) {
                ancestors.pop();
                return Err(ExportError::ChildPathCollision(label));
            }
            self.produce_node(dir.join(&label), child, ancestors, work)?;
        }
        ancestors.pop();
        Ok(())
    }
}

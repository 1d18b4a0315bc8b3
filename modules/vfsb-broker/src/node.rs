//! In-memory namespace tree (§3, §4.2). Nodes live in a flat arena; a node's
//! children are referenced by index, not owned by it, mirroring
//! `filesystem::node::NodeId`'s own node arena rather than a pointer/`Rc`
//! tree.

use log::trace;

use vfsb_kernel::TaskId;
use vfsb_proto::Ready;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    const fn first_child() -> Self {
        Self(1)
    }

    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    /// A mount point; `mount_task` answers `Vfs*` requests for it.
    MountFile { mount_task: TaskId },
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub path: String,
    pub node_type: NodeType,
    pub entries: Vec<NodeId>,
    pub ready: Ready,
}

/// Owns all `Node` storage (§3 "the FD table exclusively owns all `FdEntry`
/// storage; nodes are exclusively owned by their parent in the tree").
/// Represented as a flat arena rather than a pointer tree so that FD entries
/// and the readiness matcher can hold a plain `NodeId` back-reference
/// instead of a borrow (§9 "Back-references from FD to node").
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            path: "/".to_owned(),
            node_type: NodeType::Directory,
            entries: Vec::new(),
            ready: Ready::READ | Ready::WRITE,
        };
        Self { nodes: vec![root] }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Creates a node named `name` under `parent`, initial readiness both
    /// bits set (§4.2 "readiness initialised to both bits set"). Fails if a
    /// sibling with the same name already exists under `parent`.
    pub fn create(
        &mut self,
        parent: NodeId,
        name: &str,
        path: &str,
        node_type: NodeType,
    ) -> Result<NodeId, BrokerError> {
        if self
            .node(parent)
            .entries
            .iter()
            .any(|&child| self.node(child).name == name)
        {
            return Err(BrokerError::NodeNameConflict);
        }
        let id = NodeId(
            self.nodes
                .len()
                .try_into()
                .map_err(|_| BrokerError::AllocFailure)?,
        );
        self.nodes.push(Node {
            name: name.to_owned(),
            path: path.to_owned(),
            node_type,
            entries: Vec::new(),
            ready: Ready::READ | Ready::WRITE,
        });
        self.node_mut(parent).entries.push(id);
        trace!("node tree: created {:?} at {} under {:?}", id, path, parent);
        Ok(id)
    }

    /// Splits `path` on `/` and walks from root, linear-matching `name` at
    /// each level (§4.2 "segment-by-segment linear match against `name`").
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let mut current = NodeId::ROOT;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = self
                .node(current)
                .entries
                .iter()
                .copied()
                .find(|&child| self.node(child).name == segment)?;
            current = next;
        }
        Some(current)
    }

    /// Replaces a node's readiness set outright (§4.5: a `VfsReadyNtc`
    /// "unconditionally replaces the node's readiness set").
    pub fn set_ready(&mut self, id: NodeId, ready: Ready) {
        trace!("node tree: {:?} readiness -> {:?}", id, ready);
        self.node_mut(id).ready = ready;
    }

    /// Clears `clear` and ORs in `hint`, the post-op readiness rule from a
    /// `VfsReadResp`/`VfsWriteResp` (§4.5).
    pub fn apply_ready_hint(&mut self, id: NodeId, clear: Ready, hint: Ready) {
        let node = self.node_mut(id);
        node.ready = (node.ready - clear) | hint;
        trace!("node tree: {:?} readiness -> {:?} (post-op hint)", id, node.ready);
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_created_mount_file() {
        let mut tree = NodeTree::new();
        let id = tree
            .create(
                NodeId::ROOT,
                "console",
                "/console",
                NodeType::MountFile {
                    mount_task: TaskId::from_u64(7),
                },
            )
            .unwrap();
        assert_eq!(tree.lookup("/console"), Some(id));
        assert_eq!(tree.lookup("/nope"), None);
    }

    #[test]
    fn create_rejects_duplicate_sibling_name() {
        let mut tree = NodeTree::new();
        tree.create(
            NodeId::ROOT,
            "console",
            "/console",
            NodeType::MountFile {
                mount_task: TaskId::from_u64(1),
            },
        )
        .unwrap();
        let result = tree.create(
            NodeId::ROOT,
            "console",
            "/console",
            NodeType::MountFile {
                mount_task: TaskId::from_u64(2),
            },
        );
        assert_eq!(result, Err(BrokerError::NodeNameConflict));
    }

    #[test]
    fn ready_hint_clears_then_ors() {
        let mut tree = NodeTree::new();
        let id = tree
            .create(
                NodeId::ROOT,
                "console",
                "/console",
                NodeType::MountFile {
                    mount_task: TaskId::from_u64(1),
                },
            )
            .unwrap();
        assert_eq!(tree.node(id).ready, Ready::READ | Ready::WRITE);
        // A VfsReadResp with ready=0 clears Read, leaving only Write.
        tree.apply_ready_hint(id, Ready::READ, Ready::empty());
        assert_eq!(tree.node(id).ready, Ready::WRITE);
    }
}

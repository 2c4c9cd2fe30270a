//! Mutation observation records.

use crate::NodeId;

/// Which changes an observer wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
}

impl ObserveOptions {
    /// `childList`, `subtree` and `attributes` together.
    pub fn all() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attributes: true,
        }
    }
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attribute {
        name: String,
        old_value: Option<String>,
    },
    /// Delivered to `childList` observers of the host's tree.
    ShadowRootAttached { shadow_root: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    /// Nodes this record introduced into the tree.
    pub fn added_nodes(&self) -> &[NodeId] {
        match &self.kind {
            MutationKind::ChildList { added, .. } => added,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Observer {
    pub(crate) root: NodeId,
    pub(crate) options: ObserveOptions,
    pub(crate) records: Vec<MutationRecord>,
}

impl Observer {
    pub(crate) fn wants(&self, kind: &MutationKind) -> bool {
        match kind {
            MutationKind::ChildList { .. } | MutationKind::ShadowRootAttached { .. } => {
                self.options.child_list
            }
            MutationKind::Attribute { .. } => self.options.attributes,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node inside one tree's arena. Indices are stable across
/// pruning but not dense; never compare ids taken from different trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tree node. `info` is a single overlapping slot: the split
/// threshold while the node is internal, the leaf weight once it is a
/// leaf, never both. A node is a leaf iff `left` is None; children are
/// only ever allocated in pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub split_index: u32,
    info: f64,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub is_left_child: bool,
    pub default_left: bool,
}

impl Node {
    pub fn new_leaf() -> Self {
        Node {
            split_index: 0,
            info: 0.0,
            left: None,
            right: None,
            parent: None,
            is_left_child: false,
            default_left: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Child taken when the split feature's value is missing.
    pub fn default_child(&self) -> NodeId {
        if self.default_left {
            self.left.unwrap()
        } else {
            self.right.unwrap()
        }
    }

    pub fn split_value(&self) -> f64 {
        debug_assert!(!self.is_leaf(), "split_value read from a leaf");
        self.info
    }

    pub fn leaf_value(&self) -> f64 {
        debug_assert!(self.is_leaf(), "leaf_value read from an internal node");
        self.info
    }

    pub fn set_split(&mut self, split_index: u32, split_value: f64, default_left: bool) {
        self.split_index = split_index;
        self.info = split_value;
        self.default_left = default_left;
    }

    pub fn set_leaf(&mut self, value: f64) {
        self.info = value;
        self.left = None;
        self.right = None;
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>, is_left_child: bool) {
        self.parent = parent;
        self.is_left_child = is_left_child;
    }
}

/// Per node training statistics, kept in an array parallel to the node
/// arena. `leaf_child_cnt` is working state for the pruner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeStat {
    pub loss_chg: f32,
    pub base_weight: f32,
    pub sum_hess: f32,
    pub leaf_child_cnt: u32,
}

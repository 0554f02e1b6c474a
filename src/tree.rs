use crate::data::Entry;
use crate::node::{Node, NodeId, NodeStat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Regression tree over a flat node arena. Nodes `0..num_roots` are
/// roots; pruned nodes go onto a free list and their slots are reused
/// before the arena grows.
#[derive(Debug, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
    stats: Vec<NodeStat>,
    deleted: Vec<NodeId>,
    num_roots: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new(1)
    }
}

impl Tree {
    pub fn new(num_roots: usize) -> Self {
        assert!(num_roots > 0, "a tree needs at least one root");
        Tree {
            nodes: vec![Node::new_leaf(); num_roots],
            stats: vec![NodeStat::default(); num_roots],
            deleted: Vec::new(),
            num_roots,
        }
    }

    pub fn num_roots(&self) -> usize {
        self.num_roots
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes besides the roots that are currently live.
    pub fn num_extra_nodes(&self) -> usize {
        self.nodes.len() - self.num_roots - self.deleted.len()
    }

    pub fn node(&self, nid: NodeId) -> &Node {
        &self.nodes[nid.idx()]
    }

    pub fn node_mut(&mut self, nid: NodeId) -> &mut Node {
        &mut self.nodes[nid.idx()]
    }

    pub fn stat(&self, nid: NodeId) -> &NodeStat {
        &self.stats[nid.idx()]
    }

    pub fn stat_mut(&mut self, nid: NodeId) -> &mut NodeStat {
        &mut self.stats[nid.idx()]
    }

    fn alloc_node(&mut self) -> NodeId {
        if let Some(nid) = self.deleted.pop() {
            self.nodes[nid.idx()] = Node::new_leaf();
            self.stats[nid.idx()] = NodeStat::default();
            return nid;
        }
        let nid = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new_leaf());
        self.stats.push(NodeStat::default());
        nid
    }

    /// Turn a leaf into an internal node with two fresh leaf children,
    /// returning (left, right). Free list slots are consumed first.
    pub fn add_children(&mut self, nid: NodeId) -> (NodeId, NodeId) {
        let left = self.alloc_node();
        let right = self.alloc_node();
        let n = &mut self.nodes[nid.idx()];
        n.left = Some(left);
        n.right = Some(right);
        self.nodes[left.idx()].set_parent(Some(nid), true);
        self.nodes[right.idx()].set_parent(Some(nid), false);
        (left, right)
    }

    fn delete_node(&mut self, nid: NodeId) {
        assert!(
            nid.idx() >= self.num_roots,
            "can not delete root node {nid}"
        );
        self.nodes[nid.idx()].set_parent(None, false);
        self.deleted.push(nid);
    }

    /// Collapse an internal node back to a leaf, returning its two
    /// children to the free list. Both children must currently be
    /// leaves; anything else is a programming error.
    pub fn change_to_leaf(&mut self, nid: NodeId, value: f64) {
        let left = self.nodes[nid.idx()].left.expect("change_to_leaf on a leaf");
        let right = self.nodes[nid.idx()].right.unwrap();
        assert!(
            self.nodes[left.idx()].is_leaf() && self.nodes[right.idx()].is_leaf(),
            "can not collapse node {nid}: children are not both leaves"
        );
        self.delete_node(left);
        self.delete_node(right);
        self.nodes[nid.idx()].set_leaf(value);
    }

    /// Depth of a node, walking parent links.
    pub fn depth(&self, nid: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = nid;
        while let Some(parent) = self.nodes[cur.idx()].parent {
            depth += 1;
            cur = parent;
        }
        depth
    }

    fn subtree_depth(&self, nid: NodeId) -> usize {
        let n = &self.nodes[nid.idx()];
        if n.is_leaf() {
            return 0;
        }
        self.subtree_depth(n.left.unwrap())
            .max(self.subtree_depth(n.right.unwrap()))
            + 1
    }

    pub fn max_depth(&self) -> usize {
        (0..self.num_roots)
            .map(|r| self.subtree_depth(NodeId(r as u32)))
            .max()
            .unwrap_or(0)
    }

    /// Next position given the value at this node's split feature.
    pub fn next_node(&self, nid: NodeId, value: f64, missing: bool) -> NodeId {
        let n = &self.nodes[nid.idx()];
        if missing {
            n.default_child()
        } else if value < n.split_value() {
            n.left.unwrap()
        } else {
            n.right.unwrap()
        }
    }

    /// Walk a dense feature vector from `root` down to a leaf.
    pub fn leaf_for(&self, feats: &DenseRow, root: u32) -> NodeId {
        let mut nid = NodeId(root);
        while !self.nodes[nid.idx()].is_leaf() {
            let fid = self.nodes[nid.idx()].split_index as usize;
            nid = self.next_node(nid, feats.value(fid), feats.is_missing(fid));
        }
        nid
    }

    pub fn predict_row(&self, feats: &DenseRow, root: u32) -> f64 {
        self.nodes[self.leaf_for(feats, root).idx()].leaf_value()
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut stack: Vec<NodeId> = (0..self.num_roots).rev().map(|r| NodeId(r as u32)).collect();
        while let Some(nid) = stack.pop() {
            let n = &self.nodes[nid.idx()];
            let pad = "  ".repeat(self.depth(nid));
            if n.is_leaf() {
                writeln!(
                    f,
                    "{pad}{nid}:leaf={},cover={}",
                    n.leaf_value(),
                    self.stats[nid.idx()].sum_hess
                )?;
            } else {
                writeln!(
                    f,
                    "{pad}{nid}:[f{} < {}] yes={},no={},missing={},gain={}",
                    n.split_index,
                    n.split_value(),
                    n.left.unwrap(),
                    n.right.unwrap(),
                    n.default_child(),
                    self.stats[nid.idx()].loss_chg
                )?;
                stack.push(n.right.unwrap());
                stack.push(n.left.unwrap());
            }
        }
        Ok(())
    }
}

/// Dense feature vector with an explicit missing bitmap, filled from a
/// sparse row before traversal and dropped after.
#[derive(Debug, Clone)]
pub struct DenseRow {
    values: Vec<f64>,
    missing: Vec<bool>,
}

impl DenseRow {
    pub fn new(num_feature: usize) -> Self {
        DenseRow {
            values: vec![0.0; num_feature],
            missing: vec![true; num_feature],
        }
    }

    pub fn fill(&mut self, row: &[Entry]) {
        for e in row {
            self.values[e.index as usize] = e.value;
            self.missing[e.index as usize] = false;
        }
    }

    /// Reset the entries touched by `fill`. Must be passed the same row.
    pub fn drop(&mut self, row: &[Entry]) {
        for e in row {
            self.missing[e.index as usize] = true;
        }
    }

    pub fn value(&self, fid: usize) -> f64 {
        self.values[fid]
    }

    pub fn is_missing(&self, fid: usize) -> bool {
        self.missing[fid]
    }
}

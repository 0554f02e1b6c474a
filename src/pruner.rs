use crate::data::{BoosterInfo, FeatureStore, GradPair};
use crate::errors::BoostError;
use crate::node::NodeId;
use crate::tree::Tree;

/// Post growth pruning: parents whose children have both become leaves
/// and whose recorded split gain falls below `min_split_loss` are
/// collapsed back to leaves, cascading upward.
#[derive(Debug, Clone)]
pub struct TreePruner {
    pub learning_rate: f32,
    pub min_split_loss: f32,
}

impl Default for TreePruner {
    fn default() -> Self {
        TreePruner {
            learning_rate: 0.3,
            min_split_loss: 0.0,
        }
    }
}

impl TreePruner {
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        let parse = |value: &str| -> Result<f32, BoostError> {
            value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })
        };
        match name {
            "eta" | "learning_rate" => self.learning_rate = parse(value)?,
            "gamma" | "min_split_loss" => self.min_split_loss = parse(value)?,
            _ => {}
        }
        Ok(())
    }

    pub fn update(
        &self,
        _gpair: &[GradPair],
        _store: &FeatureStore,
        _info: &BoosterInfo,
        trees: &mut [Tree],
    ) -> Result<(), BoostError> {
        for tree in trees.iter_mut() {
            self.prune_tree(tree);
        }
        Ok(())
    }

    fn needs_prune(&self, loss_chg: f32) -> bool {
        loss_chg < self.min_split_loss
    }

    fn prune_tree(&self, tree: &mut Tree) {
        for i in 0..tree.num_nodes() {
            tree.stat_mut(NodeId(i as u32)).leaf_child_cnt = 0;
        }
        let mut pruned = 0;
        for i in 0..tree.num_nodes() {
            let nid = NodeId(i as u32);
            if tree.node(nid).is_leaf() && !tree.node(nid).is_root() {
                pruned = self.try_prune_leaf(tree, nid, pruned);
            }
        }
        log::info!(
            "pruning end: {} roots, {} extra nodes, {} pruned nodes, max_depth={}",
            tree.num_roots(),
            tree.num_extra_nodes(),
            pruned,
            tree.max_depth()
        );
    }

    /// Credit this leaf to its parent; collapse the parent once both
    /// children are leaves, then try the grandparent. Tail recursion
    /// mirrors how a pruned parent becomes a prunable leaf itself.
    fn try_prune_leaf(&self, tree: &mut Tree, nid: NodeId, pruned: usize) -> usize {
        let Some(pid) = tree.node(nid).parent else {
            return pruned;
        };
        tree.stat_mut(pid).leaf_child_cnt += 1;
        let stat = *tree.stat(pid);
        if stat.leaf_child_cnt >= 2 && self.needs_prune(stat.loss_chg) {
            tree.change_to_leaf(pid, (self.learning_rate * stat.base_weight) as f64);
            self.try_prune_leaf(tree, pid, pruned + 2)
        } else {
            pruned
        }
    }
}

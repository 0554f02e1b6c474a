use crate::data::{BoosterInfo, Entry, FeatureStore, GradPair};
use crate::errors::BoostError;
use crate::node::NodeId;
use crate::splitting::{GradStats, SplitEntry, TrainParams, RT_2EPS, RT_EPS};
use crate::tree::Tree;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const NO_SLOT: usize = usize::MAX;

/// Exact greedy tree construction: level-wise BFS over the expansion
/// queue, scanning every sorted feature column once forward and, where
/// the density heuristic asks for it, once backward.
#[derive(Debug, Clone, Default)]
pub struct TreeGrower {
    pub params: TrainParams,
}

impl TreeGrower {
    pub fn new(params: TrainParams) -> Self {
        TreeGrower { params }
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        self.params.set_param(name, value)
    }

    /// Grow every tree in `trees` from the same gradient statistics.
    /// The learning rate is divided by the tree count for this call so
    /// the aggregate step size is independent of ensemble fan-out.
    pub fn update(
        &self,
        gpair: &[GradPair],
        store: &FeatureStore,
        info: &BoosterInfo,
        trees: &mut [Tree],
    ) -> Result<(), BoostError> {
        let lr = self.params.learning_rate / trees.len().max(1) as f32;
        for tree in trees.iter_mut() {
            let mut builder = Builder::new(&self.params, lr, gpair, store, info)?;
            builder.grow(tree)?;
            log::info!(
                "tree grown: {} roots, {} extra nodes, max_depth={}",
                tree.num_roots(),
                tree.num_extra_nodes(),
                tree.max_depth()
            );
        }
        Ok(())
    }
}

/// Per node working entry for the level being expanded.
#[derive(Debug, Clone, Copy, Default)]
struct NodeEntry {
    stats: GradStats,
    root_gain: f64,
    weight: f64,
    best: SplitEntry,
}

/// Running accumulation for one (feature, node) pair during a scan.
#[derive(Debug, Clone, Copy)]
struct ScanState {
    cstats: GradStats,
    last_value: f64,
    seen: bool,
}

impl Default for ScanState {
    fn default() -> Self {
        ScanState {
            cstats: GradStats::default(),
            last_value: 0.0,
            seen: false,
        }
    }
}

struct Builder<'a> {
    params: &'a TrainParams,
    lr: f32,
    gpair: &'a [GradPair],
    store: &'a FeatureStore,
    info: &'a BoosterInfo,
    /// Current node of every row; -1 when the row sits this round out.
    position: Vec<i32>,
    /// Working entries, indexed by node id.
    snode: Vec<NodeEntry>,
    /// Node ids still eligible for expansion at the current level.
    qexpand: Vec<u32>,
    /// Features sampled once for the whole tree.
    feat_index: Vec<usize>,
    rng: StdRng,
}

impl<'a> Builder<'a> {
    fn new(
        params: &'a TrainParams,
        lr: f32,
        gpair: &'a [GradPair],
        store: &'a FeatureStore,
        info: &'a BoosterInfo,
    ) -> Result<Self, BoostError> {
        Ok(Builder {
            params,
            lr,
            gpair,
            store,
            info,
            position: Vec::new(),
            snode: Vec::new(),
            qexpand: Vec::new(),
            feat_index: Vec::new(),
            rng: StdRng::seed_from_u64(params.seed),
        })
    }

    fn grow(&mut self, tree: &mut Tree) -> Result<(), BoostError> {
        assert!(
            tree.num_extra_nodes() == 0,
            "the grower must be given a freshly initialized tree"
        );
        self.init_data(tree)?;
        self.qexpand = (0..tree.num_roots() as u32).collect();
        for _depth in 0..self.params.max_depth {
            let feats = self.level_features();
            self.update_node_stats(tree);
            self.find_splits(&feats, tree)?;
            let new_expand = self.commit_level(tree);
            self.reset_position(tree)?;
            self.qexpand = new_expand;
            if self.qexpand.is_empty() {
                break;
            }
        }
        // Whatever is still queued becomes a leaf.
        if !self.qexpand.is_empty() {
            self.update_node_stats(tree);
            for i in 0..self.qexpand.len() {
                let nid = NodeId(self.qexpand[i]);
                let e = self.snode[nid.idx()];
                tree.node_mut(nid).set_leaf(e.weight * self.lr as f64);
                self.record_stat(tree, nid);
            }
        }
        Ok(())
    }

    /// Assign every buffered instance to its root, dropping rows with
    /// the negative-hessian sentinel or rejected by row subsampling,
    /// and sample the tree's working feature set.
    fn init_data(&mut self, tree: &Tree) -> Result<(), BoostError> {
        self.position = vec![-1; self.store.num_row()];
        for &ridx in self.store.buffered_rowset() {
            let ridx = ridx as usize;
            if self.gpair[ridx].hess < 0.0 {
                continue;
            }
            if self.params.subsample < 1.0 && self.rng.gen::<f64>() >= self.params.subsample {
                continue;
            }
            let root = self.info.root(ridx);
            assert!(
                (root as usize) < tree.num_roots(),
                "root index {root} out of range"
            );
            self.position[ridx] = root as i32;
        }

        let mut feats: Vec<usize> = (0..self.store.num_col())
            .filter(|&fid| self.store.col_density(fid) > 0.0)
            .collect();
        if feats.is_empty() {
            return Err(BoostError::NoUsableFeatures);
        }
        if self.params.colsample_bytree < 1.0 {
            feats.shuffle(&mut self.rng);
            let n = ((feats.len() as f64 * self.params.colsample_bytree) as usize).max(1);
            feats.truncate(n);
            feats.sort_unstable();
        }
        self.feat_index = feats;
        Ok(())
    }

    /// Optionally narrow the working feature set again for this level.
    fn level_features(&mut self) -> Vec<usize> {
        let mut feats = self.feat_index.clone();
        if self.params.colsample_bylevel < 1.0 {
            feats.shuffle(&mut self.rng);
            let n = ((feats.len() as f64 * self.params.colsample_bylevel) as usize).max(1);
            feats.truncate(n);
            feats.sort_unstable();
        }
        feats
    }

    /// Aggregate gradient statistics for every node awaiting expansion
    /// and derive its root gain and base weight.
    fn update_node_stats(&mut self, tree: &Tree) {
        self.snode.resize(tree.num_nodes(), NodeEntry::default());
        let mut expanding = vec![false; tree.num_nodes()];
        for &nid in &self.qexpand {
            expanding[nid as usize] = true;
            self.snode[nid as usize].stats.clear();
        }
        for (ridx, &pos) in self.position.iter().enumerate() {
            if pos >= 0 && expanding[pos as usize] {
                self.snode[pos as usize].stats.add_pair(&self.gpair[ridx]);
            }
        }
        for &nid in &self.qexpand {
            let e = &mut self.snode[nid as usize];
            e.root_gain = self.params.calc_gain(&e.stats);
            e.weight = self.params.calc_weight(&e.stats);
            e.best = SplitEntry::default();
        }
    }

    /// Search every sampled feature for the best split of every node in
    /// the expansion queue. Features fan out across threads with
    /// private per-node buffers; the deterministic tie-break makes the
    /// reduction independent of execution order.
    fn find_splits(&mut self, feats: &[usize], tree: &Tree) -> Result<(), BoostError> {
        let mut slot_of = vec![NO_SLOT; tree.num_nodes()];
        let mut slots = Vec::new();
        for &nid in &self.qexpand {
            if self.params.cannot_split(self.snode[nid as usize].stats.sum_hess) {
                continue;
            }
            slot_of[nid as usize] = slots.len();
            slots.push(nid);
        }
        if slots.is_empty() {
            return Ok(());
        }
        let columns = self.store.columns(feats)?;
        let slots = &slots;
        let slot_of = &slot_of;
        let scan = |(fid, col): &(usize, &[Entry])| -> Vec<SplitEntry> {
            let mut best = vec![SplitEntry::default(); slots.len()];
            let density = self.store.col_density(*fid);
            if self.params.need_forward_search(density) {
                self.enumerate_column(*fid as u32, col, true, slot_of, slots, &mut best);
            }
            if self.params.need_backward_search(density) {
                self.enumerate_column(*fid as u32, col, false, slot_of, slots, &mut best);
            }
            best
        };
        let merge = |mut a: Vec<SplitEntry>, b: Vec<SplitEntry>| -> Vec<SplitEntry> {
            if a.is_empty() {
                return b;
            }
            for (x, y) in a.iter_mut().zip(&b) {
                x.update_entry(y);
            }
            a
        };
        let merged = if self.params.parallel {
            columns
                .par_iter()
                .map(scan)
                .reduce(Vec::new, merge)
        } else {
            columns.iter().map(scan).fold(Vec::new(), merge)
        };
        for (slot, nid) in slots.iter().enumerate() {
            self.snode[*nid as usize].best.update_entry(&merged[slot]);
        }
        Ok(())
    }

    /// One pass over a sorted column. Forward scans accumulate the
    /// left-hand (default right) side, backward scans the right-hand
    /// (default left) side. A candidate is proposed at every bucket
    /// boundary and once more at the end of the scan.
    fn enumerate_column(
        &self,
        fid: u32,
        col: &[Entry],
        forward: bool,
        slot_of: &[usize],
        slots: &[u32],
        best: &mut [SplitEntry],
    ) {
        let default_left = !forward;
        let mut temp = vec![ScanState::default(); best.len()];
        let mut scan_one = |e: &Entry| {
            let ridx = e.index as usize;
            let pos = self.position[ridx];
            if pos < 0 {
                return;
            }
            let slot = slot_of[pos as usize];
            if slot == NO_SLOT {
                return;
            }
            let state = &mut temp[slot];
            if !state.seen {
                state.cstats.clear();
                state.cstats.add_pair(&self.gpair[ridx]);
                state.last_value = e.value;
                state.seen = true;
                return;
            }
            if (e.value - state.last_value).abs() > RT_2EPS {
                let cut = 0.5 * (e.value + state.last_value);
                self.try_split(
                    fid,
                    cut,
                    default_left,
                    &state.cstats,
                    slots[slot] as usize,
                    &mut best[slot],
                );
            }
            state.cstats.add_pair(&self.gpair[ridx]);
            state.last_value = e.value;
        };
        if forward {
            col.iter().for_each(&mut scan_one);
        } else {
            col.iter().rev().for_each(&mut scan_one);
        }
        // Last candidate: everything scanned on this side, missing and
        // nothing else on the other. An epsilon past the boundary value
        // keeps all scanned entries strictly inside the cut.
        for (slot, state) in temp.iter().enumerate() {
            if !state.seen {
                continue;
            }
            let cut = if forward {
                state.last_value + RT_EPS
            } else {
                state.last_value - RT_EPS
            };
            self.try_split(
                fid,
                cut,
                default_left,
                &state.cstats,
                slots[slot] as usize,
                &mut best[slot],
            );
        }
    }

    fn try_split(
        &self,
        fid: u32,
        cut: f64,
        default_left: bool,
        cstats: &GradStats,
        nid: usize,
        best: &mut SplitEntry,
    ) {
        if cstats.sum_hess < self.params.min_child_weight {
            return;
        }
        let parent = &self.snode[nid];
        let mut other = GradStats::default();
        other.set_substract(&parent.stats, cstats);
        if other.sum_hess < self.params.min_child_weight {
            return;
        }
        let loss_chg =
            self.params.calc_gain(cstats) + self.params.calc_gain(&other) - parent.root_gain;
        best.update(loss_chg as f32, fid, cut, default_left);
    }

    /// Materialize real splits for nodes whose best gain clears the
    /// epsilon threshold, finalize the rest as leaves, and return the
    /// next expansion queue.
    fn commit_level(&mut self, tree: &mut Tree) -> Vec<u32> {
        let mut next = Vec::new();
        for i in 0..self.qexpand.len() {
            let nid = NodeId(self.qexpand[i]);
            let e = self.snode[nid.idx()];
            if e.best.loss_chg > RT_EPS as f32 {
                let (left, right) = tree.add_children(nid);
                tree.node_mut(nid)
                    .set_split(e.best.split_index, e.best.split_value, e.best.default_left);
                self.record_stat(tree, nid);
                next.push(left.0);
                next.push(right.0);
            } else {
                tree.node_mut(nid).set_leaf(e.weight * self.lr as f64);
                self.record_stat(tree, nid);
            }
        }
        next
    }

    fn record_stat(&self, tree: &mut Tree, nid: NodeId) {
        let e = &self.snode[nid.idx()];
        let stat = tree.stat_mut(nid);
        stat.loss_chg = e.best.loss_chg;
        stat.base_weight = e.weight as f32;
        stat.sum_hess = e.stats.sum_hess as f32;
        stat.leaf_child_cnt = 0;
    }

    /// Push every instance at a freshly split node to the default
    /// child, then correct the non-missing ones with one pass over only
    /// the columns actually split on at this level.
    fn reset_position(&mut self, tree: &Tree) -> Result<(), BoostError> {
        let mut split_this_level = vec![false; tree.num_nodes()];
        let mut split_feats = Vec::new();
        for &nid in &self.qexpand {
            let n = tree.node(NodeId(nid));
            if !n.is_leaf() {
                split_this_level[nid as usize] = true;
                split_feats.push(n.split_index as usize);
            }
        }
        if split_feats.is_empty() {
            return Ok(());
        }
        split_feats.sort_unstable();
        split_feats.dedup();

        // Tentative: everyone to the default child.
        for pos in self.position.iter_mut() {
            if *pos >= 0 && split_this_level[*pos as usize] {
                *pos = tree.node(NodeId(*pos as u32)).default_child().0 as i32;
            }
        }
        // Corrective: rows whose value is present at the split feature
        // move to the side their comparison dictates.
        for (fid, col) in self.store.columns(&split_feats)? {
            for e in col {
                let ridx = e.index as usize;
                let pos = self.position[ridx];
                if pos < 0 {
                    continue;
                }
                let Some(parent) = tree.node(NodeId(pos as u32)).parent else {
                    continue;
                };
                if !split_this_level[parent.idx()] {
                    continue;
                }
                let p = tree.node(parent);
                if p.split_index as usize != fid {
                    continue;
                }
                let child = if e.value < p.split_value() {
                    p.left.unwrap()
                } else {
                    p.right.unwrap()
                };
                self.position[ridx] = child.0 as i32;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Entry;
    use crate::objective::{ObjectiveFunction, SquaredLoss};

    fn store_from_rows(rows: &[&[Entry]]) -> FeatureStore {
        let mut store = FeatureStore::new();
        for row in rows {
            store.push_row(row);
        }
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        store
    }

    fn plain_params() -> TrainParams {
        let mut params = TrainParams::default();
        params.learning_rate = 1.0;
        params.reg_lambda = 0.0;
        params.min_child_weight = 0.0;
        params.min_split_loss = 0.0;
        params.parallel = false;
        params
    }

    #[test]
    fn test_depth_zero_single_leaf() {
        let store = store_from_rows(&[
            &[Entry::new(0, 1.0)],
            &[Entry::new(0, 2.0)],
            &[Entry::new(0, 3.0)],
        ]);
        let gpair = vec![
            GradPair::new(-1.0, 1.0),
            GradPair::new(2.0, 1.0),
            GradPair::new(0.5, 1.0),
        ];
        let info = BoosterInfo::new(3, 1);
        let mut params = plain_params();
        params.max_depth = 0;
        let grower = TreeGrower::new(params.clone());
        let mut trees = vec![Tree::new(1)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        let tree = &trees[0];
        assert_eq!(tree.num_nodes(), 1);
        let total = GradStats::new(1.5, 3.0);
        assert_eq!(
            tree.node(NodeId(0)).leaf_value(),
            params.calc_weight(&total)
        );
    }

    #[test]
    fn test_end_to_end_single_feature_split() {
        // y = [0, 1, 1, 1] against yhat = 0 with squared error.
        let store = store_from_rows(&[
            &[Entry::new(0, 0.0)],
            &[Entry::new(0, 1.0)],
            &[Entry::new(0, 2.0)],
            &[Entry::new(0, 3.0)],
        ]);
        let y = vec![0.0, 1.0, 1.0, 1.0];
        let yhat = vec![0.0; 4];
        let gpair = SquaredLoss::gradients(&y, &yhat);
        let info = BoosterInfo::new(4, 1);
        let mut params = plain_params();
        params.max_depth = 1;
        let grower = TreeGrower::new(params);
        let mut trees = vec![Tree::new(1)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        let tree = &trees[0];
        assert_eq!(tree.num_nodes(), 3);
        let root = tree.node(NodeId(0));
        assert_eq!(root.split_index, 0);
        assert!((root.split_value() - 0.5).abs() < 1e-9);
        // x = 0 lands on the low-mean leaf, x in {1, 2, 3} on the high.
        let low = tree.node(root.left.unwrap()).leaf_value();
        let high = tree.node(root.right.unwrap()).leaf_value();
        assert!((low - 0.0).abs() < 1e-9);
        assert!((high - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_values_follow_default_direction() {
        // Feature 0 is present for half the rows; feature 1 separates
        // nothing so the split lands on feature 0.
        let rows: Vec<Vec<Entry>> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    vec![Entry::new(0, i as f64)]
                } else {
                    vec![Entry::new(1, 1.0)]
                }
            })
            .collect();
        let refs: Vec<&[Entry]> = rows.iter().map(|r| r.as_slice()).collect();
        let store = store_from_rows(&refs);
        // Rows with x >= 4 and all missing rows pull one way.
        let gpair: Vec<GradPair> = (0..8)
            .map(|i| {
                if i % 2 == 1 || i >= 4 {
                    GradPair::new(-1.0, 1.0)
                } else {
                    GradPair::new(1.0, 1.0)
                }
            })
            .collect();
        let info = BoosterInfo::new(8, 2);
        let mut params = plain_params();
        params.max_depth = 1;
        let grower = TreeGrower::new(params);
        let mut trees = vec![Tree::new(1)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        let tree = &trees[0];
        let root = tree.node(NodeId(0));
        assert!(!root.is_leaf());
        assert_eq!(root.split_index, 0);

        // Every non-missing row must land by comparison, every missing
        // row on the recorded default side.
        let mut feats = crate::tree::DenseRow::new(2);
        for (ridx, row) in rows.iter().enumerate() {
            feats.fill(row);
            let leaf = tree.leaf_for(&feats, 0);
            let expected = if feats.is_missing(0) {
                root.default_child()
            } else if feats.value(0) < root.split_value() {
                root.left.unwrap()
            } else {
                root.right.unwrap()
            };
            assert_eq!(leaf, expected, "row {ridx} routed to the wrong leaf");
            feats.drop(row);
        }
    }

    #[test]
    fn test_negative_hessian_rows_excluded() {
        let store = store_from_rows(&[
            &[Entry::new(0, 1.0)],
            &[Entry::new(0, 2.0)],
            &[Entry::new(0, 3.0)],
        ]);
        // The middle row is excluded this round.
        let gpair = vec![
            GradPair::new(-1.0, 1.0),
            GradPair::new(100.0, -1.0),
            GradPair::new(-1.0, 1.0),
        ];
        let info = BoosterInfo::new(3, 1);
        let mut params = plain_params();
        params.max_depth = 0;
        let grower = TreeGrower::new(params);
        let mut trees = vec![Tree::new(1)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        assert_eq!(trees[0].node(NodeId(0)).leaf_value(), 1.0);
    }

    #[test]
    fn test_no_usable_features() {
        let mut store = FeatureStore::new();
        store.push_row(&[]);
        store.push_row(&[]);
        let mut rng = StdRng::seed_from_u64(0);
        store.build_col_access(1.0, &mut rng);
        let gpair = vec![GradPair::new(1.0, 1.0); 2];
        let info = BoosterInfo::new(2, 0);
        let grower = TreeGrower::new(plain_params());
        let mut trees = vec![Tree::new(1)];
        let res = grower.update(&gpair, &store, &info, &mut trees);
        assert!(matches!(res, Err(BoostError::NoUsableFeatures)));
    }

    #[test]
    fn test_multi_root_positions() {
        let store = store_from_rows(&[
            &[Entry::new(0, 1.0)],
            &[Entry::new(0, 2.0)],
            &[Entry::new(0, 3.0)],
            &[Entry::new(0, 4.0)],
        ]);
        let gpair = vec![GradPair::new(-2.0, 1.0); 4];
        let mut info = BoosterInfo::new(4, 1);
        info.root_index = vec![0, 0, 1, 1];
        let mut params = plain_params();
        params.max_depth = 0;
        let grower = TreeGrower::new(params);
        let mut trees = vec![Tree::new(2)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        let tree = &trees[0];
        // Each root saw two instances with G = -4, H = 2.
        assert_eq!(tree.node(NodeId(0)).leaf_value(), 2.0);
        assert_eq!(tree.node(NodeId(1)).leaf_value(), 2.0);
    }

    #[test]
    fn test_learning_rate_split_across_trees() {
        let store = store_from_rows(&[&[Entry::new(0, 1.0)], &[Entry::new(0, 2.0)]]);
        let gpair = vec![GradPair::new(-2.0, 1.0); 2];
        let info = BoosterInfo::new(2, 1);
        let mut params = plain_params();
        params.max_depth = 0;
        let grower = TreeGrower::new(params);
        let mut trees = vec![Tree::new(1), Tree::new(1)];
        grower.update(&gpair, &store, &info, &mut trees).unwrap();
        // Base weight 2.0, learning rate 1.0 split across two trees.
        assert_eq!(trees[0].node(NodeId(0)).leaf_value(), 1.0);
        assert_eq!(trees[1].node(NodeId(0)).leaf_value(), 1.0);
    }
}

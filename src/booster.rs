use crate::data::{BoosterInfo, Entry, FeatureStore, GradPair};
use crate::errors::BoostError;
use crate::tree::{DenseRow, Tree};
use crate::updater::{build_pipeline, Updater};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Model shape parameters shared by the booster variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub num_feature: usize,
    pub num_roots: usize,
    pub num_output_group: usize,
    /// Prediction buffer slots; slot ids passed to predict must stay
    /// below this.
    pub num_pbuffer: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            num_feature: 0,
            num_roots: 1,
            num_output_group: 1,
            num_pbuffer: 0,
        }
    }
}

impl ModelParams {
    fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        fn parse(name: &str, value: &str) -> Result<usize, BoostError> {
            value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        match name {
            "num_feature" => self.num_feature = parse(name, value)?,
            "num_roots" => self.num_roots = parse(name, value)?,
            "num_output_group" => self.num_output_group = parse(name, value)?,
            "num_pbuffer" => self.num_pbuffer = parse(name, value)?,
            _ => {}
        }
        Ok(())
    }
}

/// Gradient boosted tree ensemble: the ordered tree sequence, a per
/// output group bias, and an incremental prediction cache keyed by
/// (buffer slot, group).
#[derive(Debug, Serialize, Deserialize)]
pub struct GBTree {
    pub mparams: ModelParams,
    base_score: Vec<f64>,
    trees: Vec<Tree>,
    tree_info: Vec<u32>,
    updater_seq: String,
    cfg: Vec<(String, String)>,
    pred_buffer: Vec<f64>,
    pred_counter: Vec<u32>,
    parallel: bool,
    #[serde(skip)]
    pipeline: Vec<Updater>,
}

impl Default for GBTree {
    fn default() -> Self {
        GBTree {
            mparams: ModelParams::default(),
            base_score: vec![0.0],
            trees: Vec::new(),
            tree_info: Vec::new(),
            updater_seq: "grow_colmaker,prune".to_string(),
            cfg: Vec::new(),
            pred_buffer: Vec::new(),
            pred_counter: Vec::new(),
            parallel: true,
            pipeline: Vec::new(),
        }
    }
}

impl GBTree {
    pub fn new() -> Self {
        GBTree::default()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        if name == "updater" && value != self.updater_seq {
            self.updater_seq = value.to_string();
            self.pipeline.clear();
        }
        if name == "base_score" {
            let v: f64 = value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })?;
            self.base_score = vec![v; self.mparams.num_output_group.max(1)];
        }
        if name == "parallel" {
            self.parallel = value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })?;
        }
        if self.trees.is_empty() {
            self.mparams.set_param(name, value)?;
        }
        // Remember everything for the updater stages, which apply their
        // own unknown-name policy.
        self.cfg.push((name.to_string(), value.to_string()));
        for stage in self.pipeline.iter_mut() {
            stage.set_param(name, value)?;
        }
        Ok(())
    }

    /// Allocate the prediction cache. Must happen before the first
    /// boosting round; re-initializing a trained model is a programmer
    /// error.
    pub fn init_model(&mut self) {
        assert!(self.trees.is_empty(), "GBTree: model already initialized");
        let size = self.mparams.num_pbuffer * self.mparams.num_output_group;
        self.pred_buffer = vec![0.0; size];
        self.pred_counter = vec![0; size];
        self.base_score
            .resize(self.mparams.num_output_group, self.base_score[0]);
    }

    fn ensure_pipeline(&mut self) -> Result<(), BoostError> {
        if !self.pipeline.is_empty() {
            return Ok(());
        }
        let mut pipeline = build_pipeline(&self.updater_seq)?;
        for stage in pipeline.iter_mut() {
            for (name, value) in &self.cfg {
                stage.set_param(name, value)?;
            }
        }
        self.pipeline = pipeline;
        Ok(())
    }

    /// Grow one tree per output group from this round's gradient pairs
    /// (laid out row-major, `ridx * num_output_group + gid`) and fold
    /// them into the ensemble.
    pub fn do_boost(
        &mut self,
        store: &FeatureStore,
        info: &BoosterInfo,
        gpair: &mut [GradPair],
    ) -> Result<(), BoostError> {
        self.ensure_pipeline()?;
        let ngroup = self.mparams.num_output_group;
        if ngroup == 1 {
            let trees = self.boost_new_trees(gpair, store, info)?;
            self.trees.extend(trees);
            self.tree_info.push(0);
        } else {
            assert_eq!(
                gpair.len(),
                store.num_row() * ngroup,
                "gradient pair layout must be row-major by group"
            );
            for gid in 0..ngroup {
                let mut group_gpair: Vec<GradPair> = (0..store.num_row())
                    .map(|ridx| gpair[ridx * ngroup + gid])
                    .collect();
                let trees = self.boost_new_trees(&mut group_gpair, store, info)?;
                self.trees.extend(trees);
                self.tree_info.push(gid as u32);
            }
        }
        Ok(())
    }

    fn boost_new_trees(
        &self,
        gpair: &mut [GradPair],
        store: &FeatureStore,
        info: &BoosterInfo,
    ) -> Result<Vec<Tree>, BoostError> {
        let mut trees = vec![Tree::new(self.mparams.num_roots)];
        for stage in &self.pipeline {
            stage.update(gpair, store, info, &mut trees)?;
        }
        Ok(trees)
    }

    fn buffer_offset(&self, buffer_index: i64, gid: usize) -> Result<Option<usize>, BoostError> {
        if buffer_index < 0 {
            return Ok(None);
        }
        if buffer_index as usize >= self.mparams.num_pbuffer {
            return Err(BoostError::BufferIndex {
                index: buffer_index,
                size: self.mparams.num_pbuffer,
            });
        }
        Ok(Some(buffer_index as usize + self.mparams.num_pbuffer * gid))
    }

    /// Predict one (instance, group) pair. With a buffer slot and no
    /// tree limit the cached partial sum is resumed and refreshed;
    /// `buffer_index` of -1 disables caching, a non-zero `tree_limit`
    /// bypasses it.
    pub fn predict_one(
        &mut self,
        row: &[Entry],
        feats: &mut DenseRow,
        buffer_index: i64,
        gid: usize,
        root: u32,
        tree_limit: usize,
    ) -> Result<f64, BoostError> {
        let bid = self.buffer_offset(buffer_index, gid)?;
        let mut itop = 0;
        let mut psum = 0.0;
        if let Some(bid) = bid {
            if tree_limit == 0 {
                itop = self.pred_counter[bid] as usize;
                psum = self.pred_buffer[bid];
            }
        }
        if itop < self.trees.len() {
            feats.fill(row);
            psum += fold_trees(
                &self.trees,
                &self.tree_info,
                gid as u32,
                feats,
                root,
                itop,
                tree_limit,
            );
            feats.drop(row);
        }
        if let Some(bid) = bid {
            if tree_limit == 0 {
                self.pred_counter[bid] = self.trees.len() as u32;
                self.pred_buffer[bid] = psum;
            }
        }
        Ok(self.base_score[gid] + psum)
    }

    /// Predict every buffered row for every output group; output is
    /// `ridx * num_output_group + gid`. `buffer_offset` of -1 disables
    /// the cache (and unlocks parallel row fan-out); otherwise row
    /// `ridx` uses buffer slot `buffer_offset + ridx`.
    pub fn predict(
        &mut self,
        store: &FeatureStore,
        buffer_offset: i64,
        info: &BoosterInfo,
        tree_limit: usize,
    ) -> Result<Vec<f64>, BoostError> {
        let ngroup = self.mparams.num_output_group;
        let nfeat = self.mparams.num_feature.max(store.num_col());
        let mut preds = vec![0.0; store.num_row() * ngroup];
        if buffer_offset < 0 && self.parallel {
            let trees = &self.trees;
            let tree_info = &self.tree_info;
            let base_score = &self.base_score;
            preds
                .par_chunks_mut(ngroup)
                .enumerate()
                .for_each_init(
                    || DenseRow::new(nfeat),
                    |feats, (ridx, out)| {
                        let row = store.row(ridx);
                        feats.fill(row);
                        for (gid, slot) in out.iter_mut().enumerate() {
                            *slot = base_score[gid]
                                + fold_trees(
                                    trees,
                                    tree_info,
                                    gid as u32,
                                    feats,
                                    info.root(ridx),
                                    0,
                                    tree_limit,
                                );
                        }
                        feats.drop(row);
                    },
                );
        } else {
            let mut feats = DenseRow::new(nfeat);
            for ridx in 0..store.num_row() {
                for gid in 0..ngroup {
                    let slot = if buffer_offset < 0 {
                        -1
                    } else {
                        buffer_offset + ridx as i64
                    };
                    preds[ridx * ngroup + gid] = self.predict_one(
                        store.row(ridx),
                        &mut feats,
                        slot,
                        gid,
                        info.root(ridx),
                        tree_limit,
                    )?;
                }
            }
        }
        Ok(preds)
    }
}

/// Sum leaf weights of this group's not-yet-folded trees, starting at
/// ensemble position `from` and honoring `tree_limit` (0 = all).
fn fold_trees(
    trees: &[Tree],
    tree_info: &[u32],
    gid: u32,
    feats: &DenseRow,
    root: u32,
    from: usize,
    tree_limit: usize,
) -> f64 {
    let mut psum = 0.0;
    let mut left = if tree_limit == 0 {
        usize::MAX
    } else {
        tree_limit
    };
    for i in from..trees.len() {
        if tree_info[i] == gid {
            psum += trees[i].predict_row(feats, root);
            left -= 1;
            if left == 0 {
                break;
            }
        }
    }
    psum
}

/// Training parameters of the coordinate descent linear booster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearParams {
    pub learning_rate: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub reg_lambda_bias: f64,
}

impl Default for LinearParams {
    fn default() -> Self {
        LinearParams {
            learning_rate: 1.0,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            reg_lambda_bias: 0.0,
        }
    }
}

impl LinearParams {
    fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        fn parse(name: &str, value: &str) -> Result<f64, BoostError> {
            value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        match name {
            "eta" | "learning_rate" => self.learning_rate = parse(name, value)?,
            "lambda" | "reg_lambda" => self.reg_lambda = parse(name, value)?,
            "alpha" | "reg_alpha" => self.reg_alpha = parse(name, value)?,
            "lambda_bias" | "reg_lambda_bias" => self.reg_lambda_bias = parse(name, value)?,
            _ => {}
        }
        Ok(())
    }

    fn calc_delta_bias(&self, sum_grad: f64, sum_hess: f64, w: f64) -> f64 {
        -(sum_grad + self.reg_lambda_bias * w) / (sum_hess + self.reg_lambda_bias)
    }

    /// Elastic net coordinate update, clamped so a weight never
    /// overshoots zero from the L1 term.
    fn calc_delta(&self, sum_grad: f64, sum_hess: f64, w: f64) -> f64 {
        if sum_hess < 1e-5 {
            return 0.0;
        }
        let tmp = w - (sum_grad + self.reg_lambda * w) / (sum_hess + self.reg_lambda);
        if tmp >= 0.0 {
            (-(sum_grad + self.reg_lambda * w + self.reg_alpha) / (sum_hess + self.reg_lambda))
                .max(-w)
        } else {
            (-(sum_grad + self.reg_lambda * w - self.reg_alpha) / (sum_hess + self.reg_lambda))
                .min(-w)
        }
    }
}

/// Linear booster: one round of coordinate descent over the bias and
/// every feature column, updating the residual gradients in place.
#[derive(Debug, Serialize, Deserialize)]
pub struct GBLinear {
    pub mparams: ModelParams,
    pub params: LinearParams,
    /// Per feature weights laid out `fid * num_output_group + gid`,
    /// with the bias occupying the final feature slot.
    weight: Vec<f64>,
}

impl Default for GBLinear {
    fn default() -> Self {
        GBLinear {
            mparams: ModelParams::default(),
            params: LinearParams::default(),
            weight: Vec::new(),
        }
    }
}

impl GBLinear {
    pub fn new() -> Self {
        GBLinear::default()
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        self.params.set_param(name, value)?;
        if self.weight.is_empty() {
            self.mparams.set_param(name, value)?;
        }
        Ok(())
    }

    pub fn init_model(&mut self) {
        let ngroup = self.mparams.num_output_group;
        self.weight = vec![0.0; (self.mparams.num_feature + 1) * ngroup];
    }

    fn w(&self, fid: usize, gid: usize) -> f64 {
        self.weight[fid * self.mparams.num_output_group + gid]
    }

    fn bias(&self, gid: usize) -> f64 {
        self.w(self.mparams.num_feature, gid)
    }

    pub fn do_boost(
        &mut self,
        store: &FeatureStore,
        _info: &BoosterInfo,
        gpair: &mut [GradPair],
    ) -> Result<(), BoostError> {
        let ngroup = self.mparams.num_output_group;
        let rowset = store.buffered_rowset();
        // Bias first, removing its effect from the gradients.
        for gid in 0..ngroup {
            let mut sum_grad = 0.0;
            let mut sum_hess = 0.0;
            for &ridx in rowset {
                let p = gpair[ridx as usize * ngroup + gid];
                if p.hess >= 0.0 {
                    sum_grad += p.grad as f64;
                    sum_hess += p.hess as f64;
                }
            }
            let dw = self.params.learning_rate
                * self
                    .params
                    .calc_delta_bias(sum_grad, sum_hess, self.bias(gid));
            self.weight[self.mparams.num_feature * ngroup + gid] += dw;
            for &ridx in rowset {
                let p = &mut gpair[ridx as usize * ngroup + gid];
                if p.hess >= 0.0 {
                    p.grad += p.hess * dw as f32;
                }
            }
        }
        // Then one coordinate step per feature column.
        for fid in 0..self.mparams.num_feature.min(store.num_col()) {
            let col = store.col(fid)?;
            for gid in 0..ngroup {
                let mut sum_grad = 0.0;
                let mut sum_hess = 0.0;
                for e in col {
                    let p = gpair[e.index as usize * ngroup + gid];
                    if p.hess < 0.0 {
                        continue;
                    }
                    sum_grad += p.grad as f64 * e.value;
                    sum_hess += p.hess as f64 * e.value * e.value;
                }
                let dw = self.params.learning_rate
                    * self.params.calc_delta(sum_grad, sum_hess, self.w(fid, gid));
                self.weight[fid * ngroup + gid] += dw;
                for e in col {
                    let p = &mut gpair[e.index as usize * ngroup + gid];
                    if p.hess < 0.0 {
                        continue;
                    }
                    p.grad += p.hess * (e.value * dw) as f32;
                }
            }
        }
        Ok(())
    }

    pub fn predict(
        &self,
        store: &FeatureStore,
        _info: &BoosterInfo,
        tree_limit: usize,
    ) -> Result<Vec<f64>, BoostError> {
        assert_eq!(
            tree_limit, 0,
            "tree_limit is only meaningful for the tree booster"
        );
        let ngroup = self.mparams.num_output_group;
        let mut preds = vec![0.0; store.num_row() * ngroup];
        for ridx in 0..store.num_row() {
            for gid in 0..ngroup {
                let mut psum = self.bias(gid);
                for e in store.row(ridx) {
                    if (e.index as usize) < self.mparams.num_feature {
                        psum += e.value * self.w(e.index as usize, gid);
                    }
                }
                preds[ridx * ngroup + gid] = psum;
            }
        }
        Ok(preds)
    }
}

/// The closed set of booster variants, selected by name once at setup.
#[derive(Debug, Serialize, Deserialize)]
pub enum Booster {
    Tree(GBTree),
    Linear(GBLinear),
}

impl Booster {
    pub fn from_name(name: &str) -> Result<Self, BoostError> {
        match name {
            "gbtree" => Ok(Booster::Tree(GBTree::new())),
            "gblinear" => Ok(Booster::Linear(GBLinear::new())),
            _ => Err(BoostError::UnknownName {
                kind: "booster",
                name: name.to_string(),
            }),
        }
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        match self {
            Booster::Tree(b) => b.set_param(name, value),
            Booster::Linear(b) => b.set_param(name, value),
        }
    }

    pub fn init_model(&mut self) {
        match self {
            Booster::Tree(b) => b.init_model(),
            Booster::Linear(b) => b.init_model(),
        }
    }

    pub fn do_boost(
        &mut self,
        store: &FeatureStore,
        info: &BoosterInfo,
        gpair: &mut [GradPair],
    ) -> Result<(), BoostError> {
        match self {
            Booster::Tree(b) => b.do_boost(store, info, gpair),
            Booster::Linear(b) => b.do_boost(store, info, gpair),
        }
    }

    pub fn predict(
        &mut self,
        store: &FeatureStore,
        buffer_offset: i64,
        info: &BoosterInfo,
        tree_limit: usize,
    ) -> Result<Vec<f64>, BoostError> {
        match self {
            Booster::Tree(b) => b.predict(store, buffer_offset, info, tree_limit),
            Booster::Linear(b) => b.predict(store, info, tree_limit),
        }
    }
}

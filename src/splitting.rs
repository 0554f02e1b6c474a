use crate::data::GradPair;
use crate::errors::BoostError;
use serde::{Deserialize, Serialize};

/// Gap below which two feature values are treated as the same bucket,
/// and the minimum gain a split must clear to be materialized.
pub const RT_EPS: f64 = 1e-5;
pub const RT_2EPS: f64 = 2.0 * RT_EPS;

/// Which direction missing values are sent when growing. `Learn` runs
/// both scan directions and keeps whichever scores higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultDirection {
    Learn,
    Left,
    Right,
}

/// Training hyper parameters, set through the (name, value) string
/// protocol. Unknown names are ignored on purpose so that config files
/// carrying parameters for other components keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainParams {
    pub learning_rate: f32,
    pub min_split_loss: f32,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub colsample_bylevel: f64,
    pub default_direction: DefaultDirection,
    /// Columns at least this dense skip the backward scan.
    pub opt_dense_col: f64,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for TrainParams {
    fn default() -> Self {
        TrainParams {
            learning_rate: 0.3,
            min_split_loss: 0.0,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            default_direction: DefaultDirection::Learn,
            opt_dense_col: 1.0,
            seed: 0,
            parallel: true,
        }
    }
}

impl TrainParams {
    /// Accepts both the short historical aliases (eta, gamma, lambda,
    /// alpha) and the long names. A known name with an unparsable value
    /// is a hard error; an unknown name is silently ignored.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, BoostError> {
            value.parse().map_err(|_| BoostError::BadParam {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        match name {
            "eta" | "learning_rate" => self.learning_rate = parse(name, value)?,
            "gamma" | "min_split_loss" => self.min_split_loss = parse(name, value)?,
            "max_depth" => self.max_depth = parse(name, value)?,
            "min_child_weight" => self.min_child_weight = parse(name, value)?,
            "lambda" | "reg_lambda" => self.reg_lambda = parse(name, value)?,
            "alpha" | "reg_alpha" => self.reg_alpha = parse(name, value)?,
            "subsample" => self.subsample = parse(name, value)?,
            "colsample_bytree" => self.colsample_bytree = parse(name, value)?,
            "colsample_bylevel" => self.colsample_bylevel = parse(name, value)?,
            "opt_dense_col" => self.opt_dense_col = parse(name, value)?,
            "seed" => self.seed = parse(name, value)?,
            "parallel" => self.parallel = parse(name, value)?,
            "default_direction" => {
                self.default_direction = match value {
                    "learn" | "0" => DefaultDirection::Learn,
                    "left" | "1" => DefaultDirection::Left,
                    "right" | "2" => DefaultDirection::Right,
                    _ => {
                        return Err(BoostError::BadParam {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The forward (ascending) scan produces default-right candidates.
    pub fn need_forward_search(&self, _col_density: f64) -> bool {
        self.default_direction != DefaultDirection::Left
    }

    /// The backward scan produces default-left candidates; a column
    /// dense enough never routes missing values, so it can be skipped.
    pub fn need_backward_search(&self, col_density: f64) -> bool {
        match self.default_direction {
            DefaultDirection::Left => true,
            DefaultDirection::Right => false,
            DefaultDirection::Learn => col_density < self.opt_dense_col,
        }
    }

    pub fn cannot_split(&self, sum_hess: f64) -> bool {
        sum_hess < self.min_child_weight * 2.0
    }

    pub fn calc_weight(&self, stats: &GradStats) -> f64 {
        calc_weight(stats, self.reg_alpha, self.reg_lambda, self.min_child_weight)
    }

    pub fn calc_gain(&self, stats: &GradStats) -> f64 {
        calc_gain(stats, self.reg_alpha, self.reg_lambda, self.min_child_weight)
    }
}

/// Accumulated gradient statistics over a candidate region. Sums are
/// kept in f64; the per instance pairs are f32.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradStats {
    pub sum_grad: f64,
    pub sum_hess: f64,
}

impl GradStats {
    pub fn new(sum_grad: f64, sum_hess: f64) -> Self {
        GradStats { sum_grad, sum_hess }
    }

    pub fn add(&mut self, grad: f32, hess: f32) {
        self.sum_grad += grad as f64;
        self.sum_hess += hess as f64;
    }

    pub fn add_pair(&mut self, p: &GradPair) {
        self.add(p.grad, p.hess);
    }

    pub fn clear(&mut self) {
        *self = GradStats::default();
    }

    /// The complement of `b` within `a`: everything in the parent that
    /// is not on the accumulated side.
    pub fn set_substract(&mut self, a: &GradStats, b: &GradStats) {
        self.sum_grad = a.sum_grad - b.sum_grad;
        self.sum_hess = a.sum_hess - b.sum_hess;
    }

    pub fn empty(&self) -> bool {
        self.sum_hess == 0.0
    }
}

/// L1 soft threshold of a gradient sum.
pub fn threshold_l1(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Regularized optimal leaf weight, zero for regions below the minimum
/// hessian floor.
pub fn calc_weight(stats: &GradStats, alpha: f64, lambda: f64, min_child_weight: f64) -> f64 {
    if stats.sum_hess < min_child_weight {
        return 0.0;
    }
    -threshold_l1(stats.sum_grad, alpha) / (stats.sum_hess + lambda)
}

/// Regularized gain, the standard identity G^2 / (H + lambda) with G
/// soft thresholded. Same floor rule as the weight.
pub fn calc_gain(stats: &GradStats, alpha: f64, lambda: f64, min_child_weight: f64) -> f64 {
    if stats.sum_hess < min_child_weight {
        return 0.0;
    }
    let g = threshold_l1(stats.sum_grad, alpha);
    g * g / (stats.sum_hess + lambda)
}

/// Best split found so far for one node. The update rule is
/// deterministic under any evaluation order: a challenger wins on
/// strictly greater gain, and an exact tie keeps the lower feature
/// index, so parallel reductions always converge to the same answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitEntry {
    pub loss_chg: f32,
    pub split_index: u32,
    pub default_left: bool,
    pub split_value: f64,
}

impl Default for SplitEntry {
    fn default() -> Self {
        SplitEntry {
            loss_chg: 0.0,
            split_index: 0,
            default_left: false,
            split_value: 0.0,
        }
    }
}

impl SplitEntry {
    fn need_replace(&self, new_loss_chg: f32, split_index: u32) -> bool {
        if new_loss_chg > self.loss_chg {
            return true;
        }
        new_loss_chg == self.loss_chg && split_index < self.split_index
    }

    /// Offer a fully formed candidate, e.g. when reducing the per
    /// thread buffers.
    pub fn update_entry(&mut self, e: &SplitEntry) -> bool {
        if self.need_replace(e.loss_chg, e.split_index) {
            *self = *e;
            true
        } else {
            false
        }
    }

    pub fn update(
        &mut self,
        new_loss_chg: f32,
        split_index: u32,
        split_value: f64,
        default_left: bool,
    ) -> bool {
        if self.need_replace(new_loss_chg, split_index) {
            self.loss_chg = new_loss_chg;
            self.split_index = split_index;
            self.split_value = split_value;
            self.default_left = default_left;
            true
        } else {
            false
        }
    }
}

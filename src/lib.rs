//! Gradient boosted decision tree training on sparse feature data.
//!
//! The pieces compose the way a round of boosting flows: a
//! [`data::FeatureStore`] holds the instances, an
//! [`objective::ObjectiveFunction`] turns labels and current margins
//! into gradient pairs, the [`updater`] pipeline grows and prunes one
//! [`tree::Tree`] per output group, and a [`booster::Booster`] folds
//! the new trees into the ensemble and serves cached predictions.

pub mod booster;
pub mod data;
pub mod errors;
pub mod grower;
pub mod io;
pub mod metric;
pub mod node;
pub mod objective;
pub mod pruner;
pub mod splitting;
pub mod tree;
pub mod updater;

pub use booster::{Booster, GBLinear, GBTree};
pub use data::{BoosterInfo, Entry, FeatureStore, GradPair};
pub use errors::BoostError;
pub use io::{read_libsvm, Dataset};
pub use tree::Tree;

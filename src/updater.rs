use crate::data::{BoosterInfo, FeatureStore, GradPair};
use crate::errors::BoostError;
use crate::grower::TreeGrower;
use crate::pruner::TreePruner;
use crate::tree::Tree;

/// One stage of the tree update pipeline. The set of stages is closed,
/// so dispatch is a plain match rather than name lookup per call.
#[derive(Debug, Clone)]
pub enum Updater {
    Grow(TreeGrower),
    Prune(TreePruner),
}

impl Updater {
    pub fn from_name(name: &str) -> Result<Self, BoostError> {
        match name {
            "grow_colmaker" => Ok(Updater::Grow(TreeGrower::default())),
            "prune" => Ok(Updater::Prune(TreePruner::default())),
            _ => Err(BoostError::UnknownName {
                kind: "updater",
                name: name.to_string(),
            }),
        }
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), BoostError> {
        match self {
            Updater::Grow(g) => g.set_param(name, value),
            Updater::Prune(p) => p.set_param(name, value),
        }
    }

    pub fn update(
        &self,
        gpair: &[GradPair],
        store: &FeatureStore,
        info: &BoosterInfo,
        trees: &mut [Tree],
    ) -> Result<(), BoostError> {
        match self {
            Updater::Grow(g) => g.update(gpair, store, info, trees),
            Updater::Prune(p) => p.update(gpair, store, info, trees),
        }
    }
}

/// Build the stage sequence once from a comma separated name list.
pub fn build_pipeline(updater_seq: &str) -> Result<Vec<Updater>, BoostError> {
    updater_seq
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Updater::from_name)
        .collect()
}

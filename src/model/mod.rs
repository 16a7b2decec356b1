//! Delay models.
//!
//! A delay model takes a node whose neighbourhood changed, works out the
//! stage around it and schedules the final value of every stage node.

pub mod rc;
pub mod spike;
pub mod switch;

use crate::config::ModelKind;
use crate::engine::Engine;
use crate::network::NodeId;

pub use rc::RcModel;
pub use switch::SwitchModel;

#[derive(Debug)]
pub enum DelayModel {
    Rc(RcModel),
    Switch(SwitchModel),
}

impl DelayModel {
    pub fn new(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Rc => DelayModel::Rc(RcModel::new()),
            ModelKind::Switch => DelayModel::Switch(SwitchModel::new()),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            DelayModel::Rc(_) => ModelKind::Rc,
            DelayModel::Switch(_) => ModelKind::Switch,
        }
    }

    /// Re-evaluate the stage containing `seed`.
    pub fn evaluate(&mut self, eng: &mut Engine, seed: NodeId) {
        eng.stats.evaluations += 1;
        match self {
            DelayModel::Rc(m) => m.evaluate(eng, seed),
            DelayModel::Switch(m) => m.evaluate(eng, seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [ModelKind::Rc, ModelKind::Switch] {
            assert_eq!(DelayModel::new(kind).kind(), kind);
        }
    }
}

//! Stage construction.
//!
//! A stage is the set of non-input nodes reachable from a seed through
//! conducting (non-OFF) transistors. The walk is breadth-first. Every
//! transistor is seen twice, once from each end; the second sighting only
//! clears `CROSSED`. Reaching a node that is already in the stage either
//! records a parallel branch (same gate, kind and terminal pair as the
//! transistor that first reached it) or breaks the loop.

use super::{Network, NodeFlags, NodeId, TransId, TransistorState, WalkFlags};

/// Nodes of one stage plus what the walk learned about them.
#[derive(Debug, Default, Clone)]
pub struct Stage {
    /// Seed first, then breadth-first order.
    pub nodes: Vec<NodeId>,
    /// Some stage node connects to an input through a conducting transistor.
    pub with_driven: bool,
    /// Extra branches of each parallel group, indexed by the `par_slot` of the
    /// transistor the group was first reached through.
    pub parallel: Vec<Vec<TransId>>,
}

/// Walk options that differ between delay models.
#[derive(Debug, Clone, Copy)]
pub struct StageWalk {
    /// Mark loops `BROKEN` and collect parallel branches.
    pub break_loops: bool,
    pub max_parallel: usize,
}

impl Network {
    /// Collect the stage containing `seed`.
    ///
    /// `warned` is set the first time the parallel table overflows so the
    /// warning is issued once per simulator.
    pub fn build_stage(&mut self, seed: NodeId, walk: StageWalk, warned: &mut bool) -> Stage {
        let mut stage = Stage::default();
        {
            let s = self.node_mut(seed);
            s.flags.remove(NodeFlags::VISITED);
            s.in_stage = true;
            s.reached_via = None;
        }
        stage.nodes.push(seed);

        let mut cursor = 0;
        while cursor < stage.nodes.len() {
            let here = stage.nodes[cursor];
            cursor += 1;

            for k in 0..self.node(here).terms.len() {
                let tid = self.node(here).terms[k];
                if self.trans(tid).state == TransistorState::Off {
                    continue;
                }
                if self.trans(tid).walk.contains(WalkFlags::CROSSED) {
                    self.trans_mut(tid).walk.remove(WalkFlags::CROSSED);
                    continue;
                }

                let other = self.trans(tid).other_terminal(here);
                if self.node(other).is_input() {
                    stage.with_driven = true;
                    continue;
                }
                self.trans_mut(tid).walk.insert(WalkFlags::CROSSED);

                if !self.node(other).in_stage {
                    let o = self.node_mut(other);
                    o.in_stage = true;
                    o.flags.remove(NodeFlags::VISITED);
                    o.reached_via = Some(tid);
                    stage.nodes.push(other);
                    continue;
                }
                if !walk.break_loops {
                    continue;
                }

                let via = self.node(other).reached_via.filter(|&v| v != tid);
                match via {
                    Some(first) if self.trans(first).parallel_to(self.trans(tid)) => {
                        let slot = match self.trans(first).par_slot {
                            Some(slot) if self.trans(first).walk.contains(WalkFlags::PARALLEL) => slot,
                            _ => {
                                if stage.parallel.len() >= walk.max_parallel {
                                    if !std::mem::replace(warned, true) {
                                        tracing::warn!(
                                            max = walk.max_parallel,
                                            near = %self.node(here).name,
                                            other = %self.node(other).name,
                                            "too many transistors in parallel, results may be inaccurate"
                                        );
                                    }
                                    self.trans_mut(tid).walk.insert(WalkFlags::PBROKEN);
                                    continue;
                                }
                                let slot = stage.parallel.len();
                                stage.parallel.push(Vec::new());
                                let f = self.trans_mut(first);
                                f.par_slot = Some(slot);
                                f.walk.insert(WalkFlags::PARALLEL);
                                slot
                            }
                        };
                        stage.parallel[slot].push(tid);
                        self.trans_mut(tid).walk.insert(WalkFlags::PBROKEN);
                    }
                    _ => self.trans_mut(tid).walk.insert(WalkFlags::BROKEN),
                }
            }
        }
        stage
    }

    /// Clear every per-walk mark left by [`Network::build_stage`].
    pub fn release_stage(&mut self, stage: &Stage) {
        for &n in &stage.nodes {
            for k in 0..self.node(n).terms.len() {
                let tid = self.node(n).terms[k];
                let t = self.trans_mut(tid);
                t.walk.clear();
                t.par_slot = None;
            }
            let nd = self.node_mut(n);
            nd.in_stage = false;
            nd.reached_via = None;
        }
    }
}

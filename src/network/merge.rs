//! Collapsing of parallel transistors.
//!
//! Transistors with the same gate, the same terminal pair and the same kind
//! are folded into one compound device whose resistances are the parallel
//! combination of its members. The members stay in the arena, chained on the
//! compound, but leave every adjacency list.

use super::{combine, MergeRole, Network, NodeId, TransId};

impl Network {
    /// Merge parallel transistors on the given nodes. Returns the number of
    /// transistors folded into a compound.
    pub fn collapse_parallel(&mut self, nodes: &[NodeId]) -> usize {
        let mut merged = 0;
        for &n in nodes {
            let mut i = 0;
            while i < self.node(n).terms.len() {
                let mut t1 = self.node(n).terms[i];
                let mut j = i + 1;
                while j < self.node(n).terms.len() {
                    let t2 = self.node(n).terms[j];
                    if self.is_parallel(t1, t2) {
                        // the compound takes t1's slot
                        t1 = self.fold(t1, t2);
                        merged += 1;
                    } else {
                        j += 1;
                    }
                }
                i += 1;
            }
        }
        if merged > 0 {
            tracing::info!(merged, "collapsed parallel transistors");
        }
        merged
    }

    fn is_parallel(&self, a: TransId, b: TransId) -> bool {
        let (ta, tb) = (self.trans(a), self.trans(b));
        a != b && ta.parallel_to(tb)
    }

    /// Fold `t2` into `t1`, creating the compound on first use.
    fn fold(&mut self, t1: TransId, t2: TransId) -> TransId {
        let compound = match self.trans(t1).role {
            MergeRole::Compound { .. } => t1,
            _ => {
                let c = self.push_compound(t1, vec![t1]);
                self.replace_in_lists(t1, c);
                self.trans_mut(t1).role = MergeRole::Member { compound: c };
                self.counts.ored[self.trans(c).kind.index()] += 1;
                c
            }
        };

        let r2 = self.trans(t2).r;
        {
            let r = &mut self.trans_mut(compound).r;
            r.r_static = combine(r.r_static, r2.r_static);
            r.dyn_low = combine(r.dyn_low, r2.dyn_low);
            r.dyn_high = combine(r.dyn_high, r2.dyn_high);
            r.width += r2.width;
        }

        self.remove_from_lists(t2);
        // a compound being absorbed hands over its members and retires
        let joined = match std::mem::replace(&mut self.trans_mut(t2).role, MergeRole::Member { compound }) {
            MergeRole::Compound { members } => members,
            _ => {
                self.counts.ored[self.trans(compound).kind.index()] += 1;
                vec![t2]
            }
        };
        for &m in &joined {
            self.trans_mut(m).role = MergeRole::Member { compound };
        }
        if let MergeRole::Compound { members } = &mut self.trans_mut(compound).role {
            members.extend(joined);
        }
        compound
    }

    fn lists_of(&self, t: TransId) -> [(NodeId, bool); 3] {
        let tr = self.trans(t);
        [(tr.gate, true), (tr.source, false), (tr.drain, false)]
    }

    fn replace_in_lists(&mut self, old: TransId, new: TransId) {
        for (node, is_gate) in self.lists_of(old) {
            let nd = self.node_mut(node);
            let list = if is_gate { &mut nd.gates } else { &mut nd.terms };
            for slot in list.iter_mut().filter(|s| **s == old) {
                *slot = new;
            }
        }
    }

    fn remove_from_lists(&mut self, t: TransId) {
        for (node, is_gate) in self.lists_of(t) {
            let nd = self.node_mut(node);
            let list = if is_gate { &mut nd.gates } else { &mut nd.terms };
            list.retain(|&s| s != t);
        }
    }

    /// Compound transistors currently standing in the adjacency lists.
    pub fn compounds(&self) -> impl Iterator<Item = TransId> + '_ {
        self.trans_ids().filter(|&t| matches!(self.trans(t).role, MergeRole::Compound { .. }))
    }
}

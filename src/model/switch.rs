//! Switch-level model over a 46-value charge lattice.
//!
//! A lattice value is an interval `[i, j]` over nine points ordered from a
//! driven high to a driven low:
//!
//! ```text
//!   DH  WH  CH  cH  Z  cL  CL  WL  DL
//! ```
//!
//! (driven, weak, charged, weakly charged, floating). Index 0 is the empty
//! value. Every node of a stage gets the merge of its own charge with the
//! transmitted values of its neighbours; the result maps to a logic level
//! and is scheduled with the node's user delay.

use std::collections::HashMap;

use crate::engine::Engine;
use crate::network::{Network, NodeId, Potential, TransId, TransistorState};

/// Lattice value, an index into the tables below.
pub type Lattice = u8;

pub const EMPTY: Lattice = 0;
pub const VALUES: usize = 46;

const POINTS: usize = 9;
const Z_POINT: usize = 4;
const STRENGTH: [u8; POINTS] = [4, 3, 2, 1, 0, 1, 2, 3, 4];

const fn idx(i: usize, j: usize) -> Lattice {
    let mut k = 1;
    let mut a = 0;
    while a < i {
        k += POINTS - a;
        a += 1;
    }
    (k + j - i) as Lattice
}

pub const DH: Lattice = idx(0, 0);
pub const DHDL: Lattice = idx(0, 8);
pub const CH: Lattice = idx(2, 2);
pub const CHCL: Lattice = idx(2, 6);
pub const CL: Lattice = idx(6, 6);
pub const WCH: Lattice = idx(3, 3);
pub const WCHWCL: Lattice = idx(3, 5);
pub const WCL: Lattice = idx(5, 5);
pub const Z: Lattice = idx(Z_POINT, Z_POINT);
pub const DL: Lattice = idx(8, 8);

/// `(i, j)` of every value; the empty value maps to `(0, 0)` and is never
/// read through this table.
const BOUNDS: [(u8, u8); VALUES] = {
    let mut t = [(0u8, 0u8); VALUES];
    let mut i = 0;
    while i < POINTS {
        let mut j = i;
        while j < POINTS {
            t[idx(i, j) as usize] = (i as u8, j as u8);
            j += 1;
        }
        i += 1;
    }
    t
};

/// Weakest point of the interval `[i, j]`.
const fn min_strength(i: usize, j: usize) -> u8 {
    if i <= Z_POINT && Z_POINT <= j {
        0
    } else if STRENGTH[i] < STRENGTH[j] {
        STRENGTH[i]
    } else {
        STRENGTH[j]
    }
}

/// Hull of the pointwise merges: a point of one side survives when the other
/// side has a point no stronger than it.
const fn merge_values(a: usize, b: usize) -> Lattice {
    if a == EMPTY as usize || b == EMPTY as usize {
        return EMPTY;
    }
    let (i, j) = (BOUNDS[a].0 as usize, BOUNDS[a].1 as usize);
    let (k, l) = (BOUNDS[b].0 as usize, BOUNDS[b].1 as usize);
    let (weakest_a, weakest_b) = (min_strength(i, j), min_strength(k, l));
    let mut lo = POINTS;
    let mut hi = 0;
    let mut p = 0;
    while p < POINTS {
        let in_a = i <= p && p <= j && STRENGTH[p] >= weakest_b;
        let in_b = k <= p && p <= l && STRENGTH[p] >= weakest_a;
        if in_a || in_b {
            if p < lo {
                lo = p;
            }
            hi = p;
        }
        p += 1;
    }
    idx(lo, hi)
}

/// Value seen at a node with `a` on one side and `b` on the other.
pub const MERGE: [[Lattice; VALUES]; VALUES] = {
    let mut t = [[EMPTY; VALUES]; VALUES];
    let mut a = 0;
    while a < VALUES {
        let mut b = 0;
        while b < VALUES {
            t[a][b] = merge_values(a, b);
            b += 1;
        }
        a += 1;
    }
    t
};

const fn weaken(p: usize) -> usize {
    match p {
        0 => 1,
        8 => 7,
        _ => p,
    }
}

/// Value passed through a transistor, indexed `[value][state]`.
pub const TRANSMIT: [[Lattice; 4]; VALUES] = {
    let mut t = [[EMPTY; 4]; VALUES];
    let mut a = 0;
    while a < VALUES {
        t[a][TransistorState::Off as usize] = Z;
        if a != EMPTY as usize {
            let (i, j) = (BOUNDS[a].0 as usize, BOUNDS[a].1 as usize);
            t[a][TransistorState::On as usize] = a as Lattice;
            let lo = if i < Z_POINT { i } else { Z_POINT };
            let hi = if j > Z_POINT { j } else { Z_POINT };
            t[a][TransistorState::Unknown as usize] = idx(lo, hi);
            t[a][TransistorState::Weak as usize] = idx(weaken(i), weaken(j));
        }
        a += 1;
    }
    t
};

/// Logic level of a lattice value.
pub fn logic_state(v: Lattice) -> Potential {
    if v == EMPTY {
        return Potential::Low;
    }
    let (i, j) = BOUNDS[v as usize];
    if j <= 3 {
        Potential::High
    } else if i >= 5 {
        Potential::Low
    } else {
        Potential::X
    }
}

/// Charge held by a node that gates transistors.
const CHARGED: [Lattice; 3] = [CL, CHCL, CH];
/// Charge held by a node with no gate load.
const XCHARGED: [Lattice; 3] = [WCL, WCHWCL, WCH];
/// Value of an input node.
const DRIVEN: [Lattice; 3] = [DL, DHDL, DH];

#[derive(Debug, Default)]
pub struct SwitchModel {
    /// Transmitted value of the far side, keyed by (transistor, far node).
    transmitted: HashMap<(TransId, NodeId), Lattice>,
    on_path: Vec<bool>,
}

impl SwitchModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, eng: &mut Engine, seed: NodeId) {
        let stage = eng.build_stage(seed, false);
        self.transmitted.clear();
        self.on_path.clear();
        self.on_path.resize(eng.net.node_count(), false);

        let mut plan = Vec::with_capacity(stage.nodes.len());
        for &n in &stage.nodes {
            let v = self.value(&eng.net, n);
            let node = eng.net.node(n);
            let level = logic_state(v);
            let tau = match level {
                Potential::Low => node.tphl,
                Potential::X => 0,
                Potential::High => node.tplh,
            };
            plan.push((n, level, tau.max(1), tau));
        }

        let now = eng.now();
        for (n, level, delay, tau) in plan {
            eng.supersede(n, level, now + delay, tau);
        }
        eng.release_stage(&stage);
    }

    /// Lattice value at `n`, looking outward from the current path.
    fn value(&mut self, net: &Network, n: NodeId) -> Lattice {
        let node = net.node(n);
        if node.is_input() {
            return DRIVEN[node.pot.index()];
        }

        self.on_path[n.index()] = true;
        let mut result = if node.gates.is_empty() { XCHARGED[node.pot.index()] } else { CHARGED[node.pot.index()] };
        for &t in &node.terms {
            let tr = net.trans(t);
            if tr.state == TransistorState::Off {
                continue;
            }
            let other = tr.other_terminal(n);
            if self.on_path[other.index()] {
                continue;
            }
            let v = match self.transmitted.get(&(t, other)) {
                Some(&v) => v,
                None => {
                    let far = self.value(net, other);
                    let v = TRANSMIT[far as usize][tr.state.index()];
                    self.transmitted.insert((t, other), v);
                    v
                }
            };
            result = MERGE[result as usize][v as usize];
        }
        self.on_path[n.index()] = false;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- lattice tests ----

    #[test]
    fn named_values_sit_where_expected() {
        assert_eq!(DH, 1);
        assert_eq!(DHDL, 9);
        assert_eq!(CH, 18);
        assert_eq!(WCH, 25);
        assert_eq!(Z, 31);
        assert_eq!(WCL, 36);
        assert_eq!(CL, 40);
        assert_eq!(DL, 45);
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        for a in 0..VALUES {
            for b in 0..VALUES {
                assert_eq!(MERGE[a][b], MERGE[b][a], "{} {}", a, b);
                for c in 0..VALUES {
                    let left = MERGE[MERGE[a][b] as usize][c];
                    let right = MERGE[a][MERGE[b][c] as usize];
                    assert_eq!(left, right, "{} {} {}", a, b, c);
                }
            }
        }
    }

    #[test]
    fn off_transistor_blocks_everything() {
        for v in 0..VALUES {
            assert_eq!(TRANSMIT[v][TransistorState::Off.index()], Z);
        }
    }

    #[test]
    fn stronger_drive_wins() {
        assert_eq!(MERGE[DL as usize][CH as usize], DL);
        assert_eq!(MERGE[DH as usize][DL as usize], DHDL);
        assert_eq!(MERGE[Z as usize][CL as usize], CL);
    }

    #[test]
    fn weak_and_unknown_transmission() {
        let weak = TRANSMIT[DL as usize][TransistorState::Weak.index()];
        assert_eq!(weak, idx(7, 7));
        assert_eq!(MERGE[weak as usize][DH as usize], DH);
        assert_eq!(TRANSMIT[DH as usize][TransistorState::Unknown.index()], idx(0, 4));
        assert_eq!(logic_state(idx(0, 4)), Potential::X);
    }

    #[test]
    fn logic_levels() {
        assert_eq!(logic_state(DH), Potential::High);
        assert_eq!(logic_state(WCH), Potential::High);
        assert_eq!(logic_state(CL), Potential::Low);
        assert_eq!(logic_state(Z), Potential::X);
        assert_eq!(logic_state(DHDL), Potential::X);
    }
}

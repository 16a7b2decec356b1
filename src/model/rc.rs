//! RC timing model.
//!
//! Every node of a stage is reduced to a Thevenin equivalent by a depth-first
//! walk over the (loop-free) stage tree. Each branch keeps interval-valued
//! pull-up and pull-down resistances and the charge held high and low behind
//! it. The DC pass classifies each node as LOW, HIGH or X and groups driven
//! nodes by the value they settle to. A second pass over each group computes
//! time constants, schedules final values and looks for charge-sharing
//! spikes on nodes that do not change.
//!
//! Intermediate results live in side tables keyed by node and by
//! (transistor, far node), valid for one evaluation.

use std::collections::HashMap;

use super::spike::{self, SpikeShape};
use crate::config::XChargeModel;
use crate::engine::Engine;
use crate::history::History;
use crate::network::stage::Stage;
use crate::network::{
    combine, Network, NodeFlags, NodeId, Potential, Resistance, TransId, Transistor, TransistorKind, TransistorState, WalkFlags,
};
use crate::sched::EventKind;

pub const SMALL: f64 = 1e-15;
pub const LARGE: f64 = 1e15;
/// Resistances above this count as open.
pub const LIMIT: f64 = 1e8;
/// Share of conductance that makes a node mostly n- or p-driven.
const NP_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    min: f64,
    max: f64,
}

impl Range {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    const fn both(v: f64) -> Self {
        Self { min: v, max: v }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ThevFlags(u8);

impl ThevFlags {
    /// Rooted in a definite (non-X) path to an input.
    const DEFINITE: ThevFlags = ThevFlags(1 << 0);
    const UDELAY: ThevFlags = ThevFlags(1 << 1);
    const SPIKE: ThevFlags = ThevFlags(1 << 2);
    const DRIVEN: ThevFlags = ThevFlags(1 << 3);
    /// Reference node of a pure charge-sharing stage.
    const REFNODE: ThevFlags = ThevFlags(1 << 4);
    /// Reached through a transistor in the unknown state.
    const XTRAN: ThevFlags = ThevFlags(1 << 5);
    /// Input slope applies.
    const INT: ThevFlags = ThevFlags(1 << 6);
    /// Driven to the dominant potential.
    const DOMDRIVEN: ThevFlags = ThevFlags(1 << 7);

    fn contains(self, other: ThevFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: ThevFlags) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: ThevFlags) {
        self.0 &= !other.0;
    }
}

/// Thevenin equivalent of a node or of a branch seen through a transistor.
#[derive(Debug, Clone)]
struct Thev {
    flags: ThevFlags,
    c_low: Range,
    c_high: Range,
    r_up: Range,
    r_down: Range,
    /// Resistance of the transistor leading to this branch.
    req: Range,
    v: Range,
    r_min: f64,
    r_dom: f64,
    r_max: f64,
    /// Capacitance to charge / discharge toward the dominant value.
    ca: f64,
    cd: f64,
    tau_a: f64,
    tau_d: f64,
    tau_p: f64,
    /// Input time constant.
    tin: f64,
    tplh: u64,
    tphl: u64,
    settled: Potential,
    tau_done: Option<Potential>,
    taup_done: Option<Potential>,
}

impl Thev {
    fn undriven() -> Self {
        Self {
            flags: ThevFlags::default(),
            c_low: Range::both(0.0),
            c_high: Range::both(0.0),
            r_up: Range::both(LARGE),
            r_down: Range::both(LARGE),
            req: Range::both(LARGE),
            v: Range::new(1.0, 0.0),
            r_min: LARGE,
            r_dom: LARGE,
            r_max: LARGE,
            ca: 0.0,
            cd: 0.0,
            tau_a: 0.0,
            tau_d: 0.0,
            tau_p: 0.0,
            tin: SMALL,
            tplh: 0,
            tphl: 0,
            settled: Potential::X,
            tau_done: None,
            taup_done: None,
        }
    }

    /// An input held at `pot`.
    fn input(pot: Potential) -> Self {
        let mut t = Self::undriven();
        t.flags = ThevFlags(ThevFlags::DEFINITE.0 | ThevFlags::DRIVEN.0);
        t.r_min = SMALL;
        t.settled = pot;
        match pot {
            Potential::Low => {
                t.r_down = Range::both(SMALL);
                t.v = Range::both(0.0);
            }
            Potential::High => {
                t.r_up = Range::both(SMALL);
                t.v = Range::both(1.0);
            }
            Potential::X => {
                t.r_up = Range::new(SMALL, LARGE);
                t.r_down = Range::new(SMALL, LARGE);
            }
        }
        t
    }
}

/// `old || new`, treating anything above [`LIMIT`] as open.
fn do_parallel(old: f64, new: f64) -> f64 {
    if old > LIMIT {
        new
    } else if new > LIMIT {
        old
    } else {
        combine(old, new)
    }
}

/// Rescale a charge-sharing time constant by the node's own; zero when the
/// node holds no charge, so no spike is reported.
fn spike_tau(tau_p: f64, r_dom: f64, tau_a: f64) -> f64 {
    if tau_a > 0.0 {
        tau_p * r_dom / tau_a
    } else {
        0.0
    }
}

/// Fold branch `b` into `r`: capacitances add, resistances combine in
/// parallel, and the driven and definite flags propagate.
fn parallel_op(r: &mut Thev, b: &Thev) {
    r.c_low.max += b.c_low.max;
    r.c_high.max += b.c_high.max;
    if !b.flags.contains(ThevFlags::XTRAN) {
        r.c_low.min += b.c_low.min;
        r.c_high.min += b.c_high.min;
    }

    // user delays only count on a driven, definite branch
    if b.flags.contains(ThevFlags::DEFINITE) && b.flags.contains(ThevFlags::UDELAY) {
        if r.flags.contains(ThevFlags::UDELAY) {
            r.tplh = r.tplh.min(b.tplh);
            r.tphl = r.tphl.min(b.tphl);
        } else {
            r.tplh = b.tplh;
            r.tphl = b.tphl;
            r.flags.insert(ThevFlags::UDELAY);
        }
    }

    if !b.flags.contains(ThevFlags::DRIVEN) {
        return;
    }
    r.flags.insert(ThevFlags::DRIVEN);

    r.r_up.min = do_parallel(r.r_up.min, b.r_up.min);
    r.r_down.min = do_parallel(r.r_down.min, b.r_down.min);

    let r_definite = r.flags.contains(ThevFlags::DEFINITE);
    let b_definite = b.flags.contains(ThevFlags::DEFINITE);
    if r_definite && b_definite {
        r.r_up.max = do_parallel(r.r_up.max, b.r_up.max);
        r.r_down.max = do_parallel(r.r_down.max, b.r_down.max);
    } else if b_definite {
        r.r_up.max = b.r_up.max;
        r.r_down.max = b.r_down.max;
        r.flags.insert(ThevFlags::DEFINITE);
    } else {
        r.r_up.max = r.r_up.max.min(b.r_up.max);
        r.r_down.max = r.r_down.max.min(b.r_down.max);
    }
}

/// Per-evaluation read-only context.
struct Walk<'a> {
    net: &'a Network,
    hist: &'a History,
    stage: &'a Stage,
    now: u64,
    unit_delay_ps: f64,
    ps_per_delta: f64,
    x_charge: XChargeModel,
}

impl Walk<'_> {
    /// Transistors tabled as parallel to `t`.
    fn parallel_of(&self, tr: &Transistor) -> &[TransId] {
        if !tr.walk.contains(WalkFlags::PARALLEL) {
            return &[];
        }
        tr.par_slot.and_then(|s| self.stage.parallel.get(s)).map_or(&[][..], Vec::as_slice)
    }

    /// Set `r.req` from the chosen resistance of `t` and its parallel
    /// branches. Unknown-state devices only lower the minimum.
    fn set_req(&self, r: &mut Thev, t: TransId, pick: fn(&Resistance) -> f64) {
        let tr = self.net.trans(t);
        let mut gmin = 1.0 / pick(&tr.r);
        let mut gmax = if tr.state == TransistorState::Unknown { 0.0 } else { gmin };
        for &p in self.parallel_of(tr) {
            let pt = self.net.trans(p);
            let g = 1.0 / pick(&pt.r);
            gmin += g;
            if pt.state != TransistorState::Unknown {
                gmax += g;
            }
        }
        r.req.min = 1.0 / gmin;
        if gmax == 0.0 {
            r.flags.insert(ThevFlags::XTRAN);
        } else {
            r.req.max = 1.0 / gmax;
        }
    }

    /// Put transistor `t` in series with branch `r`. The drive direction
    /// picks the dynamic resistance.
    fn series_op(&self, mut r: Thev, t: TransId) -> Thev {
        let pull_high: fn(&Resistance) -> f64 = |r| r.dyn_high;
        let pull_low: fn(&Resistance) -> f64 = |r| r.dyn_low;
        let weakest: fn(&Resistance) -> f64 = |r| r.dyn_low.min(r.dyn_high);

        if !r.flags.contains(ThevFlags::DRIVEN) {
            let pick = if r.c_high.min > r.c_low.max {
                pull_high
            } else if r.c_high.max < r.c_low.min {
                pull_low
            } else {
                weakest
            };
            self.set_req(&mut r, t, pick);
            return r;
        }

        let pick = if r.r_down.min > r.r_up.max {
            pull_high
        } else if r.r_down.max < r.r_up.min {
            pull_low
        } else {
            weakest
        };
        self.set_req(&mut r, t, pick);

        let up_min = r.r_up.min;
        let down_min = r.r_down.min;
        if up_min < LIMIT {
            r.r_up.min += r.req.min * (1.0 + up_min / r.r_down.max);
        }
        if down_min < LIMIT {
            r.r_down.min += r.req.min * (1.0 + down_min / r.r_up.max);
        }
        if r.flags.contains(ThevFlags::XTRAN) {
            r.flags.remove(ThevFlags::DEFINITE);
            r.r_up.max = LARGE;
            r.r_down.max = LARGE;
        } else {
            if r.r_up.max < LIMIT {
                r.r_up.max += r.req.max * (1.0 + r.r_up.max / down_min);
            }
            if r.r_down.max < LIMIT {
                r.r_down.max += r.req.max * (1.0 + r.r_down.max / up_min);
            }
        }
        r
    }

    /// Input time constant of a transistor whose gate switched this delta.
    fn gate_tau(&self, t: TransId) -> Option<f64> {
        let tr = self.net.trans(t);
        if tr.state != TransistorState::On {
            return None;
        }
        let h = self.hist.current(tr.gate);
        if h.time == self.now && (h.input || h.delay != 0) {
            Some(h.rtime as f64 * tr.r.r_static)
        } else {
            None
        }
    }

    fn input_tau(&self, t: TransId) -> Option<f64> {
        let mut tin = self.gate_tau(t);
        for &p in self.parallel_of(self.net.trans(t)) {
            if let Some(x) = self.gate_tau(p) {
                tin = Some(tin.map_or(x, |a| combine(a, x)));
            }
        }
        tin
    }

    /// Delay estimate for a driven node that settles to X.
    fn x_charge_tau(&self, r: &Thev) -> f64 {
        match self.x_charge {
            XChargeModel::MinResistance => r.r_min * r.ca,
            XChargeModel::StrengthDifference => {
                let diff = (1.0 / r.r_up.min - 1.0 / r.r_down.min).abs();
                if diff > 0.0 {
                    (r.ca / diff).max(r.r_min * r.ca)
                } else {
                    r.r_dom * r.ca
                }
            }
        }
    }
}

/// Whether a walk from a node skips terminal transistor `t`.
fn skipped(tr: &Transistor, t: TransId, via: Option<TransId>) -> bool {
    Some(t) == via
        || tr.state == TransistorState::Off
        || tr.walk.contains(WalkFlags::BROKEN)
        || tr.walk.contains(WalkFlags::PBROKEN)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spike {
    charge: Potential,
    /// Picoseconds to the peak.
    ch_delay: f64,
    /// Picoseconds until the driven value is restored.
    dr_delay: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    PuntAll(NodeId),
    Final { node: NodeId, value: Potential, tau: f64, delay: f64 },
    Spike { node: NodeId, spike: Option<Spike> },
}

#[derive(Debug, Default, Clone)]
struct Dominant {
    nodes: Vec<NodeId>,
    spike: bool,
}

#[derive(Debug, Default)]
pub struct RcModel {
    nodes: HashMap<NodeId, Thev>,
    branches: HashMap<(TransId, NodeId), Thev>,
    dominant: [Dominant; 3],
}

impl RcModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, eng: &mut Engine, seed: NodeId) {
        self.nodes.clear();
        self.branches.clear();
        for d in self.dominant.iter_mut() {
            d.nodes.clear();
            d.spike = false;
        }

        let stage = eng.build_stage(seed, true);
        let plan = {
            let w = Walk {
                net: &eng.net,
                hist: &eng.hist,
                stage: &stage,
                now: eng.now(),
                unit_delay_ps: eng.delta_to_ps(eng.opts.unit_delay),
                ps_per_delta: eng.delta_to_ps(1),
                x_charge: eng.opts.x_charge,
            };
            if !self.compute_dc(&w) {
                stage.nodes.iter().map(|&n| Action::PuntAll(n)).collect()
            } else if stage.with_driven {
                self.schedule_driven(&w)
            } else {
                self.schedule_charge_sharing(&w, seed)
            }
        };

        for action in plan {
            match action {
                Action::PuntAll(n) => eng.punt_all(n),
                Action::Final { node, value, tau, delay } => {
                    eng.queue_final(node, value, tau, delay);
                }
                Action::Spike { node, spike } => queue_spike(eng, node, spike),
            }
        }

        let decay = eng.opts.decay;
        if decay != 0 && !stage.with_driven {
            for &n in &stage.nodes {
                let pot = eng.net.node(n).pot;
                if eng.sched.pending_value(n, pot) != Potential::X {
                    eng.enqueue(n, Potential::X, decay, decay, EventKind::Decay);
                }
            }
        }
        eng.release_stage(&stage);
    }

    // -----------------------------------------------------------------------
    // DC values
    // -----------------------------------------------------------------------

    /// Settle every stage node; returns whether anything changes or may spike.
    fn compute_dc(&mut self, w: &Walk) -> bool {
        let mut changed = false;
        let driven = w.stage.with_driven;
        for &n in &w.stage.nodes {
            let node = w.net.node(n);
            let mut r = self.dc_value(w, n, None);

            if driven {
                r.v.min = if r.r_down.min >= LIMIT { 1.0 } else { r.r_down.min / (r.r_down.min + r.r_up.max) };
                r.v.max = if r.r_up.min >= LIMIT { 0.0 } else { r.r_down.max / (r.r_down.max + r.r_up.min) };
            } else {
                r.v.min = r.c_high.min / (r.c_high.min + r.c_low.max);
                r.v.max = r.c_high.max / (r.c_high.max + r.c_low.min);
            }

            r.settled = if r.v.min >= node.vhigh {
                Potential::High
            } else if r.v.max <= node.vlow {
                Potential::Low
            } else {
                Potential::X
            };

            if driven {
                // an indefinite drive must agree with the stored charge
                if r.settled != Potential::X && !r.flags.contains(ThevFlags::DEFINITE) {
                    let shared = if r.c_high.min >= node.vhigh * (r.c_high.min + r.c_low.max) {
                        Potential::High
                    } else if r.c_high.max <= node.vlow * (r.c_high.max + r.c_low.min) {
                        Potential::Low
                    } else {
                        Potential::X
                    };
                    if shared != r.settled {
                        r.settled = Potential::X;
                    }
                }

                let dom = &mut self.dominant[r.settled.index()];
                dom.nodes.push(n);

                let opposite_charge = match r.settled {
                    Potential::Low => r.c_high.min > SMALL,
                    Potential::High => r.c_low.min > SMALL,
                    Potential::X => false,
                };
                if r.settled == node.pot && opposite_charge {
                    r.flags.insert(ThevFlags::SPIKE);
                    dom.spike = true;
                    changed = true;
                }
            }

            if r.settled != node.pot {
                changed = true;
            }
            self.nodes.insert(n, r);
        }
        changed
    }

    /// Thevenin equivalent of the tree rooted at `n`, not looking back
    /// through `via`. Branch results are memoised.
    fn dc_value(&mut self, w: &Walk, n: NodeId, via: Option<TransId>) -> Thev {
        let node = w.net.node(n);
        if node.is_input() {
            return Thev::input(node.pot);
        }

        let mut r = Thev::undriven();
        match node.pot {
            Potential::Low => r.c_low = Range::both(node.ncap),
            Potential::X => {
                r.c_low.max = node.ncap;
                r.c_high.max = node.ncap;
            }
            Potential::High => r.c_high = Range::both(node.ncap),
        }

        for &t in &node.terms {
            let tr = w.net.trans(t);
            if skipped(tr, t, via) {
                continue;
            }
            let other = tr.other_terminal(n);
            let branch = match self.branches.get(&(t, other)) {
                Some(b) => b.clone(),
                None => {
                    let far = self.dc_value(w, other, Some(t));
                    let b = w.series_op(far, t);
                    self.branches.insert((t, other), b.clone());
                    b
                }
            };
            parallel_op(&mut r, &branch);
        }

        if node.flags.contains(NodeFlags::USERDELAY) {
            r.tplh = node.tplh;
            r.tphl = node.tphl;
            r.flags.insert(ThevFlags::UDELAY);
        }
        r
    }

    // -----------------------------------------------------------------------
    // Time constants
    // -----------------------------------------------------------------------

    fn stored(&self, n: NodeId, via: Option<TransId>) -> Thev {
        let found = match via {
            None => self.nodes.get(&n),
            Some(t) => self.branches.get(&(t, n)),
        };
        found.cloned().unwrap_or_else(Thev::undriven)
    }

    fn store(&mut self, n: NodeId, via: Option<TransId>, r: Thev) {
        match via {
            None => self.nodes.insert(n, r),
            Some(t) => self.branches.insert((t, n), r),
        };
    }

    fn is_reference(&self, n: NodeId) -> bool {
        self.nodes.get(&n).map_or(false, |r| r.flags.contains(ThevFlags::REFNODE))
    }

    /// First-order parameters (Rmin, Rdom, Rmax, Ca, Cd, Tin) of the tree
    /// rooted at `n` for dominant value `dom`. Also leaves on each branch the
    /// factor (`tau_p`) that moves its capacitance across the transistor.
    fn tau(&mut self, w: &Walk, n: NodeId, via: Option<TransId>, dom: Potential) -> Thev {
        let node = w.net.node(n);
        let mut r = self.stored(n, via);
        r.tau_done = Some(dom);

        if node.is_input() {
            r.tin = 0.0;
            r.r_min = 0.0;
            r.ca = 0.0;
            r.cd = 0.0;
            if node.pot == dom {
                r.r_dom = 0.0;
                r.r_max = 0.0;
                r.flags.insert(ThevFlags::DOMDRIVEN);
            } else {
                r.flags.remove(ThevFlags::DOMDRIVEN);
                r.flags.remove(ThevFlags::INT);
                let open = if dom == Potential::X { 0.0 } else { LARGE };
                r.r_dom = open;
                r.r_max = open;
            }
            self.store(n, via, r.clone());
            return r;
        }

        if self.is_reference(n) {
            r.r_min = 0.0;
            r.r_dom = 0.0;
            r.r_max = 0.0;
            r.ca = 0.0;
            r.cd = 0.0;
            self.store(n, via, r.clone());
            return r;
        }

        r.r_min = LARGE;
        r.r_dom = LARGE;
        r.r_max = LARGE;
        r.cd = node.ncap;
        // X nodes are assumed charged high
        let charged_to_dom = match dom {
            Potential::X => node.pot == Potential::Low,
            _ => node.pot == dom,
        };
        r.ca = if charged_to_dom { 0.0 } else { node.ncap };
        r.tin = 0.0;
        r.flags.remove(ThevFlags::DOMDRIVEN);
        r.flags.remove(ThevFlags::INT);

        for &t in &node.terms {
            let tr = w.net.trans(t);
            if skipped(tr, t, via) {
                continue;
            }
            let other = tr.other_terminal(n);
            let key = (t, other);
            let mut b = self.branches.get(&key).cloned().unwrap_or_else(Thev::undriven);
            if b.tau_done != Some(dom) {
                b = self.tau(w, other, Some(t), dom);
                // input slope only counts along the dominant driven path
                if b.flags.contains(ThevFlags::DOMDRIVEN) {
                    if let Some(tin) = w.input_tau(t) {
                        b.flags.insert(ThevFlags::INT);
                        b.tin += tin;
                    }
                }

                let old_rdom = b.r_dom;
                b.r_min += b.req.min;
                b.r_dom += b.req.min;
                if b.flags.contains(ThevFlags::XTRAN) {
                    b.r_max = LARGE;
                } else {
                    b.r_max += b.req.max;
                }

                if b.flags.contains(ThevFlags::XTRAN) && w.net.node(other).pot == dom {
                    b.tau_p = 0.0;
                    b.ca = 0.0;
                    b.cd = 0.0;
                } else if old_rdom > LIMIT {
                    b.tau_p = 1.0;
                } else {
                    b.tau_p = old_rdom / b.r_dom;
                    b.ca *= b.tau_p;
                    b.cd *= b.tau_p;
                }
                self.branches.insert(key, b.clone());
            }

            r.ca += b.ca;
            r.cd += b.cd;
            r.r_min = combine(r.r_min, b.r_min);
            if r.r_dom > LIMIT {
                r.r_dom = b.r_dom;
                r.r_max = b.r_max;
            } else if b.r_dom < LIMIT {
                r.r_dom = combine(r.r_dom, b.r_dom);
                r.r_max = combine(r.r_max, b.r_max);
            }
            if b.flags.contains(ThevFlags::DOMDRIVEN) {
                r.flags.insert(ThevFlags::DOMDRIVEN);
            }
            if b.flags.contains(ThevFlags::INT) {
                if r.flags.contains(ThevFlags::INT) {
                    r.tin = combine(r.tin, b.tin);
                } else {
                    r.tin = b.tin;
                    r.flags.insert(ThevFlags::INT);
                }
            }
        }

        self.store(n, via, r.clone());
        r
    }

    /// Second-order time constant of the net as seen through `n`.
    fn tau_p(&mut self, w: &Walk, n: NodeId, via: Option<TransId>, dom: Potential) -> f64 {
        let node = w.net.node(n);
        if node.is_input() {
            return 0.0;
        }

        let mut r = self.stored(n, None);
        if r.tau_done != Some(dom) {
            r = self.tau(w, n, None, dom);
            r.tau_a = r.r_dom * r.ca;
            r.tau_d = r.r_dom * r.cd;
            self.nodes.insert(n, r.clone());
        }

        let mut taup = r.tau_a * node.ncap;
        for &t in &node.terms {
            let tr = w.net.trans(t);
            if skipped(tr, t, via) {
                continue;
            }
            let other = tr.other_terminal(n);
            let key = (t, other);
            let done = self.branches.get(&key).map_or(false, |b| b.taup_done == Some(dom));
            if !done {
                let far = self.tau_p(w, other, Some(t), dom);
                if let Some(b) = self.branches.get_mut(&key) {
                    b.tau_p *= far;
                    b.taup_done = Some(dom);
                }
            }
            taup += self.branches.get(&key).map_or(0.0, |b| b.tau_p);
        }
        taup
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    fn schedule_driven(&mut self, w: &Walk) -> Vec<Action> {
        let mut plan = Vec::new();
        for dom in Potential::ALL {
            let members = self.dominant[dom.index()].nodes.clone();
            for &nd in &members {
                let node = w.net.node(nd);
                let mut r = self.tau(w, nd, None, dom);
                r.tau_a = r.r_dom * r.ca;
                r.tau_d = r.r_dom * r.cd;
                self.nodes.insert(nd, r.clone());

                if r.flags.contains(ThevFlags::SPIKE) {
                    continue;
                }
                if node.pot == r.settled {
                    plan.push(Action::PuntAll(nd));
                    continue;
                }

                let (tau, delay) = if w.unit_delay_ps > 0.0 {
                    (0.0, w.unit_delay_ps)
                } else if r.flags.contains(ThevFlags::UDELAY) {
                    let d = match r.settled {
                        Potential::Low => r.tphl,
                        Potential::High => r.tplh,
                        Potential::X => r.tphl.min(r.tplh),
                    };
                    let tau = d as f64 * w.ps_per_delta;
                    (tau, tau)
                } else {
                    let tau = if r.settled == Potential::X {
                        w.x_charge_tau(&r)
                    } else if r.flags.contains(ThevFlags::DEFINITE) {
                        r.r_max * r.ca
                    } else {
                        r.r_dom * r.ca
                    };
                    let delay = if r.flags.contains(ThevFlags::INT) && r.tin > 0.5 {
                        let tin_ps = (r.tin as u64) as f64 * w.ps_per_delta;
                        (tau * tau + tin_ps * r.ca).sqrt()
                    } else {
                        tau
                    };
                    (tau, delay)
                };
                plan.push(Action::Final { node: nd, value: r.settled, tau, delay });
            }

            if self.dominant[dom.index()].spike {
                for &nd in &members {
                    if !self.nodes.get(&nd).map_or(false, |r| r.flags.contains(ThevFlags::SPIKE)) {
                        continue;
                    }
                    let tau_p = self.tau_p(w, nd, None, dom);
                    let Some(r) = self.nodes.get_mut(&nd) else {
                        continue;
                    };
                    r.tau_p = spike_tau(tau_p, r.r_dom, r.tau_a);
                    let r = r.clone();
                    plan.push(Action::Spike { node: nd, spike: compute_spike(w, nd, &r, dom) });
                }
            }
        }
        plan
    }

    /// Undriven stage: every node shares charge with the reference node.
    fn schedule_charge_sharing(&mut self, w: &Walk, seed: NodeId) -> Vec<Action> {
        let dom = match self.nodes.get_mut(&seed) {
            Some(r) => {
                r.flags.insert(ThevFlags::REFNODE);
                r.settled
            }
            None => return Vec::new(),
        };

        let mut taup = 0.0;
        for &nd in &w.stage.nodes {
            let mut r = self.tau(w, nd, None, dom);
            r.tau_d = r.r_dom * r.ca;
            r.tau_a = match dom {
                Potential::Low => r.r_dom * (r.ca - r.cd * r.v.max),
                Potential::High => r.r_dom * (r.cd * (1.0 - r.v.min) - r.ca),
                // final voltage taken as one half
                Potential::X => r.r_dom * (r.ca - r.cd * 0.5),
            };
            taup += r.tau_a * w.net.node(nd).ncap;
            self.nodes.insert(nd, r);
        }
        if let Some(r) = self.nodes.get(&seed) {
            taup /= r.c_low.min + r.c_high.max;
        }

        let mut plan = Vec::with_capacity(w.stage.nodes.len());
        for &nd in &w.stage.nodes {
            let Some(r) = self.nodes.get(&nd) else {
                continue;
            };
            let (mut tau, mut delay) = (0.0, 0.0);
            if r.settled != w.net.node(nd).pot {
                tau = match r.settled {
                    Potential::Low => (r.tau_a - taup) / (1.0 - r.v.max),
                    Potential::High => (taup - r.tau_a) / r.v.min,
                    Potential::X => (r.tau_a - taup) * 2.0,
                };
                tau = tau.max(0.0);
                if w.unit_delay_ps > 0.0 {
                    delay = w.unit_delay_ps;
                    tau = 0.0;
                } else {
                    delay = tau;
                }
            }
            plan.push(Action::Final { node: nd, value: r.settled, tau, delay });
        }
        plan
    }
}

/// Size and timing of a charge-sharing spike on a node that keeps its value.
/// `None` when the spike stays inside the node's thresholds.
fn compute_spike(w: &Walk, nd: NodeId, r: &Thev, dom: Potential) -> Option<Spike> {
    if r.tau_p <= SMALL {
        return None;
    }
    let node = w.net.node(nd);

    let (mut nmos, mut pmos) = (0.0, 0.0);
    for &t in &node.terms {
        let tr = w.net.trans(t);
        if tr.state == TransistorState::Off || tr.walk.contains(WalkFlags::BROKEN) {
            continue;
        }
        let g = 1.0 / tr.r.dynamic(dom);
        if tr.kind == TransistorKind::PChannel {
            pmos += g;
        } else {
            nmos += g;
        }
    }
    let shape = SpikeShape::classify(nmos, pmos, dom, NP_RATIO);

    let alpha = spike::step(r.tau_a / (r.tau_a + r.tau_p - r.tau_d));
    let beta = spike::step((r.tau_d - r.tau_a) / r.tau_d);
    let (peak, ch) = spike::lookup(shape, beta, alpha);

    let charge = match dom {
        Potential::Low => {
            if peak <= node.vlow {
                return None;
            }
            if peak >= node.vhigh {
                Potential::High
            } else {
                Potential::X
            }
        }
        Potential::High => {
            if peak <= 1.0 - node.vhigh {
                return None;
            }
            if peak >= 1.0 - node.vlow {
                Potential::Low
            } else {
                Potential::X
            }
        }
        Potential::X => return None,
    };

    let dr_delay = if r.r_max < LARGE { r.r_max * r.ca } else { r.r_dom * r.ca };
    Some(Spike { charge, ch_delay: ch * r.tau_a * r.tau_d / r.tau_p, dr_delay })
}

/// Replace the node's pending events with a spike to `charge` followed by a
/// return to its present value. Spikes shorter than one delta are dropped.
fn queue_spike(eng: &mut Engine, node: NodeId, spike: Option<Spike>) {
    eng.punt_all(node);
    let Some(spk) = spike else {
        return;
    };
    let ch = eng.ps_to_delta(spk.ch_delay).max(1);
    let dr = eng.ps_to_delta(spk.dr_delay).max(1);
    if dr <= ch {
        return;
    }
    let pot = eng.net.node(node).pot;
    eng.enqueue(node, spk.charge, ch, ch, EventKind::Reval);
    eng.enqueue(node, pot, dr, ch, EventKind::Reval);
}

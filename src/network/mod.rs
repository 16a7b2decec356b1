//! Node/transistor network.
//!
//! Nodes and transistors live in flat arenas addressed by [`NodeId`] and
//! [`TransId`]. Each node keeps the transistors it gates and the transistors
//! whose source or drain it is; power rails keep no terminal list, so stage
//! walks stop at them.

pub mod load;
pub mod merge;
pub mod stage;

use std::collections::HashMap;
use std::fmt;

use crate::config::SimConfig;

/// Capacitance of a freshly created node, pF.
pub const MIN_CAP: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransId(pub u32);

impl TransId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Logic value of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Potential {
    Low = 0,
    #[default]
    X = 1,
    High = 2,
}

impl Potential {
    pub const ALL: [Potential; 3] = [Potential::Low, Potential::X, Potential::High];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_char(self) -> char {
        match self {
            Potential::Low => '0',
            Potential::X => 'X',
            Potential::High => '1',
        }
    }

    pub fn from_char(c: char) -> Option<Potential> {
        match c {
            '0' | 'l' | 'L' => Some(Potential::Low),
            '1' | 'h' | 'H' => Some(Potential::High),
            'x' | 'X' | 'u' | 'U' => Some(Potential::X),
            _ => None,
        }
    }
}

impl fmt::Display for Potential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransistorKind {
    NChannel,
    PChannel,
    Depletion,
    Resistor,
}

impl TransistorKind {
    pub const ALL: [TransistorKind; 4] = [
        TransistorKind::NChannel,
        TransistorKind::PChannel,
        TransistorKind::Depletion,
        TransistorKind::Resistor,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Depletion devices and resistors conduct regardless of their gate.
    pub fn is_always_on(self) -> bool {
        matches!(self, TransistorKind::Depletion | TransistorKind::Resistor)
    }

    pub fn name(self) -> &'static str {
        match self {
            TransistorKind::NChannel => "n-channel",
            TransistorKind::PChannel => "p-channel",
            TransistorKind::Depletion => "depletion",
            TransistorKind::Resistor => "resistor",
        }
    }

    /// Conduction state implied by the gate value.
    pub fn state_for(self, gate: Potential) -> TransistorState {
        match (self, gate) {
            (TransistorKind::Depletion | TransistorKind::Resistor, _) => TransistorState::Weak,
            (_, Potential::X) => TransistorState::Unknown,
            (TransistorKind::NChannel, Potential::High) | (TransistorKind::PChannel, Potential::Low) => {
                TransistorState::On
            }
            _ => TransistorState::Off,
        }
    }
}

/// Conduction state. The discriminants index the lattice transmit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransistorState {
    Off = 0,
    On = 1,
    Unknown = 2,
    Weak = 3,
}

impl TransistorState {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Node flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u16);

impl NodeFlags {
    pub const POWER_RAIL: NodeFlags = NodeFlags(1 << 0);
    pub const ALIAS: NodeFlags = NodeFlags(1 << 1);
    pub const USERDELAY: NodeFlags = NodeFlags(1 << 2);
    pub const INPUT: NodeFlags = NodeFlags(1 << 3);
    pub const WATCHED: NodeFlags = NodeFlags(1 << 4);
    /// Needs evaluation in the current batch.
    pub const VISITED: NodeFlags = NodeFlags(1 << 5);

    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: NodeFlags, on: bool) {
        if on {
            self.insert(other)
        } else {
            self.remove(other)
        }
    }

    /// Names of the set bits, for node reports.
    pub fn names(self) -> Vec<&'static str> {
        let table = [
            (NodeFlags::POWER_RAIL, "power-rail"),
            (NodeFlags::ALIAS, "alias"),
            (NodeFlags::USERDELAY, "user-delay"),
            (NodeFlags::INPUT, "input"),
            (NodeFlags::WATCHED, "watched"),
        ];
        table.iter().filter(|(f, _)| self.contains(*f)).map(|(_, n)| *n).collect()
    }
}

/// Per-walk transistor marks, cleared when the stage is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkFlags(u8);

impl WalkFlags {
    pub const CROSSED: WalkFlags = WalkFlags(1 << 0);
    pub const BROKEN: WalkFlags = WalkFlags(1 << 1);
    pub const PBROKEN: WalkFlags = WalkFlags(1 << 2);
    pub const PARALLEL: WalkFlags = WalkFlags(1 << 3);

    pub fn contains(self, other: WalkFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: WalkFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: WalkFlags) {
        self.0 &= !other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

// ---------------------------------------------------------------------------
// Nodes and transistors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub pot: Potential,
    /// Total capacitance, pF.
    pub ncap: f64,
    pub vlow: f64,
    pub vhigh: f64,
    /// User delays in deltas (valid with `USERDELAY`).
    pub tplh: u64,
    pub tphl: u64,
    pub flags: NodeFlags,
    /// Time of the last transition.
    pub time: u64,
    /// Node whose change produced the last transition.
    pub cause: Option<NodeId>,
    /// Alias target (set with `ALIAS`).
    pub link: Option<NodeId>,
    pub gates: Vec<TransId>,
    pub terms: Vec<TransId>,
    pub(crate) in_stage: bool,
    pub(crate) reached_via: Option<TransId>,
}

impl Node {
    fn new(name: &str, config: &SimConfig) -> Self {
        Self {
            name: name.to_string(),
            pot: Potential::X,
            ncap: MIN_CAP,
            vlow: config.low_thresh,
            vhigh: config.high_thresh,
            tplh: 0,
            tphl: 0,
            flags: NodeFlags::default(),
            time: 0,
            cause: None,
            link: None,
            gates: Vec::new(),
            terms: Vec::new(),
            in_stage: false,
            reached_via: None,
        }
    }

    pub fn is_rail(&self) -> bool {
        self.flags.contains(NodeFlags::POWER_RAIL)
    }

    pub fn is_input(&self) -> bool {
        self.flags.contains(NodeFlags::INPUT)
    }
}

/// Equivalent resistances of one (possibly compound) device, ohms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resistance {
    pub r_static: f64,
    pub dyn_low: f64,
    pub dyn_high: f64,
    /// Centimicrons.
    pub width: i64,
    pub length: i64,
}

impl Resistance {
    /// Dynamic resistance when pulling toward `target`.
    pub fn dynamic(&self, target: Potential) -> f64 {
        match target {
            Potential::Low => self.dyn_low,
            _ => self.dyn_high,
        }
    }
}

/// How a transistor takes part in parallel collapsing.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeRole {
    Single,
    /// Stands in for `members` in the adjacency lists.
    Compound { members: Vec<TransId> },
    /// Folded into `compound`; no longer in any adjacency list.
    Member { compound: TransId },
}

#[derive(Debug, Clone)]
pub struct Transistor {
    pub kind: TransistorKind,
    pub gate: NodeId,
    pub source: NodeId,
    pub drain: NodeId,
    pub r: Resistance,
    pub state: TransistorState,
    pub position: Option<(i32, i32)>,
    pub walk: WalkFlags,
    /// Slot in the stage's parallel table (valid with `PARALLEL`).
    pub par_slot: Option<usize>,
    pub role: MergeRole,
    /// Source and drain coincide, or both are rails: a pure capacitor.
    pub shorted: bool,
}

impl Transistor {
    pub fn other_terminal(&self, n: NodeId) -> NodeId {
        if self.source == n {
            self.drain
        } else {
            self.source
        }
    }

    pub fn same_terminals(&self, other: &Transistor) -> bool {
        (self.source == other.source && self.drain == other.drain)
            || (self.source == other.drain && self.drain == other.source)
    }

    /// Same gate, same kind and the same unordered terminal pair.
    pub fn parallel_to(&self, other: &Transistor) -> bool {
        self.gate == other.gate && self.kind == other.kind && self.same_terminals(other)
    }
}

/// Summary counters reported after load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkCounts {
    pub nodes: usize,
    pub aliases: usize,
    pub transistors: [usize; 4],
    pub ored: [usize; 4],
    pub shorted: usize,
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<Node>,
    trans: Vec<Transistor>,
    names: HashMap<String, NodeId>,
    power: NodeId,
    ground: NodeId,
    shorted: Vec<TransId>,
    unconnected: Vec<TransId>,
    pub counts: NetworkCounts,
    warned_vdd: bool,
    warned_gnd: bool,
}

impl Network {
    /// An empty network holding only the two rails.
    pub fn new(config: &SimConfig) -> Self {
        let mut net = Self {
            nodes: Vec::new(),
            trans: Vec::new(),
            names: HashMap::new(),
            power: NodeId(0),
            ground: NodeId(0),
            shorted: Vec::new(),
            unconnected: Vec::new(),
            counts: NetworkCounts::default(),
            warned_vdd: false,
            warned_gnd: false,
        };
        net.power = net.get_or_create("Vdd", config);
        net.ground = net.get_or_create("Gnd", config);
        for (id, pot) in [(net.power, Potential::High), (net.ground, Potential::Low)] {
            let n = net.node_mut(id);
            n.pot = pot;
            n.flags.insert(NodeFlags::POWER_RAIL);
            n.flags.insert(NodeFlags::INPUT);
        }
        net
    }

    pub fn power(&self) -> NodeId {
        self.power
    }

    pub fn ground(&self) -> NodeId {
        self.ground
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn trans(&self, id: TransId) -> &Transistor {
        &self.trans[id.index()]
    }

    pub fn trans_mut(&mut self, id: TransId) -> &mut Transistor {
        &mut self.trans[id.index()]
    }

    /// Arena size, aliases included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn transistor_count(&self) -> usize {
        self.trans.len()
    }

    /// Ids of every node that is not an alias, in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.flags.contains(NodeFlags::ALIAS))
            .map(|(i, _)| NodeId(i as u32))
    }

    pub fn trans_ids(&self) -> impl Iterator<Item = TransId> {
        (0..self.trans.len() as u32).map(TransId)
    }

    pub fn shorted(&self) -> &[TransId] {
        &self.shorted
    }

    /// Follow an alias chain to the node that stands for it.
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.node(id).link {
            id = next;
        }
        id
    }

    /// Case-insensitive lookup, aliases resolved.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(&name.to_lowercase()).map(|&id| self.resolve(id))
    }

    /// Look a node up, creating it at X if it does not exist yet.
    pub fn get_or_create(&mut self, name: &str, config: &SimConfig) -> NodeId {
        if let Some(&id) = self.names.get(&name.to_lowercase()) {
            if name != self.node(id).name {
                let quiet = if name.eq_ignore_ascii_case("vdd") {
                    std::mem::replace(&mut self.warned_vdd, true)
                } else if name.eq_ignore_ascii_case("gnd") {
                    std::mem::replace(&mut self.warned_gnd, true)
                } else {
                    false
                };
                if !quiet {
                    tracing::warn!(name, existing = %self.node(id).name, "aliasing nodes");
                }
            }
            return self.resolve(id);
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(name, config));
        self.names.insert(name.to_lowercase(), id);
        self.counts.nodes += 1;
        id
    }

    /// Make `alias` stand for `target`. Rails are always kept as the target.
    pub fn make_alias(&mut self, target: NodeId, alias: NodeId) -> std::result::Result<(), String> {
        let (mut n, mut m) = (self.resolve(target), self.resolve(alias));
        if n == m {
            return Ok(());
        }
        if self.node(m).is_rail() {
            std::mem::swap(&mut n, &mut m);
        }
        if self.node(m).is_rail() {
            return Err("Can't alias the power supplies".to_string());
        }
        let cap = std::mem::replace(&mut self.node_mut(m).ncap, 0.0);
        self.node_mut(n).ncap += cap;
        let am = self.node_mut(m);
        am.link = Some(n);
        am.flags.insert(NodeFlags::ALIAS);
        self.counts.nodes -= 1;
        self.counts.aliases += 1;
        Ok(())
    }

    /// Add an unconnected transistor; [`Network::connect`] wires it in.
    pub fn add_transistor(
        &mut self,
        kind: TransistorKind,
        gate: NodeId,
        source: NodeId,
        drain: NodeId,
        r: Resistance,
        position: Option<(i32, i32)>,
    ) -> TransId {
        let id = TransId(self.trans.len() as u32);
        self.trans.push(Transistor {
            kind,
            gate,
            source,
            drain,
            r,
            state: TransistorState::Unknown,
            position,
            walk: WalkFlags::default(),
            par_slot: None,
            role: MergeRole::Single,
            shorted: false,
        });
        self.unconnected.push(id);
        id
    }

    /// Push a new compound transistor copied from `template`.
    pub(crate) fn push_compound(&mut self, template: TransId, members: Vec<TransId>) -> TransId {
        let id = TransId(self.trans.len() as u32);
        let mut t = self.trans(template).clone();
        t.role = MergeRole::Compound { members };
        self.trans.push(t);
        id
    }

    /// Wire every unconnected transistor into the adjacency lists.
    ///
    /// Returns the non-rail nodes that gained terminals, which is the set the
    /// parallel-collapsing pass has to revisit.
    pub fn connect(&mut self) -> Vec<NodeId> {
        let _span = tracing::info_span!("connect").entered();
        let pending = std::mem::take(&mut self.unconnected);
        let mut touched = Vec::new();
        let mut seen = vec![false; self.nodes.len()];

        for tid in pending {
            let gate = self.resolve(self.trans(tid).gate);
            let source = self.resolve(self.trans(tid).source);
            let drain = self.resolve(self.trans(tid).drain);
            let kind = self.trans(tid).kind;
            {
                let t = self.trans_mut(tid);
                t.gate = gate;
                t.source = source;
                t.drain = drain;
                t.state = if kind.is_always_on() { TransistorState::Weak } else { TransistorState::Unknown };
            }
            self.counts.transistors[kind.index()] += 1;

            if source == drain || (self.node(source).is_rail() && self.node(drain).is_rail()) {
                self.trans_mut(tid).shorted = true;
                self.shorted.push(tid);
                self.counts.shorted += 1;
                continue;
            }

            if !kind.is_always_on() {
                self.node_mut(gate).gates.push(tid);
            }
            for term in [source, drain] {
                if self.node(term).is_rail() {
                    continue;
                }
                self.node_mut(term).terms.push(tid);
                if !seen[term.index()] {
                    seen[term.index()] = true;
                    touched.push(term);
                }
            }
        }

        tracing::debug!(touched = touched.len(), shorted = self.shorted.len(), "connected transistors");
        touched
    }

    /// Refresh the conduction state of every transistor gated by `n`.
    pub fn update_gate_states(&mut self, n: NodeId) {
        let pot = self.node(n).pot;
        for i in 0..self.node(n).gates.len() {
            let tid = self.node(n).gates[i];
            let t = self.trans_mut(tid);
            t.state = t.kind.state_for(pot);
        }
    }

    /// Recompute every transistor state from current gate values.
    pub fn init_states(&mut self) {
        for i in 0..self.trans.len() {
            let gate = self.trans[i].gate;
            let pot = self.nodes[gate.index()].pot;
            let t = &mut self.trans[i];
            t.state = t.kind.state_for(pot);
        }
    }

    /// Every non-alias node name with its id, sorted by name.
    pub fn sorted_names(&self) -> Vec<(String, NodeId)> {
        let mut v: Vec<(String, NodeId)> = self.node_ids().map(|id| (self.node(id).name.clone(), id)).collect();
        v.sort();
        v
    }
}

/// Parallel combination of two resistances, zero-safe.
pub fn combine(r1: f64, r2: f64) -> f64 {
    if r1 + r2 <= 0.0 {
        0.0
    } else {
        r1 * r2 / (r1 + r2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn res() -> Resistance {
        Resistance { r_static: 1000.0, dyn_low: 1000.0, dyn_high: 1000.0, width: 200, length: 200 }
    }

    #[test]
    fn rails_exist_and_are_inputs() {
        let net = Network::new(&SimConfig::default());
        let vdd = net.find("VDD").unwrap();
        assert_eq!(vdd, net.power());
        assert_eq!(net.node(vdd).pot, Potential::High);
        assert!(net.node(net.ground()).is_input());
        assert_eq!(net.counts.nodes, 2);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cfg = SimConfig::default();
        let mut net = Network::new(&cfg);
        let a = net.get_or_create("Out", &cfg);
        assert_eq!(net.get_or_create("out", &cfg), a);
        assert_eq!(net.node(a).ncap, MIN_CAP);
        assert_eq!(net.node(a).pot, Potential::X);
    }

    #[test]
    fn alias_moves_capacitance_and_keeps_rails() {
        let cfg = SimConfig::default();
        let mut net = Network::new(&cfg);
        let a = net.get_or_create("a", &cfg);
        net.node_mut(a).ncap = 0.5;
        net.make_alias(a, net.power()).unwrap();
        assert_eq!(net.find("a"), Some(net.power()));
        assert_abs_diff_eq!(net.node(net.power()).ncap, MIN_CAP + 0.5);
        assert_eq!(net.node(a).ncap, 0.0);
        assert!(net.make_alias(net.ground(), net.power()).is_err());
        assert_eq!(net.counts.aliases, 1);
    }

    #[test]
    fn connect_skips_rail_terminals_and_shorts() {
        let cfg = SimConfig::default();
        let mut net = Network::new(&cfg);
        let g = net.get_or_create("g", &cfg);
        let out = net.get_or_create("out", &cfg);
        let (vdd, gnd) = (net.power(), net.ground());
        let t = net.add_transistor(TransistorKind::NChannel, g, out, gnd, res(), None);
        let s = net.add_transistor(TransistorKind::PChannel, g, vdd, gnd, res(), None);
        let touched = net.connect();
        assert_eq!(touched, vec![out]);
        assert_eq!(net.node(out).terms, vec![t]);
        assert!(net.node(gnd).terms.is_empty());
        assert_eq!(net.node(g).gates, vec![t]);
        assert_eq!(net.shorted(), &[s]);
        assert_eq!(net.trans(t).state, TransistorState::Unknown);
    }

    #[test]
    fn gate_state_table() {
        use TransistorKind::*;
        use TransistorState::*;
        assert_eq!(NChannel.state_for(Potential::High), On);
        assert_eq!(NChannel.state_for(Potential::Low), Off);
        assert_eq!(PChannel.state_for(Potential::Low), On);
        assert_eq!(PChannel.state_for(Potential::X), Unknown);
        assert_eq!(Depletion.state_for(Potential::Low), Weak);
        assert_eq!(Resistor.state_for(Potential::High), Weak);
    }

    #[test]
    fn combine_is_parallel_resistance() {
        assert_abs_diff_eq!(combine(1000.0, 1000.0), 500.0);
        assert_eq!(combine(0.0, 0.0), 0.0);
    }
}

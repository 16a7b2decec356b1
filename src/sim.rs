//! The simulator context.
//!
//! [`Simulator`] owns the engine (network, event wheel, histories), the
//! active delay model and the user-facing state: pending input changes,
//! named vectors, clock sequences and the watch list. Times at this level
//! are nanoseconds; everything below works in deltas.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::config::{ModelKind, SimConfig};
use crate::engine::{Engine, ModelOptions};
use crate::error::{Diagnostic, Diagnostics, Result, SwitchyardError};
use crate::model::DelayModel;
use crate::network::{Network, NodeFlags, NodeId, Potential, TransistorState};
use crate::parser;
use crate::sched::{Event, EventKind};
use crate::stats::Stats;

/// Level an input is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLevel {
    High,
    Low,
    /// Driven to X.
    Undefined,
    /// No longer driven.
    Undriven,
}

impl InputLevel {
    /// `h`/`1`, `l`/`0`, `u` and `x`.
    pub fn from_char(c: char) -> Option<InputLevel> {
        match c {
            'h' | 'H' | '1' => Some(InputLevel::High),
            'l' | 'L' | '0' => Some(InputLevel::Low),
            'u' | 'U' => Some(InputLevel::Undefined),
            'x' | 'X' => Some(InputLevel::Undriven),
            _ => None,
        }
    }

    fn potential(self) -> Option<Potential> {
        match self {
            InputLevel::High => Some(Potential::High),
            InputLevel::Low => Some(Potential::Low),
            InputLevel::Undefined => Some(Potential::X),
            InputLevel::Undriven => None,
        }
    }
}

/// Snapshot of one node for reports.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub value: Potential,
    pub flags: Vec<&'static str>,
    pub vlow: f64,
    pub vhigh: f64,
    /// pF.
    pub capacitance: f64,
    /// (tplh, tphl) in ns when the node has a user delay.
    pub user_delay: Option<(f64, f64)>,
    /// Time of the last transition, ns.
    pub last_change: f64,
    /// Node whose transition set off the last change, if known.
    pub cause: Option<String>,
    /// Pending events as (ns, value), earliest first.
    pub pending: Vec<(f64, Potential)>,
}

#[derive(Debug, Clone)]
struct ClockSequence {
    name: String,
    nodes: Vec<NodeId>,
    phases: Vec<Vec<InputLevel>>,
}

pub struct Simulator {
    eng: Engine,
    model: DelayModel,
    config: SimConfig,
    diagnostics: Vec<Diagnostic>,
    /// Input changes applied at the start of the next step, in request order.
    inputs: Vec<(NodeId, InputLevel)>,
    vectors: BTreeMap<String, Vec<NodeId>>,
    clocks: Vec<ClockSequence>,
    phase: usize,
    /// Deltas.
    step_size: u64,
    /// Earliest time `back` may return to, deltas.
    time0: u64,
    watched: Vec<NodeId>,
}

impl Simulator {
    /// Build a simulator from `.sim` text. `name` labels diagnostics.
    pub fn load(name: &str, text: &str, config: SimConfig) -> Result<Self> {
        let mut stats = Stats::new();

        let start = Instant::now();
        let mut diags = Diagnostics::new(name, config.max_errors);
        let file = parser::parse(text, &mut diags)?;
        let mut net = Network::new(&config);
        net.load(&file, &config, &mut diags)?;
        stats.add_phase("load", start.elapsed());

        let start = Instant::now();
        let touched = net.connect();
        let merged = net.collapse_parallel(&touched);
        stats.add_phase("connect", start.elapsed());
        tracing::info!(
            nodes = net.counts.nodes,
            transistors = net.transistor_count(),
            ored = merged,
            shorted = net.counts.shorted,
            "network connected"
        );

        let mut eng = Engine::new(net, ModelOptions::from_config(&config));
        eng.stats = stats;
        Ok(Self {
            eng,
            model: DelayModel::new(config.model),
            step_size: config.timescale.ns_to_delta(config.step_size),
            config,
            diagnostics: diags.into_entries(),
            inputs: Vec::new(),
            vectors: BTreeMap::new(),
            clocks: Vec::new(),
            phase: 0,
            time0: 0,
            watched: Vec::new(),
        })
    }

    /// Read and load a `.sim` file.
    pub fn open(path: impl AsRef<Path>, config: SimConfig) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::load(&path.display().to_string(), &text, config)
    }

    pub fn network(&self) -> &Network {
        &self.eng.net
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.eng.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.eng.stats
    }

    /// Record errors reported while loading.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Current time, ns.
    pub fn now(&self) -> f64 {
        self.config.timescale.delta_to_ns(self.eng.now())
    }

    pub fn model(&self) -> ModelKind {
        self.model.kind()
    }

    fn ns_to_delta(&self, ns: f64) -> u64 {
        self.config.timescale.ns_to_delta(ns)
    }

    fn delta_to_ns(&self, d: u64) -> f64 {
        self.config.timescale.delta_to_ns(d)
    }

    fn node_id(&self, name: &str) -> Result<NodeId> {
        self.eng
            .net
            .find(name)
            .ok_or_else(|| SwitchyardError::Command(format!("unknown node '{}'", name)))
    }

    /// A node or a vector, as a list of nodes.
    fn targets(&self, name: &str) -> Result<Vec<NodeId>> {
        if let Some(nodes) = self.vectors.get(name) {
            return Ok(nodes.clone());
        }
        Ok(vec![self.node_id(name)?])
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Request an input change, applied at the start of the next step.
    pub fn set_input(&mut self, name: &str, level: InputLevel) -> Result<()> {
        let n = self.node_id(name)?;
        self.set_input_node(n, level)
    }

    fn set_input_node(&mut self, n: NodeId, level: InputLevel) -> Result<()> {
        let node = self.eng.net.node(n);
        if node.is_rail() {
            if level.potential() == Some(node.pot) {
                return Ok(());
            }
            return Err(SwitchyardError::Command(format!("Can't drive '{}' to {:?}", node.name, level)));
        }

        let queued = self.inputs.iter().position(|&(m, _)| m == n);
        if let Some(i) = queued {
            if self.inputs[i].1 == level {
                return Ok(());
            }
            self.inputs.remove(i);
        }

        let node = self.eng.net.node(n);
        let wanted = match level.potential() {
            Some(pot) => !(node.is_input() && node.pot == pot),
            None => node.is_input(),
        };
        if wanted {
            self.inputs.push((n, level));
        }
        Ok(())
    }

    /// Inputs waiting for the next step.
    pub fn pending_inputs(&self) -> Vec<(String, InputLevel)> {
        self.inputs.iter().map(|&(n, l)| (self.eng.net.node(n).name.clone(), l)).collect()
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Apply pending inputs, then process every event before `stop`
    /// (deltas) and leave the clock at `stop`. Returns whether any event
    /// was delivered.
    fn step(&mut self, stop: u64) -> Result<bool> {
        let now = self.eng.now();
        let mut to_eval: Vec<(NodeId, Option<NodeId>)> = Vec::new();
        let inputs = std::mem::take(&mut self.inputs);

        for &(n, _) in inputs.iter().filter(|(_, l)| *l == InputLevel::Undriven) {
            let node = self.eng.net.node_mut(n);
            node.flags.remove(NodeFlags::INPUT);
            let pot = node.pot;
            self.eng.hist.record(n, pot, false, now, 0, 0);
            self.mark(n, None, &mut to_eval);
        }
        for &(n, level) in &inputs {
            let Some(pot) = level.potential() else {
                continue;
            };
            let was_input = self.eng.net.node(n).is_input();
            self.eng.punt_all(n);
            let node = self.eng.net.node_mut(n);
            node.flags.insert(NodeFlags::INPUT);
            if node.pot != pot || !was_input {
                node.pot = pot;
                node.time = now;
                node.cause = None;
                self.eng.hist.record(n, pot, true, now, 0, 0);
            }
            self.eng.sched.enqueue_input(n, pot);
        }
        self.evaluate(&mut to_eval);

        let mut delivered = false;
        while let Some(batch) = self.eng.sched.next_batch(stop)? {
            delivered = true;
            self.eng.stats.batches += 1;
            tracing::trace!(time = self.eng.now(), events = batch.len(), "event batch");
            for ev in &batch {
                self.deliver(ev, &mut to_eval);
            }
            self.evaluate(&mut to_eval);
        }

        self.eng.cause = None;
        self.eng.sched.set_now(stop);
        Ok(delivered)
    }

    /// Commit one event and mark the nodes it disturbs.
    fn deliver(&mut self, ev: &Event, to_eval: &mut Vec<(NodeId, Option<NodeId>)>) {
        self.eng.stats.events += 1;
        let now = self.eng.now();
        let n = ev.node;
        let node = self.eng.net.node(n);
        if ev.kind == EventKind::Decay && (node.is_input() || node.pot == Potential::X) {
            return;
        }

        let changed = node.pot != ev.value;
        if changed {
            let node = self.eng.net.node_mut(n);
            node.pot = ev.value;
            node.time = now;
            node.cause = ev.cause;
            if node.flags.contains(NodeFlags::WATCHED) {
                tracing::debug!(node = %node.name, value = %ev.value, time = now, "transition");
            }
            self.eng.hist.record(n, ev.value, false, now, ev.delay, ev.rtime);
            self.eng.stats.edges += 1;
        }
        if !changed && ev.kind != EventKind::Input {
            return;
        }

        self.eng.net.update_gate_states(n);
        for i in 0..self.eng.net.node(n).gates.len() {
            let t = self.eng.net.trans(self.eng.net.node(n).gates[i]);
            let (s, d) = (t.source, t.drain);
            self.mark(s, Some(n), to_eval);
            self.mark(d, Some(n), to_eval);
        }
        if ev.kind == EventKind::Input {
            for i in 0..self.eng.net.node(n).terms.len() {
                let t = self.eng.net.trans(self.eng.net.node(n).terms[i]);
                if t.state == TransistorState::Off {
                    continue;
                }
                let other = t.other_terminal(n);
                self.mark(other, Some(n), to_eval);
            }
        }
    }

    fn mark(&mut self, n: NodeId, cause: Option<NodeId>, to_eval: &mut Vec<(NodeId, Option<NodeId>)>) {
        let node = self.eng.net.node_mut(n);
        if node.is_input() || node.flags.contains(NodeFlags::VISITED) {
            return;
        }
        node.flags.insert(NodeFlags::VISITED);
        to_eval.push((n, cause));
    }

    /// Evaluate every marked node that no earlier stage already covered.
    fn evaluate(&mut self, to_eval: &mut Vec<(NodeId, Option<NodeId>)>) {
        for (n, cause) in to_eval.drain(..) {
            if !self.eng.net.node(n).flags.contains(NodeFlags::VISITED) {
                continue;
            }
            self.eng.cause = cause;
            self.model.evaluate(&mut self.eng, n);
        }
    }

    /// Run until `stop_ns`. Returns whether any event was delivered.
    pub fn relax(&mut self, stop_ns: f64) -> Result<bool> {
        let stop = self.ns_to_delta(stop_ns);
        if stop <= self.eng.now() {
            return Err(SwitchyardError::Command(format!("{} ns is not after the current time", stop_ns)));
        }
        self.relax_to(stop)
    }

    fn relax_to(&mut self, stop: u64) -> Result<bool> {
        let _span = tracing::info_span!("relax", stop).entered();
        let start = Instant::now();
        let result = self.step(stop);
        self.eng.stats.add_phase("simulate", start.elapsed());
        result
    }

    /// Run for `ns`, or the default step size.
    pub fn step_ns(&mut self, ns: Option<f64>) -> Result<()> {
        let d = match ns {
            Some(ns) => self.ns_to_delta(ns),
            None => self.step_size,
        };
        if d == 0 {
            return Ok(());
        }
        self.relax_to(self.eng.now() + d)?;
        Ok(())
    }

    pub fn set_step_size(&mut self, ns: f64) -> Result<()> {
        let d = self.ns_to_delta(ns);
        if d == 0 {
            return Err(SwitchyardError::Command(format!("bad step size {}", ns)));
        }
        self.step_size = d;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Vectors and clocks
    // -----------------------------------------------------------------------

    pub fn define_vector(&mut self, name: &str, nodes: &[&str]) -> Result<()> {
        if self.eng.net.find(name).is_some() {
            return Err(SwitchyardError::Command(format!("'{}' is already a node name", name)));
        }
        let ids = nodes.iter().map(|n| self.node_id(n)).collect::<Result<Vec<_>>>()?;
        self.vectors.insert(name.to_string(), ids);
        Ok(())
    }

    fn levels(bits: &str, width: usize, name: &str) -> Result<Vec<InputLevel>> {
        if bits.chars().count() != width {
            return Err(SwitchyardError::Command(format!(
                "value \"{}\" is not compatible with size of {} ({})",
                bits, name, width
            )));
        }
        bits.chars()
            .map(|c| InputLevel::from_char(c).ok_or_else(|| SwitchyardError::Command(format!("bad value '{}'", c))))
            .collect()
    }

    /// Set every bit of a vector; bits are `0 1 u x` (or `l h`).
    pub fn set_vector(&mut self, name: &str, bits: &str) -> Result<()> {
        let nodes = self
            .vectors
            .get(name)
            .cloned()
            .ok_or_else(|| SwitchyardError::Command(format!("unknown vector '{}'", name)))?;
        let levels = Self::levels(bits, nodes.len(), name)?;
        for (n, level) in nodes.into_iter().zip(levels) {
            self.set_input_node(n, level)?;
        }
        Ok(())
    }

    /// Give a node or vector a clock sequence. An empty sequence removes it.
    pub fn define_clock(&mut self, name: &str, sequence: &[&str]) -> Result<()> {
        let nodes = self.targets(name)?;
        self.clocks.retain(|c| c.name != name);
        if sequence.is_empty() {
            return Ok(());
        }
        let phases = sequence.iter().map(|s| Self::levels(s, nodes.len(), name)).collect::<Result<Vec<_>>>()?;
        self.clocks.push(ClockSequence { name: name.to_string(), nodes, phases });
        Ok(())
    }

    /// Run `n` clock cycles: every phase of every sequence, one step each.
    pub fn clock_cycles(&mut self, n: usize) -> Result<()> {
        let longest = self.clocks.iter().map(|c| c.phases.len()).max().unwrap_or(0);
        if longest == 0 {
            return Err(SwitchyardError::Command("no clock nodes defined".to_string()));
        }
        for _ in 0..n.max(1) {
            for _ in 0..longest {
                let phase = self.phase;
                self.phase += 1;
                let mut settings = Vec::new();
                for c in &self.clocks {
                    let levels = &c.phases[phase % c.phases.len()];
                    settings.extend(c.nodes.iter().copied().zip(levels.iter().copied()));
                }
                for (node, level) in settings {
                    self.set_input_node(node, level)?;
                }
                self.step_ns(None)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn value(&self, name: &str) -> Result<Potential> {
        Ok(self.eng.net.node(self.node_id(name)?).pot)
    }

    pub fn node_info(&self, name: &str) -> Result<NodeInfo> {
        let n = self.node_id(name)?;
        let node = self.eng.net.node(n);
        let user_delay = node
            .flags
            .contains(NodeFlags::USERDELAY)
            .then(|| (self.delta_to_ns(node.tplh), self.delta_to_ns(node.tphl)));
        let mut pending: Vec<(f64, Potential)> =
            self.eng.sched.node_events(n).map(|(_, e)| (self.delta_to_ns(e.time), e.value)).collect();
        pending.reverse();
        Ok(NodeInfo {
            name: node.name.clone(),
            value: node.pot,
            flags: node.flags.names(),
            vlow: node.vlow,
            vhigh: node.vhigh,
            capacitance: node.ncap,
            user_delay,
            last_change: self.delta_to_ns(node.time),
            cause: node.cause.map(|c| self.eng.net.node(c).name.clone()),
            pending,
        })
    }

    /// Committed transitions of a node as (ns, value).
    pub fn history(&self, name: &str) -> Result<Vec<(f64, Potential)>> {
        let n = self.node_id(name)?;
        Ok(self.eng.hist.transitions(n).into_iter().map(|(t, v)| (self.delta_to_ns(t), v)).collect())
    }

    /// Compare a node or vector against `expected`. Mask characters other
    /// than `0` mark don't-care bits.
    pub fn assert_value(&self, name: &str, mask: Option<&str>, expected: &str) -> Result<()> {
        let nodes = self.targets(name)?;
        let want: Vec<char> = expected.chars().collect();
        if want.len() != nodes.len() {
            return Err(SwitchyardError::Command(format!(
                "value \"{}\" is not compatible with size of {} ({})",
                expected,
                name,
                nodes.len()
            )));
        }
        let mask: Vec<char> = mask.map(|m| m.chars().collect()).unwrap_or_default();

        let mut failed = false;
        let mut want_s = String::new();
        let mut got_s = String::new();
        for (i, &n) in nodes.iter().enumerate() {
            if mask.get(i).map_or(false, |&c| c != '0') {
                want_s.push('-');
                got_s.push('-');
                continue;
            }
            let expect = Potential::from_char(want[i])
                .ok_or_else(|| SwitchyardError::Command(format!("bad value '{}'", want[i])))?;
            let pot = self.eng.net.node(n).pot;
            failed |= pot != expect;
            want_s.push(want[i]);
            got_s.push(pot.as_char());
        }
        if failed {
            return Err(SwitchyardError::Command(format!(
                "Assertion failed on '{}': want ({}) but got ({})",
                name, want_s, got_s
            )));
        }
        Ok(())
    }

    /// Mark nodes for watching; their values are reported and their
    /// transitions logged.
    pub fn watch(&mut self, name: &str) -> Result<()> {
        let n = self.node_id(name)?;
        self.eng.net.node_mut(n).flags.insert(NodeFlags::WATCHED);
        if !self.watched.contains(&n) {
            self.watched.push(n);
        }
        Ok(())
    }

    /// Watched nodes with their present values.
    pub fn watched(&self) -> Vec<(String, Potential)> {
        self.watched
            .iter()
            .map(|&n| {
                let node = self.eng.net.node(n);
                (node.name.clone(), node.pot)
            })
            .collect()
    }

    /// Every node name in sorted order.
    pub fn node_names(&self) -> Vec<String> {
        self.eng.net.sorted_names().into_iter().map(|(name, _)| name).collect()
    }

    // -----------------------------------------------------------------------
    // Time travel
    // -----------------------------------------------------------------------

    /// Return the simulation to `ns`.
    pub fn back(&mut self, ns: f64) -> Result<()> {
        let t = self.ns_to_delta(ns);
        if ns < 0.0 || t < self.time0 || t > self.eng.now() {
            return Err(SwitchyardError::Command(format!("{}: invalid time in back", ns)));
        }

        self.inputs.clear();
        let ids: Vec<NodeId> = self.eng.net.node_ids().collect();
        for &n in &ids {
            let node = self.eng.net.node_mut(n);
            if !node.is_rail() {
                node.flags.remove(NodeFlags::INPUT);
            }
        }
        self.eng.sched.drain();
        self.eng.sched.set_now(t);

        for &n in &ids {
            let restored = self.eng.hist.rollback(n, t);
            let node = self.eng.net.node_mut(n);
            node.pot = restored.value;
            node.time = restored.time;
            // history does not keep causes
            node.cause = None;
            if !node.is_rail() && restored.input {
                node.flags.insert(NodeFlags::INPUT);
            }
            for ev in restored.requeue {
                self.eng.sched.enqueue_at(ev);
            }
        }
        self.eng.net.init_states();
        if t == 0 {
            self.model = DelayModel::new(self.model.kind());
        }
        Ok(())
    }

    /// Discard history up to `ns`, which becomes the earliest time `back`
    /// accepts. Zero does nothing.
    pub fn flush(&mut self, ns: Option<f64>) -> Result<()> {
        let t = match ns {
            Some(ns) => self.ns_to_delta(ns),
            None => self.eng.now(),
        };
        if t == 0 {
            return Ok(());
        }
        if t > self.eng.now() {
            return Err(SwitchyardError::Command(format!("can't flush into the future ({} ns)", self.delta_to_ns(t))));
        }
        self.eng.hist.flush(t);
        self.time0 = t;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------------

    pub fn set_model(&mut self, kind: ModelKind) {
        if self.model.kind() != kind {
            self.model = DelayModel::new(kind);
        }
        self.config.model = kind;
    }

    pub fn set_decay(&mut self, ns: f64) {
        self.config.decay = ns;
        self.eng.opts.decay = self.ns_to_delta(ns);
    }

    pub fn set_unit_delay(&mut self, ns: f64) {
        self.config.unit_delay = ns;
        self.eng.opts.unit_delay = self.ns_to_delta(ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVERTER: &str = "\
| units: 100 tech: scmos
p in out vdd 2 4
n in out gnd 2 2
c out 0.05
";

    fn inverter(model: ModelKind) -> Simulator {
        let config = SimConfig { model, ..SimConfig::default() };
        Simulator::load("inv.sim", INVERTER, config).unwrap()
    }

    // ---- input tests ----

    #[test]
    fn rails_only_accept_their_own_value() {
        let mut sim = inverter(ModelKind::Rc);
        assert!(sim.set_input("vdd", InputLevel::High).is_ok());
        assert!(sim.set_input("gnd", InputLevel::High).is_err());
        assert!(sim.pending_inputs().is_empty());
    }

    #[test]
    fn requests_replace_each_other() {
        let mut sim = inverter(ModelKind::Rc);
        sim.set_input("in", InputLevel::High).unwrap();
        sim.set_input("in", InputLevel::Low).unwrap();
        assert_eq!(sim.pending_inputs(), vec![("in".to_string(), InputLevel::Low)]);
        // undriving a node that is not an input is a no-op
        sim.set_input("in", InputLevel::Undriven).unwrap();
        assert!(sim.pending_inputs().is_empty());
    }

    #[test]
    fn driving_the_same_value_again_is_a_no_op() {
        let mut sim = inverter(ModelKind::Rc);
        sim.set_input("in", InputLevel::High).unwrap();
        sim.step_ns(None).unwrap();
        sim.set_input("in", InputLevel::High).unwrap();
        assert!(sim.pending_inputs().is_empty());
    }

    // ---- step tests ----

    #[test]
    fn inverter_switches_both_ways() {
        for model in [ModelKind::Rc, ModelKind::Switch] {
            let mut sim = inverter(model);
            sim.set_input("in", InputLevel::Low).unwrap();
            sim.step_ns(None).unwrap();
            assert_eq!(sim.value("out").unwrap(), Potential::High, "{}", model);
            sim.set_input("in", InputLevel::High).unwrap();
            sim.step_ns(None).unwrap();
            assert_eq!(sim.value("out").unwrap(), Potential::Low, "{}", model);
            assert_eq!(sim.now(), 20.0);
        }
    }

    #[test]
    fn undriven_input_keeps_its_charge() {
        let mut sim = inverter(ModelKind::Rc);
        sim.set_input("in", InputLevel::High).unwrap();
        sim.step_ns(None).unwrap();
        sim.set_input("in", InputLevel::Undriven).unwrap();
        sim.step_ns(None).unwrap();
        assert_eq!(sim.value("in").unwrap(), Potential::High);
        assert!(!sim.node_info("in").unwrap().flags.contains(&"input"));
    }

    #[test]
    fn relax_rejects_past_times() {
        let mut sim = inverter(ModelKind::Rc);
        sim.step_ns(None).unwrap();
        assert!(sim.relax(5.0).is_err());
    }

    #[test]
    fn relax_reports_whether_anything_happened() {
        let mut sim = inverter(ModelKind::Rc);
        assert!(!sim.relax(5.0).unwrap());
        sim.set_input("in", InputLevel::High).unwrap();
        assert!(sim.relax(15.0).unwrap());
        assert_eq!(sim.now(), 15.0);
    }

    // ---- vector and clock tests ----

    #[test]
    fn clock_cycles_through_phases() {
        let mut sim = inverter(ModelKind::Switch);
        sim.define_clock("in", &["0", "1"]).unwrap();
        sim.clock_cycles(1).unwrap();
        assert_eq!(sim.value("out").unwrap(), Potential::Low);
        assert_eq!(sim.now(), 20.0);
        let outs: Vec<Potential> = sim.history("out").unwrap().into_iter().map(|(_, v)| v).collect();
        assert_eq!(outs, vec![Potential::X, Potential::High, Potential::Low]);
    }

    #[test]
    fn clock_without_sequences_is_an_error() {
        let mut sim = inverter(ModelKind::Rc);
        assert!(sim.clock_cycles(1).is_err());
    }

    #[test]
    fn vector_width_is_checked() {
        let mut sim = inverter(ModelKind::Rc);
        sim.define_vector("bus", &["in", "out"]).unwrap();
        assert!(sim.set_vector("bus", "1").is_err());
        sim.set_vector("bus", "10").unwrap();
        assert_eq!(sim.pending_inputs().len(), 2);
    }

    // ---- assertion tests ----

    #[test]
    fn assert_honours_mask() {
        let mut sim = inverter(ModelKind::Rc);
        sim.define_vector("pair", &["in", "out"]).unwrap();
        sim.set_input("in", InputLevel::High).unwrap();
        sim.step_ns(None).unwrap();
        assert!(sim.assert_value("pair", None, "10").is_ok());
        assert!(sim.assert_value("pair", Some("01"), "11").is_ok());
        let err = sim.assert_value("pair", None, "11").unwrap_err();
        assert!(err.to_string().contains("want (11) but got (10)"));
    }

    // ---- back / flush tests ----

    #[test]
    fn back_restores_earlier_state() {
        let mut sim = inverter(ModelKind::Rc);
        sim.set_input("in", InputLevel::Low).unwrap();
        sim.step_ns(None).unwrap();
        sim.set_input("in", InputLevel::High).unwrap();
        sim.step_ns(None).unwrap();
        sim.back(10.0).unwrap();
        assert_eq!(sim.now(), 10.0);
        assert_eq!(sim.value("out").unwrap(), Potential::High);
        assert_eq!(sim.value("in").unwrap(), Potential::Low);
        assert!(sim.back(15.0).is_err());
    }

    #[test]
    fn flush_moves_the_earliest_back_time() {
        let mut sim = inverter(ModelKind::Rc);
        sim.set_input("in", InputLevel::Low).unwrap();
        sim.step_ns(None).unwrap();
        sim.step_ns(None).unwrap();
        sim.flush(Some(10.0)).unwrap();
        assert!(sim.back(5.0).is_err());
        assert!(sim.back(10.0).is_ok());
    }
}

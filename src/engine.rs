//! Evaluation state shared by the delay models.
//!
//! [`Engine`] bundles the network, the event wheel and the histories with the
//! scheduling primitives both models build on: punting, superseding stale
//! events with a newly computed final value, and stage bookkeeping.

use crate::config::{SimConfig, Timescale, XChargeModel};
use crate::history::History;
use crate::network::stage::{Stage, StageWalk};
use crate::network::{Network, NodeFlags, NodeId, Potential};
use crate::sched::{EventId, EventKind, Scheduler};
use crate::stats::Stats;

/// Model options resolved to simulator units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    pub timescale: Timescale,
    /// Fixed transition delay in deltas, 0 when off.
    pub unit_delay: u64,
    /// Decay time of undriven charge in deltas, 0 when off.
    pub decay: u64,
    pub x_charge: XChargeModel,
    pub max_parallel: usize,
}

impl ModelOptions {
    pub fn from_config(config: &SimConfig) -> Self {
        let ts = config.timescale;
        Self {
            timescale: ts,
            unit_delay: ts.ns_to_delta(config.unit_delay),
            decay: ts.ns_to_delta(config.decay),
            x_charge: config.x_charge,
            max_parallel: config.max_parallel,
        }
    }
}

pub struct Engine {
    pub net: Network,
    pub sched: Scheduler,
    pub hist: History,
    pub stats: Stats,
    pub opts: ModelOptions,
    /// Node whose transition is being propagated; stamped on new events.
    pub cause: Option<NodeId>,
    parallel_warned: bool,
}

impl Engine {
    pub fn new(net: Network, opts: ModelOptions) -> Self {
        let sched = Scheduler::new(net.node_count());
        let hist = History::new(&net);
        Self { net, sched, hist, stats: Stats::new(), opts, cause: None, parallel_warned: false }
    }

    pub fn now(&self) -> u64 {
        self.sched.now()
    }

    pub fn ps_to_delta(&self, ps: f64) -> u64 {
        self.opts.timescale.ps_to_delta(ps)
    }

    pub fn delta_to_ps(&self, d: u64) -> f64 {
        self.opts.timescale.delta_to_ps(d as f64)
    }

    pub fn enqueue(&mut self, node: NodeId, value: Potential, delay: u64, rtime: u64, kind: EventKind) -> EventId {
        self.sched.enqueue(node, value, delay, rtime, kind, self.cause)
    }

    /// Cancel a pending event. Everything but decays is kept in the node's
    /// history as a punted entry.
    pub fn punt(&mut self, id: EventId) {
        let now = self.now();
        let ev = self.sched.remove(id);
        if self.net.node(ev.node).flags.contains(NodeFlags::WATCHED) {
            tracing::debug!(
                node = %self.net.node(ev.node).name,
                value = %ev.value,
                at = ev.time,
                now,
                "punted event"
            );
        }
        if ev.kind != EventKind::Decay {
            self.hist.record_punted(&ev, now);
        }
        self.stats.punted += 1;
        if ev.time.saturating_sub(ev.delay) == now {
            self.stats.cons_punted += 1;
        }
    }

    /// Cancel every pending event of `node`.
    pub fn punt_all(&mut self, node: NodeId) {
        while let Some(id) = self.sched.node_head(node) {
            self.punt(id);
        }
    }

    /// Make `value` the node's final value at absolute time `at`.
    ///
    /// Pending events at or after `at` are punted, except one already taking
    /// the node to `value` at exactly `at`. A new event is queued only when
    /// `value` differs from what the node is otherwise heading to. Returns
    /// whether an event was queued.
    pub fn supersede(&mut self, node: NodeId, value: Potential, at: u64, rtime: u64) -> bool {
        let mut heading = None;
        while let Some(id) = self.sched.node_head(node) {
            let ev = self.sched.event(id);
            if ev.time < at || (ev.time == at && ev.value == value) {
                heading = Some(ev.value);
                break;
            }
            self.punt(id);
        }
        let heading = heading.unwrap_or(self.net.node(node).pot);
        if value == heading {
            return false;
        }
        let delay = at - self.now();
        self.enqueue(node, value, delay, rtime, EventKind::Reval);
        true
    }

    /// [`Engine::supersede`] with delays in picoseconds. A delay that rounds
    /// to zero deltas becomes one delta.
    pub fn queue_final(&mut self, node: NodeId, value: Potential, tau_ps: f64, delay_ps: f64) -> bool {
        let now = self.now();
        let at = (now + self.ps_to_delta(delay_ps)).max(now + 1);
        let rtime = self.ps_to_delta(tau_ps);
        self.supersede(node, value, at, rtime)
    }

    /// Collect the stage around `seed`. Loops are broken and parallel
    /// branches tabled only when `break_loops` is set.
    pub fn build_stage(&mut self, seed: NodeId, break_loops: bool) -> Stage {
        let walk = StageWalk { break_loops, max_parallel: self.opts.max_parallel };
        self.net.build_stage(seed, walk, &mut self.parallel_warned)
    }

    pub fn release_stage(&mut self, stage: &Stage) {
        self.net.release_stage(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (Engine, NodeId) {
        let cfg = SimConfig::default();
        let mut net = Network::new(&cfg);
        let a = net.get_or_create("a", &cfg);
        (Engine::new(net, ModelOptions::from_config(&cfg)), a)
    }

    #[test]
    fn supersede_punts_later_events() {
        let (mut eng, a) = engine();
        eng.enqueue(a, Potential::High, 50, 0, EventKind::Reval);
        eng.enqueue(a, Potential::Low, 80, 0, EventKind::Reval);
        assert!(eng.supersede(a, Potential::High, 20, 0));
        let times: Vec<u64> = eng.sched.node_events(a).map(|(_, e)| e.time).collect();
        assert_eq!(times, vec![20]);
        assert_eq!(eng.stats.punted, 2);
        assert_eq!(eng.hist.entries(a).filter(|e| e.punted).count(), 2);
    }

    #[test]
    fn supersede_keeps_matching_event() {
        let (mut eng, a) = engine();
        eng.enqueue(a, Potential::High, 30, 0, EventKind::Reval);
        assert!(!eng.supersede(a, Potential::High, 30, 0));
        assert_eq!(eng.sched.pending(), 1);
        assert_eq!(eng.stats.punted, 0);
    }

    #[test]
    fn supersede_skips_value_already_reached() {
        let (mut eng, a) = engine();
        assert!(!eng.supersede(a, Potential::X, 10, 0));
        assert_eq!(eng.sched.pending(), 0);
    }

    #[test]
    fn zero_delay_final_value_lands_one_delta_later() {
        let (mut eng, a) = engine();
        eng.sched.set_now(40);
        assert!(eng.queue_final(a, Potential::Low, 0.0, 0.0));
        let (_, ev) = eng.sched.node_events(a).next().unwrap();
        assert_eq!(ev.time, 41);
        assert_eq!(ev.delay, 1);
    }

    #[test]
    fn decay_punts_leave_no_history() {
        let (mut eng, a) = engine();
        eng.enqueue(a, Potential::X, 10, 10, EventKind::Decay);
        eng.punt_all(a);
        assert_eq!(eng.hist.entries(a).count(), 1);
        assert_eq!(eng.stats.punted, 1);
    }
}

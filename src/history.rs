//! Per-node transition history.
//!
//! Each node owns a singly linked chain of entries in a shared arena, starting
//! at a head entry for time 0 and ending at the common sentinel (time
//! [`MAX_TIME`]). A per-node cursor marks the current entry. Punted entries
//! sit out of band right after the cursor and never move it.

use crate::network::{Network, NodeId, Potential};
use crate::sched::{Event, EventKind, MAX_TIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistId(u32);

impl HistId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

const SENTINEL: HistId = HistId(0);

#[derive(Debug, Clone, PartialEq)]
pub struct HistEntry {
    pub time: u64,
    pub value: Potential,
    pub input: bool,
    pub punted: bool,
    /// Delay the transition was scheduled with, deltas.
    pub delay: u64,
    pub rtime: u64,
    /// When the event was punted (valid for punted entries).
    pub punt_time: u64,
    next: HistId,
}

impl HistEntry {
    /// Time at which the transition was scheduled.
    pub fn enqueued_at(&self) -> u64 {
        self.time.saturating_sub(self.delay)
    }
}

/// State a node is restored to by a rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub value: Potential,
    pub time: u64,
    pub input: bool,
    /// Transitions that were pending at the rollback time.
    pub requeue: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistEntry>,
    free: Vec<HistId>,
    heads: Vec<HistId>,
    currs: Vec<HistId>,
}

impl History {
    /// One head entry per node, holding its present value at time 0.
    pub fn new(net: &Network) -> Self {
        let sentinel = HistEntry {
            time: MAX_TIME,
            value: Potential::X,
            input: false,
            punted: false,
            delay: 0,
            rtime: 0,
            punt_time: 0,
            next: SENTINEL,
        };
        let mut hist = Self { entries: vec![sentinel], free: Vec::new(), heads: Vec::new(), currs: Vec::new() };
        for i in 0..net.node_count() {
            let n = net.node(NodeId(i as u32));
            let head = hist.alloc(HistEntry {
                time: 0,
                value: n.pot,
                input: false,
                punted: false,
                delay: 0,
                rtime: 0,
                punt_time: 0,
                next: SENTINEL,
            });
            hist.heads.push(head);
            hist.currs.push(head);
        }
        hist
    }

    fn alloc(&mut self, e: HistEntry) -> HistId {
        match self.free.pop() {
            Some(id) => {
                self.entries[id.index()] = e;
                id
            }
            None => {
                self.entries.push(e);
                HistId(self.entries.len() as u32 - 1)
            }
        }
    }

    fn at(&self, id: HistId) -> &HistEntry {
        &self.entries[id.index()]
    }

    fn next_of(&self, id: HistId) -> HistId {
        self.entries[id.index()].next
    }

    fn set_next(&mut self, id: HistId, next: HistId) {
        self.entries[id.index()].next = next;
    }

    /// Unlink the entry after `prev` and return the one that followed it.
    fn unlink_after(&mut self, prev: HistId) -> HistId {
        let victim = self.next_of(prev);
        let after = self.next_of(victim);
        self.set_next(prev, after);
        self.free.push(victim);
        after
    }

    /// The node's current (last committed) entry.
    pub fn current(&self, n: NodeId) -> &HistEntry {
        self.at(self.currs[n.index()])
    }

    /// Append a committed transition after the current entry, skipping the
    /// punted entries that follow it, and make it current.
    pub fn record(&mut self, n: NodeId, value: Potential, input: bool, time: u64, delay: u64, rtime: u64) {
        let mut prev = self.currs[n.index()];
        while self.at(self.next_of(prev)).punted {
            prev = self.next_of(prev);
        }
        let next = self.next_of(prev);
        let id = self.alloc(HistEntry { time, value, input, punted: false, delay, rtime, punt_time: 0, next });
        self.set_next(prev, id);
        self.currs[n.index()] = id;
    }

    /// Keep a punted event after the current entry, behind earlier punts.
    pub fn record_punted(&mut self, ev: &Event, now: u64) {
        let n = ev.node;
        let mut prev = self.currs[n.index()];
        while self.at(self.next_of(prev)).punted {
            prev = self.next_of(prev);
        }
        let next = self.next_of(prev);
        let id = self.alloc(HistEntry {
            time: ev.time,
            value: ev.value,
            input: false,
            punted: true,
            delay: ev.delay,
            rtime: ev.rtime,
            punt_time: now,
            next,
        });
        self.set_next(prev, id);
    }

    /// Every entry of a node, head first, punted ones included.
    pub fn entries(&self, n: NodeId) -> Entries<'_> {
        Entries { hist: self, cursor: self.heads[n.index()] }
    }

    /// Committed transitions of a node as (time, value).
    pub fn transitions(&self, n: NodeId) -> Vec<(u64, Potential)> {
        self.entries(n).filter(|e| !e.punted).map(|e| (e.time, e.value)).collect()
    }

    /// Fold everything up to `before` into the head entry of every node.
    pub fn flush(&mut self, before: u64) {
        for i in 0..self.heads.len() {
            let head = self.heads[i];
            let mut last = head;
            let mut h = self.next_of(head);
            // punted entries keep their scheduled time, which may lie past
            // committed entries behind them
            while h != SENTINEL {
                let e = self.at(h);
                if !e.punted {
                    if e.time > before {
                        break;
                    }
                    last = h;
                }
                h = self.next_of(h);
            }
            if last == head {
                continue;
            }

            let kept = self.at(last).clone();
            {
                let e = &mut self.entries[head.index()];
                e.time = kept.time;
                e.value = kept.value;
                e.input = kept.input;
                e.delay = kept.delay;
                e.rtime = kept.rtime;
            }
            while self.next_of(head) != last {
                self.unlink_after(head);
            }
            self.unlink_after(head);
            if self.currs[i] == last {
                self.currs[i] = head;
            }
        }
    }

    /// Wind node `n` back to time `t`.
    ///
    /// The entry active at `t` is the last committed one strictly before it.
    /// Later entries that had already been scheduled before `t` come back as
    /// events to requeue; punts made before `t` stay; everything else goes.
    pub fn rollback(&mut self, n: NodeId, t: u64) -> Restored {
        let head = self.heads[n.index()];
        let mut active = head;
        let mut p = self.next_of(head);
        while p != SENTINEL {
            let e = self.at(p);
            if !e.punted {
                if e.time >= t {
                    break;
                }
                active = p;
            }
            p = self.next_of(p);
        }
        self.currs[n.index()] = active;

        let mut requeue = Vec::new();
        let mut prev = active;
        let mut p = self.next_of(active);
        while p != SENTINEL {
            let e = self.at(p).clone();
            if e.punted && e.punt_time < t {
                prev = p;
                p = self.next_of(p);
                continue;
            }
            let pending = e.enqueued_at() < t;
            if !e.punted && !pending {
                break;
            }
            if pending {
                requeue.push(Event {
                    node: n,
                    time: e.time,
                    value: e.value,
                    cause: None,
                    delay: e.delay,
                    rtime: e.rtime,
                    kind: EventKind::Requeued,
                });
            }
            p = self.unlink_after(prev);
        }
        while self.next_of(prev) != SENTINEL {
            self.unlink_after(prev);
        }

        let cur = self.at(active);
        Restored { value: cur.value, time: cur.time, input: cur.input, requeue }
    }
}

pub struct Entries<'a> {
    hist: &'a History,
    cursor: HistId,
}

impl<'a> Iterator for Entries<'a> {
    type Item = &'a HistEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == SENTINEL {
            return None;
        }
        let e = self.hist.at(self.cursor);
        self.cursor = e.next;
        Some(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn one_node() -> (History, NodeId) {
        let cfg = SimConfig::default();
        let mut net = Network::new(&cfg);
        let a = net.get_or_create("a", &cfg);
        (History::new(&net), a)
    }

    fn punted(node: NodeId, time: u64, value: Potential, delay: u64) -> Event {
        Event { node, time, value, cause: None, delay, rtime: 0, kind: EventKind::Reval }
    }

    #[test]
    fn heads_hold_initial_values() {
        let cfg = SimConfig::default();
        let net = Network::new(&cfg);
        let hist = History::new(&net);
        assert_eq!(hist.current(net.power()).value, Potential::High);
        assert_eq!(hist.transitions(net.ground()), vec![(0, Potential::Low)]);
    }

    #[test]
    fn record_skips_punted_entries() {
        let (mut hist, a) = one_node();
        hist.record(a, Potential::High, false, 10, 5, 0);
        hist.record_punted(&punted(a, 30, Potential::Low, 10), 20);
        hist.record(a, Potential::Low, false, 25, 5, 0);
        let all: Vec<(u64, bool)> = hist.entries(a).map(|e| (e.time, e.punted)).collect();
        assert_eq!(all, vec![(0, false), (10, false), (30, true), (25, false)]);
        assert_eq!(hist.current(a).time, 25);
    }

    #[test]
    fn punts_keep_their_order() {
        let (mut hist, a) = one_node();
        hist.record_punted(&punted(a, 30, Potential::Low, 10), 20);
        hist.record_punted(&punted(a, 40, Potential::High, 10), 21);
        let times: Vec<u64> = hist.entries(a).skip(1).map(|e| e.punt_time).collect();
        assert_eq!(times, vec![20, 21]);
        assert_eq!(hist.current(a).time, 0);
    }

    #[test]
    fn rollback_requeues_pending_transitions() {
        let (mut hist, a) = one_node();
        hist.record(a, Potential::High, false, 10, 4, 0);
        hist.record(a, Potential::Low, false, 50, 45, 0); // scheduled at 5
        hist.record(a, Potential::High, false, 90, 10, 0); // scheduled at 80

        let r = hist.rollback(a, 20);
        assert_eq!(r.value, Potential::High);
        assert_eq!(r.time, 10);
        assert_eq!(r.requeue.len(), 1);
        assert_eq!(r.requeue[0].time, 50);
        assert_eq!(r.requeue[0].delay, 45);
        assert_eq!(hist.transitions(a), vec![(0, Potential::X), (10, Potential::High)]);
    }

    #[test]
    fn rollback_keeps_early_punts() {
        let (mut hist, a) = one_node();
        hist.record(a, Potential::High, false, 10, 4, 0);
        hist.record_punted(&punted(a, 60, Potential::Low, 50), 12);
        hist.record_punted(&punted(a, 70, Potential::Low, 40), 40);
        let r = hist.rollback(a, 30);
        // second punt happened after 30, and it was enqueued at 30 exactly
        assert!(r.requeue.is_empty());
        let punts: Vec<u64> = hist.entries(a).filter(|e| e.punted).map(|e| e.time).collect();
        assert_eq!(punts, vec![60]);
    }

    #[test]
    fn flush_folds_into_head() {
        let (mut hist, a) = one_node();
        hist.record(a, Potential::High, false, 10, 4, 0);
        hist.record(a, Potential::Low, false, 20, 4, 0);
        hist.record(a, Potential::High, false, 40, 4, 0);
        hist.flush(25);
        assert_eq!(hist.transitions(a), vec![(20, Potential::Low), (40, Potential::High)]);
        assert_eq!(hist.current(a).time, 40);
        hist.flush(100);
        assert_eq!(hist.transitions(a), vec![(40, Potential::High)]);
        assert_eq!(hist.current(a).time, 40);
    }

    #[test]
    fn flush_looks_past_late_punts() {
        let (mut hist, a) = one_node();
        hist.record(a, Potential::High, false, 10, 4, 0);
        hist.record_punted(&punted(a, 30, Potential::Low, 18), 12);
        hist.record(a, Potential::Low, false, 20, 4, 0);
        hist.record(a, Potential::High, false, 40, 4, 0);
        hist.flush(25);
        let all: Vec<(u64, bool)> = hist.entries(a).map(|e| (e.time, e.punted)).collect();
        assert_eq!(all, vec![(20, false), (40, false)]);
        assert_eq!(hist.current(a).time, 40);
    }
}

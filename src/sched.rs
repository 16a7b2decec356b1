//! Event scheduler: a time wheel of sorted buckets plus per-node event lists.
//!
//! Every live event sits in exactly one bucket (`time & (TSIZE-1)`, sorted by
//! time, FIFO among equal times) and in its node's list (latest first).
//! Removing an event unlinks it from both.

use crate::error::{Result, SwitchyardError};
use crate::network::{NodeId, Potential};

/// Number of wheel buckets. Must be a power of two.
pub const TSIZE: usize = 16384;
const TMASK: u64 = TSIZE as u64 - 1;

/// Largest representable simulation time.
pub const MAX_TIME: u64 = 0x0FFF_FFFF_FFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Result of a stage evaluation.
    Reval,
    /// Undriven charge decaying to X.
    Decay,
    /// External stimulus.
    Input,
    /// Pending transition restored by a rollback.
    Requeued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub node: NodeId,
    pub time: u64,
    pub value: Potential,
    pub cause: Option<NodeId>,
    /// Delay this event was scheduled with, deltas.
    pub delay: u64,
    /// Rise/fall time, deltas.
    pub rtime: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
struct Slot {
    ev: Event,
    prev: Option<EventId>,
    next: Option<EventId>,
    node_next: Option<EventId>,
    live: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: Option<EventId>,
    tail: Option<EventId>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    slots: Vec<Slot>,
    free: Vec<EventId>,
    wheel: Vec<Bucket>,
    node_heads: Vec<Option<EventId>>,
    cur: u64,
    npending: usize,
}

impl Scheduler {
    pub fn new(node_count: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            wheel: vec![Bucket::default(); TSIZE],
            node_heads: vec![None; node_count],
            cur: 0,
            npending: 0,
        }
    }

    /// Current simulation time, deltas.
    pub fn now(&self) -> u64 {
        self.cur
    }

    pub fn set_now(&mut self, t: u64) {
        self.cur = t;
    }

    pub fn pending(&self) -> usize {
        self.npending
    }

    pub fn event(&self, id: EventId) -> &Event {
        &self.slots[id.index()].ev
    }

    /// Schedule `value` on `node` after `delay` deltas (at least one).
    pub fn enqueue(
        &mut self,
        node: NodeId,
        value: Potential,
        delay: u64,
        rtime: u64,
        kind: EventKind,
        cause: Option<NodeId>,
    ) -> EventId {
        let delay = delay.max(1);
        let ev = Event { node, time: self.cur + delay, value, cause, delay, rtime, kind };
        self.insert(ev, false)
    }

    /// Schedule an event at an absolute time, keeping its recorded delay.
    pub fn enqueue_at(&mut self, ev: Event) -> EventId {
        debug_assert!(ev.time >= self.cur);
        self.insert(ev, false)
    }

    /// Zero-delay stimulus, placed ahead of everything at the current time.
    pub fn enqueue_input(&mut self, node: NodeId, value: Potential) -> EventId {
        let ev = Event { node, time: self.cur, value, cause: None, delay: 0, rtime: 0, kind: EventKind::Input };
        self.insert(ev, true)
    }

    fn alloc(&mut self, ev: Event) -> EventId {
        let slot = Slot { ev, prev: None, next: None, node_next: None, live: true };
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                EventId(self.slots.len() as u32 - 1)
            }
        }
    }

    fn insert(&mut self, ev: Event, at_head: bool) -> EventId {
        let time = ev.time;
        let node = ev.node;
        let id = self.alloc(ev);
        let b = (time & TMASK) as usize;

        // bucket: after the last event with time <= ours
        let after = if at_head {
            None
        } else {
            let mut cursor = self.wheel[b].tail;
            while let Some(c) = cursor {
                if self.slots[c.index()].ev.time <= time {
                    break;
                }
                cursor = self.slots[c.index()].prev;
            }
            cursor
        };
        let next = match after {
            Some(a) => self.slots[a.index()].next,
            None => self.wheel[b].head,
        };
        self.slots[id.index()].prev = after;
        self.slots[id.index()].next = next;
        match after {
            Some(a) => self.slots[a.index()].next = Some(id),
            None => self.wheel[b].head = Some(id),
        }
        match next {
            Some(n) => self.slots[n.index()].prev = Some(id),
            None => self.wheel[b].tail = Some(id),
        }

        // node list: latest first, new events ahead of equal times
        let mut prev_in_node: Option<EventId> = None;
        let mut cursor = self.node_heads[node.index()];
        while let Some(c) = cursor {
            if self.slots[c.index()].ev.time <= time {
                break;
            }
            prev_in_node = Some(c);
            cursor = self.slots[c.index()].node_next;
        }
        self.slots[id.index()].node_next = cursor;
        match prev_in_node {
            Some(p) => self.slots[p.index()].node_next = Some(id),
            None => self.node_heads[node.index()] = Some(id),
        }

        self.npending += 1;
        id
    }

    /// Unlink an event from its bucket and its node list and return it.
    pub fn remove(&mut self, id: EventId) -> Event {
        let (time, node, prev, next) = {
            let s = &self.slots[id.index()];
            debug_assert!(s.live);
            (s.ev.time, s.ev.node, s.prev, s.next)
        };
        let b = (time & TMASK) as usize;
        match prev {
            Some(p) => self.slots[p.index()].next = next,
            None => self.wheel[b].head = next,
        }
        match next {
            Some(n) => self.slots[n.index()].prev = prev,
            None => self.wheel[b].tail = prev,
        }

        let mut prev_in_node: Option<EventId> = None;
        let mut cursor = self.node_heads[node.index()];
        while let Some(c) = cursor {
            if c == id {
                break;
            }
            prev_in_node = Some(c);
            cursor = self.slots[c.index()].node_next;
        }
        let after = self.slots[id.index()].node_next;
        match prev_in_node {
            Some(p) => self.slots[p.index()].node_next = after,
            None => self.node_heads[node.index()] = after,
        }

        let slot = &mut self.slots[id.index()];
        slot.live = false;
        slot.prev = None;
        slot.next = None;
        slot.node_next = None;
        let ev = slot.ev.clone();
        self.free.push(id);
        self.npending -= 1;
        ev
    }

    /// Latest pending event of a node.
    pub fn node_head(&self, node: NodeId) -> Option<EventId> {
        self.node_heads[node.index()]
    }

    /// Pending events of a node, latest first.
    pub fn node_events(&self, node: NodeId) -> NodeEvents<'_> {
        NodeEvents { sched: self, cursor: self.node_heads[node.index()] }
    }

    /// Value the node is heading to: its latest pending event, else `pot`.
    pub fn pending_value(&self, node: NodeId, pot: Potential) -> Potential {
        self.node_head(node).map_or(pot, |e| self.event(e).value)
    }

    /// Earliest pending time, scanning one wheel revolution first.
    fn earliest(&self) -> Option<u64> {
        for i in 0..TSIZE as u64 {
            let t = self.cur + i;
            if let Some(h) = self.wheel[(t & TMASK) as usize].head {
                if self.slots[h.index()].ev.time == t {
                    return Some(t);
                }
            }
        }
        self.wheel.iter().filter_map(|b| b.head).map(|h| self.slots[h.index()].ev.time).min()
    }

    /// Remove and return every event at the earliest pending time, if that
    /// time is before `stop`. Advances the current time to the batch time.
    pub fn next_batch(&mut self, stop: u64) -> Result<Option<Vec<Event>>> {
        if self.npending == 0 {
            return Ok(None);
        }
        let time = self.earliest().ok_or_else(|| {
            SwitchyardError::Internal(format!("{} events pending but none found in the time wheel", self.npending))
        })?;
        if time >= stop {
            return Ok(None);
        }

        let b = (time & TMASK) as usize;
        let mut batch = Vec::new();
        while let Some(h) = self.wheel[b].head {
            if self.slots[h.index()].ev.time != time {
                break;
            }
            batch.push(self.remove(h));
        }
        self.cur = time;
        Ok(Some(batch))
    }

    /// Drop every pending event.
    pub fn drain(&mut self) {
        for b in self.wheel.iter_mut() {
            *b = Bucket::default();
        }
        for h in self.node_heads.iter_mut() {
            *h = None;
        }
        self.slots.clear();
        self.free.clear();
        self.npending = 0;
    }
}

pub struct NodeEvents<'a> {
    sched: &'a Scheduler,
    cursor: Option<EventId>,
}

impl<'a> Iterator for NodeEvents<'a> {
    type Item = (EventId, &'a Event);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let slot = &self.sched.slots[id.index()];
        self.cursor = slot.node_next;
        Some((id, &slot.ev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId(0);
    const B: NodeId = NodeId(1);

    fn sched() -> Scheduler {
        Scheduler::new(4)
    }

    #[test]
    fn zero_delay_becomes_one() {
        let mut s = sched();
        let e = s.enqueue(A, Potential::High, 0, 0, EventKind::Reval, None);
        assert_eq!(s.event(e).time, 1);
        assert_eq!(s.event(e).delay, 1);
    }

    #[test]
    fn batch_holds_equal_times_in_fifo_order() {
        let mut s = sched();
        s.enqueue(A, Potential::High, 5, 0, EventKind::Reval, None);
        s.enqueue(B, Potential::Low, 3, 0, EventKind::Reval, None);
        s.enqueue(B, Potential::High, 5, 0, EventKind::Reval, None);
        let first = s.next_batch(100).unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(s.now(), 3);
        let second = s.next_batch(100).unwrap().unwrap();
        assert_eq!(second.iter().map(|e| e.node).collect::<Vec<_>>(), vec![A, B]);
        assert!(s.next_batch(100).unwrap().is_none());
    }

    #[test]
    fn stop_time_is_exclusive() {
        let mut s = sched();
        s.enqueue(A, Potential::High, 10, 0, EventKind::Reval, None);
        assert!(s.next_batch(10).unwrap().is_none());
        assert_eq!(s.now(), 0);
        assert_eq!(s.next_batch(11).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn node_list_is_latest_first() {
        let mut s = sched();
        s.enqueue(A, Potential::Low, 4, 0, EventKind::Reval, None);
        s.enqueue(A, Potential::High, 9, 0, EventKind::Reval, None);
        s.enqueue(A, Potential::X, 6, 0, EventKind::Reval, None);
        let times: Vec<u64> = s.node_events(A).map(|(_, e)| e.time).collect();
        assert_eq!(times, vec![9, 6, 4]);
        assert_eq!(s.pending_value(A, Potential::X), Potential::High);
        assert_eq!(s.pending_value(B, Potential::Low), Potential::Low);
    }

    #[test]
    fn remove_unlinks_both_lists() {
        let mut s = sched();
        let e1 = s.enqueue(A, Potential::Low, 4, 0, EventKind::Reval, None);
        let e2 = s.enqueue(A, Potential::High, 4, 0, EventKind::Reval, None);
        s.remove(e1);
        assert_eq!(s.pending(), 1);
        assert_eq!(s.node_events(A).map(|(id, _)| id).collect::<Vec<_>>(), vec![e2]);
        let batch = s.next_batch(100).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, Potential::High);
    }

    #[test]
    fn input_goes_ahead_of_current_bucket() {
        let mut s = sched();
        s.set_now(20);
        s.enqueue(B, Potential::Low, TSIZE as u64, 0, EventKind::Reval, None);
        s.enqueue_input(A, Potential::High);
        let batch = s.next_batch(u64::MAX).unwrap().unwrap();
        assert_eq!(batch[0].kind, EventKind::Input);
        assert_eq!(s.now(), 20);
    }

    #[test]
    fn far_future_events_found_past_one_revolution() {
        let mut s = sched();
        s.enqueue(A, Potential::High, 3 * TSIZE as u64 + 7, 0, EventKind::Reval, None);
        let batch = s.next_batch(MAX_TIME).unwrap().unwrap();
        assert_eq!(batch[0].time, 3 * TSIZE as u64 + 7);
    }

    #[test]
    fn drain_empties_everything() {
        let mut s = sched();
        s.enqueue(A, Potential::High, 3, 0, EventKind::Reval, None);
        s.drain();
        assert_eq!(s.pending(), 0);
        assert!(s.node_head(A).is_none());
        assert!(s.next_batch(MAX_TIME).unwrap().is_none());
    }
}

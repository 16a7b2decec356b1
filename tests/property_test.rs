//! Randomized checks of the event wheel, resistance combination and the
//! parallel-transistor merge. Seeds are fixed so failures reproduce.

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use switchyard::config::{ModelKind, SimConfig};
use switchyard::engine::{Engine, ModelOptions};
use switchyard::network::{combine, MergeRole, Network, NodeId, Potential, Resistance, TransistorKind};
use switchyard::sched::{Event, EventKind, Scheduler, TSIZE};
use switchyard::sim::{InputLevel, Simulator};

/// Two inverters in series. `mid` rises slowly and falls fast, so a low
/// then high input pulse supersedes its pending rise.
const BUFFER: &str = "\
p in mid vdd 2 4 0 0
n in mid gnd 2 2 0 1
p mid out vdd 2 4 0 2
n mid out gnd 2 2 0 3
c mid 0.5
c out 0.1
D mid 25 5
";

/// Helper: a random logic value.
fn random_potential(rng: &mut ChaCha8Rng) -> Potential {
    Potential::ALL[rng.gen_range(0..3)]
}

/// Helper: a resistance of `r` ohms on every axis.
fn uniform(r: f64) -> Resistance {
    Resistance { r_static: r, dyn_low: r, dyn_high: r, width: 200, length: 200 }
}

// ── Scheduler ─────────────────────────────────────────────────────

#[test]
fn test_batches_come_out_in_time_order() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let nodes = 12;
    for _ in 0..20 {
        let mut sched = Scheduler::new(nodes);
        let count = rng.gen_range(1..200);
        for _ in 0..count {
            let node = NodeId(rng.gen_range(0..nodes as u32));
            // some delays wrap the wheel more than once
            let delay = rng.gen_range(1..3 * TSIZE as u64);
            sched.enqueue(node, random_potential(&mut rng), delay, 0, EventKind::Reval, None);
        }
        assert_eq!(sched.pending(), count);

        for n in 0..nodes as u32 {
            let times: Vec<u64> = sched.node_events(NodeId(n)).map(|(_, e)| e.time).collect();
            assert!(times.windows(2).all(|w| w[0] >= w[1]), "node list not latest-first: {:?}", times);
        }

        let stop = rng.gen_range(1..3 * TSIZE as u64);
        let mut last = 0;
        let mut delivered = 0;
        while let Some(batch) = sched.next_batch(stop).unwrap() {
            assert!(!batch.is_empty());
            let t = batch[0].time;
            assert!(batch.iter().all(|e| e.time == t));
            assert!(t >= last && t < stop);
            assert_eq!(sched.now(), t);
            last = t;
            delivered += batch.len();
        }
        assert_eq!(delivered + sched.pending(), count);
    }
}

#[test]
fn test_input_events_lead_their_batch() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut sched = Scheduler::new(4);
    sched.set_now(500);
    for _ in 0..10 {
        let node = NodeId(rng.gen_range(0..4));
        let ev = Event { node, time: 500, value: Potential::High, cause: None, delay: 1, rtime: 0, kind: EventKind::Reval };
        sched.enqueue_at(ev);
    }
    sched.enqueue_input(NodeId(2), Potential::Low);
    let batch = sched.next_batch(u64::MAX).unwrap().unwrap();
    assert_eq!(batch.len(), 11);
    assert_eq!(batch[0].kind, EventKind::Input);
    assert!(batch[1..].iter().all(|e| e.kind == EventKind::Reval));
}

#[test]
fn test_punt_unlinks_event_everywhere() {
    let cfg = SimConfig::default();
    let mut net = Network::new(&cfg);
    let a = net.get_or_create("a", &cfg);
    let mut eng = Engine::new(net, ModelOptions::from_config(&cfg));
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    let mut live: Vec<_> = (0..30)
        .map(|_| eng.enqueue(a, random_potential(&mut rng), rng.gen_range(1..500), 0, EventKind::Reval))
        .collect();
    while !live.is_empty() {
        let id = live.swap_remove(rng.gen_range(0..live.len()));
        eng.punt(id);
        assert_eq!(eng.sched.pending(), live.len());
        assert_eq!(eng.sched.node_events(a).count(), live.len());
        assert!(eng.sched.node_events(a).all(|(e, _)| e != id));
    }
    assert!(eng.sched.next_batch(u64::MAX).unwrap().is_none());
    assert_eq!(eng.stats.punted, 30);
}

// ── Resistance ────────────────────────────────────────────────────

#[test]
fn test_combine_is_a_parallel_resistance() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..1000 {
        let r1: f64 = rng.gen_range(1.0..1e6);
        let r2: f64 = rng.gen_range(1.0..1e6);
        let r = combine(r1, r2);
        assert_abs_diff_eq!(r, r1 * r2 / (r1 + r2), epsilon = 1e-6 * r);
        assert_abs_diff_eq!(r, combine(r2, r1), epsilon = 1e-9 * r);
        assert!(r <= r1.min(r2));
        assert_abs_diff_eq!(combine(r1, r1), r1 / 2.0, epsilon = 1e-9 * r1);
    }
    assert_eq!(combine(0.0, 0.0), 0.0);
}

#[test]
fn test_parallel_collapse_matches_conductance_sum() {
    let cfg = SimConfig::default();
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..50 {
        let mut net = Network::new(&cfg);
        let g = net.get_or_create("g", &cfg);
        let a = net.get_or_create("a", &cfg);
        let b = net.get_or_create("b", &cfg);
        let count = rng.gen_range(2..8);
        let rs: Vec<f64> = (0..count).map(|_| rng.gen_range(100.0..100_000.0)).collect();
        for (i, &r) in rs.iter().enumerate() {
            // terminal order must not matter
            let (s, d) = if i % 2 == 0 { (a, b) } else { (b, a) };
            net.add_transistor(TransistorKind::NChannel, g, s, d, uniform(r), None);
        }

        let touched = net.connect();
        assert_eq!(net.collapse_parallel(&touched), count - 1);
        assert_eq!(net.node(a).terms.len(), 1);
        assert_eq!(net.node(b).terms.len(), 1);
        assert_eq!(net.node(g).gates.len(), 1);

        let c = net.node(a).terms[0];
        let expected = 1.0 / rs.iter().map(|r| 1.0 / r).sum::<f64>();
        assert_abs_diff_eq!(net.trans(c).r.dyn_low, expected, epsilon = 1e-6 * expected);
        assert!(rs.iter().all(|&r| net.trans(c).r.r_static <= r));
        match &net.trans(c).role {
            MergeRole::Compound { members } => assert_eq!(members.len(), count),
            other => panic!("expected compound, got {:?}", other),
        }
        assert_eq!(net.counts.ored[TransistorKind::NChannel.index()], count);

        // nothing left to merge
        assert_eq!(net.collapse_parallel(&[a, b]), 0);
    }
}

// ── Rollback ──────────────────────────────────────────────────────

/// Helper: apply `levels` to `in` one step each, then settle.
fn replay(sim: &mut Simulator, levels: &[InputLevel]) {
    for &level in levels {
        sim.set_input("in", level).unwrap();
        sim.step_ns(None).unwrap();
    }
    sim.step_ns(Some(300.0)).unwrap();
}

/// Helper: committed histories of every node of [`BUFFER`].
fn histories(sim: &Simulator) -> Vec<Vec<(f64, Potential)>> {
    ["in", "mid", "out"].iter().map(|n| sim.history(n).unwrap()).collect()
}

#[test]
fn test_rollback_then_replay_matches_under_both_models() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    for model in [ModelKind::Rc, ModelKind::Switch] {
        for _ in 0..15 {
            let len = rng.gen_range(4..12);
            let mut levels = vec![InputLevel::Low, InputLevel::High];
            levels.extend((2..len).map(|_| if rng.gen_bool(0.5) { InputLevel::High } else { InputLevel::Low }));

            let config = SimConfig { model, ..SimConfig::default() };
            let mut sim = Simulator::load("buffer.sim", BUFFER, config).unwrap();
            replay(&mut sim, &levels);
            // the pulse at 10 ns punted the rise of mid
            assert!(sim.stats().punted > 0, "{}", model);
            let first = histories(&sim);
            let end = sim.now();

            let from = rng.gen_range(2..len);
            sim.back(10.0 * from as f64).unwrap();
            assert_eq!(sim.now(), 10.0 * from as f64);
            replay(&mut sim, &levels[from..]);

            assert_eq!(sim.now(), end);
            assert_eq!(histories(&sim), first, "{} back to step {} of {:?}", model, from, levels);
        }
    }
}


//! Simulation statistics for `--stats` output.

use std::time::{Duration, Instant};

/// Event counters and phase timings.
///
/// Counters are maintained by the engine as it runs; phases are added by the
/// driver around load, connect and simulation.
#[derive(Debug, Clone)]
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    /// Events taken off the wheel.
    pub events: u64,
    /// Committed transitions.
    pub edges: u64,
    pub punted: u64,
    /// Punted in the same step that scheduled them.
    pub cons_punted: u64,
    pub evaluations: u64,
    pub batches: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            events: 0,
            edges: 0,
            punted: 0,
            cons_punted: 0,
            evaluations: 0,
            batches: 0,
        }
    }

    /// Add `duration` to the named phase, creating it on first use.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        match self.phases.iter_mut().find(|(n, _)| *n == name) {
            Some((_, total)) => *total += duration,
            None => self.phases.push((name, duration)),
        }
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Punts as a share of all scheduled transitions, percent.
    pub fn punt_ratio(&self) -> f64 {
        if self.punted == 0 {
            0.0
        } else {
            100.0 * self.punted as f64 / (self.edges + self.punted) as f64
        }
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Switchyard Simulation Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Events:                 {}", self.events);
        eprintln!("  Batches:                {}", self.batches);
        eprintln!("  Stage evaluations:      {}", self.evaluations);
        eprintln!("  Changes:                {}", self.edges);
        eprintln!("  Punts (consecutive):    {} ({})", self.punted, self.cons_punted);
        if self.punted > 0 {
            let cons = 100.0 * self.cons_punted as f64 / self.punted as f64;
            eprintln!("    punts = {:.1}%, consecutive = {:.1}%", self.punt_ratio(), cons);
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}

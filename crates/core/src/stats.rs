//! Simulation statistics collection and reporting.
//!
//! Tracks per-core cache hit/miss counts and PCB scheduling history for
//! post-run inspection. Unlike a full hardware simulator there is no branch
//! predictor, FPU, or multi-level cache hierarchy to report on here.

use std::collections::HashMap;

/// Per-core statistics accumulated across a run.
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    /// Simulated cycles this core has observed at the barrier.
    pub cycles: u64,
    /// Instruction cache hits.
    pub icache_hits: u64,
    /// Instruction cache misses.
    pub icache_misses: u64,
    /// Data cache hits.
    pub dcache_hits: u64,
    /// Data cache misses.
    pub dcache_misses: u64,
    /// Number of context switches this core has performed.
    pub context_switches: u64,
}

impl CoreStats {
    /// Combined data-cache accesses (hits + misses).
    #[must_use]
    pub fn dcache_accesses(&self) -> u64 {
        self.dcache_hits + self.dcache_misses
    }

    /// Data-cache hit rate in `[0.0, 1.0]`; `0.0` when there were no accesses.
    #[must_use]
    pub fn dcache_hit_rate(&self) -> f64 {
        let total = self.dcache_accesses();
        if total == 0 {
            0.0
        } else {
            self.dcache_hits as f64 / total as f64
        }
    }
}

/// Aggregate statistics for an entire run: per-core counters plus a log of
/// how many times each PID was scheduled onto a core.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Stats indexed by core id.
    pub cores: Vec<CoreStats>,
    /// PID -> number of times it was dispatched onto a core.
    pub times_scheduled: HashMap<u32, u64>,
}

impl RunReport {
    /// Creates an empty report sized for `num_cores` cores.
    #[must_use]
    pub fn new(num_cores: usize) -> Self {
        Self {
            cores: vec![CoreStats::default(); num_cores],
            times_scheduled: HashMap::new(),
        }
    }

    /// Records that `pid` was just dispatched onto a core.
    pub fn record_schedule(&mut self, pid: u32) {
        *self.times_scheduled.entry(pid).or_insert(0) += 1;
    }

    /// Prints a summary to stdout.
    pub fn print(&self) {
        println!("==========================================================");
        println!("SIMULATION STATISTICS");
        println!("==========================================================");
        for (idx, core) in self.cores.iter().enumerate() {
            println!(
                "core{idx}  cycles={:<8} icache hit/miss={}/{}  dcache hit/miss={}/{} ({:.1}%)  ctx_switches={}",
                core.cycles,
                core.icache_hits,
                core.icache_misses,
                core.dcache_hits,
                core.dcache_misses,
                core.dcache_hit_rate() * 100.0,
                core.context_switches,
            );
        }
        let mut pids: Vec<_> = self.times_scheduled.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            println!("  pid {pid} scheduled {} time(s)", self.times_scheduled[&pid]);
        }
        println!("==========================================================");
    }
}

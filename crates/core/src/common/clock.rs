//! Per-core simulated clock: a barrier handle plus a cycle counter.
//!
//! A `Core` owns one `ClockState` exclusively and threads a `&mut` reference
//! down into its caches/bus calls for the duration of one pipeline step.
//! Because every call chain into a peer cache happens synchronously on the
//! calling core's own host thread (the peer cache object is merely shared
//! data behind a lock, not a separate actor), no cyclic reference back to
//! `Core` is ever needed — cycles are charged by calling `tick` on the
//! clock the *caller* already has in hand.

use std::sync::Arc;
use std::sync::Barrier;

use super::core_id::CoreId;

/// One core's view of the global simulated clock.
pub struct ClockState {
    barrier: Arc<Barrier>,
    id: CoreId,
    /// Cycles this core has observed so far.
    pub cycles: u64,
}

impl ClockState {
    /// Creates a new clock for `id`, synchronizing on `barrier`.
    #[must_use]
    pub fn new(id: CoreId, barrier: Arc<Barrier>) -> Self {
        Self {
            barrier,
            id,
            cycles: 0,
        }
    }

    /// This clock's owning core.
    #[must_use]
    pub fn core_id(&self) -> CoreId {
        self.id
    }

    /// Advances the simulated clock by exactly one cycle: waits at the
    /// barrier until every other core (and the driver) also ticks, then
    /// increments the local counter.
    pub fn tick(&mut self) {
        self.barrier.wait();
        self.cycles += 1;
    }

    /// Ticks `n` times in a row — used to charge multi-cycle penalties
    /// (miss service, bus downtime, lock-retry backoff).
    pub fn tick_n(&mut self, n: u32) {
        for _ in 0..n {
            self.tick();
        }
    }
}

//! The associative cache: the central engine implementing load/store/LR/SC
//! with MSI coherence over a shared bus.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::line::{CacheSet, MsiState};
use crate::bus::Bus;
use crate::common::error::MemoryError;
use crate::common::{ClockState, CoreId, TryLock};
use crate::config::TimingConfig;
use crate::memory::Block;

struct CacheInner {
    sets: Vec<CacheSet>,
    /// Block number currently reserved by this core's LR, if any.
    reserved_block: Option<u32>,
    /// Which foreign core currently holds the lock via `acquire_external`.
    held_by: Option<CoreId>,
}

/// A per-core, N-way set-associative cache over one memory region.
///
/// Holds a mutual-exclusion lock (the "local" lock, a [`TryLock`]) over its
/// own lines and reservation state, and a strong reference to the bus it
/// shares with its peers. The bus holds only a `Weak` back-reference to each
/// cache (see [`Bus::set_peers`]), so this is not an ownership cycle.
pub struct AssociativeCache {
    name: String,
    start: u32,
    end: u32,
    associativity: usize,
    words_per_block: usize,
    num_sets: usize,
    owner: CoreId,
    bus: Arc<Bus>,
    timing: TimingConfig,
    inner: TryLock<CacheInner>,
}

impl AssociativeCache {
    /// Creates a cache mapping `[start, end)` for `owner`, with `num_blocks`
    /// total lines split into `associativity`-way sets.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        start: u32,
        end: u32,
        associativity: usize,
        num_blocks: usize,
        words_per_block: usize,
        owner: CoreId,
        bus: Arc<Bus>,
        timing: TimingConfig,
    ) -> Self {
        assert!(
            num_blocks % associativity == 0,
            "num_blocks must be a multiple of associativity"
        );
        let num_sets = num_blocks / associativity;
        let sets = (0..num_sets)
            .map(|_| CacheSet::new(associativity, words_per_block))
            .collect();
        Self {
            name: name.into(),
            start,
            end,
            associativity,
            words_per_block,
            num_sets,
            owner,
            bus,
            timing,
            inner: TryLock::new(CacheInner {
                sets,
                reserved_block: None,
                held_by: None,
            }),
        }
    }

    /// This cache's human-readable name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The core that owns this cache.
    #[must_use]
    pub fn owner(&self) -> CoreId {
        self.owner
    }

    fn bytes_per_block(&self) -> u32 {
        self.words_per_block as u32 * 4
    }

    fn check_range(&self, addr: u32) -> Result<(), MemoryError> {
        if addr < self.start || addr >= self.end {
            return Err(MemoryError::AddressOutOfRange {
                addr,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Decomposes `addr` into `(block, offset, set index)`. An address that
    /// isn't 4-byte aligned is logged and then proceeds using the word
    /// whose base is `addr & !3` — the access is never rejected.
    fn decompose(&self, addr: u32) -> (u32, usize, usize) {
        if addr % 4 != 0 {
            warn!(addr, cache = %self.name, "unaligned access, truncating to containing word");
        }
        let bpb = self.bytes_per_block();
        let block = addr / bpb;
        let offset = ((addr % bpb) / 4) as usize;
        let index = (block as usize) % self.num_sets;
        (block, offset, index)
    }

    // --- local lock (owner-side) ---

    fn acquire_local(&self, clock: &mut ClockState) {
        while !self.inner.try_acquire() {
            clock.tick();
        }
    }

    fn release_local(&self) {
        self.inner.release();
    }

    // --- with-bus lock (bus first, then local; release local before bus) ---

    /// Acquires the bus lock then this cache's local lock, bus-first, to
    /// prevent circular waits. If the local lock can't be claimed once the
    /// bus is held, the bus lock is released and the whole attempt retried.
    fn acquire_with_bus(&self, clock: &mut ClockState) {
        loop {
            while !self.bus.try_acquire() {
                clock.tick();
            }
            if self.inner.try_acquire() {
                return;
            }
            self.bus.release();
            clock.tick();
        }
    }

    fn release_with_bus(&self, clock: &mut ClockState) {
        self.release_local();
        self.bus.release();
        self.bus.charge_downtime(clock);
    }

    fn clear_reservation_if(&self, inner: &mut CacheInner, block: u32) {
        if inner.reserved_block == Some(block) {
            inner.reserved_block = None;
        }
    }

    /// `load(addr) -> (word, hit)`. See the two-phase state machine in the
    /// component design notes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside this
    /// cache's mapped range.
    pub fn load(&self, addr: u32, clock: &mut ClockState) -> Result<(i32, bool), MemoryError> {
        self.check_range(addr)?;
        let (block, offset, index) = self.decompose(addr);

        // Phase A: local. A clean hit costs nothing beyond lock contention.
        self.acquire_local(clock);
        {
            let inner = unsafe { self.inner.data() };
            if let Some(way) = inner.sets[index].find(block) {
                let word = inner.sets[index].lines[way].words[offset];
                self.release_local();
                return Ok((word, true));
            }
        }
        self.release_local();

        // Escalating to phase B is itself a one-cycle transition.
        clock.tick();

        // Phase B: with-bus.
        self.acquire_with_bus(clock);
        let result = {
            let inner = unsafe { self.inner.data() };
            if let Some(way) = inner.sets[index].find(block) {
                // Became present while locks were released: still a miss
                // from this call's point of view.
                let word = inner.sets[index].lines[way].words[offset];
                (word, false)
            } else {
                let way = inner.sets[index].next_victim;
                self.evict_if_modified(inner, index, way, clock);
                let fetched = self.bus.snoop_shared(addr, self.owner, clock);
                clock.tick_n(self.timing.memory_load_penalty);
                inner.sets[index].lines[way].install(&fetched, MsiState::Shared);
                inner.sets[index].advance_victim();
                let word = fetched.words[offset];
                (word, false)
            }
        };
        self.release_with_bus(clock);
        Ok(result)
    }

    /// `store(addr, val) -> hit`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside this
    /// cache's mapped range.
    pub fn store(&self, addr: u32, val: i32, clock: &mut ClockState) -> Result<bool, MemoryError> {
        let (hit, _) = self.store_inner(addr, val, clock)?;
        Ok(hit)
    }

    fn store_inner(&self, addr: u32, val: i32, clock: &mut ClockState) -> Result<(bool, ()), MemoryError> {
        self.check_range(addr)?;
        let (block, offset, index) = self.decompose(addr);

        // Phase A: local. Modified hit costs nothing beyond lock contention.
        self.acquire_local(clock);
        {
            let inner = unsafe { self.inner.data() };
            if let Some(way) = inner.sets[index].find(block) {
                if inner.sets[index].lines[way].state == MsiState::Modified {
                    inner.sets[index].lines[way].words[offset] = val;
                    self.clear_reservation_if(inner, block);
                    self.release_local();
                    return Ok((true, ()));
                }
            }
        }
        self.release_local();

        // Escalating to phase B (Shared hit or miss) is a one-cycle transition.
        clock.tick();

        // Phase B: with-bus.
        self.acquire_with_bus(clock);
        let hit = {
            let inner = unsafe { self.inner.data() };
            if let Some(way) = inner.sets[index].find(block) {
                debug_assert_eq!(inner.sets[index].lines[way].state, MsiState::Shared);
                let fetched = self.bus.snoop_exclusive(addr, self.owner, clock);
                clock.tick_n(self.timing.memory_load_penalty);
                let mut line = fetched;
                line.words[offset] = val;
                inner.sets[index].lines[way].install(&line, MsiState::Modified);
                self.clear_reservation_if(inner, block);
                true
            } else {
                let way = inner.sets[index].next_victim;
                self.evict_if_modified(inner, index, way, clock);
                let fetched = self.bus.snoop_exclusive(addr, self.owner, clock);
                clock.tick_n(self.timing.memory_load_penalty);
                let mut line = fetched;
                line.words[offset] = val;
                inner.sets[index].lines[way].install(&line, MsiState::Modified);
                inner.sets[index].advance_victim();
                self.clear_reservation_if(inner, block);
                false
            }
        };
        self.release_with_bus(clock);
        Ok((hit, ()))
    }

    /// `load_reserved(addr) -> (word, hit)`. Identical data flow to `load`,
    /// except on completion the block is recorded as this cache's reservation.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside this
    /// cache's mapped range.
    pub fn load_reserved(&self, addr: u32, clock: &mut ClockState) -> Result<(i32, bool), MemoryError> {
        let (block, _, _) = self.decompose(addr);
        let result = self.load(addr, clock)?;
        self.acquire_local(clock);
        unsafe { self.inner.data() }.reserved_block = Some(block);
        self.release_local();
        Ok(result)
    }

    /// `store_conditional(addr, val) -> (hit, success)`. Fails without
    /// writing if the reservation no longer matches this block; the
    /// reservation is always consumed, win or lose.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside this
    /// cache's mapped range.
    pub fn store_conditional(
        &self,
        addr: u32,
        val: i32,
        clock: &mut ClockState,
    ) -> Result<(bool, bool), MemoryError> {
        self.check_range(addr)?;
        let (block, _, _) = self.decompose(addr);

        self.acquire_local(clock);
        let reservation_held = unsafe { self.inner.data() }.reserved_block == Some(block);
        if !reservation_held {
            unsafe { self.inner.data() }.reserved_block = None;
            self.release_local();
            return Ok((false, false));
        }
        self.release_local();

        // The precheck above is the success test: a remote store between
        // the LR and here already clears `reserved_block` through
        // `snoop_find`'s invalidate-reservation path, so seeing the
        // reservation held at this point is exactly SC's success
        // condition. `store_inner`'s own write clears `reserved_block` as
        // an intrinsic side effect of committing (a store to the reserved
        // block, by definition, consumes the reservation) — that clear is
        // not itself a failure signal, so `success` must not be
        // re-derived from `reserved_block` after this call.
        let (hit, _) = self.store_inner(addr, val, clock)?;

        Ok((hit, reservation_held))
    }

    /// Evicts the current victim of `set index` if it is Modified, writing
    /// it back through the bus first. Must be called with both the local
    /// and bus locks held.
    fn evict_if_modified(&self, inner: &mut CacheInner, index: usize, way: usize, clock: &mut ClockState) {
        let line = &inner.sets[index].lines[way];
        if line.state == MsiState::Modified {
            let addr = line.tag * self.bytes_per_block();
            let snapshot = line.snapshot();
            self.bus.write_back(addr, &snapshot, self.owner);
            clock.tick_n(self.timing.memory_load_penalty);
        }
    }

    // --- snoop-target interface, called by peer caches via the bus ---

    /// Acquires this cache's local lock on behalf of a foreign `requester`,
    /// so miss-penalty cycles are charged to the requester rather than the
    /// owner. Requires `requester != owner`.
    pub fn acquire_external(&self, requester: CoreId, clock: &mut ClockState) {
        debug_assert_ne!(requester, self.owner, "cache cannot snoop its own owner");
        while !self.inner.try_acquire() {
            clock.tick();
        }
        unsafe { self.inner.data() }.held_by = Some(requester);
    }

    /// Returns the matching line's snapshot and whether it was Modified, if
    /// present and valid. When `invalidate_reservation` is true and this
    /// cache's reservation matches the block, clears it — this is how a
    /// remote write breaks an LR reservation. Must be called while the lock
    /// is externally held.
    #[must_use]
    pub fn snoop_find(&self, addr: u32, invalidate_reservation: bool) -> Option<(Block, bool)> {
        let (block, _, index) = self.decompose(addr);
        let inner = unsafe { self.inner.data() };
        if invalidate_reservation {
            self.clear_reservation_if(inner, block);
        }
        let way = inner.sets[index].find(block)?;
        let line = &inner.sets[index].lines[way];
        Some((line.snapshot(), line.state == MsiState::Modified))
    }

    /// Downgrades the line matching `addr` from Modified to Shared. Called
    /// by the bus after writing a Modified snoop hit back to memory. Must be
    /// called while the lock is externally held.
    pub fn downgrade_to_shared(&self, addr: u32) {
        let (block, _, index) = self.decompose(addr);
        let inner = unsafe { self.inner.data() };
        if let Some(way) = inner.sets[index].find(block) {
            inner.sets[index].lines[way].state = MsiState::Shared;
        }
    }

    /// Invalidates the line matching `addr`. Called by the bus during a
    /// snoop-exclusive. Must be called while the lock is externally held.
    pub fn invalidate(&self, addr: u32) {
        let (block, _, index) = self.decompose(addr);
        let inner = unsafe { self.inner.data() };
        if let Some(way) = inner.sets[index].find(block) {
            inner.sets[index].lines[way].state = MsiState::Invalid;
        }
    }

    /// Releases the lock claimed on behalf of `requester` via
    /// `acquire_external`.
    pub fn release_external(&self, requester: CoreId) {
        let inner = unsafe { self.inner.data() };
        debug_assert_eq!(inner.held_by, Some(requester));
        inner.held_by = None;
        self.inner.release();
    }

    /// Clears this core's LR reservation unconditionally. Called during a
    /// context switch, since an LR/SC pair cannot span one.
    pub fn clear_reservation(&self, clock: &mut ClockState) {
        self.acquire_local(clock);
        unsafe { self.inner.data() }.reserved_block = None;
        self.release_local();
    }

    /// True if no two lines in any set share a tag while both non-Invalid —
    /// one of the coherence invariants, checked directly rather than only
    /// by construction, for use in tests.
    ///
    /// # Safety
    ///
    /// Read-only introspection intended for use once a test fixture has
    /// quiesced (no other thread holding or contending for the lock); it
    /// does not itself acquire `inner`.
    #[must_use]
    pub fn no_duplicate_tags(&self) -> bool {
        let inner = unsafe { self.inner.data() };
        inner.sets.iter().all(|set| {
            let mut seen = std::collections::HashSet::new();
            set.lines
                .iter()
                .filter(|l| l.state != MsiState::Invalid)
                .all(|l| seen.insert(l.tag))
        })
    }

    /// Snapshot of every valid line and its MSI state, for test assertions.
    ///
    /// # Safety
    ///
    /// Same caveat as [`Self::no_duplicate_tags`]: call only once the
    /// fixture under test is quiescent.
    #[must_use]
    pub fn snapshot_lines(&self) -> Vec<(u32, MsiState, Vec<i32>)> {
        let inner = unsafe { self.inner.data() };
        inner
            .sets
            .iter()
            .flat_map(|set| set.lines.iter())
            .filter(|l| l.state != MsiState::Invalid)
            .map(|l| (l.tag, l.state, l.words.clone()))
            .collect()
    }

    /// Whether `addr`'s block is currently held Modified or Shared by this cache.
    ///
    /// # Safety
    ///
    /// Same caveat as [`Self::no_duplicate_tags`]: call only once the
    /// fixture under test is quiescent.
    #[must_use]
    pub fn state_of(&self, addr: u32) -> MsiState {
        let (block, _, index) = self.decompose(addr);
        let inner = unsafe { self.inner.data() };
        match inner.sets[index].find(block) {
            Some(way) => inner.sets[index].lines[way].state,
            None => MsiState::Invalid,
        }
    }

    /// Byte address of the block currently held by this core's LR
    /// reservation, if any.
    ///
    /// # Safety
    ///
    /// Same caveat as [`Self::no_duplicate_tags`]: call only once the
    /// fixture under test is quiescent.
    #[must_use]
    pub fn reserved_address(&self) -> Option<u32> {
        let inner = unsafe { self.inner.data() };
        inner.reserved_block.map(|block| block * self.bytes_per_block())
    }
}

impl fmt::Display for AssociativeCache {
    /// One line per valid cache line: its tag, MSI state, and words.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({:?} reserved):", self.name, self.reserved_address())?;
        for (tag, state, words) in self.snapshot_lines() {
            writeln!(f, "  block {tag} [{state:?}]: {words:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CoreId;
    use crate::memory::MainMemory;
    use std::sync::{Arc, Barrier};

    fn two_core_data_fixture() -> (Arc<AssociativeCache>, Arc<AssociativeCache>, ClockState, ClockState) {
        let timing = TimingConfig::default();
        let mem = MainMemory::new(0, 24, 4);
        let bus = Arc::new(Bus::new(mem, timing));
        let cache0 = Arc::new(AssociativeCache::new(
            "data0", 0, 384, 1, 8, 4, CoreId(0), bus.clone(), timing,
        ));
        let cache1 = Arc::new(AssociativeCache::new(
            "data1", 0, 384, 1, 8, 4, CoreId(1), bus.clone(), timing,
        ));
        bus.set_peers(vec![Arc::downgrade(&cache0), Arc::downgrade(&cache1)]);
        let barrier = Arc::new(Barrier::new(1));
        let clock0 = ClockState::new(CoreId(0), barrier.clone());
        let clock1 = ClockState::new(CoreId(1), barrier);
        (cache0, cache1, clock0, clock1)
    }

    #[test]
    fn lr_sc_succeeds_with_no_interference() {
        let (cache0, _cache1, mut clock0, _clock1) = two_core_data_fixture();
        cache0.load_reserved(0, &mut clock0).unwrap();
        let (hit, success) = cache0.store_conditional(0, 7, &mut clock0).unwrap();
        assert!(success);
        let _ = hit;
        assert_eq!(cache0.load(0, &mut clock0).unwrap().0, 7);
    }

    #[test]
    fn sc_fails_after_remote_write() {
        let (cache0, cache1, mut clock0, mut clock1) = two_core_data_fixture();
        cache0.load_reserved(0, &mut clock0).unwrap();
        cache1.store(0, 9, &mut clock1).unwrap();
        let (_, success) = cache0.store_conditional(0, 7, &mut clock0).unwrap();
        assert!(!success);
        assert_eq!(cache0.load(0, &mut clock0).unwrap().0, 9);
    }

    #[test]
    fn write_invalidates_peer_shared_copy() {
        let (cache0, cache1, mut clock0, mut clock1) = two_core_data_fixture();
        cache0.load(0, &mut clock0).unwrap();
        cache1.load(0, &mut clock1).unwrap();
        cache1.store(0, 42, &mut clock1).unwrap();
        assert_eq!(cache0.state_of(0), MsiState::Invalid);
        assert_eq!(cache1.state_of(0), MsiState::Modified);
    }

    #[test]
    fn eviction_writes_back_modified_victim_fifo_order() {
        let (cache0, _cache1, mut clock0, _clock1) = two_core_data_fixture();
        // 8 sets of associativity 1; stride of num_sets*P*4 = 8*4*4 = 128
        // revisits the same set on the ninth write.
        for i in 0..8u32 {
            cache0.store(i * 128, i as i32, &mut clock0).unwrap();
        }
        cache0.store(8 * 128, 99, &mut clock0).unwrap();
        assert_eq!(cache0.load(0, &mut clock0).unwrap().0, 0);
        assert_eq!(cache0.load(8 * 128, &mut clock0).unwrap().0, 99);
    }

    #[test]
    fn no_duplicate_tags_holds_after_mixed_traffic() {
        let (cache0, _cache1, mut clock0, _clock1) = two_core_data_fixture();
        for i in 0..20u32 {
            cache0.store(i * 16, i as i32, &mut clock0).unwrap();
        }
        assert!(cache0.no_duplicate_tags());
    }
}

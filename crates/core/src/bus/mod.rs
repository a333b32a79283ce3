//! The shared bus: arbitrates snoop-shared, snoop-exclusive, and write-back
//! transactions between a memory region's caches and its backing memory.
//!
//! One `Bus` instance exists per memory region (instruction, data) — the
//! reference design wires two independent buses rather than a single bus
//! spanning both regions, and this generalizes that directly.

use std::sync::{Mutex, Weak};

use crate::cache::AssociativeCache;
use crate::common::{ClockState, CoreId, TryLock};
use crate::config::TimingConfig;
use crate::memory::{Block, MainMemory};

/// A shared bus connecting one memory region's per-core caches to its
/// backing memory.
///
/// Caches hold a strong `Arc<Bus>`; the bus holds only `Weak` references
/// back to its caches, set once via [`Bus::set_peers`] after all caches for
/// the region exist. This breaks what would otherwise be an ownership
/// cycle (see the cyclic-reference design note).
pub struct Bus {
    memory: Mutex<MainMemory>,
    peers: Mutex<Vec<Weak<AssociativeCache>>>,
    lock: TryLock<()>,
    timing: TimingConfig,
}

impl Bus {
    /// Creates a bus over `memory` with no peers yet attached.
    #[must_use]
    pub fn new(memory: MainMemory, timing: TimingConfig) -> Self {
        Self {
            memory: Mutex::new(memory),
            peers: Mutex::new(Vec::new()),
            lock: TryLock::new(()),
            timing,
        }
    }

    /// Wires the bus to its region's caches. Called once, after every cache
    /// for this region has been constructed.
    pub fn set_peers(&self, peers: Vec<Weak<AssociativeCache>>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Attempts to claim the bus lock without blocking.
    pub(crate) fn try_acquire(&self) -> bool {
        self.lock.try_acquire()
    }

    /// Releases a previously claimed bus lock.
    pub(crate) fn release(&self) {
        self.lock.release();
    }

    /// Charges the standard post-release bus-downtime penalty.
    pub(crate) fn charge_downtime(&self, clock: &mut ClockState) {
        clock.tick_n(self.timing.bus_downtime);
    }

    fn live_peers(&self) -> Vec<std::sync::Arc<AssociativeCache>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Services a read miss on behalf of `requester`: snoops peer caches for
    /// the block at `addr`, preferring a peer's copy over a memory fetch.
    ///
    /// On finding a Modified peer copy: writes it back, downgrades the peer
    /// to Shared, and returns that snapshot. On finding only Shared peer
    /// copies: returns the first one found (equal to memory's value under
    /// MSI, since no peer can be Modified if any peer is Shared). On no hit:
    /// reads memory directly.
    ///
    /// Must be called with the bus lock already held by `requester`.
    pub fn snoop_shared(&self, addr: u32, requester: CoreId, clock: &mut ClockState) -> Block {
        for peer in self.live_peers() {
            if peer.owner() == requester {
                continue;
            }
            peer.acquire_external(requester, clock);
            let found = peer.snoop_find(addr, false);
            if let Some((snapshot, was_modified)) = found {
                if was_modified {
                    let mut mem = self.memory.lock().unwrap();
                    mem.set(addr, &snapshot).expect("bus write-back address in range");
                    peer.downgrade_to_shared(addr);
                }
                peer.release_external(requester);
                return snapshot;
            }
            peer.release_external(requester);
        }
        let mem = self.memory.lock().unwrap();
        mem.get(addr).expect("bus request address in range")
    }

    /// Services a write miss (or a Shared-to-Modified promotion) on behalf of
    /// `requester`: invalidates every peer copy of the block at `addr`.
    ///
    /// Iteration cannot stop early on a Shared hit — there may be further
    /// sharers — only a Modified hit (after which MSI guarantees there are
    /// no other sharers) ends the search early.
    ///
    /// Must be called with the bus lock already held by `requester`.
    pub fn snoop_exclusive(&self, addr: u32, requester: CoreId, clock: &mut ClockState) -> Block {
        let mut result = None;
        for peer in self.live_peers() {
            if peer.owner() == requester {
                continue;
            }
            peer.acquire_external(requester, clock);
            let found = peer.snoop_find(addr, true);
            if let Some((snapshot, was_modified)) = found {
                if was_modified {
                    let mut mem = self.memory.lock().unwrap();
                    mem.set(addr, &snapshot).expect("bus write-back address in range");
                    peer.invalidate(addr);
                    peer.release_external(requester);
                    result = Some(snapshot);
                    break;
                }
                peer.invalidate(addr);
            }
            peer.release_external(requester);
        }
        match result {
            Some(block) => block,
            None => {
                let mem = self.memory.lock().unwrap();
                mem.get(addr).expect("bus request address in range")
            }
        }
    }

    /// Writes `block` back to memory, for victim eviction.
    ///
    /// Must be called with the bus lock already held by `requester`.
    pub fn write_back(&self, addr: u32, block: &Block, _requester: CoreId) {
        let mut mem = self.memory.lock().unwrap();
        mem.set(addr, block).expect("bus write-back address in range");
    }

    /// Writes `words` directly into the backing memory, bypassing every
    /// cache. Intended for the loader, before any core has started running
    /// and no cache line can yet be stale.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError`] if any written word would fall outside the
    /// region's mapped range.
    pub fn bulk_load_direct(&self, addr: u32, words: &[i32]) -> Result<(), crate::common::error::MemoryError> {
        self.memory.lock().unwrap().bulk_load(addr, words)
    }

    /// Snapshot of the backing memory for this region, for display once a
    /// run has finished and no core is contending for the lock.
    #[must_use]
    pub fn memory_snapshot(&self) -> MainMemory {
        self.memory.lock().unwrap().clone()
    }
}

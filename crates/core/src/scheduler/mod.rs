//! Global scheduler: ready/finished FIFOs of process control blocks.

mod pcb;

use std::collections::VecDeque;
use std::sync::Mutex;

pub use pcb::{Pcb, PcbStatus};

use crate::common::error::SchedulerError;

/// Two thread-safe FIFOs of PCBs: `ready` and `finished`.
///
/// Both queues are guarded by a single internal mutex — simple,
/// uncontended bookkeeping, not the hot path the cache/bus locking
/// discipline is built for.
pub struct Scheduler {
    quantum: u32,
    inner: Mutex<Queues>,
}

struct Queues {
    ready: VecDeque<Pcb>,
    finished: VecDeque<Pcb>,
}

impl Scheduler {
    /// Creates an empty scheduler handing out `quantum` cycles per slice.
    #[must_use]
    pub fn new(quantum: u32) -> Self {
        Self {
            quantum,
            inner: Mutex::new(Queues {
                ready: VecDeque::new(),
                finished: VecDeque::new(),
            }),
        }
    }

    /// Dequeues the next ready PCB in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Empty`] when no PCB is ready; the caller
    /// interprets this as "go idle," not as an error to propagate.
    pub fn next_ready(&self) -> Result<Pcb, SchedulerError> {
        self.inner
            .lock()
            .unwrap()
            .ready
            .pop_front()
            .ok_or(SchedulerError::Empty)
    }

    /// Enqueues `pcb` into the ready queue, resetting its quantum to `Q`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QuantumNotExhausted`] if `pcb.quantum != 0`.
    pub fn put_ready(&self, mut pcb: Pcb) -> Result<(), SchedulerError> {
        if pcb.quantum != 0 {
            return Err(SchedulerError::QuantumNotExhausted {
                pid: pcb.pid,
                quantum: pcb.quantum,
            });
        }
        pcb.quantum = self.quantum;
        pcb.status = PcbStatus::Ready;
        self.inner.lock().unwrap().ready.push_back(pcb);
        Ok(())
    }

    /// Enqueues `pcb` into the finished queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QuantumNotExhausted`] if `pcb.quantum != 0`.
    pub fn put_finished(&self, mut pcb: Pcb) -> Result<(), SchedulerError> {
        if pcb.quantum != 0 {
            return Err(SchedulerError::QuantumNotExhausted {
                pid: pcb.pid,
                quantum: pcb.quantum,
            });
        }
        pcb.status = PcbStatus::Finished;
        self.inner.lock().unwrap().finished.push_back(pcb);
        Ok(())
    }

    /// Number of PCBs currently waiting in the ready queue.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }

    /// Number of PCBs that have finished.
    #[must_use]
    pub fn finished_len(&self) -> usize {
        self.inner.lock().unwrap().finished.len()
    }

    /// Drains and returns every finished PCB, in completion order.
    pub fn drain_finished(&self) -> Vec<Pcb> {
        self.inner.lock().unwrap().finished.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_ready_assigns_quantum() {
        let sched = Scheduler::new(25);
        sched.put_ready(Pcb::new(1, "a", 384)).unwrap();
        let pcb = sched.next_ready().unwrap();
        assert_eq!(pcb.quantum, 25);
    }

    #[test]
    fn next_ready_on_empty_errors() {
        let sched = Scheduler::new(25);
        assert!(matches!(sched.next_ready(), Err(SchedulerError::Empty)));
    }

    #[test]
    fn put_ready_rejects_nonzero_quantum() {
        let sched = Scheduler::new(25);
        let mut pcb = Pcb::new(1, "a", 384);
        pcb.quantum = 3;
        assert!(sched.put_ready(pcb).is_err());
    }

    #[test]
    fn fifo_order_preserved() {
        let sched = Scheduler::new(25);
        sched.put_ready(Pcb::new(1, "a", 384)).unwrap();
        sched.put_ready(Pcb::new(2, "b", 388)).unwrap();
        assert_eq!(sched.next_ready().unwrap().pid, 1);
        assert_eq!(sched.next_ready().unwrap().pid, 2);
    }
}

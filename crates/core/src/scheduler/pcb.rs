//! Process control block: the saved state of one software thread (hilillo).

/// Lifecycle status of a PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcbStatus {
    /// Waiting in the ready queue.
    Ready,
    /// Currently bound to a core.
    Running,
    /// Ran to completion (`FIN`).
    Finished,
}

/// A software thread's saved architectural state.
#[derive(Debug, Clone)]
pub struct Pcb {
    /// Unique process id, assigned by the loader in load order.
    pub pid: u32,
    /// Human-readable name (typically the source file's stem).
    pub name: String,
    /// 32 general registers; `registers[0]` is always kept at zero.
    pub registers: [i32; 32],
    /// Saved program counter.
    pub pc: u32,
    /// Quanta remaining before forced preemption.
    pub quantum: u32,
    /// Total cycles consumed across every scheduling slice.
    pub ticks: u64,
    /// Data-cache hits attributed to this PCB.
    pub hits: u64,
    /// Data-cache misses attributed to this PCB.
    pub misses: u64,
    /// Current lifecycle status.
    pub status: PcbStatus,
}

impl Pcb {
    /// Creates a freshly loaded PCB at `entry_pc`, in the `Ready` state with
    /// zero quantum (the scheduler assigns quantum on `put_ready`).
    #[must_use]
    pub fn new(pid: u32, name: impl Into<String>, entry_pc: u32) -> Self {
        Self {
            pid,
            name: name.into(),
            registers: [0; 32],
            pc: entry_pc,
            quantum: 0,
            ticks: 0,
            hits: 0,
            misses: 0,
            status: PcbStatus::Ready,
        }
    }
}

impl std::fmt::Display for Pcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pcb pid={} name={} pc={} status={:?} ticks={} hits={} misses={}",
            self.pid, self.name, self.pc, self.status, self.ticks, self.hits, self.misses
        )
    }
}

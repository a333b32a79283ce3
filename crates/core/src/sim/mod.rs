//! System wiring and the barrier-synchronized driver loop.
//!
//! Builds main memory, the per-region buses, the per-core caches, and the
//! scheduler from a [`Config`], loads programs into instruction memory ahead
//! of the run, then spawns one host thread per core plus a driver loop that
//! detects global termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use tracing::info;

use crate::bus::Bus;
use crate::cache::AssociativeCache;
use crate::common::error::SimError;
use crate::common::{ClockState, CoreId};
use crate::config::Config;
use crate::core::Core;
use crate::isa::encode;
use crate::memory::MainMemory;
use crate::scheduler::{Pcb, Scheduler};
use crate::stats::RunReport;

/// One decoded source line of a program file: `(opcode, arg1, arg2, arg3)`.
pub type ProgramLine = (u32, u32, u32, i32);

/// The fully wired simulated system: memory, buses, caches, and scheduler
/// for every configured core.
pub struct System {
    config: Config,
    scheduler: Arc<Scheduler>,
    inst_bus: Arc<Bus>,
    data_bus: Arc<Bus>,
    inst_caches: Vec<Arc<AssociativeCache>>,
    data_caches: Vec<Arc<AssociativeCache>>,
    next_pid: u32,
    next_load_addr: u32,
}

/// Everything a caller needs to print the full post-run picture: the
/// statistics report, every finished PCB, each core in its final state, and
/// a snapshot of both memory regions.
pub struct RunOutcome {
    /// Per-core counters and scheduling history.
    pub report: RunReport,
    /// Every PCB that ran to completion, in completion order.
    pub finished: Vec<Pcb>,
    /// Cores in their final state, indexed by core id.
    pub cores: Vec<Core>,
    /// Final contents of the instruction memory region.
    pub inst_memory: MainMemory,
    /// Final contents of the data memory region.
    pub data_memory: MainMemory,
}

impl System {
    /// Builds a system from `config`: allocates both memory regions, wires
    /// one bus per region, and constructs each core's instruction and data
    /// caches against its configured geometry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let num_cores = config.general.num_cores;

        let data_mem = MainMemory::new(
            config.memory.data.start,
            config.memory.data.num_blocks(),
            config.memory.data.words_per_block,
        );
        let inst_mem = MainMemory::new(
            config.memory.instructions.start,
            config.memory.instructions.num_blocks(),
            config.memory.instructions.words_per_block,
        );
        let data_bus = Arc::new(Bus::new(data_mem, config.timing));
        let inst_bus = Arc::new(Bus::new(inst_mem, config.timing));

        let mut inst_caches = Vec::with_capacity(num_cores);
        let mut data_caches = Vec::with_capacity(num_cores);
        for i in 0..num_cores {
            let owner = CoreId(i);
            inst_caches.push(Arc::new(AssociativeCache::new(
                format!("inst{i}"),
                config.memory.instructions.start,
                config.memory.instructions.end,
                config.cache.instructions.associativity,
                config.cache.instructions.blocks_per_core,
                config.memory.instructions.words_per_block,
                owner,
                inst_bus.clone(),
                config.timing,
            )));
            let data_geometry = config.cache.data_geometry_for(i);
            data_caches.push(Arc::new(AssociativeCache::new(
                format!("data{i}"),
                config.memory.data.start,
                config.memory.data.end,
                data_geometry.associativity,
                data_geometry.blocks_per_core,
                config.memory.data.words_per_block,
                owner,
                data_bus.clone(),
                config.timing,
            )));
        }
        inst_bus.set_peers(inst_caches.iter().map(Arc::downgrade).collect());
        data_bus.set_peers(data_caches.iter().map(Arc::downgrade).collect());

        let scheduler = Arc::new(Scheduler::new(config.scheduler.quantum));
        let next_load_addr = config.memory.program_load_base;

        Self {
            config,
            scheduler,
            inst_bus,
            data_bus,
            inst_caches,
            data_caches,
            next_pid: 1,
            next_load_addr,
        }
    }

    /// Loads `name`'s program (already parsed into `(op, a1, a2, a3)` lines)
    /// into instruction memory starting at the next free address, and
    /// ready-queues a fresh PCB entering at that address.
    ///
    /// # Errors
    ///
    /// Returns [`SimError`] if any instruction's fields are out of range for
    /// the codec, or the program doesn't fit in the configured instruction
    /// region.
    pub fn load_program(&mut self, name: impl Into<String>, lines: &[ProgramLine]) -> Result<(), SimError> {
        let words = lines
            .iter()
            .map(|&(op, a1, a2, a3)| Ok(encode(op, a1, a2, a3)? as i32))
            .collect::<Result<Vec<i32>, SimError>>()?;

        let entry_pc = self.next_load_addr;
        self.inst_bus.bulk_load_direct(entry_pc, &words)?;
        self.next_load_addr += (words.len() as u32) * 4;

        let pid = self.next_pid;
        self.next_pid += 1;
        self.scheduler.put_ready(Pcb::new(pid, name, entry_pc))?;
        info!(pid, entry_pc, instructions = words.len(), "loaded program");
        Ok(())
    }

    /// Number of PCBs currently queued to run.
    #[must_use]
    pub fn loaded_programs(&self) -> usize {
        self.scheduler.ready_len()
    }

    /// Spawns one host thread per configured core plus the driver loop,
    /// runs until every ready PCB has finished and all cores report idle,
    /// and returns the aggregated run statistics together with every core's
    /// final state and a snapshot of both memory regions.
    #[must_use]
    pub fn run(self) -> RunOutcome {
        let num_cores = self.config.general.num_cores;
        let barrier = Arc::new(Barrier::new(num_cores + 1));
        let done = Arc::new(AtomicBool::new(false));
        let idle_flags: Vec<Arc<AtomicBool>> =
            (0..num_cores).map(|_| Arc::new(AtomicBool::new(false))).collect();

        let handles: Vec<_> = (0..num_cores)
            .map(|i| {
                let clock = ClockState::new(CoreId(i), barrier.clone());
                let mut core = Core::new(
                    CoreId(i),
                    self.inst_caches[i].clone(),
                    self.data_caches[i].clone(),
                    self.scheduler.clone(),
                    clock,
                );
                let done = done.clone();
                let idle_flag = idle_flags[i].clone();
                std::thread::spawn(move || {
                    core.run(&done, &idle_flag);
                    core
                })
            })
            .collect();

        loop {
            let all_idle = idle_flags.iter().all(|f| f.load(Ordering::Acquire));
            if all_idle {
                done.store(true, Ordering::Release);
                barrier.wait();
                break;
            }
            barrier.wait();
        }

        let mut report = RunReport::new(num_cores);
        let mut cores = Vec::with_capacity(num_cores);
        for handle in handles {
            let core = handle.join().expect("core worker thread panicked");
            report.cores[core.id().0] = core.stats().clone();
            for (&pid, &count) in core.schedule_log() {
                *report.times_scheduled.entry(pid).or_insert(0) += count;
            }
            cores.push(core);
        }
        cores.sort_by_key(|c| c.id().0);
        info!("simulation complete");

        RunOutcome {
            report,
            finished: self.scheduler.drain_finished(),
            cores,
            inst_memory: self.inst_bus.memory_snapshot(),
            data_memory: self.data_bus.memory_snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::opcodes::{ADDI, FIN};

    #[test]
    fn loads_and_runs_single_trivial_program() {
        let mut config = Config::default();
        config.general.num_cores = 1;
        let mut sys = System::new(config);
        let program = [(ADDI, 3, 0, 5), (FIN, 0, 0, 0)];
        sys.load_program("trivial", &program).unwrap();
        assert_eq!(sys.loaded_programs(), 1);
        let outcome = sys.run();
        assert_eq!(outcome.report.cores.len(), 1);
        assert_eq!(outcome.report.times_scheduled.get(&1).copied(), Some(1));
        assert_eq!(outcome.cores.len(), 1);
        assert_eq!(outcome.finished.len(), 1);
    }

    #[test]
    fn two_cores_both_go_idle_with_no_programs() {
        let mut config = Config::default();
        config.general.num_cores = 2;
        let sys = System::new(config);
        let outcome = sys.run();
        assert_eq!(outcome.report.cores.len(), 2);
        assert!(outcome.report.times_scheduled.is_empty());
        assert!(outcome.finished.is_empty());
    }

    #[test]
    fn finished_pcb_count_conserves_loaded_program_count() {
        let mut config = Config::default();
        config.general.num_cores = 2;
        let mut sys = System::new(config);
        for (name, imm) in [("a", 1), ("b", 2), ("c", 3)] {
            sys.load_program(name, &[(ADDI, 3, 0, imm), (FIN, 0, 0, 0)]).unwrap();
        }
        let scheduler = sys.scheduler.clone();
        assert_eq!(scheduler.ready_len(), 3);

        let outcome = sys.run();

        assert_eq!(
            outcome.report.times_scheduled.len(),
            3,
            "every loaded pid must have been scheduled"
        );
        assert_eq!(scheduler.ready_len(), 0, "no pcb may remain ready once all programs finish");
        assert_eq!(outcome.finished.len(), 3, "every loaded pcb must retire exactly once");
    }

    #[test]
    fn all_cores_observe_the_same_global_cycle_count() {
        // Every core ticks the same shared barrier once per loop iteration
        // whether running or idle, so two cores finishing at different
        // instruction counts still settle on the same final cycle count.
        let mut config = Config::default();
        config.general.num_cores = 2;
        let mut sys = System::new(config);
        sys.load_program("short", &[(FIN, 0, 0, 0)]).unwrap();
        sys.load_program("longer", &[(ADDI, 3, 0, 1), (ADDI, 4, 0, 2), (FIN, 0, 0, 0)])
            .unwrap();

        let outcome = sys.run();

        assert_eq!(outcome.report.cores.len(), 2);
        assert_eq!(
            outcome.report.cores[0].cycles, outcome.report.cores[1].cycles,
            "global clock must stay in lockstep"
        );
        assert!(outcome.report.cores[0].cycles > 0);
    }
}

//! The processor core: register file, PC, five-stage pipeline, and the
//! context switch that binds/unbinds a [`Pcb`] to a quantum slice.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::AssociativeCache;
use crate::common::{ClockState, CoreId};
use crate::isa::opcodes::{ArithOp, BranchOp, Opcode, FIN, NOOP};
use crate::isa::{decode, Decoded};
use crate::scheduler::{Pcb, PcbStatus, Scheduler};
use crate::stats::CoreStats;

/// Register index of the program counter, per the architectural view in
/// which PC and LR are addressable alongside the 32 general registers.
pub const PC_REGISTER: u32 = 32;

/// Register index of the LR reservation, read as the reserved byte address
/// or `-1` when no reservation is held.
pub const LR_REGISTER: u32 = 33;

const NUM_REGISTERS: usize = 32;

/// Whether a core is actively running a dispatched PCB or has nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// A PCB is bound to the core and stepping through instructions.
    Running,
    /// The ready queue was empty at the last dispatch attempt.
    Idle,
}

/// One simulated processor: register file, program counter, and the
/// instruction/data caches it drives through the five pipeline stages.
pub struct Core {
    id: CoreId,
    registers: [i32; NUM_REGISTERS],
    pc: u32,
    inst_cache: Arc<AssociativeCache>,
    data_cache: Arc<AssociativeCache>,
    scheduler: Arc<Scheduler>,
    clock: ClockState,
    stats: CoreStats,
    current: Option<Pcb>,
    dispatch_cycle: u64,
    state: RunState,
    schedule_log: HashMap<u32, u64>,
}

impl Core {
    /// Creates a core with no PCB bound yet.
    #[must_use]
    pub fn new(
        id: CoreId,
        inst_cache: Arc<AssociativeCache>,
        data_cache: Arc<AssociativeCache>,
        scheduler: Arc<Scheduler>,
        clock: ClockState,
    ) -> Self {
        Self {
            id,
            registers: [0; NUM_REGISTERS],
            pc: 0,
            inst_cache,
            data_cache,
            scheduler,
            clock,
            stats: CoreStats::default(),
            current: None,
            dispatch_cycle: 0,
            state: RunState::Idle,
            schedule_log: HashMap::new(),
        }
    }

    /// This core's identity.
    #[must_use]
    pub fn id(&self) -> CoreId {
        self.id
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    /// PID -> number of times this core dispatched that PCB.
    #[must_use]
    pub fn schedule_log(&self) -> &HashMap<u32, u64> {
        &self.schedule_log
    }

    /// r0 always reads zero; any other index reads the live register.
    fn register(&self, idx: u32) -> i32 {
        if idx == 0 {
            0
        } else {
            self.registers[idx as usize]
        }
    }

    /// Writes to r0 are silently dropped.
    fn set_register(&mut self, idx: u32, val: i32) {
        if idx != 0 {
            self.registers[idx as usize] = val;
        }
    }

    /// Reads a register by its architectural index, including the
    /// non-instruction-addressable [`PC_REGISTER`] and [`LR_REGISTER`] used
    /// for display and debugging.
    #[must_use]
    pub fn read_register(&self, idx: u32) -> i32 {
        match idx {
            PC_REGISTER => self.pc as i32,
            LR_REGISTER => self.data_cache.reserved_address().map_or(-1, |a| a as i32),
            _ => self.register(idx),
        }
    }

    /// Runs pipeline steps (or idles) until `done` is observed set, yielding
    /// one barrier tick per simulated cycle regardless of which. `idle_flag`
    /// is kept in sync with `self.state` so a driver thread can observe
    /// termination without reaching into the core directly.
    pub fn run(&mut self, done: &AtomicBool, idle_flag: &AtomicBool) {
        loop {
            match self.state {
                RunState::Running => {
                    idle_flag.store(false, Ordering::Release);
                    self.step();
                }
                RunState::Idle => {
                    self.try_dispatch();
                    if self.state == RunState::Idle {
                        idle_flag.store(true, Ordering::Release);
                        self.clock.tick();
                        self.stats.cycles = self.clock.cycles;
                    } else {
                        idle_flag.store(false, Ordering::Release);
                    }
                }
            }
            if done.load(Ordering::Acquire) {
                break;
            }
        }
    }

    fn try_dispatch(&mut self) {
        match self.scheduler.next_ready() {
            Ok(mut pcb) => {
                self.pc = pcb.pc;
                self.registers = pcb.registers;
                pcb.status = PcbStatus::Running;
                self.dispatch_cycle = self.clock.cycles;
                *self.schedule_log.entry(pcb.pid).or_insert(0) += 1;
                debug!(core = self.id.0, pid = pcb.pid, "dispatched");
                self.current = Some(pcb);
                self.state = RunState::Running;
                self.stats.context_switches += 1;
            }
            Err(_) => {
                self.state = RunState::Idle;
            }
        }
    }

    /// Executes one instruction through all five pipeline stages, charging
    /// exactly one barrier tick plus whatever the caches charge internally.
    fn step(&mut self) {
        let pc_before_fetch = self.pc;
        let (raw, icache_hit) = match self.inst_cache.load(pc_before_fetch, &mut self.clock) {
            Ok(v) => v,
            Err(err) => {
                warn!(core = self.id.0, %err, addr = pc_before_fetch, "instruction fetch out of range, aborting pcb");
                self.finish_current();
                return;
            }
        };
        if icache_hit {
            self.stats.icache_hits += 1;
        } else {
            self.stats.icache_misses += 1;
        }
        let pc_after_fetch = pc_before_fetch + 4;
        self.pc = pc_after_fetch;

        let decoded = decode(raw as u32);
        if decoded.op != NOOP && Opcode::classify(decoded.op) == Opcode::Noop {
            warn!(core = self.id.0, op = decoded.op, "unknown opcode, treated as noop");
        }
        let opcode = Opcode::classify(decoded.op);
        trace!(core = self.id.0, pc = pc_before_fetch, op = decoded.op, "decoded");

        self.execute(opcode, decoded, pc_after_fetch);

        self.clock.tick();
        self.stats.cycles = self.clock.cycles;

        if let Some(pcb) = self.current.as_mut() {
            pcb.quantum = pcb.quantum.saturating_sub(1);
            if pcb.quantum == 0 {
                drop(pcb);
                self.context_switch(false);
            }
        }
    }

    fn execute(&mut self, opcode: Opcode, decoded: Decoded, pc_after_fetch: u32) {
        match opcode {
            Opcode::Arithmetic(op) => {
                let rd = decoded.arg1;
                let rs1 = self.register(decoded.arg2);
                let rs2 = self.register(decoded.arg3 as u32);
                let result = match op {
                    ArithOp::Add => rs1.wrapping_add(rs2),
                    ArithOp::Sub => rs1.wrapping_sub(rs2),
                    ArithOp::Mul => rs1.wrapping_mul(rs2),
                    ArithOp::Div => floor_div(rs1, rs2),
                };
                self.set_register(rd, result);
            }
            Opcode::AddImmediate => {
                let rd = decoded.arg1;
                let rs1 = self.register(decoded.arg2);
                self.set_register(rd, rs1.wrapping_add(decoded.arg3));
            }
            Opcode::LoadWord => {
                let rd = decoded.arg1;
                let base = self.register(decoded.arg2);
                let addr = effective_address(base, decoded.arg3);
                match self.data_cache.load(addr, &mut self.clock) {
                    Ok((word, hit)) => {
                        self.record_dcache(hit);
                        self.set_register(rd, word);
                    }
                    Err(err) => warn!(core = self.id.0, %err, addr, "lw out of range"),
                }
            }
            Opcode::StoreWord => {
                let value = self.register(decoded.arg1);
                let base = self.register(decoded.arg2);
                let addr = effective_address(base, decoded.arg3);
                match self.data_cache.store(addr, value, &mut self.clock) {
                    Ok(hit) => self.record_dcache(hit),
                    Err(err) => warn!(core = self.id.0, %err, addr, "sw out of range"),
                }
            }
            Opcode::LoadReserved => {
                let rd = decoded.arg1;
                let addr = self.register(decoded.arg2) as u32;
                match self.data_cache.load_reserved(addr, &mut self.clock) {
                    Ok((word, hit)) => {
                        self.record_dcache(hit);
                        self.set_register(rd, word);
                    }
                    Err(err) => warn!(core = self.id.0, %err, addr, "lr out of range"),
                }
            }
            Opcode::StoreConditional => {
                let addr = self.register(decoded.arg1) as u32;
                let rd_and_rs2 = decoded.arg2;
                let value = self.register(rd_and_rs2);
                match self.data_cache.store_conditional(addr, value, &mut self.clock) {
                    Ok((hit, success)) => {
                        self.record_dcache(hit);
                        self.set_register(rd_and_rs2, if success { value } else { 0 });
                    }
                    Err(err) => warn!(core = self.id.0, %err, addr, "sc out of range"),
                }
            }
            Opcode::Branch(cmp) => {
                let rs1 = self.register(decoded.arg1);
                let rs2 = self.register(decoded.arg2);
                let taken = match cmp {
                    BranchOp::Eq => rs1 == rs2,
                    BranchOp::Ne => rs1 != rs2,
                };
                if taken {
                    self.pc = pc_after_fetch.wrapping_add((4 * decoded.arg3) as u32);
                }
            }
            Opcode::Jal => {
                let rd = decoded.arg1;
                self.set_register(rd, pc_after_fetch as i32);
                self.pc = pc_after_fetch.wrapping_add(decoded.arg3 as u32);
            }
            Opcode::Jalr => {
                let rd = decoded.arg1;
                let rs1 = self.register(decoded.arg2);
                let link = pc_after_fetch as i32;
                self.pc = effective_address(rs1, decoded.arg3);
                self.set_register(rd, link);
            }
            Opcode::Noop => {}
            Opcode::Fin => {
                self.finish_current();
            }
        }
    }

    fn record_dcache(&mut self, hit: bool) {
        if hit {
            self.stats.dcache_hits += 1;
        } else {
            self.stats.dcache_misses += 1;
        }
    }

    fn finish_current(&mut self) {
        if let Some(pcb) = self.current.as_mut() {
            pcb.quantum = 0;
        }
        self.context_switch(true);
    }

    /// Clears the LR reservation, writes architectural state back into the
    /// current PCB, returns it to the scheduler, and dispatches the next
    /// ready PCB (or goes idle). Charges one simulated cycle.
    fn context_switch(&mut self, finished: bool) {
        self.data_cache.clear_reservation(&mut self.clock);

        if let Some(mut pcb) = self.current.take() {
            pcb.pc = self.pc;
            pcb.registers = self.registers;
            pcb.ticks += self.clock.cycles.saturating_sub(self.dispatch_cycle);
            pcb.hits = self.stats.dcache_hits;
            pcb.misses = self.stats.dcache_misses;
            if finished {
                pcb.status = PcbStatus::Finished;
                pcb.quantum = 0;
                if let Err(err) = self.scheduler.put_finished(pcb) {
                    warn!(core = self.id.0, %err, "failed to retire pcb");
                }
            } else {
                pcb.quantum = 0;
                if let Err(err) = self.scheduler.put_ready(pcb) {
                    warn!(core = self.id.0, %err, "failed to requeue pcb");
                }
            }
        }

        self.clock.tick();
        self.stats.cycles = self.clock.cycles;
        self.try_dispatch();
    }
}

impl fmt::Display for Core {
    /// PC, LR, and the 32 general registers, eight per row.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "core{}: PC: {}, LR: {}, ticks: {}",
            self.id.0,
            self.read_register(PC_REGISTER),
            self.read_register(LR_REGISTER),
            self.clock.cycles
        )?;
        writeln!(f, "Regs:")?;
        for row in 0..4 {
            let line: Vec<String> = (0..8)
                .map(|col| {
                    let idx = row * 8 + col;
                    format!("r{idx:02}: {:6}", self.register(idx))
                })
                .collect();
            writeln!(f, "  [{}]", line.join(", "))?;
        }
        write!(f, "{}", self.inst_cache)?;
        write!(f, "{}", self.data_cache)
    }
}

/// Floor division, matching the spec's integer-division semantics rather
/// than Rust's truncating default.
fn floor_div(a: i32, b: i32) -> i32 {
    if b == 0 {
        warn!("division by zero, returning 0");
        return 0;
    }
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn effective_address(base: i32, imm: i32) -> u32 {
    base.wrapping_add(imm) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::config::TimingConfig;
    use crate::isa::encode;
    use crate::memory::MainMemory;
    use std::sync::{Arc, Barrier};

    fn single_core_fixture(program: &[(u32, u32, u32, i32)]) -> Core {
        let timing = TimingConfig::default();
        let data_mem = MainMemory::new(0, 24, 4);
        let inst_mem = MainMemory::new(384, 40, 4);
        let data_bus = Arc::new(Bus::new(data_mem, timing));
        let inst_bus = Arc::new(Bus::new(inst_mem, timing));
        let data_cache = Arc::new(AssociativeCache::new(
            "data0", 0, 384, 1, 8, 4, CoreId(0), data_bus.clone(), timing,
        ));
        let inst_cache = Arc::new(AssociativeCache::new(
            "inst0", 384, 1024, 1, 8, 4, CoreId(0), inst_bus.clone(), timing,
        ));
        data_bus.set_peers(vec![Arc::downgrade(&data_cache)]);
        inst_bus.set_peers(vec![Arc::downgrade(&inst_cache)]);
        let scheduler = Arc::new(Scheduler::new(25));

        let words: Vec<i32> = program
            .iter()
            .map(|&(op, a1, a2, a3)| encode(op, a1, a2, a3).unwrap() as i32)
            .collect();
        {
            let barrier = Arc::new(Barrier::new(1));
            let mut setup_clock = ClockState::new(CoreId(0), barrier);
            for (i, &w) in words.iter().enumerate() {
                inst_cache.store(384 + (i as u32) * 4, w, &mut setup_clock).unwrap();
            }
        }
        scheduler.put_ready(Pcb::new(1, "seed", 384)).unwrap();

        let barrier = Arc::new(Barrier::new(1));
        let clock = ClockState::new(CoreId(0), barrier);
        let mut core = Core::new(CoreId(0), inst_cache, data_cache, scheduler, clock);
        core.try_dispatch();
        core
    }

    // Runs `program` to completion (its last instruction must be `FIN`) and
    // returns the core for register/stats inspection.
    fn run_to_completion(core: &mut Core, steps: usize) {
        for _ in 0..steps {
            core.step();
            if core.current.is_none() {
                break;
            }
        }
    }

    #[test]
    fn arithmetic_and_memory_traffic_single_core() {
        use crate::isa::opcodes::{ADDI, FIN, LW, SW};
        // Mirrors the "arithmetic and LW/SW on one core" scenario: a handful
        // of immediates, a store/load round trip through memory, then FIN.
        let program = [
            (ADDI, 3, 0, 5),
            (ADDI, 4, 0, 200),
            (ADDI, 8, 0, 8),
            (ADDI, 20, 0, 2),
            (SW, 4, 0, 0),
            (LW, 9, 0, 0),
            (FIN, 0, 0, 0),
        ];
        let mut core = single_core_fixture(&program);
        run_to_completion(&mut core, program.len());

        assert_eq!(core.register(3), 5);
        assert_eq!(core.register(4), 200);
        assert_eq!(core.register(8), 8);
        assert_eq!(core.register(20), 2);
        assert_eq!(core.register(9), 200, "LW must read back the SW'd value");
        assert_eq!(core.stats().context_switches, 1);
    }

    #[test]
    fn loop_branch_and_memory_traffic_single_core() {
        use crate::isa::opcodes::{ADD, ADDI, BNE, FIN, LW, SW};
        // r1 counts down from 3, accumulating r7 (5) into r2 each pass, then
        // spills the final accumulator through memory into r10.
        let program = [
            (ADDI, 1, 0, 3),  // 384: r1 <- 3
            (ADDI, 2, 0, 0),  // 388: r2 <- 0
            (ADDI, 7, 0, 5),  // 392: r7 <- 5
            (ADD, 2, 2, 7),   // 396: r2 += r7  <- loop target
            (ADDI, 1, 1, -1), // 400: r1 -= 1
            (BNE, 1, 0, -3),  // 404: branch to 396 while r1 != r0
            (SW, 2, 0, 0),    // 408: mem[0] <- r2
            (LW, 10, 0, 0),   // 412: r10 <- mem[0]
            (FIN, 0, 0, 0),   // 416
        ];
        let mut core = single_core_fixture(&program);
        // Three loop passes re-execute instructions 396/400/404 twice extra.
        run_to_completion(&mut core, program.len() + 2 * 3);

        assert_eq!(core.register(1), 0);
        assert_eq!(core.register(2), 15);
        assert_eq!(core.register(7), 5);
        assert_eq!(core.register(10), 15);
        assert_eq!(core.stats().context_switches, 1);
    }

    #[test]
    fn branch_taken_updates_pc() {
        use crate::isa::opcodes::{BEQ, NOOP};
        let program = [(BEQ, 0, 0, 2), (NOOP, 0, 0, 0), (NOOP, 0, 0, 0)];
        let mut core = single_core_fixture(&program);
        core.step();
        // pc_after_fetch was 388; branch taken to 388 + 4*2 = 396.
        assert_eq!(core.pc, 396);
    }

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
    }

    #[test]
    fn read_register_exposes_pc_and_lr() {
        use crate::isa::opcodes::{LR, NOOP};
        let program = [(LR, 5, 0, 0), (NOOP, 0, 0, 0)];
        let mut core = single_core_fixture(&program);
        assert_eq!(core.read_register(LR_REGISTER), -1, "no reservation held yet");

        core.step();

        assert_eq!(core.read_register(PC_REGISTER), 388);
        assert_eq!(core.read_register(LR_REGISTER), 0, "LR reserves the loaded block's address");
    }

    #[test]
    fn display_includes_pc_lr_and_register_rows() {
        let core = single_core_fixture(&[(NOOP, 0, 0, 0)]);
        let text = format!("{core}");
        assert!(text.contains("PC: 384"));
        assert!(text.contains("LR: -1"));
        assert!(text.contains("r00:"));
        assert!(text.contains("r31:"));
    }
}

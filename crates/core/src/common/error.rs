//! Error types for the simulator core.
//!
//! Every fallible subsystem gets its own focused error enum; [`SimError`]
//! aggregates them at the boundary the driver and CLI actually see.

use thiserror::Error;

/// Errors raised by the instruction codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// `op` was outside `0..256`.
    #[error("opcode {0} out of range (expected 0..256)")]
    OpcodeOutOfRange(i64),
    /// `a1` or `a2` was outside `0..32`.
    #[error("register argument {0} out of range (expected 0..32)")]
    RegisterArgOutOfRange(i64),
    /// `a3` was outside `-2^13..2^13`.
    #[error("immediate argument {0} out of range (expected -8192..8192)")]
    ImmediateOutOfRange(i64),
}

/// Errors raised by main memory.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// An access fell outside the region's mapped `[start, end)` range.
    #[error("address {addr:#x} out of range [{start:#x}, {end:#x})")]
    AddressOutOfRange {
        /// The address that was accessed.
        addr: u32,
        /// Inclusive lower bound of the mapped region.
        start: u32,
        /// Exclusive upper bound of the mapped region.
        end: u32,
    },
    /// `set` was given a block whose word count didn't match the region's `P`.
    #[error("block word count {given} does not match region width {expected}")]
    BlockWidthMismatch {
        /// Word count on the caller's block.
        given: usize,
        /// Word count the region expects.
        expected: usize,
    },
}

/// Errors raised by the scheduler.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// `next_ready` was called with no PCB available.
    #[error("ready queue is empty")]
    Empty,
    /// `put_ready`/`put_finished` was called on a PCB still mid-quantum.
    #[error("pcb {pid} still has {quantum} quanta remaining")]
    QuantumNotExhausted {
        /// The offending PCB's PID.
        pid: u32,
        /// Its remaining quantum.
        quantum: u32,
    },
}

/// Top-level error type returned across the core library's public boundary.
#[derive(Debug, Error)]
pub enum SimError {
    /// See [`CodecError`].
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// See [`MemoryError`].
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// See [`SchedulerError`].
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The program file loader failed to parse a line.
    #[error("malformed program line {line}: {reason}")]
    MalformedProgram {
        /// 1-based line number in the source file.
        line: usize,
        /// Human-readable parse failure.
        reason: String,
    },
    /// Config deserialization failed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

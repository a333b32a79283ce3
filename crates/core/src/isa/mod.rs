//! Instruction set: the bespoke 32-bit fixed-layout encoding and its opcodes.

/// Bit-level encode/decode of the 32-bit instruction word.
pub mod codec;
/// Opcode constants and the per-opcode argument-role classification.
pub mod opcodes;

pub use codec::{decode, encode, Decoded};
pub use opcodes::Opcode;

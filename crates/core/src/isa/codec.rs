//! Instruction codec: `encode`/`decode` over the 32-bit fixed layout.
//!
//! Layout (little-endian, bit 0 is the LSB): `opcode[0..8)`, `arg1[8..13)`,
//! `arg2[13..18)`, `arg3[18..32)`. `arg3` is 14 bits, signed two's-complement,
//! and is sign-extended on decode.

use crate::common::error::CodecError;

const OPCODE_BITS: u32 = 8;
const ARG_BITS: u32 = 5;
const ARG3_BITS: u32 = 14;

const OPCODE_SHIFT: u32 = 0;
const ARG1_SHIFT: u32 = OPCODE_BITS;
const ARG2_SHIFT: u32 = ARG1_SHIFT + ARG_BITS;
const ARG3_SHIFT: u32 = ARG2_SHIFT + ARG_BITS;

const OPCODE_MASK: u32 = (1 << OPCODE_BITS) - 1;
const ARG_MASK: u32 = (1 << ARG_BITS) - 1;
const ARG3_MASK: u32 = (1 << ARG3_BITS) - 1;

/// A decoded instruction word: opcode plus its three raw argument fields.
///
/// `arg3` is already sign-extended to `i32`; callers that need an immediate
/// use it directly, callers that need a register index cast it to `u32`
/// knowing the caller only does so for opcodes whose `arg3` is a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Raw opcode byte.
    pub op: u32,
    /// First argument (register index, 0..32).
    pub arg1: u32,
    /// Second argument (register index, 0..32).
    pub arg2: u32,
    /// Third argument (sign-extended 14-bit immediate).
    pub arg3: i32,
}

/// Sign-extends a `bits`-wide two's-complement value held in the low bits of `val`.
fn sign_extend(val: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((val << shift) as i32) >> shift
}

/// Encodes an instruction from its opcode and three argument fields.
///
/// # Errors
///
/// Returns [`CodecError`] if `op` is outside `0..256`, `a1`/`a2` are outside
/// `0..32`, or `a3` is outside `-8192..8192`.
pub fn encode(op: u32, a1: u32, a2: u32, a3: i32) -> Result<u32, CodecError> {
    if op >= 1 << OPCODE_BITS {
        return Err(CodecError::OpcodeOutOfRange(op.into()));
    }
    if a1 >= 1 << ARG_BITS {
        return Err(CodecError::RegisterArgOutOfRange(a1.into()));
    }
    if a2 >= 1 << ARG_BITS {
        return Err(CodecError::RegisterArgOutOfRange(a2.into()));
    }
    let half_range = 1i32 << (ARG3_BITS - 1);
    if a3 < -half_range || a3 >= half_range {
        return Err(CodecError::ImmediateOutOfRange(a3.into()));
    }

    let a3_bits = (a3 as u32) & ARG3_MASK;
    Ok((op << OPCODE_SHIFT) | (a1 << ARG1_SHIFT) | (a2 << ARG2_SHIFT) | (a3_bits << ARG3_SHIFT))
}

/// Decodes a 32-bit instruction word into its opcode and argument fields.
///
/// Decode never fails: every 32-bit pattern is a valid (if possibly unknown)
/// instruction word, per §7's treatment of unknown opcodes as a logged NOOP
/// rather than a decode error.
#[must_use]
pub fn decode(word: u32) -> Decoded {
    let op = (word >> OPCODE_SHIFT) & OPCODE_MASK;
    let arg1 = (word >> ARG1_SHIFT) & ARG_MASK;
    let arg2 = (word >> ARG2_SHIFT) & ARG_MASK;
    let arg3_raw = (word >> ARG3_SHIFT) & ARG3_MASK;
    let arg3 = sign_extend(arg3_raw, ARG3_BITS);

    Decoded {
        op,
        arg1,
        arg2,
        arg3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        let word = encode(71, 3, 4, -100).unwrap();
        let d = decode(word);
        assert_eq!((d.op, d.arg1, d.arg2, d.arg3), (71, 3, 4, -100));
    }

    #[test]
    fn round_trip_extremes() {
        let word = encode(255, 31, 31, -8192).unwrap();
        let d = decode(word);
        assert_eq!((d.op, d.arg1, d.arg2, d.arg3), (255, 31, 31, -8192));

        let word = encode(0, 0, 0, 8191).unwrap();
        let d = decode(word);
        assert_eq!((d.op, d.arg1, d.arg2, d.arg3), (0, 0, 0, 8191));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(encode(256, 0, 0, 0).is_err());
        assert!(encode(0, 32, 0, 0).is_err());
        assert!(encode(0, 0, 32, 0).is_err());
        assert!(encode(0, 0, 0, 8192).is_err());
        assert!(encode(0, 0, 0, -8193).is_err());
    }

    #[cfg(test)]
    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_encode_round_trips(
                op in 0u32..256,
                a1 in 0u32..32,
                a2 in 0u32..32,
                a3 in -8192i32..8192,
            ) {
                let word = encode(op, a1, a2, a3).unwrap();
                let d = decode(word);
                prop_assert_eq!((d.op, d.arg1, d.arg2, d.arg3), (op, a1, a2, a3));
            }
        }
    }
}

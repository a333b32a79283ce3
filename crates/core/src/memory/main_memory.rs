//! Main memory: a contiguous, block-addressed backing store.
//!
//! Has no internal concurrency control of its own — callers (the bus) are
//! responsible for serializing access under the bus lock.

use std::fmt;

use super::block::Block;
use crate::common::error::MemoryError;

/// A contiguous backing store covering `[start, end)`, organized into blocks
/// of `words_per_block` words each.
#[derive(Debug, Clone)]
pub struct MainMemory {
    start: u32,
    end: u32,
    words_per_block: usize,
    blocks: Vec<Block>,
}

impl MainMemory {
    /// Creates a zero-filled region `[start, start + num_blocks*words_per_block*4)`.
    #[must_use]
    pub fn new(start: u32, num_blocks: usize, words_per_block: usize) -> Self {
        let blocks = (0..num_blocks)
            .map(|i| {
                let block_number = start / (words_per_block as u32 * 4) + i as u32;
                Block::zeroed(block_number, words_per_block)
            })
            .collect();
        let end = start + (num_blocks * words_per_block * 4) as u32;
        Self {
            start,
            end,
            words_per_block,
            blocks,
        }
    }

    /// Inclusive lower bound of this region.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Exclusive upper bound of this region.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    fn bytes_per_block(&self) -> u32 {
        self.words_per_block as u32 * 4
    }

    fn block_index(&self, addr: u32) -> Result<usize, MemoryError> {
        if addr < self.start || addr >= self.end {
            return Err(MemoryError::AddressOutOfRange {
                addr,
                start: self.start,
                end: self.end,
            });
        }
        Ok(((addr - self.start) / self.bytes_per_block()) as usize)
    }

    /// Returns a copy of the block containing `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside
    /// `[start, end)`.
    pub fn get(&self, addr: u32) -> Result<Block, MemoryError> {
        let idx = self.block_index(addr)?;
        Ok(self.blocks[idx].clone())
    }

    /// Overwrites the backing block at `addr`'s block with `cache_block`'s words.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside
    /// `[start, end)`, or [`MemoryError::BlockWidthMismatch`] if
    /// `cache_block.words.len()` doesn't match this region's `words_per_block`.
    pub fn set(&mut self, addr: u32, cache_block: &Block) -> Result<(), MemoryError> {
        let idx = self.block_index(addr)?;
        if cache_block.words.len() != self.words_per_block {
            return Err(MemoryError::BlockWidthMismatch {
                given: cache_block.words.len(),
                expected: self.words_per_block,
            });
        }
        self.blocks[idx].words.clone_from(&cache_block.words);
        Ok(())
    }

    /// Writes `words` contiguously starting at `addr`, spilling across blocks.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if any written word would
    /// fall outside `[start, end)`.
    pub fn bulk_load(&mut self, addr: u32, words: &[i32]) -> Result<(), MemoryError> {
        for (i, &w) in words.iter().enumerate() {
            let word_addr = addr + (i as u32) * 4;
            let idx = self.block_index(word_addr)?;
            let offset = ((word_addr - self.start) % self.bytes_per_block()) / 4;
            self.blocks[idx].set_word(offset as usize, w);
        }
        Ok(())
    }

    /// Reads the single word at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AddressOutOfRange`] if `addr` is outside
    /// `[start, end)`.
    pub fn load_word(&self, addr: u32) -> Result<i32, MemoryError> {
        let idx = self.block_index(addr)?;
        let offset = ((addr - self.start) % self.bytes_per_block()) / 4;
        Ok(self.blocks[idx].word(offset as usize))
    }
}

impl fmt::Display for MainMemory {
    /// One line per block: its number and current words.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "memory [{:#x}, {:#x}):", self.start, self.end)?;
        for block in &self.blocks {
            writeln!(f, "  block {}: {:?}", block.block_number, block.words)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_out_of_range_errors() {
        let mem = MainMemory::new(0, 24, 4);
        assert!(mem.get(384).is_err());
        assert!(mem.get(0).is_ok());
    }

    #[test]
    fn bulk_load_round_trips() {
        let mut mem = MainMemory::new(0, 24, 4);
        let words = [10, 20, 30, 40, 50];
        mem.bulk_load(0, &words).unwrap();
        for (i, &w) in words.iter().enumerate() {
            assert_eq!(mem.load_word((i as u32) * 4).unwrap(), w);
        }
    }

    #[test]
    fn set_requires_matching_width() {
        let mut mem = MainMemory::new(0, 24, 4);
        let bad = Block::zeroed(0, 2);
        assert!(mem.set(0, &bad).is_err());
    }

    #[cfg(test)]
    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn bulk_load_then_get_round_trips(words in proptest::collection::vec(-1000i32..1000, 1..20)) {
                let mut mem = MainMemory::new(0, 24, 4);
                mem.bulk_load(0, &words).unwrap();
                for (i, &w) in words.iter().enumerate() {
                    prop_assert_eq!(mem.load_word((i as u32) * 4).unwrap(), w);
                }
            }
        }
    }
}

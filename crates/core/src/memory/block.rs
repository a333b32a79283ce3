//! The aligned `P`-word block shared by main memory and cache lines.

/// An aligned sequence of `P` words backing one memory block or cache line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block number (`addr / (P*4)`) this data belongs to.
    pub block_number: u32,
    /// The `P` words held by this block.
    pub words: Vec<i32>,
}

impl Block {
    /// Creates a zero-filled block of `words_per_block` words for `block_number`.
    #[must_use]
    pub fn zeroed(block_number: u32, words_per_block: usize) -> Self {
        Self {
            block_number,
            words: vec![0; words_per_block],
        }
    }

    /// Reads the word at `offset` within the block.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of range for this block's width; callers
    /// derive `offset` from address decomposition, which always keeps it
    /// in range.
    #[must_use]
    pub fn word(&self, offset: usize) -> i32 {
        self.words[offset]
    }

    /// Writes `val` to `offset` within the block.
    pub fn set_word(&mut self, offset: usize, val: i32) {
        self.words[offset] = val;
    }
}

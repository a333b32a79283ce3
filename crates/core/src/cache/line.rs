//! Cache line and set storage: MSI state plus strict per-set FIFO replacement.

use crate::memory::Block;

/// MSI coherence state of one cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsiState {
    /// Not holding valid data.
    Invalid,
    /// Valid, clean, possibly shared with peer caches.
    Shared,
    /// Valid, dirty, exclusively owned by this cache.
    Modified,
}

/// One line: a tag (block number), MSI state, and `P` data words.
#[derive(Debug, Clone)]
pub struct CacheLine {
    /// Block number this line mirrors, meaningful only while `state != Invalid`.
    pub tag: u32,
    /// Coherence state.
    pub state: MsiState,
    /// Cached data words.
    pub words: Vec<i32>,
}

impl CacheLine {
    /// An empty, invalid line sized for `words_per_block` words.
    #[must_use]
    pub fn invalid(words_per_block: usize) -> Self {
        Self {
            tag: 0,
            state: MsiState::Invalid,
            words: vec![0; words_per_block],
        }
    }

    /// Whether this line currently mirrors `tag`.
    #[must_use]
    pub fn matches(&self, tag: u32) -> bool {
        self.state != MsiState::Invalid && self.tag == tag
    }

    /// Installs `block` into this line with the given MSI state.
    pub fn install(&mut self, block: &Block, state: MsiState) {
        self.tag = block.block_number;
        self.state = state;
        self.words.clone_from(&block.words);
    }

    /// Snapshots this line's contents as a standalone [`Block`].
    #[must_use]
    pub fn snapshot(&self) -> Block {
        Block {
            block_number: self.tag,
            words: self.words.clone(),
        }
    }
}

/// A set of `associativity` lines plus the FIFO victim pointer.
#[derive(Debug, Clone)]
pub struct CacheSet {
    /// The lines in this set.
    pub lines: Vec<CacheLine>,
    /// Index of the next line to evict (round-robin, wraps modulo `lines.len()`).
    pub next_victim: usize,
}

impl CacheSet {
    /// Creates an empty set with `associativity` invalid lines.
    #[must_use]
    pub fn new(associativity: usize, words_per_block: usize) -> Self {
        Self {
            lines: (0..associativity)
                .map(|_| CacheLine::invalid(words_per_block))
                .collect(),
            next_victim: 0,
        }
    }

    /// Finds the line matching `tag`, if present and valid.
    #[must_use]
    pub fn find(&self, tag: u32) -> Option<usize> {
        self.lines.iter().position(|l| l.matches(tag))
    }

    /// Advances the FIFO pointer to the next way, wrapping modulo associativity.
    pub fn advance_victim(&mut self) {
        self.next_victim = (self.next_victim + 1) % self.lines.len();
    }
}

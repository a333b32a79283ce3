//! Simulator configuration.
//!
//! [`Config`] is deserializable from JSON via `serde`; every field has a
//! default reproducing the system's reference geometry and timing constants,
//! so `Config::default()` and an empty `{}` document behave identically.
//!
//! ```
//! use rvsim_msi_core::config::Config;
//!
//! let cfg = Config::default();
//! assert_eq!(cfg.scheduler.quantum, 25);
//! assert_eq!(cfg.timing.memory_load_penalty, 32);
//!
//! let from_json: Config = serde_json::from_str("{}").unwrap();
//! assert_eq!(from_json.timing.bus_downtime, cfg.timing.bus_downtime);
//! ```

use serde::Deserialize;

mod defaults {
    pub const QUANTUM: u32 = 25;
    pub const MEMORY_LOAD_PENALTY: u32 = 32;
    pub const BUS_DOWNTIME: u32 = 2;
    pub const WORDS_PER_BLOCK: usize = 4;
    pub const WORD_BYTES: u32 = 4;
    pub const DATA_START: u32 = 0;
    pub const DATA_END: u32 = 384;
    pub const INST_START: u32 = 384;
    pub const INST_END: u32 = 1024;
    pub const INST_BLOCKS_PER_CORE: usize = 8;
    pub const INST_ASSOCIATIVITY: usize = 1;
    pub const DATA_BLOCKS_PER_CORE: usize = 8;
    pub const DATA_ASSOCIATIVITY: usize = 1;
    pub const NUM_CORES: usize = 2;
    pub const PROGRAM_LOAD_BASE: u32 = 384;
}

/// Round-robin quantum scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cycles a PCB runs before forced preemption.
    pub quantum: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum: defaults::QUANTUM,
        }
    }
}

/// Cycle-cost constants charged by the cache/bus state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Cycles charged per memory-serviced cache miss.
    pub memory_load_penalty: u32,
    /// Cycles charged after releasing the bus lock.
    pub bus_downtime: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            memory_load_penalty: defaults::MEMORY_LOAD_PENALTY,
            bus_downtime: defaults::BUS_DOWNTIME,
        }
    }
}

/// Bounds and geometry of a single backing-store region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Inclusive start address of the region.
    pub start: u32,
    /// Exclusive end address of the region.
    pub end: u32,
    /// Words per block (`P`).
    pub words_per_block: usize,
}

impl RegionConfig {
    fn data_default() -> Self {
        Self {
            start: defaults::DATA_START,
            end: defaults::DATA_END,
            words_per_block: defaults::WORDS_PER_BLOCK,
        }
    }

    fn inst_default() -> Self {
        Self {
            start: defaults::INST_START,
            end: defaults::INST_END,
            words_per_block: defaults::WORDS_PER_BLOCK,
        }
    }

    /// Number of blocks the region spans.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        let bytes_per_block = self.words_per_block as u32 * defaults::WORD_BYTES;
        ((self.end - self.start) / bytes_per_block) as usize
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self::data_default()
    }
}

/// Memory layout: disjoint data and instruction regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Data memory region, `[0, 384)` by default.
    pub data: RegionConfig,
    /// Instruction memory region, `[384, 1024)` by default.
    pub instructions: RegionConfig,
    /// Byte address the loader appends encoded programs from.
    pub program_load_base: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data: RegionConfig::data_default(),
            instructions: RegionConfig::inst_default(),
            program_load_base: defaults::PROGRAM_LOAD_BASE,
        }
    }
}

/// Per-core cache geometry. `associativity` of 1 or 4 is the supported range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheGeometry {
    /// Ways per set.
    pub associativity: usize,
    /// Total blocks owned by one core's cache of this kind.
    pub blocks_per_core: usize,
}

/// Cache sizing for both instruction and data caches, per core.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Instruction cache geometry (1-way, 8 blocks by default).
    pub instructions: CacheGeometry,
    /// Data cache geometry (configurable associativity, 8 blocks by default).
    pub data: CacheGeometry,
    /// Per-core data-cache geometry override, indexed by core id. A core
    /// whose id falls outside this list (including the default empty list)
    /// uses `data` uniformly; a shorter, non-empty list lets only the first
    /// few cores diverge (e.g. core 0 four-way, core 1 one-way) while the
    /// rest fall back to `data`.
    pub per_core: Vec<CacheGeometry>,
}

impl CacheConfig {
    /// Resolves the data-cache geometry for core `id`: `per_core[id]` if
    /// present, otherwise the uniform `data` default.
    #[must_use]
    pub fn data_geometry_for(&self, id: usize) -> CacheGeometry {
        self.per_core.get(id).copied().unwrap_or(self.data)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instructions: CacheGeometry {
                associativity: defaults::INST_ASSOCIATIVITY,
                blocks_per_core: defaults::INST_BLOCKS_PER_CORE,
            },
            data: CacheGeometry {
                associativity: defaults::DATA_ASSOCIATIVITY,
                blocks_per_core: defaults::DATA_BLOCKS_PER_CORE,
            },
            per_core: Vec::new(),
        }
    }
}

/// General simulation parameters not tied to a single subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of simulated cores.
    pub num_cores: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_cores: defaults::NUM_CORES,
        }
    }
}

/// Full simulator configuration, deserializable from the CLI's `--config` file.
///
/// Every field defaults to the system's reference geometry (§6 of the design
/// notes); an absent or partial JSON document is filled in section by
/// section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core count and other cross-cutting knobs.
    pub general: GeneralConfig,
    /// Round-robin quantum.
    pub scheduler: SchedulerConfig,
    /// Miss-penalty and bus-downtime cycle costs.
    pub timing: TimingConfig,
    /// Backing-store layout.
    pub memory: MemoryConfig,
    /// Per-core cache geometry.
    pub cache: CacheConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_core_override_falls_back_to_uniform_data() {
        let mut cache = CacheConfig::default();
        cache.per_core = vec![CacheGeometry {
            associativity: 4,
            blocks_per_core: 8,
        }];
        assert_eq!(cache.data_geometry_for(0).associativity, 4);
        assert_eq!(cache.data_geometry_for(1), cache.data);
    }

    #[test]
    fn empty_per_core_is_uniform_everywhere() {
        let cache = CacheConfig::default();
        assert_eq!(cache.data_geometry_for(0), cache.data);
        assert_eq!(cache.data_geometry_for(1), cache.data);
    }
}

//! Cross-cutting types shared by every component of the simulator.

/// Error types for every fallible subsystem.
pub mod error;
/// A non-blocking, explicitly acquire/release lock.
pub mod trylock;
/// Per-core simulated-clock handle threaded through cache/bus calls.
pub mod clock;
/// Core identity, used to charge cycles to the right requester.
pub mod core_id;

pub use clock::ClockState;
pub use core_id::CoreId;
pub use error::SimError;
pub use trylock::TryLock;

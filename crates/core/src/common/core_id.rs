//! Core identity, used only for snoop bookkeeping and cycle-charging.

/// Identifies one simulated core. Not an ownership edge — caches and the bus
/// look this up to know who to charge cycles to, they never own a `Core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub usize);

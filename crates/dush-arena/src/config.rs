//! Arena and scratch pool configuration parameters.

use crate::error::ArenaError;

/// Configuration for a single [`Arena`](crate::Arena).
///
/// Controls how much address space is reserved up front and how commit
/// and decommit requests are batched. Validated at construction; all
/// values are immutable for the lifetime of the arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Bytes of address space reserved at creation.
    ///
    /// Default: 1 GiB. Zero is legal and yields an arena on which every
    /// non-empty push fails.
    pub reserve_size: usize,

    /// Unit in which the committed boundary advances and retreats.
    ///
    /// Default: 4 KiB. Must be a non-zero power of two. The platform
    /// provider widens commits and narrows decommits to whole pages, so
    /// values below the system page size are accepted.
    pub commit_granularity: usize,

    /// Minimum span of committed-but-unused memory a pop must leave behind
    /// before that span is decommitted.
    ///
    /// Default: 64 MiB. Pops that free less keep their pages committed so
    /// tight push/pop loops do not thrash the platform provider.
    pub decommit_threshold: usize,
}

impl ArenaConfig {
    /// Default reservation: 1 GiB.
    pub const DEFAULT_RESERVE_SIZE: usize = 1 << 30;

    /// Default commit granularity: 4 KiB.
    pub const DEFAULT_COMMIT_GRANULARITY: usize = 4 << 10;

    /// Default decommit threshold: 64 MiB.
    pub const DEFAULT_DECOMMIT_THRESHOLD: usize = 64 << 20;

    /// Create a config reserving `reserve_size` bytes.
    ///
    /// Uses default values for all other parameters.
    pub fn new(reserve_size: usize) -> Self {
        Self {
            reserve_size,
            commit_granularity: Self::DEFAULT_COMMIT_GRANULARITY,
            decommit_threshold: Self::DEFAULT_DECOMMIT_THRESHOLD,
        }
    }

    /// Check the structural constraints on the parameters.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !self.commit_granularity.is_power_of_two() {
            return Err(ArenaError::invalid_argument(format!(
                "commit_granularity {} is not a non-zero power of two",
                self.commit_granularity
            )));
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RESERVE_SIZE)
    }
}

/// Configuration for a [`ScratchPool`](crate::ScratchPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchConfig {
    /// Number of arenas in the pool.
    ///
    /// Default: 2, which covers one level of "caller passes its own scratch
    /// arena down". A pool of zero arenas is legal but useless: every
    /// `begin` fails.
    pub pool_size: usize,

    /// Arena parameters for each pool arena. `reserve_size` here is the
    /// per-arena reservation.
    pub arena: ArenaConfig,
}

impl ScratchConfig {
    /// Default pool size.
    pub const DEFAULT_POOL_SIZE: usize = 2;

    /// Default reservation per pool arena: 8 GiB of address space.
    #[cfg(target_pointer_width = "64")]
    pub const DEFAULT_RESERVE_SIZE: usize = 8 << 30;

    /// Default reservation per pool arena: 256 MiB, since 32-bit targets
    /// cannot address 8 GiB.
    #[cfg(not(target_pointer_width = "64"))]
    pub const DEFAULT_RESERVE_SIZE: usize = 256 << 20;

    /// Create a config for `pool_size` arenas reserving `reserve_size`
    /// bytes each, with default commit parameters.
    pub fn new(pool_size: usize, reserve_size: usize) -> Self {
        Self {
            pool_size,
            arena: ArenaConfig::new(reserve_size),
        }
    }

    /// Check the structural constraints on the parameters.
    pub fn validate(&self) -> Result<(), ArenaError> {
        self.arena.validate()
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POOL_SIZE, Self::DEFAULT_RESERVE_SIZE)
    }
}

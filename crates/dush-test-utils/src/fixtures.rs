//! Config presets sized for tests.
//!
//! Production defaults reserve gigabytes and only decommit 64 MiB at a
//! time. These keep the same shape at a scale where a test can cross every
//! boundary in a few pushes.

use dush_arena::{ArenaConfig, ScratchConfig};

/// Reservation used by [`test_arena_config`]: 1 MiB.
pub const TEST_RESERVE_SIZE: usize = 1 << 20;

/// Commit granularity used by the presets: 4 KiB.
pub const TEST_COMMIT_GRANULARITY: usize = 4 << 10;

/// Decommit threshold used by the presets: 64 KiB.
pub const TEST_DECOMMIT_THRESHOLD: usize = 64 << 10;

/// A 1 MiB arena with 4 KiB commits and a 64 KiB decommit threshold.
pub fn test_arena_config() -> ArenaConfig {
    ArenaConfig {
        reserve_size: TEST_RESERVE_SIZE,
        commit_granularity: TEST_COMMIT_GRANULARITY,
        decommit_threshold: TEST_DECOMMIT_THRESHOLD,
    }
}

/// A two-arena pool of [`test_arena_config`] arenas.
pub fn test_scratch_config() -> ScratchConfig {
    ScratchConfig {
        pool_size: ScratchConfig::DEFAULT_POOL_SIZE,
        arena: test_arena_config(),
    }
}

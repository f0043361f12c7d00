//! Benchmark workloads for the dush arena allocator.
//!
//! Provides deterministic allocation patterns shared by the criterion
//! benches:
//!
//! - [`command_line_sizes`]: many small string-sized pushes, the shape of
//!   tokenizing and expanding one command line
//! - [`bench_arena_config`]: a reservation large enough that no bench
//!   workload runs out
//! - [`run_command_line`]: one push-everything-then-roll-back cycle

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use dush_arena::{Arena, ArenaConfig, ArenaError, VirtualMemory};

/// A 256 MiB arena with default commit granularity and threshold.
pub fn bench_arena_config() -> ArenaConfig {
    ArenaConfig::new(256 << 20)
}

/// `count` allocation sizes between 1 and 128 bytes.
///
/// Generated by a fixed linear congruential sequence so every run pushes
/// the same pattern.
pub fn command_line_sizes(count: usize) -> Vec<usize> {
    let mut state = 0x2545_f491_u32;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as usize % 128 + 1
        })
        .collect()
}

/// Push every size in `sizes` inside a temp region, then roll back.
///
/// Returns the number of bytes the region reached, so callers can feed it
/// to `black_box`.
pub fn run_command_line<M: VirtualMemory>(
    arena: &mut Arena<M>,
    sizes: &[usize],
) -> Result<usize, ArenaError> {
    let region = arena.begin_temp();
    for &size in sizes {
        region.push_nozero(size, 8)?;
    }
    Ok(region.pos() - region.saved_pos())
}

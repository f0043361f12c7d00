//! Scratch arenas for temporary allocations.
//!
//! A [`ScratchPool`] is a small fixed set of arenas handed out as
//! [`Scratch`] regions. A caller that is itself allocating into some arena
//! `A` passes `A`'s id as a conflict, and gets a scratch arena guaranteed to
//! be a different one, so its temporaries can never clobber the data it is
//! building in `A`.
//!
//! The arenas are reserved lazily on the first `begin`. A slot whose
//! reservation fails stays failed, and its error is what later callers see
//! when no other slot is eligible.
//!
//! Every thread has its own pool, reached through [`with_scratch`].

use std::cell::{OnceCell, RefCell, RefMut};
use std::fmt;
use std::ops::{Deref, DerefMut};

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::config::ScratchConfig;
use crate::error::{clear_last_error, track, ArenaError};
use crate::id::ArenaId;
use crate::memory::{SystemMemory, VirtualMemory};

enum Slot<M: VirtualMemory> {
    Ready { id: ArenaId, arena: RefCell<Arena<M>> },
    Failed(ArenaError),
}

type Slots<M> = SmallVec<[Slot<M>; ScratchConfig::DEFAULT_POOL_SIZE]>;

/// A fixed-size pool of lazily reserved scratch arenas.
pub struct ScratchPool<M: VirtualMemory + Clone = SystemMemory> {
    memory: M,
    config: ScratchConfig,
    slots: OnceCell<Slots<M>>,
}

impl ScratchPool<SystemMemory> {
    /// A pool backed by the system virtual-memory provider.
    pub fn new(config: ScratchConfig) -> Self {
        Self::with_memory(SystemMemory::new(), config)
    }
}

impl<M: VirtualMemory + Clone> ScratchPool<M> {
    /// A pool whose arenas are reserved through clones of `memory`.
    ///
    /// Nothing is reserved until the first [`begin`](Self::begin).
    pub fn with_memory(memory: M, config: ScratchConfig) -> Self {
        Self {
            memory,
            config,
            slots: OnceCell::new(),
        }
    }

    /// Number of arenas in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Whether the pool arenas have been reserved yet.
    pub fn is_initialized(&self) -> bool {
        self.slots.get().is_some()
    }

    /// Ids of the pool arenas that reserved successfully, in slot order.
    ///
    /// Forces initialization.
    pub fn arena_ids(&self) -> SmallVec<[ArenaId; ScratchConfig::DEFAULT_POOL_SIZE]> {
        let slots = self.slots();
        // Slot failures are remembered per slot, not reported here.
        clear_last_error();
        slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Ready { id, .. } => Some(*id),
                Slot::Failed(_) => None,
            })
            .collect()
    }

    /// Check out a scratch arena that is not listed in `conflicts`.
    ///
    /// The first pool arena that is neither a conflict, failed, nor already
    /// checked out is returned as a region starting at its current
    /// position. If none qualifies, the error is the reservation failure of
    /// a failed slot when there is one, [`ArenaError::ScratchExhausted`]
    /// otherwise.
    pub fn begin(&self, conflicts: &[ArenaId]) -> Result<Scratch<'_, M>, ArenaError> {
        let result = self.select(conflicts);
        // Slot initialization may have recorded its own failures.
        clear_last_error();
        track(result)
    }

    fn select(&self, conflicts: &[ArenaId]) -> Result<Scratch<'_, M>, ArenaError> {
        let slots = self.slots();
        let mut init_error = None;
        for slot in slots {
            match slot {
                Slot::Failed(err) => {
                    init_error.get_or_insert(err);
                }
                Slot::Ready { id, arena } => {
                    if conflicts.contains(id) {
                        continue;
                    }
                    if let Ok(arena) = arena.try_borrow_mut() {
                        let pos = arena.pos();
                        return Ok(Scratch { arena, pos });
                    }
                }
            }
        }
        Err(match init_error {
            Some(err) => err.clone(),
            None => ArenaError::ScratchExhausted {
                pool_size: slots.len(),
            },
        })
    }

    fn slots(&self) -> &Slots<M> {
        self.slots.get_or_init(|| self.reserve_slots())
    }

    fn reserve_slots(&self) -> Slots<M> {
        (0..self.config.pool_size)
            .map(|index| {
                match Arena::with_memory(self.memory.clone(), self.config.arena.clone()) {
                    Ok(arena) => {
                        debug!(index, id = %arena.id(), "scratch arena ready");
                        Slot::Ready {
                            id: arena.id(),
                            arena: RefCell::new(arena),
                        }
                    }
                    Err(err) => {
                        warn!(index, error = %err, "scratch arena unavailable");
                        Slot::Failed(err)
                    }
                }
            })
            .collect()
    }
}

impl<M: VirtualMemory + Clone> fmt::Debug for ScratchPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchPool")
            .field("pool_size", &self.config.pool_size)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// A checked-out scratch arena.
///
/// Derefs to the arena. Dropping it rolls the arena back to where it was
/// when checked out and returns it to the pool.
#[must_use = "dropping a scratch region immediately rolls it back"]
pub struct Scratch<'p, M: VirtualMemory = SystemMemory> {
    arena: RefMut<'p, Arena<M>>,
    pos: usize,
}

impl<M: VirtualMemory> Scratch<'_, M> {
    /// The position the arena returns to when this scratch ends.
    pub fn saved_pos(&self) -> usize {
        self.pos
    }

    /// End the scratch region now.
    pub fn end(self) {}
}

impl<M: VirtualMemory> Deref for Scratch<'_, M> {
    type Target = Arena<M>;

    fn deref(&self) -> &Arena<M> {
        &self.arena
    }
}

impl<M: VirtualMemory> DerefMut for Scratch<'_, M> {
    fn deref_mut(&mut self) -> &mut Arena<M> {
        &mut self.arena
    }
}

impl<M: VirtualMemory> fmt::Debug for Scratch<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scratch")
            .field("arena", &*self.arena)
            .field("saved_pos", &self.pos)
            .finish()
    }
}

impl<M: VirtualMemory> Drop for Scratch<'_, M> {
    fn drop(&mut self) {
        let pos = self.pos;
        self.arena.pop_to(pos);
    }
}

thread_local! {
    static THREAD_POOL: ScratchPool = ScratchPool::new(ScratchConfig::default());
}

/// Run `f` with a scratch arena from the calling thread's pool.
///
/// The arena is none of `conflicts`, and is rolled back when `f` returns.
/// Calls nest: an inner `with_scratch` listing the outer scratch's id gets
/// the other arena. Once the thread's pool has been destroyed (from another
/// thread-local's destructor, say) this fails with
/// [`ArenaError::InvalidArgument`].
pub fn with_scratch<R>(
    conflicts: &[ArenaId],
    f: impl FnOnce(&mut Scratch<'_>) -> R,
) -> Result<R, ArenaError> {
    THREAD_POOL
        .try_with(|pool| {
            let mut scratch = pool.begin(conflicts)?;
            Ok(f(&mut scratch))
        })
        .unwrap_or_else(|_| {
            clear_last_error();
            track(Err(ArenaError::invalid_argument(
                "the thread's scratch pool has already been destroyed",
            )))
        })
}

/// Run `f` with the calling thread's scratch pool.
pub fn with_thread_pool<R>(f: impl FnOnce(&ScratchPool) -> R) -> R {
    THREAD_POOL.with(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::error::{last_error, AllocErrorKind};

    fn small_pool() -> ScratchPool {
        ScratchPool::new(ScratchConfig {
            pool_size: 2,
            arena: ArenaConfig {
                reserve_size: 1 << 20,
                commit_granularity: 4096,
                decommit_threshold: 64 << 10,
            },
        })
    }

    #[test]
    fn pool_is_lazy() {
        let pool = small_pool();
        assert!(!pool.is_initialized());
        pool.begin(&[]).unwrap().end();
        assert!(pool.is_initialized());
        assert_eq!(pool.arena_ids().len(), 2);
    }

    #[test]
    fn begin_avoids_conflicts() {
        let pool = small_pool();
        let ids = pool.arena_ids();

        let scratch = pool.begin(&[ids[0]]).unwrap();
        assert_eq!(scratch.id(), ids[1]);
        scratch.end();

        let scratch = pool.begin(&[ids[1]]).unwrap();
        assert_eq!(scratch.id(), ids[0]);
    }

    #[test]
    fn foreign_conflicts_are_ignored() {
        let pool = small_pool();
        let unrelated = Arena::new(ArenaConfig::new(0)).unwrap();
        let scratch = pool.begin(&[unrelated.id()]).unwrap();
        assert_eq!(scratch.id(), pool.arena_ids()[0]);
    }

    #[test]
    fn all_conflicting_is_out_of_memory() {
        let pool = small_pool();
        let ids = pool.arena_ids();
        let err = pool.begin(&ids).unwrap_err();
        assert_eq!(err, ArenaError::ScratchExhausted { pool_size: 2 });
        assert_eq!(last_error(), Some(AllocErrorKind::OutOfMemory));
    }

    #[test]
    fn checked_out_arenas_are_skipped() {
        let pool = small_pool();
        let first = pool.begin(&[]).unwrap();
        let second = pool.begin(&[]).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(pool.begin(&[]).is_err());
        drop(second);
        assert!(pool.begin(&[]).is_ok());
    }

    #[test]
    fn scratch_rolls_back_on_end() {
        let pool = small_pool();
        let id;
        {
            let scratch = pool.begin(&[]).unwrap();
            id = scratch.id();
            scratch.push(100_000, 8).unwrap();
        }
        let scratch = pool.begin(&[]).unwrap();
        assert_eq!(scratch.id(), id);
        assert_eq!(scratch.pos(), 0);
    }

    #[test]
    fn scratch_supports_nested_regions() {
        let pool = small_pool();
        let mut scratch = pool.begin(&[]).unwrap();
        scratch.push(16, 1).unwrap();
        {
            let region = scratch.begin_temp();
            region.push(64, 1).unwrap();
        }
        assert_eq!(scratch.pos(), 16);
    }

    #[test]
    fn scratch_region_popped_below_its_start_stays_down() {
        let pool = small_pool();
        let mut scratch = pool.begin(&[]).unwrap();
        scratch.push(100, 1).unwrap();
        {
            let mut region = scratch.begin_temp();
            assert_eq!(region.saved_pos(), 100);
            region.pop_to(10);
        }
        assert_eq!(scratch.pos(), 10);
    }

    #[test]
    fn arena_ids_leaves_no_error_behind() {
        let pool = ScratchPool::new(ScratchConfig {
            pool_size: 1,
            arena: ArenaConfig {
                commit_granularity: 3,
                ..ArenaConfig::new(1 << 20)
            },
        });
        assert!(pool.arena_ids().is_empty());
        assert_eq!(last_error(), None);
    }

    #[test]
    fn with_scratch_from_thread_local_destructor_does_not_panic() {
        use std::sync::atomic::{AtomicBool, Ordering};

        static FINISHED: AtomicBool = AtomicBool::new(false);

        struct UsesScratchOnDrop;

        impl Drop for UsesScratchOnDrop {
            fn drop(&mut self) {
                // Either outcome is fine, depending on destructor order.
                let _ = with_scratch(&[], |scratch| scratch.push(8, 8).is_ok());
                FINISHED.store(true, Ordering::SeqCst);
            }
        }

        thread_local! {
            static GUARD: UsesScratchOnDrop = const { UsesScratchOnDrop };
        }

        std::thread::spawn(|| {
            GUARD.with(|_| {});
            with_thread_pool(|pool| pool.arena_ids());
        })
        .join()
        .unwrap();
        assert!(FINISHED.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_pool_always_fails() {
        let pool = ScratchPool::new(ScratchConfig {
            pool_size: 0,
            ..ScratchConfig::default()
        });
        assert_eq!(
            pool.begin(&[]).unwrap_err(),
            ArenaError::ScratchExhausted { pool_size: 0 }
        );
    }

    #[test]
    fn failed_slots_surface_their_error() {
        let pool = ScratchPool::new(ScratchConfig {
            pool_size: 2,
            arena: ArenaConfig {
                commit_granularity: 3,
                ..ArenaConfig::new(1 << 20)
            },
        });
        let err = pool.begin(&[]).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidArgument { .. }));
        assert!(pool.arena_ids().is_empty());
        // Remembered, not retried.
        assert_eq!(pool.begin(&[]).unwrap_err(), err);
    }

    #[test]
    fn thread_scratch_nests_on_distinct_arenas() {
        let (outer, inner) = with_scratch(&[], |outer| {
            outer.push(32, 1).unwrap();
            let outer_id = outer.id();
            let inner_id = with_scratch(&[outer_id], |inner| {
                inner.push(32, 1).unwrap();
                inner.id()
            })
            .unwrap();
            (outer_id, inner_id)
        })
        .unwrap();
        assert_ne!(outer, inner);
        with_thread_pool(|pool| {
            assert!(pool.arena_ids().contains(&outer));
            assert!(pool.arena_ids().contains(&inner));
        });
    }

    #[test]
    fn thread_pools_are_per_thread() {
        let here = with_thread_pool(|pool| pool.arena_ids());
        let there = std::thread::spawn(|| with_thread_pool(|pool| pool.arena_ids()))
            .join()
            .unwrap();
        assert!(here.iter().all(|id| !there.contains(id)));
    }
}

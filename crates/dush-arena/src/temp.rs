//! Scoped rollback: temporary regions and checkpoints.
//!
//! A [`TempRegion`] remembers the arena position when it was opened and
//! rolls back to it when dropped. It holds the arena mutably, so regions on
//! one arena nest strictly LIFO and nothing allocated inside one can be used
//! after it ends.
//!
//! A [`Checkpoint`] is the unscoped form: a plain `(arena, pos)` pair the
//! caller restores explicitly. Restoring one on the wrong arena is rejected.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::arena::Arena;
use crate::error::{clear_last_error, track, ArenaError};
use crate::id::ArenaId;
use crate::memory::{SystemMemory, VirtualMemory};

/// A saved arena position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "a checkpoint does nothing unless restored"]
pub struct Checkpoint {
    arena: ArenaId,
    pos: usize,
}

impl Checkpoint {
    /// The arena this checkpoint was taken on.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    /// The saved position.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

/// An open temporary region. Derefs to the arena it borrows.
#[must_use = "dropping a region immediately rolls it back"]
pub struct TempRegion<'a, M: VirtualMemory = SystemMemory> {
    arena: &'a mut Arena<M>,
    pos: usize,
}

impl<M: VirtualMemory> TempRegion<'_, M> {
    /// The position the arena returns to when this region ends.
    pub fn saved_pos(&self) -> usize {
        self.pos
    }

    /// End the region now.
    pub fn end(self) {}
}

impl<M: VirtualMemory> Deref for TempRegion<'_, M> {
    type Target = Arena<M>;

    fn deref(&self) -> &Arena<M> {
        self.arena
    }
}

impl<M: VirtualMemory> DerefMut for TempRegion<'_, M> {
    fn deref_mut(&mut self) -> &mut Arena<M> {
        self.arena
    }
}

impl<M: VirtualMemory> fmt::Debug for TempRegion<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempRegion")
            .field("arena", &*self.arena)
            .field("saved_pos", &self.pos)
            .finish()
    }
}

impl<M: VirtualMemory> Drop for TempRegion<'_, M> {
    fn drop(&mut self) {
        self.arena.pop_to(self.pos);
    }
}

impl<M: VirtualMemory> Arena<M> {
    /// Open a temporary region at the current position.
    pub fn begin_temp(&mut self) -> TempRegion<'_, M> {
        clear_last_error();
        let pos = self.pos();
        TempRegion { arena: self, pos }
    }

    /// Remember the current position.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            arena: self.id(),
            pos: self.pos(),
        }
    }

    /// Roll back to `checkpoint`.
    ///
    /// Fails with [`ArenaError::InvalidArgument`] if the checkpoint was
    /// taken on another arena. A checkpoint beyond the current position is
    /// a no-op, as for [`pop_to`](Self::pop_to).
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<(), ArenaError> {
        clear_last_error();
        if checkpoint.arena != self.id() {
            return track(Err(ArenaError::invalid_argument(format!(
                "checkpoint from {} restored on {}",
                checkpoint.arena,
                self.id()
            ))));
        }
        self.pop_to(checkpoint.pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::error::{last_error, AllocErrorKind};

    fn make_arena() -> Arena {
        Arena::new(ArenaConfig {
            reserve_size: 1 << 20,
            commit_granularity: 4096,
            decommit_threshold: 64 << 10,
        })
        .unwrap()
    }

    #[test]
    fn region_rolls_back_on_drop() {
        let mut arena = make_arena();
        arena.push(100, 1).unwrap();
        {
            let region = arena.begin_temp();
            assert_eq!(region.saved_pos(), 100);
            region.push(5000, 8).unwrap();
            assert!(region.pos() > 100);
        }
        assert_eq!(arena.pos(), 100);
    }

    #[test]
    fn nested_regions_unwind_in_order() {
        let mut arena = make_arena();
        let mut outer = arena.begin_temp();
        outer.push(10, 1).unwrap();
        {
            let inner = outer.begin_temp();
            inner.push(20, 1).unwrap();
            assert_eq!(inner.pos(), 30);
        }
        assert_eq!(outer.pos(), 10);
        outer.end();
        assert_eq!(arena.pos(), 0);
    }

    #[test]
    fn region_end_decommits_past_threshold() {
        let mut arena = make_arena();
        let region = arena.begin_temp();
        region.push(512 << 10, 1).unwrap();
        region.end();
        assert_eq!(arena.pos(), 0);
        assert_eq!(arena.commit_pos(), 0);
    }

    #[test]
    fn checkpoint_restores_position() {
        let mut arena = make_arena();
        arena.push(64, 1).unwrap();
        let checkpoint = arena.checkpoint();
        assert_eq!(checkpoint.pos(), 64);
        assert_eq!(checkpoint.arena(), arena.id());

        arena.push(1000, 1).unwrap();
        arena.restore(checkpoint).unwrap();
        assert_eq!(arena.pos(), 64);
    }

    #[test]
    fn stale_checkpoint_never_moves_forward() {
        let mut arena = make_arena();
        arena.push(500, 1).unwrap();
        let checkpoint = arena.checkpoint();
        arena.pop_to(0);

        arena.restore(checkpoint).unwrap();
        assert_eq!(arena.pos(), 0);
    }

    #[test]
    fn region_popped_below_its_start_stays_down() {
        let mut arena = make_arena();
        arena.push(100, 1).unwrap();
        {
            let mut region = arena.begin_temp();
            region.push(50, 1).unwrap();
            region.pop_to(20);
            assert!(region.pos() < region.saved_pos());
        }
        assert_eq!(arena.pos(), 20);
    }

    #[test]
    fn checkpoint_from_other_arena_is_rejected() {
        let mut a = make_arena();
        let b = make_arena();
        a.push(32, 1).unwrap();
        let foreign = b.checkpoint();

        let err = a.restore(foreign).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidArgument { .. }));
        assert_eq!(last_error(), Some(AllocErrorKind::InvalidArgument));
        assert_eq!(a.pos(), 32);
    }
}

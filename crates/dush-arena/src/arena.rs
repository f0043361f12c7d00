//! The virtual-memory bump arena.
//!
//! An [`Arena`] owns one contiguous reservation of address space and hands
//! out memory from it by bumping an offset. Pages are committed lazily as
//! the offset advances and decommitted only when a rollback leaves at
//! least `decommit_threshold` bytes of committed-but-unused space behind:
//!
//! ```text
//! 0                pos            commit_pos                    cap
//! |---- live ------|--- free -----|------- reserved only --------|
//!                   (committed,
//!                    hysteresis)
//! ```
//!
//! Allocation takes `&self`, rollback takes `&mut self`: anything handed
//! out by a push borrows the arena, so the borrow checker guarantees no
//! allocation outlives the rollback that reclaims it.

#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::config::ArenaConfig;
use crate::error::{clear_last_error, track, AllocErrorKind, ArenaError};
use crate::id::ArenaId;
use crate::memory::{SystemMemory, VirtualMemory};
use crate::raw;

/// A bump allocator over a lazily-committed virtual-memory reservation.
///
/// Invariants, after every call:
///
/// - `0 <= pos <= commit_pos <= cap`
/// - `commit_pos` is a multiple of the commit granularity, or `cap`
/// - `peak` is the largest `pos` ever reached
pub struct Arena<M: VirtualMemory = SystemMemory> {
    memory: M,
    /// Start of the reservation. Dangling when `cap == 0`.
    base: NonNull<u8>,
    cap: usize,
    pos: Cell<usize>,
    commit_pos: Cell<usize>,
    peak: Cell<usize>,
    commit_granularity: usize,
    decommit_threshold: usize,
    id: ArenaId,
}

// SAFETY: the arena is the sole owner of its reservation, so handing it to
// another thread hands over the whole range. `Cell` keeps it `!Sync`.
unsafe impl<M: VirtualMemory + Send> Send for Arena<M> {}

impl Arena<SystemMemory> {
    /// Reserve an arena from the system virtual-memory provider.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        Self::with_memory(SystemMemory::new(), config)
    }
}

impl<M: VirtualMemory> Arena<M> {
    /// Reserve an arena through `memory`.
    ///
    /// Nothing is committed yet. A `reserve_size` of zero skips the
    /// provider entirely and yields an arena on which every non-empty push
    /// fails.
    pub fn with_memory(memory: M, config: ArenaConfig) -> Result<Self, ArenaError> {
        clear_last_error();
        track(Self::reserve(memory, config))
    }

    fn reserve(memory: M, config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let base = if config.reserve_size == 0 {
            NonNull::dangling()
        } else {
            memory.reserve(config.reserve_size).map_err(|e| {
                warn!(size = config.reserve_size, error = %e, "arena reservation failed");
                ArenaError::ReserveFailed {
                    size: config.reserve_size,
                }
            })?
        };
        let id = ArenaId::next();
        debug!(%id, size = config.reserve_size, base = ?base, "reserved arena");
        Ok(Self {
            memory,
            base,
            cap: config.reserve_size,
            pos: Cell::new(0),
            commit_pos: Cell::new(0),
            peak: Cell::new(0),
            commit_granularity: config.commit_granularity,
            decommit_threshold: config.decommit_threshold,
            id,
        })
    }

    /// Give the reservation back to the provider.
    ///
    /// Dropping an arena does the same, but can only log a failure.
    pub fn release(mut self) -> Result<(), ArenaError> {
        clear_last_error();
        track(self.unreserve())
    }

    fn unreserve(&mut self) -> Result<(), ArenaError> {
        let cap = std::mem::take(&mut self.cap);
        let base = std::mem::replace(&mut self.base, NonNull::dangling());
        self.pos.set(0);
        self.commit_pos.set(0);
        self.peak.set(0);
        if cap == 0 {
            return Ok(());
        }
        // SAFETY: `base`/`cap` is exactly the reservation made in `reserve`,
        // and `&mut self` rules out outstanding allocations.
        unsafe { self.memory.release(base, cap) }.map_err(|e| {
            warn!(id = %self.id, size = cap, error = %e, "arena release failed");
            ArenaError::ReleaseFailed { size: cap }
        })?;
        debug!(id = %self.id, size = cap, "released arena");
        Ok(())
    }

    // ── queries ────────────────────────────────────────────────────

    /// Unique identity of this arena.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Total reserved size in bytes.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Offset of the next free byte.
    pub fn pos(&self) -> usize {
        self.pos.get()
    }

    /// Bytes left before the reservation is exhausted, ignoring alignment.
    pub fn space(&self) -> usize {
        self.cap - self.pos.get()
    }

    /// Offset up to which pages are committed.
    pub fn commit_pos(&self) -> usize {
        self.commit_pos.get()
    }

    /// High-water mark of `pos`. Diagnostics only.
    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    /// The granularity `commit_pos` moves in.
    pub fn commit_granularity(&self) -> usize {
        self.commit_granularity
    }

    /// The minimum free committed span a pop decommits.
    pub fn decommit_threshold(&self) -> usize {
        self.decommit_threshold
    }

    /// Whether `ptr` points into the live part of this arena.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        self.cap != 0 && addr >= base && addr - base < self.pos.get()
    }

    /// Offset of `ptr` from the start of the arena.
    ///
    /// Accepts any address in `[base, base + pos]`, so the end of the most
    /// recent allocation is valid too. Anything else is
    /// [`ArenaError::InvalidPointer`].
    pub fn offset_of(&self, ptr: *const u8) -> Result<usize, ArenaError> {
        clear_last_error();
        track(self.locate(ptr))
    }

    fn locate(&self, ptr: *const u8) -> Result<usize, ArenaError> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        if self.cap == 0 || addr < base || addr - base > self.pos.get() {
            return Err(ArenaError::InvalidPointer { addr });
        }
        Ok(addr - base)
    }

    // ── push ───────────────────────────────────────────────────────

    /// Bump-allocate `size` bytes aligned to `align`, zero-filled.
    ///
    /// Fails with [`ArenaError::OutOfMemory`] if the aligned request does
    /// not fit in the reservation, or [`ArenaError::CommitFailed`] if the
    /// provider refuses the pages. Either way nothing is allocated and
    /// `pos` is unchanged. A zero `size` returns a dangling, aligned,
    /// empty block and leaves the arena untouched.
    pub fn push(&self, size: usize, align: usize) -> Result<NonNull<[u8]>, ArenaError> {
        let block = self.push_nozero(size, align)?;
        // SAFETY: the block was just bumped out of committed memory and
        // nothing else can reference it yet.
        unsafe { block.cast::<u8>().as_ptr().write_bytes(0, size) };
        Ok(block)
    }

    /// Like [`push`](Self::push), but the contents are left as whatever the
    /// range last held.
    pub fn push_nozero(&self, size: usize, align: usize) -> Result<NonNull<[u8]>, ArenaError> {
        clear_last_error();
        self.track_push(self.bump(size, align))
    }

    /// Record a push outcome in the last-error slot. Under
    /// `aggressive-asserts`, out-of-memory failures panic here instead.
    pub(crate) fn track_push<T>(&self, result: Result<T, ArenaError>) -> Result<T, ArenaError> {
        let result = track(result);
        if cfg!(feature = "aggressive-asserts") {
            if let Err(err) = &result {
                if err.kind() == AllocErrorKind::OutOfMemory {
                    panic!("arena {} is out of memory: {err}", self.id);
                }
            }
        }
        result
    }

    /// Move `pos` back to `pos` without touching the commit boundary.
    ///
    /// Only for undoing a push whose memory never left the caller, which is
    /// why it can work through `&self`.
    pub(crate) fn unwind_to(&self, pos: usize) {
        debug_assert!(pos <= self.pos.get());
        self.pos.set(pos.min(self.pos.get()));
    }

    fn bump(&self, size: usize, align: usize) -> Result<NonNull<[u8]>, ArenaError> {
        if !align.is_power_of_two() {
            return Err(ArenaError::invalid_argument(format!(
                "alignment {align} is not a non-zero power of two"
            )));
        }
        if size == 0 {
            return Ok(NonNull::slice_from_raw_parts(raw::dangling(align), 0));
        }

        let pos = self.pos.get();
        let out_of_memory = || ArenaError::OutOfMemory {
            requested: size,
            available: self.cap - pos,
        };
        let start = raw::align_up(pos, align).ok_or_else(out_of_memory)?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.cap)
            .ok_or_else(out_of_memory)?;

        // Commit before moving `pos`, so a refused commit leaves no trace.
        if end > self.commit_pos.get() {
            self.commit_through(end)?;
        }
        self.pos.set(end);
        self.peak.set(self.peak.get().max(end));

        // SAFETY: start < end <= cap, inside the reservation.
        let ptr = unsafe { self.base.add(start) };
        Ok(NonNull::slice_from_raw_parts(ptr, size))
    }

    fn commit_through(&self, end: usize) -> Result<(), ArenaError> {
        let from = self.commit_pos.get();
        let to = self.round_to_granularity(end);
        let size = to - from;
        // SAFETY: from < to <= cap, inside the reservation.
        unsafe { self.memory.commit(self.base.add(from), size) }.map_err(|e| {
            warn!(id = %self.id, offset = from, size, error = %e, "commit failed");
            ArenaError::CommitFailed { offset: from, size }
        })?;
        trace!(id = %self.id, offset = from, size, "committed");
        self.commit_pos.set(to);
        Ok(())
    }

    fn round_to_granularity(&self, offset: usize) -> usize {
        raw::align_up(offset, self.commit_granularity).map_or(self.cap, |o| o.min(self.cap))
    }

    // ── pop ────────────────────────────────────────────────────────

    /// Roll the arena back to `pos`.
    ///
    /// `pos` is clamped to the current position; this never moves
    /// forward. If the rollback leaves at least `decommit_threshold` bytes
    /// of committed memory beyond the granularity-rounded position, that
    /// span is decommitted. A refused decommit is logged and leaves the
    /// pages committed; the rollback itself always succeeds.
    pub fn pop_to(&mut self, pos: usize) {
        clear_last_error();
        let current = self.pos.get();
        let pos = pos.min(current);
        if cfg!(feature = "aggressive-zero") && current > pos {
            // SAFETY: [pos, current) is committed and `&mut self` rules out
            // outstanding borrows of it.
            unsafe { self.base.add(pos).as_ptr().write_bytes(0, current - pos) };
        }
        self.pos.set(pos);
        self.shrink_commit();
    }

    /// Roll back the last `amount` bytes, stopping at zero.
    pub fn pop_amount(&mut self, amount: usize) {
        let pos = self.pos.get();
        self.pop_to(pos - amount.min(pos));
    }

    /// Roll back everything.
    pub fn reset(&mut self) {
        self.pop_to(0);
    }

    /// Roll back to a pointer previously returned by a push on this arena.
    pub fn pop_to_ptr(&mut self, ptr: *const u8) -> Result<(), ArenaError> {
        let pos = self.offset_of(ptr)?;
        self.pop_to(pos);
        Ok(())
    }

    fn shrink_commit(&mut self) {
        let commit_pos = self.commit_pos.get();
        let keep = self.round_to_granularity(self.pos.get());
        if commit_pos == keep || commit_pos - keep < self.decommit_threshold {
            return;
        }
        let size = commit_pos - keep;
        // SAFETY: keep < commit_pos <= cap, and nothing past `pos` is
        // borrowed while we hold `&mut self`.
        match unsafe { self.memory.decommit(self.base.add(keep), size) } {
            Ok(()) => {
                trace!(id = %self.id, offset = keep, size, "decommitted");
                self.commit_pos.set(keep);
            }
            Err(e) => {
                warn!(id = %self.id, offset = keep, size, error = %e, "decommit failed");
            }
        }
    }
}

impl<M: VirtualMemory> Drop for Arena<M> {
    fn drop(&mut self) {
        // Failures are already logged by `unreserve`.
        let _ = self.unreserve();
    }
}

impl<M: VirtualMemory> fmt::Debug for Arena<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("cap", &self.cap)
            .field("pos", &self.pos.get())
            .field("commit_pos", &self.commit_pos.get())
            .field("peak", &self.peak.get())
            .finish()
    }
}

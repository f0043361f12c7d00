//! Test utilities for dush-arena development.
//!
//! Provides [`RecordingMemory`], a [`VirtualMemory`] provider that forwards
//! to the system while logging every call and optionally injecting
//! failures, plus small config presets that keep test reservations cheap.

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::cell::RefCell;
use std::io;
use std::ptr::NonNull;
use std::rc::Rc;

use dush_arena::{SystemMemory, VirtualMemory};

/// One call made to a [`RecordingMemory`].
///
/// Offsets are relative to the start of the reservation they fall in, and
/// `reservation` is the index of that reservation in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryCall {
    Reserve { size: usize },
    Commit { reservation: usize, offset: usize, size: usize },
    Decommit { reservation: usize, offset: usize, size: usize },
    Release { reservation: usize, size: usize },
}

#[derive(Default)]
struct State {
    calls: Vec<MemoryCall>,
    /// `(base address, size)` of every reservation, live or not.
    reservations: Vec<(usize, usize)>,
    reserve_attempts: usize,
    fail_reserve_at: Option<usize>,
    fail_commit: bool,
    fail_decommit: bool,
}

impl State {
    fn locate(&self, ptr: NonNull<u8>) -> (usize, usize) {
        let addr = ptr.as_ptr() as usize;
        self.reservations
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &(base, size))| addr >= base && addr - base <= size)
            .map(|(index, &(base, _))| (index, addr - base))
            .unwrap_or((usize::MAX, addr))
    }
}

/// A system-backed provider that records what the arena asks of it.
///
/// Clones share the same log and fault settings, so a pool of arenas built
/// from one `RecordingMemory` reports into one place.
#[derive(Clone, Default)]
pub struct RecordingMemory {
    inner: SystemMemory,
    state: Rc<RefCell<State>>,
}

impl RecordingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<MemoryCall> {
        self.state.borrow().calls.clone()
    }

    /// Forget the recorded calls. Reservations stay known.
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Total bytes passed to successful commits.
    pub fn committed_bytes(&self) -> usize {
        self.sum(|call| match call {
            MemoryCall::Commit { size, .. } => Some(size),
            _ => None,
        })
    }

    /// Total bytes passed to successful decommits.
    pub fn decommitted_bytes(&self) -> usize {
        self.sum(|call| match call {
            MemoryCall::Decommit { size, .. } => Some(size),
            _ => None,
        })
    }

    fn sum(&self, pick: impl Fn(MemoryCall) -> Option<usize>) -> usize {
        self.state.borrow().calls.iter().copied().filter_map(pick).sum()
    }

    /// Make the `index`th reserve call (0-based, counting failures) fail.
    pub fn fail_reserve_at(&self, index: usize) {
        self.state.borrow_mut().fail_reserve_at = Some(index);
    }

    /// Make every commit fail until switched off.
    pub fn set_commit_failure(&self, fail: bool) {
        self.state.borrow_mut().fail_commit = fail;
    }

    /// Make every decommit fail until switched off.
    pub fn set_decommit_failure(&self, fail: bool) {
        self.state.borrow_mut().fail_decommit = fail;
    }
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::OutOfMemory, "injected failure")
}

// SAFETY: every successful operation is the system provider's.
unsafe impl VirtualMemory for RecordingMemory {
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        let attempt = state.reserve_attempts;
        state.reserve_attempts += 1;
        if state.fail_reserve_at == Some(attempt) {
            return Err(injected());
        }
        let base = self.inner.reserve(size)?;
        state.reservations.push((base.as_ptr() as usize, size));
        state.calls.push(MemoryCall::Reserve { size });
        Ok(base)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_commit {
            return Err(injected());
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.commit(ptr, size)? };
        let (reservation, offset) = state.locate(ptr);
        state.calls.push(MemoryCall::Commit {
            reservation,
            offset,
            size,
        });
        Ok(())
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_decommit {
            return Err(injected());
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.decommit(ptr, size)? };
        let (reservation, offset) = state.locate(ptr);
        state.calls.push(MemoryCall::Decommit {
            reservation,
            offset,
            size,
        });
        Ok(())
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.release(base, size)? };
        let (reservation, _) = state.locate(base);
        state.calls.push(MemoryCall::Release { reservation, size });
        Ok(())
    }
}

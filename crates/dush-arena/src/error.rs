//! Arena error types and the per-thread last-error slot.
//!
//! Every fallible operation returns a [`Result`] carrying an [`ArenaError`].
//! In addition, each operation clears a thread-local slot on entry and
//! records the failure's [`AllocErrorKind`] there before returning, so
//! outer layers that only see "it failed" (a shell builtin printing a
//! diagnostic, for instance) can still ask [`last_error()`] what happened.

use std::cell::Cell;
use std::error::Error;
use std::fmt;

/// Coarse classification of an [`ArenaError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocErrorKind {
    /// The platform could not reserve or commit memory, or a bump
    /// allocation did not fit in the remaining reservation.
    OutOfMemory,
    /// A degenerate or nonsensical argument, such as a non-power-of-two
    /// alignment or a checkpoint taken on a different arena.
    InvalidArgument,
    /// A pointer that does not belong to the arena it was given to.
    InvalidPointer,
}

impl AllocErrorKind {
    /// Human-readable description, suitable for a diagnostic line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfMemory => "Out of memory",
            Self::InvalidArgument => "Invalid argument",
            Self::InvalidPointer => "Invalid pointer",
        }
    }
}

impl fmt::Display for AllocErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// A push did not fit between the current position and the end of the
    /// reservation.
    OutOfMemory {
        /// Number of bytes requested (excluding alignment padding).
        requested: usize,
        /// Bytes left between the current position and the end of the
        /// reservation.
        available: usize,
    },
    /// The platform refused to reserve address space.
    ReserveFailed {
        /// Size of the reservation that was attempted.
        size: usize,
    },
    /// The platform refused to commit a range of the reservation.
    CommitFailed {
        /// Offset of the range within the reservation.
        offset: usize,
        /// Length of the range in bytes.
        size: usize,
    },
    /// The platform refused to give a reservation back.
    ReleaseFailed {
        /// Size of the reservation.
        size: usize,
    },
    /// Every scratch arena of the pool was either listed as a conflict or
    /// already checked out.
    ScratchExhausted {
        /// Number of arenas in the pool.
        pool_size: usize,
    },
    /// An argument was rejected before anything was touched.
    InvalidArgument {
        /// Which check failed.
        reason: String,
    },
    /// A pointer outside the live range of the arena.
    InvalidPointer {
        /// Address of the offending pointer.
        addr: usize,
    },
}

impl ArenaError {
    /// The coarse kind recorded in the last-error slot.
    pub fn kind(&self) -> AllocErrorKind {
        match self {
            Self::OutOfMemory { .. }
            | Self::ReserveFailed { .. }
            | Self::CommitFailed { .. }
            | Self::ScratchExhausted { .. } => AllocErrorKind::OutOfMemory,
            Self::InvalidArgument { .. } => AllocErrorKind::InvalidArgument,
            Self::ReleaseFailed { .. } | Self::InvalidPointer { .. } => {
                AllocErrorKind::InvalidPointer
            }
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "arena out of memory: requested {requested} bytes, {available} bytes available"
                )
            }
            Self::ReserveFailed { size } => {
                write!(f, "failed to reserve {size} bytes of address space")
            }
            Self::CommitFailed { offset, size } => {
                write!(f, "failed to commit {size} bytes at offset {offset}")
            }
            Self::ReleaseFailed { size } => {
                write!(f, "failed to release reservation of {size} bytes")
            }
            Self::ScratchExhausted { pool_size } => {
                write!(
                    f,
                    "no scratch arena available: all {pool_size} pool arenas conflict or are in use"
                )
            }
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::InvalidPointer { addr } => {
                write!(f, "pointer {addr:#x} does not belong to this arena")
            }
        }
    }
}

impl Error for ArenaError {}

thread_local! {
    static LAST_ERROR: Cell<Option<AllocErrorKind>> = const { Cell::new(None) };
}

/// Kind of the most recent failure on the calling thread, if the last
/// arena operation failed.
pub fn last_error() -> Option<AllocErrorKind> {
    LAST_ERROR.with(Cell::get)
}

/// Description of [`last_error()`], or `""` when the last operation
/// succeeded.
pub fn last_error_string() -> &'static str {
    last_error().map_or("", AllocErrorKind::as_str)
}

/// Reset the calling thread's last-error slot.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.set(None));
}

/// Record `result`'s error kind in the last-error slot and pass it through.
pub(crate) fn track<T>(result: Result<T, ArenaError>) -> Result<T, ArenaError> {
    if let Err(err) = &result {
        LAST_ERROR.with(|slot| slot.set(Some(err.kind())));
    }
    result
}

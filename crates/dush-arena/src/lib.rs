//! Virtual-memory bump arenas with scoped rollback and per-thread scratch
//! space.
//!
//! Each [`Arena`] reserves a large range of address space up front and
//! commits pages only as allocations reach them. Allocation is a pointer
//! bump; freeing is rolling the position back, either directly, through a
//! [`TempRegion`], or to a [`Checkpoint`]. There is no per-object free.
//!
//! # Architecture
//!
//! ```text
//! Arena<M: VirtualMemory>
//! ├── pos / commit_pos / peak (bump state, lazy commit, hysteresis decommit)
//! ├── TempRegion / Checkpoint (LIFO rollback)
//! └── alloc helpers (typed values, slices, str, CStr, fmt)
//!
//! ScratchPool (2 lazily reserved arenas, conflict-avoiding checkout)
//! └── Scratch (checked-out arena, rolls back on drop)
//!     └── with_scratch (thread-local pool)
//!
//! VirtualMemory (reserve / commit / decommit / release)
//! └── SystemMemory (mmap/mprotect/madvise on Unix, VirtualAlloc on Windows)
//! ```
//!
//! # Errors
//!
//! Fallible operations return [`ArenaError`]. Each operation also resets
//! the calling thread's last-error slot on entry and records the failure
//! kind there, readable through [`last_error`].
//!
//! # Unsafe code
//!
//! Confined to `raw`, `memory`, `arena` and `alloc`. Everything handed out
//! by an allocation borrows the arena, and every rollback takes it mutably,
//! so safe code cannot observe memory that has been popped.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

mod alloc;
pub mod arena;
pub mod config;
pub mod error;
pub mod id;
pub mod memory;
mod raw;
pub mod scratch;
pub mod temp;

// Public re-exports for the primary API surface.
pub use arena::Arena;
pub use config::{ArenaConfig, ScratchConfig};
pub use error::{clear_last_error, last_error, last_error_string, AllocErrorKind, ArenaError};
pub use id::ArenaId;
pub use memory::{SystemMemory, VirtualMemory};
pub use scratch::{with_scratch, with_thread_pool, Scratch, ScratchPool};
pub use temp::{Checkpoint, TempRegion};

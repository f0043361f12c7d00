//! Typed allocation on top of the raw byte pushes.
//!
//! These hand out references tied to the arena borrow, so they can only be
//! used until the next rollback. Values are never dropped: the arena just
//! forgets them. Storing types with meaningful `Drop` impls leaks whatever
//! those impls would have released.

#![allow(unsafe_code)]
#![allow(clippy::mut_from_ref)]

use std::alloc::Layout;
use std::ffi::CStr;
use std::fmt::{self, Write};
use std::ptr::{self, NonNull};
use std::{slice, str};

use crate::arena::Arena;
use crate::error::{clear_last_error, track, ArenaError};
use crate::memory::VirtualMemory;

impl<M: VirtualMemory> Arena<M> {
    /// Move `value` into the arena.
    pub fn alloc<T>(&self, value: T) -> Result<&mut T, ArenaError> {
        let layout = Layout::new::<T>();
        let slot = self.push_nozero(layout.size(), layout.align())?.cast::<T>();
        // SAFETY: the slot is committed, aligned for `T`, and disjoint from
        // every other live allocation.
        unsafe {
            slot.as_ptr().write(value);
            Ok(&mut *slot.as_ptr())
        }
    }

    /// Allocate `len` copies of `value`.
    pub fn alloc_slice_fill<T: Copy>(&self, len: usize, value: T) -> Result<&mut [T], ArenaError> {
        let slot = self.push_array::<T>(len)?;
        // SAFETY: room for `len` aligned `T`s, written before the slice is formed.
        unsafe {
            for i in 0..len {
                slot.as_ptr().add(i).write(value);
            }
            Ok(slice::from_raw_parts_mut(slot.as_ptr(), len))
        }
    }

    /// Copy `src` into the arena.
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T], ArenaError> {
        let slot = self.push_array::<T>(src.len())?;
        // SAFETY: the fresh slot cannot overlap `src`.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), slot.as_ptr(), src.len());
            Ok(slice::from_raw_parts_mut(slot.as_ptr(), src.len()))
        }
    }

    /// `len` zeroed bytes.
    pub fn alloc_zeroed_bytes(&self, len: usize) -> Result<&mut [u8], ArenaError> {
        let block = self.push(len, 1)?;
        // SAFETY: zero-filled, committed, exclusively ours.
        Ok(unsafe { slice::from_raw_parts_mut(block.cast::<u8>().as_ptr(), len) })
    }

    /// Copy `s` into the arena.
    pub fn alloc_str(&self, s: &str) -> Result<&mut str, ArenaError> {
        let bytes = self.alloc_slice_copy(s.as_bytes())?;
        // SAFETY: a byte-for-byte copy of a `str`.
        Ok(unsafe { str::from_utf8_unchecked_mut(bytes) })
    }

    /// Copy `s` into the arena with a trailing NUL.
    ///
    /// Fails with [`ArenaError::InvalidArgument`] if `s` contains a NUL.
    pub fn alloc_cstr(&self, s: &str) -> Result<&CStr, ArenaError> {
        if let Some(at) = s.bytes().position(|b| b == 0) {
            clear_last_error();
            return track(Err(ArenaError::invalid_argument(format!(
                "string has an interior NUL at byte {at}"
            ))));
        }
        let len = s.len() + 1;
        let block = self.push_nozero(len, 1)?.cast::<u8>();
        // SAFETY: `len` committed bytes; `s` holds no NUL, so the only one
        // is the terminator written here.
        unsafe {
            ptr::copy_nonoverlapping(s.as_ptr(), block.as_ptr(), s.len());
            block.as_ptr().add(s.len()).write(0);
            Ok(CStr::from_bytes_with_nul_unchecked(slice::from_raw_parts(
                block.as_ptr(),
                len,
            )))
        }
    }

    /// Format `args` directly into the arena.
    ///
    /// The arguments are formatted twice: once to measure, once to write.
    /// See [`push_format!`](crate::push_format) for the `format!`-style form.
    pub fn alloc_fmt(&self, args: fmt::Arguments<'_>) -> Result<&mut str, ArenaError> {
        if let Some(s) = args.as_str() {
            return self.alloc_str(s);
        }
        let mut counter = ByteCounter(0);
        if counter.write_fmt(args).is_err() {
            clear_last_error();
            return track(Err(ArenaError::invalid_argument(
                "a formatting trait implementation returned an error",
            )));
        }

        let start = self.pos();
        let block = self.push_nozero(counter.0, 1)?.cast::<u8>();
        // SAFETY: `counter.0` committed bytes, exclusively ours.
        let buf = unsafe { slice::from_raw_parts_mut(block.as_ptr(), counter.0) };
        let mut writer = SliceWriter { buf, len: 0 };
        if writer.write_fmt(args).is_err() {
            drop(writer);
            self.unwind_to(start);
            clear_last_error();
            return track(Err(ArenaError::invalid_argument(
                "formatted output changed between passes",
            )));
        }
        let SliceWriter { buf, len } = writer;
        // SAFETY: `SliceWriter` only ever copies whole `str`s.
        Ok(unsafe { str::from_utf8_unchecked_mut(&mut buf[..len]) })
    }

    fn push_array<T>(&self, len: usize) -> Result<NonNull<T>, ArenaError> {
        let Ok(layout) = Layout::array::<T>(len) else {
            clear_last_error();
            return self.track_push(Err(ArenaError::OutOfMemory {
                requested: len.saturating_mul(std::mem::size_of::<T>()),
                available: self.space(),
            }));
        };
        Ok(self.push_nozero(layout.size(), layout.align())?.cast::<T>())
    }
}

struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 = self.0.checked_add(s.len()).ok_or(fmt::Error)?;
        Ok(())
    }
}

struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        let dst = self.buf.get_mut(self.len..end).ok_or(fmt::Error)?;
        dst.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// `format!` into an arena: `push_format!(arena, "{}-{}", a, b)`.
///
/// Expands to [`Arena::alloc_fmt`] and returns its `Result<&mut str, _>`.
#[macro_export]
macro_rules! push_format {
    ($arena:expr, $($arg:tt)*) => {
        $arena.alloc_fmt(::std::format_args!($($arg)*))
    };
}

//! Page based bump allocator.
//!
//! Descriptions reconstructed while reading an archive own their arrays and
//! strings through an [`Arena`]. Nothing is freed individually, the whole
//! graph is released at once either by [`Arena::discard`] (pages are kept for
//! reuse) or by dropping the arena.
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::{mem, slice, str};

use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

// Alignment every page is allocated with, bigger alignments are handled by
// over-allocating the page.
const PAGE_ALIGN: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArenaError {
    #[error("alignment {0} is not a power of two")]
    Alignment(usize),
    #[error("allocation of {0} bytes overflows the address space")]
    Layout(usize),
    #[error("out of memory allocating a {0} byte page")]
    OutOfMemory(usize),
}

struct Page {
    ptr: NonNull<u8>,
    size: usize,
    used: usize,
}

impl Page {
    fn new(size: usize) -> Result<Page, ArenaError> {
        let layout = Layout::from_size_align(size, PAGE_ALIGN).map_err(|_| ArenaError::Layout(size))?;

        // SAFETY: alloc requires a non zero sized layout. Page sizes are at
        // least PAGE_ALIGN and only grow, a null return is handled below.
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or(ArenaError::OutOfMemory(size))?;

        Ok(Page { ptr, size, used: 0 })
    }

    fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let base = self.ptr.as_ptr() as usize;
        let start = base.checked_add(self.used)?;
        let aligned = start.checked_add(align - 1)? & !(align - 1);
        let offset = aligned - base;
        let end = offset.checked_add(size)?;

        if end > self.size {
            return None;
        }
        self.used = end;

        // SAFETY: offset <= end <= self.size, so the pointer stays inside
        // the page allocation and ptr is non null.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) })
    }

    fn remaining(&self) -> usize {
        self.size - self.used
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: ptr came from alloc in Page::new with this exact size and
        // alignment, and a page is only dropped once.
        unsafe {
            alloc::dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.size, PAGE_ALIGN),
            )
        };
    }
}

pub struct Arena {
    page_size: usize,
    pages: RefCell<Vec<Page>>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// The page size is rounded up to the next power of two.
    pub fn with_page_size(page_size: usize) -> Self {
        Arena {
            page_size: page_size.max(PAGE_ALIGN).next_power_of_two(),
            pages: RefCell::new(Vec::new()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.borrow().len()
    }

    /// Total bytes handed out (including alignment padding) since the last discard
    pub fn used(&self) -> usize {
        self.pages.borrow().iter().map(|p| p.used).sum()
    }

    pub fn capacity(&self) -> usize {
        self.pages.borrow().iter().map(|p| p.size).sum()
    }

    /// Allocates `size` bytes aligned to `align` and returns a pointer to
    /// uninitialized memory valid until the arena is discarded or dropped.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        if !align.is_power_of_two() {
            return Err(ArenaError::Alignment(align));
        }
        // Zero sized requests still get a unique aligned address
        let size = size.max(1);

        let mut pages = self.pages.borrow_mut();
        for page in pages.iter_mut() {
            if page.remaining() < size {
                continue;
            }
            if let Some(ptr) = page.try_alloc(size, align) {
                return Ok(ptr);
            }
        }

        let needed = size
            .checked_add(align - 1)
            .ok_or(ArenaError::Layout(size))?;
        let mut page_size = self.page_size;
        while page_size < needed {
            page_size = page_size.checked_mul(2).ok_or(ArenaError::Layout(size))?;
        }

        let mut page = Page::new(page_size)?;
        let ptr = page.try_alloc(size, align).ok_or(ArenaError::Layout(size))?;
        pages.push(page);

        Ok(ptr)
    }

    /// Allocates `len` default initialized elements.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_default<T: Copy + Default>(&self, len: usize) -> Result<&mut [T], ArenaError> {
        let layout = Layout::array::<T>(len).map_err(|_| ArenaError::Layout(len))?;
        let ptr = self.allocate(layout.size(), layout.align())?.cast::<T>();

        // SAFETY: the allocation is sized and aligned for len elements of T,
        // every element is written before the slice is formed and T is Copy so
        // nothing needs dropping.
        unsafe {
            for i in 0..len {
                ptr.as_ptr().add(i).write(T::default());
            }
            Ok(slice::from_raw_parts_mut(ptr.as_ptr(), len))
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T], ArenaError> {
        let ptr = self
            .allocate(mem::size_of_val(src), mem::align_of::<T>())?
            .cast::<T>();

        // SAFETY: the allocation is sized and aligned for src.len() elements
        // of T and is handed out only once, so it cannot overlap src or any
        // other live slice. Pages are not freed or reused while &self is
        // borrowed, discard takes &mut self.
        unsafe {
            ptr.as_ptr().copy_from_nonoverlapping(src.as_ptr(), src.len());
            Ok(slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_str(&self, src: &str) -> Result<&mut str, ArenaError> {
        let bytes = self.alloc_slice_copy(src.as_bytes())?;

        // SAFETY: the bytes are a verbatim copy of a valid str
        Ok(unsafe { str::from_utf8_unchecked_mut(bytes) })
    }

    /// Resets every page cursor, keeping the pages around for reuse.
    pub fn discard(&mut self) {
        for page in self.pages.get_mut().iter_mut() {
            page.used = 0;
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

#[cfg(test)]
mod test_arena {
    use super::*;

    fn addresses(arena: &Arena) -> Vec<usize> {
        [(3, 1), (16, 8), (100, 4), (5000, 16), (7, 2), (4000, 8), (1, 64)]
            .iter()
            .map(|&(size, align)| arena.allocate(size, align).unwrap().as_ptr() as usize)
            .collect()
    }

    #[test]
    fn respects_alignment() {
        let arena = Arena::new();

        for align in [1, 2, 4, 8, 16, 32, 64, 128] {
            arena.allocate(3, 1).unwrap();
            let ptr = arena.allocate(10, align).unwrap();
            assert_eq!(ptr.as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn rejects_bad_alignment() {
        let arena = Arena::new();

        assert_eq!(arena.allocate(8, 3).unwrap_err(), ArenaError::Alignment(3));
    }

    #[test]
    fn oversized_request_gets_own_page() {
        let arena = Arena::with_page_size(64);
        arena.allocate(10, 1).unwrap();
        arena.allocate(1000, 8).unwrap();

        assert_eq!(arena.page_count(), 2);
        assert!(arena.capacity() >= 64 + 1000);
    }

    #[test]
    fn small_allocation_reuses_earlier_page() {
        let arena = Arena::with_page_size(64);
        let first = arena.allocate(32, 1).unwrap().as_ptr() as usize;
        arena.allocate(60, 1).unwrap();
        let third = arena.allocate(16, 1).unwrap().as_ptr() as usize;

        assert_eq!(arena.page_count(), 2);
        assert_eq!(third, first + 32);
    }

    #[test]
    fn discard_is_idempotent() {
        let mut arena = Arena::with_page_size(1024);
        let fresh = addresses(&arena);
        let pages = arena.page_count();

        arena.discard();
        assert_eq!(arena.used(), 0);
        assert_eq!(addresses(&arena), fresh);

        arena.discard();
        arena.discard();
        assert_eq!(addresses(&arena), fresh);
        assert_eq!(arena.page_count(), pages);
    }

    #[test]
    fn typed_slices() {
        let arena = Arena::new();
        let zeros: &mut [u32] = arena.alloc_slice_default(4).unwrap();
        assert_eq!(zeros, &[0, 0, 0, 0]);
        zeros[2] = 7;

        let copy = arena.alloc_slice_copy(&[1u64, 2, 3]).unwrap();
        assert_eq!(copy, &[1, 2, 3]);

        let name = arena.alloc_str("Hello World!").unwrap();
        assert_eq!(name, "Hello World!");
        assert_eq!(zeros, &[0, 0, 7, 0]);
    }

    #[test]
    fn empty_slices() {
        let arena = Arena::new();
        let empty: &mut [u64] = arena.alloc_slice_default(0).unwrap();

        assert!(empty.is_empty());
        assert_eq!(arena.alloc_str("").unwrap(), "");
    }

    #[test]
    fn slices_outlive_page_growth() {
        let arena = Arena::with_page_size(64);
        let first = arena.alloc_slice_copy(&[1u8; 48]).unwrap();
        let name = arena.alloc_str("kept").unwrap();

        // Forces several new pages while the earlier slices are alive
        let big: &mut [u32] = arena.alloc_slice_default(300).unwrap();
        big.fill(9);
        let second = arena.alloc_slice_copy(&[2u8; 48]).unwrap();

        assert_eq!(arena.page_count(), 2);
        assert_eq!(first, &[1u8; 48]);
        assert_eq!(second, &[2u8; 48]);
        assert_eq!(name, "kept");
        assert!(big.iter().all(|v| *v == 9));
    }
}

//! Bump arena that backs strings and child messages during a parse.
//!
//! Memory handed out by an [`Arena`] is never freed individually. It is
//! reclaimed all at once when the arena is reset or dropped, and everything
//! allocated from it borrows the arena for its lifetime.

use core::alloc::Layout;
use core::ptr::NonNull;

use bumpalo::Bump;

pub use bumpalo::collections::Vec as BumpVec;

/// A bulk allocator for decoded message data.
#[derive(Debug, Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    #[inline]
    pub fn new() -> Self {
        Arena { bump: Bump::new() }
    }

    /// Creates an arena whose first chunk holds at least `capacity` bytes.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            bump: Bump::with_capacity(capacity),
        }
    }

    /// Allocates uninitialized memory for `layout`.
    #[inline]
    pub fn allocate(&self, layout: Layout) -> NonNull<u8> {
        self.bump.alloc_layout(layout)
    }

    /// Copies `bytes` into the arena.
    #[inline]
    pub fn alloc_bytes(&self, bytes: &[u8]) -> &mut [u8] {
        self.bump.alloc_slice_copy(bytes)
    }

    /// Creates an empty growable vector that allocates from this arena.
    #[inline]
    pub fn new_vec<T>(&self) -> BumpVec<'_, T> {
        BumpVec::new_in(&self.bump)
    }

    /// Creates a growable vector holding a copy of `bytes`.
    #[inline]
    pub fn vec_from_bytes(&self, bytes: &[u8]) -> BumpVec<'_, u8> {
        BumpVec::from_iter_in(bytes.iter().copied(), &self.bump)
    }

    #[inline]
    pub(crate) fn bump(&self) -> &Bump {
        &self.bump
    }

    /// Total bytes of chunk memory currently held by the arena.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Releases every allocation made so far, keeping the largest chunk for reuse.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Whether two optional arenas are the same allocation domain.
    ///
    /// Two `None`s are the same domain: the heap.
    #[inline]
    pub fn same(a: Option<&Arena>, b: Option<&Arena>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => core::ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

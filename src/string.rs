//! String and bytes field storage with arena-aware ownership.
//!
//! A [`TaggedString`] is always in exactly one of four states:
//!
//! * `Default`: the shared empty value. Never written, never freed.
//! * `Heap`: a buffer owned by this field alone, freed on drop or replace.
//! * `ArenaMutable`: a growable buffer living in an [`Arena`].
//! * `ArenaFixed`: an exact-size buffer carved from an [`Arena`] while
//!   decoding. It avoids the growable machinery for short strings and is
//!   promoted to `ArenaMutable` once someone needs more room.
//!
//! Arena memory cannot be freed on its own, so anything leaving an arena
//! (release, swapping with a different domain) is copied out.

use crate::arena::{Arena, BumpVec};

/// Strings at most this long are donated an exact-size arena buffer when
/// first read off the wire.
pub const DONATE_THRESHOLD: usize = 22;

static EMPTY: &[u8] = &[];

/// Ownership state of a [`TaggedString`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringState {
    Default,
    Heap,
    ArenaMutable,
    ArenaFixed,
}

enum Repr<'a> {
    Default,
    Heap(Vec<u8>),
    ArenaMutable {
        buf: BumpVec<'a, u8>,
        arena: &'a Arena,
    },
    ArenaFixed {
        buf: &'a mut [u8],
        len: usize,
        arena: &'a Arena,
    },
}

/// Storage for a single `string` or `bytes` value.
pub struct TaggedString<'a> {
    repr: Repr<'a>,
}

impl<'a> TaggedString<'a> {
    pub const fn new() -> Self {
        TaggedString {
            repr: Repr::Default,
        }
    }

    /// Creates owned storage holding `value`, on `arena` when there is one.
    fn create(value: &[u8], arena: Option<&'a Arena>) -> Repr<'a> {
        match arena {
            Some(arena) => Repr::ArenaMutable {
                buf: arena.vec_from_bytes(value),
                arena,
            },
            None => Repr::Heap(value.to_vec()),
        }
    }

    #[inline]
    pub fn state(&self) -> StringState {
        match self.repr {
            Repr::Default => StringState::Default,
            Repr::Heap(_) => StringState::Heap,
            Repr::ArenaMutable { .. } => StringState::ArenaMutable,
            Repr::ArenaFixed { .. } => StringState::ArenaFixed,
        }
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        matches!(self.repr, Repr::Default)
    }

    /// The arena this value lives in, if any.
    pub fn arena(&self) -> Option<&'a Arena> {
        match self.repr {
            Repr::ArenaMutable { arena, .. } | Repr::ArenaFixed { arena, .. } => Some(arena),
            Repr::Default | Repr::Heap(_) => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.repr {
            Repr::Default => EMPTY,
            Repr::Heap(buf) => buf.as_slice(),
            Repr::ArenaMutable { buf, .. } => buf.as_slice(),
            Repr::ArenaFixed { buf, len, .. } => &buf[..*len],
        }
    }

    pub fn as_str(&self) -> Result<&str, core::str::Utf8Error> {
        core::str::from_utf8(self.as_bytes())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the value with a copy of `value`.
    ///
    /// Owned storage is overwritten in place. `arena` only matters when the
    /// string is still `Default`.
    pub fn set(&mut self, value: &[u8], arena: Option<&'a Arena>) {
        match &mut self.repr {
            Repr::Default => self.repr = Self::create(value, arena),
            Repr::Heap(buf) => {
                buf.clear();
                buf.extend_from_slice(value);
            }
            Repr::ArenaMutable { buf, .. } => {
                buf.clear();
                buf.extend_from_slice(value);
            }
            Repr::ArenaFixed { buf, len, arena } => {
                if value.len() <= buf.len() {
                    buf[..value.len()].copy_from_slice(value);
                    *len = value.len();
                } else {
                    let arena = *arena;
                    self.repr = Repr::ArenaMutable {
                        buf: arena.vec_from_bytes(value),
                        arena,
                    };
                }
            }
        }
    }

    /// Replaces the value with `value`, taking ownership of the buffer when
    /// the string lives on the heap.
    pub fn set_owned(&mut self, value: Vec<u8>, arena: Option<&'a Arena>) {
        match &mut self.repr {
            Repr::Default => {
                self.repr = match arena {
                    Some(_) => Self::create(&value, arena),
                    None => Repr::Heap(value),
                }
            }
            Repr::Heap(buf) => *buf = value,
            Repr::ArenaMutable { buf, .. } => {
                buf.clear();
                buf.extend_from_slice(&value);
            }
            Repr::ArenaFixed { arena, .. } => {
                let arena = *arena;
                self.repr = Repr::ArenaMutable {
                    buf: arena.vec_from_bytes(&value),
                    arena,
                };
            }
        }
    }

    /// Returns a writable handle, materializing owned storage first.
    ///
    /// A `Default` string is first given owned storage holding `default`, the
    /// field's declared default value. A donated `ArenaFixed` buffer is
    /// promoted to a growable one.
    pub fn mutable(&mut self, default: &[u8], arena: Option<&'a Arena>) -> StringMut<'_, 'a> {
        match &mut self.repr {
            Repr::Default => self.repr = Self::create(default, arena),
            Repr::ArenaFixed { buf, len, arena } => {
                let arena = *arena;
                let buf = arena.vec_from_bytes(&buf[..*len]);
                self.repr = Repr::ArenaMutable { buf, arena };
            }
            Repr::Heap(_) | Repr::ArenaMutable { .. } => (),
        }
        self.mutable_owned()
    }

    /// Like [`TaggedString::mutable`], but when new storage is needed its
    /// contents are left empty instead of copied.
    pub fn mutable_no_copy(&mut self, arena: Option<&'a Arena>) -> StringMut<'_, 'a> {
        match &mut self.repr {
            Repr::Default => self.repr = Self::create(&[], arena),
            Repr::ArenaFixed { arena, .. } => {
                let arena = *arena;
                self.repr = Repr::ArenaMutable {
                    buf: arena.new_vec(),
                    arena,
                };
            }
            Repr::Heap(_) | Repr::ArenaMutable { .. } => (),
        }
        self.mutable_owned()
    }

    fn mutable_owned(&mut self) -> StringMut<'_, 'a> {
        match &mut self.repr {
            Repr::Heap(buf) => StringMut::Heap(buf),
            Repr::ArenaMutable { buf, .. } => StringMut::Arena(buf),
            // Callers materialize owned, growable storage first.
            Repr::Default | Repr::ArenaFixed { .. } => {
                unreachable!("mutable storage was materialized")
            }
        }
    }

    /// Detaches the value and hands it to the caller as a heap buffer.
    ///
    /// Arena-owned contents are copied out. The string is left `Default`.
    /// Returns `None` when the string was already `Default`.
    pub fn release(&mut self) -> Option<Vec<u8>> {
        match core::mem::replace(&mut self.repr, Repr::Default) {
            Repr::Default => None,
            Repr::Heap(buf) => Some(buf),
            Repr::ArenaMutable { buf, .. } => Some(buf.as_slice().to_vec()),
            Repr::ArenaFixed { buf, len, .. } => Some(buf[..len].to_vec()),
        }
    }

    /// Truncates owned storage to zero length, retaining capacity.
    pub fn clear_to_empty(&mut self) {
        match &mut self.repr {
            Repr::Default => (),
            Repr::Heap(buf) => buf.clear(),
            Repr::ArenaMutable { buf, .. } => buf.clear(),
            Repr::ArenaFixed { len, .. } => *len = 0,
        }
    }

    /// Overwrites owned storage with `default`. A `Default` string is left alone.
    pub fn clear_to_default(&mut self, default: &[u8]) {
        if !self.is_default() {
            self.set(default, None);
        }
    }

    /// Drops the current value and adopts `value`.
    ///
    /// On an arena the buffer is copied in so that the arena still owns
    /// everything hanging off its messages. `None` resets to `Default`.
    pub fn set_allocated(&mut self, value: Option<Vec<u8>>, arena: Option<&'a Arena>) {
        self.repr = match (value, arena) {
            (None, _) => Repr::Default,
            (Some(value), None) => Repr::Heap(value),
            (Some(value), Some(_)) => Self::create(&value, arena),
        };
    }

    /// Returns an owned copy of the value in the domain of `arena`.
    pub fn force_copy(&self, arena: Option<&'a Arena>) -> TaggedString<'a> {
        TaggedString {
            repr: Self::create(self.as_bytes(), arena),
        }
    }

    /// Exchanges values with `other`.
    ///
    /// Strings in the same allocation domain swap in place. Across domains
    /// each value is copied into the other's domain.
    pub fn swap_with(
        &mut self,
        self_arena: Option<&'a Arena>,
        other: &mut TaggedString<'a>,
        other_arena: Option<&'a Arena>,
    ) {
        if Arena::same(self_arena, other_arena) {
            core::mem::swap(&mut self.repr, &mut other.repr);
            return;
        }

        let copy_into = |value: &TaggedString<'a>, arena| match value.repr {
            Repr::Default => TaggedString::new(),
            _ => value.force_copy(arena),
        };
        let to_other = copy_into(self, other_arena);
        let to_self = copy_into(other, self_arena);
        *self = to_self;
        *other = to_other;
    }

    /// Stores a value decoded from the wire.
    ///
    /// The first short value read into a `Default` string on an arena gets a
    /// donated exact-size buffer. Everything else goes through [`TaggedString::set`].
    #[inline]
    pub fn read_from_wire(&mut self, bytes: &[u8], arena: Option<&'a Arena>) {
        match (&self.repr, arena) {
            (Repr::Default, Some(arena)) if bytes.len() <= DONATE_THRESHOLD => {
                self.repr = Repr::ArenaFixed {
                    buf: arena.alloc_bytes(bytes),
                    len: bytes.len(),
                    arena,
                };
            }
            _ => self.set(bytes, arena),
        }
    }
}

impl Default for TaggedString<'_> {
    fn default() -> Self {
        TaggedString::new()
    }
}

impl<'a> Clone for TaggedString<'a> {
    /// Copies into the same allocation domain as `self`.
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Default => Repr::Default,
            Repr::Heap(buf) => Repr::Heap(buf.clone()),
            Repr::ArenaMutable { buf, arena } => {
                let arena: &'a Arena = arena;
                Repr::ArenaMutable {
                    buf: arena.vec_from_bytes(buf),
                    arena,
                }
            }
            Repr::ArenaFixed { buf, len, arena } => {
                let arena: &'a Arena = arena;
                Repr::ArenaFixed {
                    buf: arena.alloc_bytes(&buf[..*len]),
                    len: *len,
                    arena,
                }
            }
        };
        TaggedString { repr }
    }
}

impl PartialEq for TaggedString<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for TaggedString<'_> {}

impl PartialEq<[u8]> for TaggedString<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl core::fmt::Debug for TaggedString<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaggedString")
            .field("state", &self.state())
            .field("value", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// Writable handle to the owned storage of a [`TaggedString`].
pub enum StringMut<'s, 'a> {
    Heap(&'s mut Vec<u8>),
    Arena(&'s mut BumpVec<'a, u8>),
}

impl StringMut<'_, '_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            StringMut::Heap(buf) => buf.as_slice(),
            StringMut::Arena(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn capacity(&self) -> usize {
        match self {
            StringMut::Heap(buf) => buf.capacity(),
            StringMut::Arena(buf) => buf.capacity(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            StringMut::Heap(buf) => buf.clear(),
            StringMut::Arena(buf) => buf.clear(),
        }
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            StringMut::Heap(buf) => buf.truncate(len),
            StringMut::Arena(buf) => buf.truncate(len),
        }
    }

    pub fn push(&mut self, byte: u8) {
        match self {
            StringMut::Heap(buf) => buf.push(byte),
            StringMut::Arena(buf) => buf.push(byte),
        }
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        match self {
            StringMut::Heap(buf) => buf.extend_from_slice(bytes),
            StringMut::Arena(buf) => buf.extend_from_slice(bytes),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            StringMut::Heap(buf) => buf.reserve(additional),
            StringMut::Arena(buf) => buf.reserve(additional),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: &[u8] = b"a value that is longer than the donated buffer";

    /// Starting points: a state plus the owning message's allocation domain.
    #[derive(Debug, Clone, Copy)]
    enum Start {
        DefaultOnHeap,
        DefaultOnArena,
        Heap,
        ArenaMutable,
        ArenaFixed,
    }

    const STARTS: [Start; 5] = [
        Start::DefaultOnHeap,
        Start::DefaultOnArena,
        Start::Heap,
        Start::ArenaMutable,
        Start::ArenaFixed,
    ];

    fn make<'a>(start: Start, arena: &'a Arena) -> (TaggedString<'a>, Option<&'a Arena>) {
        let mut s = TaggedString::new();
        let domain = match start {
            Start::DefaultOnHeap => None,
            Start::DefaultOnArena => Some(arena),
            Start::Heap => {
                s.set(b"abc", None);
                None
            }
            Start::ArenaMutable => {
                s.set(b"abc", Some(arena));
                Some(arena)
            }
            Start::ArenaFixed => {
                s.read_from_wire(b"abc", Some(arena));
                Some(arena)
            }
        };
        (s, domain)
    }

    /// Runs `op` from every start and checks the resulting state and value.
    #[track_caller]
    fn check<F>(op: F, expected: [(StringState, &[u8]); 5])
    where
        F: for<'a> Fn(&mut TaggedString<'a>, Option<&'a Arena>),
    {
        let arena = Arena::new();
        for (start, (state, value)) in STARTS.into_iter().zip(expected) {
            let (mut s, domain) = make(start, &arena);
            op(&mut s, domain);
            assert_eq!(s.state(), state, "state after op from {start:?}");
            assert_eq!(s.as_bytes(), value, "value after op from {start:?}");
        }
    }

    use StringState::{ArenaFixed, ArenaMutable, Default as Dflt, Heap};

    #[test]
    fn test_start_states() {
        let arena = Arena::new();
        let states: Vec<_> = STARTS.iter().map(|s| make(*s, &arena).0.state()).collect();
        assert_eq!(states, [Dflt, Dflt, Heap, ArenaMutable, ArenaFixed]);
    }

    #[test]
    fn test_transition_set() {
        check(
            |s, arena| s.set(b"xy", arena),
            [
                (Heap, b"xy"),
                (ArenaMutable, b"xy"),
                (Heap, b"xy"),
                (ArenaMutable, b"xy"),
                (ArenaFixed, b"xy"),
            ],
        );
        check(
            |s, arena| s.set(LONG, arena),
            [
                (Heap, LONG),
                (ArenaMutable, LONG),
                (Heap, LONG),
                (ArenaMutable, LONG),
                (ArenaMutable, LONG),
            ],
        );
    }

    #[test]
    fn test_transition_set_owned() {
        check(
            |s, arena| s.set_owned(b"owned".to_vec(), arena),
            [
                (Heap, b"owned"),
                (ArenaMutable, b"owned"),
                (Heap, b"owned"),
                (ArenaMutable, b"owned"),
                (ArenaMutable, b"owned"),
            ],
        );
    }

    #[test]
    fn test_transition_mutable() {
        check(
            |s, arena| s.mutable(b"d", arena).push(b'!'),
            [
                (Heap, b"d!"),
                (ArenaMutable, b"d!"),
                (Heap, b"abc!"),
                (ArenaMutable, b"abc!"),
                (ArenaMutable, b"abc!"),
            ],
        );
        check(
            |s, arena| s.mutable_no_copy(arena).push(b'!'),
            [
                (Heap, b"!"),
                (ArenaMutable, b"!"),
                (Heap, b"abc!"),
                (ArenaMutable, b"abc!"),
                (ArenaMutable, b"!"),
            ],
        );
    }

    #[test]
    fn test_transition_release() {
        let arena = Arena::new();
        for start in STARTS {
            let (mut s, _) = make(start, &arena);
            let released = s.release();
            assert_eq!(s.state(), Dflt);
            match start {
                Start::DefaultOnHeap | Start::DefaultOnArena => assert_eq!(released, None),
                _ => assert_eq!(released.as_deref(), Some(&b"abc"[..]), "{start:?}"),
            }
        }
    }

    #[test]
    fn test_transition_clear() {
        check(
            |s, _| s.clear_to_empty(),
            [
                (Dflt, b""),
                (Dflt, b""),
                (Heap, b""),
                (ArenaMutable, b""),
                (ArenaFixed, b""),
            ],
        );
        check(
            |s, _| s.clear_to_default(b"d"),
            [
                (Dflt, b""),
                (Dflt, b""),
                (Heap, b"d"),
                (ArenaMutable, b"d"),
                (ArenaFixed, b"d"),
            ],
        );
    }

    #[test]
    fn test_transition_set_allocated() {
        check(
            |s, arena| s.set_allocated(Some(b"adopted".to_vec()), arena),
            [
                (Heap, b"adopted"),
                (ArenaMutable, b"adopted"),
                (Heap, b"adopted"),
                (ArenaMutable, b"adopted"),
                (ArenaMutable, b"adopted"),
            ],
        );
        check(
            |s, arena| s.set_allocated(None, arena),
            [(Dflt, b""), (Dflt, b""), (Dflt, b""), (Dflt, b""), (Dflt, b"")],
        );
    }

    #[test]
    fn test_transition_read_from_wire() {
        check(
            |s, arena| s.read_from_wire(b"wire", arena),
            [
                (Heap, b"wire"),
                (ArenaFixed, b"wire"),
                (Heap, b"wire"),
                (ArenaMutable, b"wire"),
                // Does not fit the three byte donated buffer.
                (ArenaMutable, b"wire"),
            ],
        );
        check(
            |s, arena| s.read_from_wire(b"ab", arena),
            [
                (Heap, b"ab"),
                (ArenaFixed, b"ab"),
                (Heap, b"ab"),
                (ArenaMutable, b"ab"),
                (ArenaFixed, b"ab"),
            ],
        );
        check(
            |s, arena| s.read_from_wire(LONG, arena),
            [
                (Heap, LONG),
                (ArenaMutable, LONG),
                (Heap, LONG),
                (ArenaMutable, LONG),
                (ArenaMutable, LONG),
            ],
        );
    }

    #[test]
    fn test_donate_threshold_boundary() {
        let arena = Arena::new();
        let mut s = TaggedString::new();
        s.read_from_wire(&[b'x'; DONATE_THRESHOLD], Some(&arena));
        assert_eq!(s.state(), ArenaFixed);

        let mut s = TaggedString::new();
        s.read_from_wire(&[b'x'; DONATE_THRESHOLD + 1], Some(&arena));
        assert_eq!(s.state(), ArenaMutable);
    }

    #[test]
    fn test_force_copy() {
        let arena = Arena::new();
        for start in STARTS {
            let (s, _) = make(start, &arena);
            let heap = s.force_copy(None);
            assert_eq!(heap.state(), Heap);
            assert_eq!(heap, s);

            let on_arena = s.force_copy(Some(&arena));
            assert_eq!(on_arena.state(), ArenaMutable);
            assert_eq!(on_arena, s);
        }
    }

    #[test]
    fn test_clone_keeps_state() {
        let arena = Arena::new();
        for start in STARTS {
            let (s, _) = make(start, &arena);
            let copy = s.clone();
            assert_eq!(copy.state(), s.state());
            assert_eq!(copy, s);
        }
    }

    #[test]
    fn test_set_release_set_allocated() {
        let mut s = TaggedString::new();
        s.set(b"hi", None);
        assert_eq!(s.state(), Heap);

        let released = s.release().expect("was set");
        assert_eq!(released, b"hi");
        assert!(s.is_default());

        s.set_allocated(Some(released), None);
        assert_eq!(s.state(), Heap);
        assert_eq!(s.as_str().unwrap(), "hi");
    }

    #[test]
    fn test_swap_same_domain() {
        let arena = Arena::new();
        let mut a = TaggedString::new();
        let mut b = TaggedString::new();
        a.read_from_wire(b"left", Some(&arena));
        b.set(b"right", Some(&arena));

        a.swap_with(Some(&arena), &mut b, Some(&arena));
        assert_eq!(a.as_bytes(), b"right");
        assert_eq!(a.state(), ArenaMutable);
        assert_eq!(b.as_bytes(), b"left");
        assert_eq!(b.state(), ArenaFixed);
    }

    #[test]
    fn test_swap_across_domains() {
        let arena = Arena::new();
        let mut on_heap = TaggedString::new();
        let mut on_arena = TaggedString::new();
        on_heap.set(b"heap", None);
        on_arena.read_from_wire(b"arena", Some(&arena));

        on_heap.swap_with(None, &mut on_arena, Some(&arena));
        assert_eq!(on_heap.as_bytes(), b"arena");
        assert_eq!(on_heap.state(), Heap);
        assert_eq!(on_arena.as_bytes(), b"heap");
        assert_eq!(on_arena.state(), ArenaMutable);

        // Defaults stay defaults.
        let mut empty = TaggedString::new();
        empty.swap_with(None, &mut on_arena, Some(&arena));
        assert_eq!(empty.as_bytes(), b"heap");
        assert!(on_arena.is_default());
    }

    #[test]
    fn test_string_mut_ops() {
        let arena = Arena::new();
        let mut s = TaggedString::new();
        let mut handle = s.mutable_no_copy(Some(&arena));
        handle.reserve(16);
        assert!(handle.capacity() >= 16);
        handle.extend_from_slice(b"hello world");
        handle.truncate(5);
        assert_eq!(handle.as_slice(), b"hello");
        assert_eq!(handle.len(), 5);
        handle.clear();
        assert!(handle.is_empty());
        assert_eq!(s.state(), ArenaMutable);
    }
}

//! Helpers to assert invariants of our code and hint the optimizer.

/// Macro that asserts two types are equal in size.
macro_rules! assert_eq_size {
    ($x:ty, $y:ty) => {
        const _: fn() = || {
            let _ = core::mem::transmute::<$x, $y>;
        };
    };
}

pub(crate) use assert_eq_size;

#[inline(always)]
#[cold]
fn cold_path() {}

/// "Annotation" to hint that a branch of an if-statement is likely to occur.
#[inline(always)]
pub(crate) fn likely(b: bool) -> bool {
    if b {
        true
    } else {
        cold_path();
        false
    }
}

/// "Annotation" to hint that a branch of an if-statement is _not likely_ to occur.
#[inline(always)]
pub(crate) fn unlikely(b: bool) -> bool {
    if b {
        cold_path();
        true
    } else {
        false
    }
}

/// Lossless widening conversions that `From` doesn't provide for `usize`.
///
/// We only support 32-bit and 64-bit targets, so `u32 -> usize` never truncates.
pub(crate) trait CastFrom<T> {
    fn cast_from(from: T) -> Self;
}

static_assertions::const_assert!(core::mem::size_of::<usize>() >= 4);

impl CastFrom<u32> for usize {
    #[inline(always)]
    #[allow(clippy::as_conversions)]
    fn cast_from(from: u32) -> Self {
        from as usize
    }
}

impl CastFrom<u16> for usize {
    #[inline(always)]
    fn cast_from(from: u16) -> Self {
        usize::from(from)
    }
}

impl CastFrom<u8> for u32 {
    #[inline(always)]
    fn cast_from(from: u8) -> Self {
        u32::from(from)
    }
}

//! Borrowed views of string bag slots.

use std::cmp::Ordering;
use std::fmt as StdFmt;
use std::sync::atomic::AtomicU8;

use crate::ordering::RELAXED;

/// A view of one slot's bytes, as returned by [`StringBag::get`](super::StringBag::get).
///
/// The view's bounds come from a single descriptor load, so they are always
/// inside the bag. The bytes themselves are read on demand: if the writer
/// overwrites the slot in place while the view is alive, a read may see a
/// mix of old and new bytes. Comparisons on this type are therefore
/// "sloppy" by construction. Callers that need an exact snapshot bracket the
/// read with the owning node's [`VersionLock`](crate::VersionLock).
#[derive(Clone, Copy)]
pub struct BagStr<'a> {
    bytes: &'a [AtomicU8],
    offset: usize,
}

impl<'a> BagStr<'a> {
    #[inline(always)]
    pub(crate) const fn new(bytes: &'a [AtomicU8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    /// Length of the string in bytes.
    #[inline(always)]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Is the string empty (slot unfilled)?
    #[inline(always)]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset of the string from the start of the bag.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Iterate over the bytes.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = u8> + use<'a> {
        self.bytes.iter().map(|b| b.load(RELAXED))
    }

    /// Copy the bytes into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }

    /// Copy up to `dst.len()` bytes into `dst`, returning the count copied.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let n: usize = self.len().min(dst.len());

        for (d, s) in dst.iter_mut().zip(self.bytes) {
            *d = s.load(RELAXED);
        }

        n
    }

    /// Compare with `other`, tolerating a concurrent in-place overwrite.
    ///
    /// Lengths are compared first; bytes are then compared one load at a time
    /// and never past this view's end.
    #[must_use]
    pub fn equals_sloppy(&self, other: &[u8]) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, &b)| a == b)
    }

    /// Lexicographic comparison with `other`.
    #[must_use]
    pub fn compare(&self, other: &[u8]) -> Ordering {
        self.iter().cmp(other.iter().copied())
    }

    /// Does the string start with `prefix`?
    #[must_use]
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        prefix.len() <= self.len() && self.iter().zip(prefix).all(|(a, &b)| a == b)
    }
}

impl PartialEq<[u8]> for BagStr<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.equals_sloppy(other)
    }
}

impl PartialEq<&[u8]> for BagStr<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        self.equals_sloppy(other)
    }
}

impl<const N: usize> PartialEq<[u8; N]> for BagStr<'_> {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.equals_sloppy(other)
    }
}

impl<const N: usize> PartialEq<&[u8; N]> for BagStr<'_> {
    fn eq(&self, other: &&[u8; N]) -> bool {
        self.equals_sloppy(*other)
    }
}

impl StdFmt::Debug for BagStr<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.to_vec()))
    }
}

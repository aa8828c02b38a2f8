//! Filepath: src/stringbag.rs
//!
//! Packed storage for a node's key suffixes.
//!
//! A [`StringBag`] holds up to `W` strings in one fixed-size allocation. New
//! strings are bump-allocated from the tail; abandoned bytes are never
//! reclaimed, and the allocation never grows. When `assign` returns false
//! the bag is full and the owner must split or rebuild the node.
//!
//! # Memory Layout
//!
//! ```text
//! offset 0                 2·B              2·B + W·2·B = overhead()        capacity
//! ┌──────────┬──────────────┬──────────────────────────┬──────────────────────┐
//! │ used - 1 │ capacity - 1 │ [(offset, len); W]       │ payload ...          │
//! └──────────┴──────────────┴──────────────────────────┴──────────────────────┘
//!   B bytes     B bytes        2·B bytes per slot
//! ```
//!
//! `B` is the size of the offset type `T`. Offsets are measured from the start
//! of the allocation. Header fields are stored minus one so that a bag of
//! exactly [`max_size()`](StringBag::max_size) bytes fits the offset type.
//! This includes `used`: a full 65536-byte `u16` bag has `used == 65536`.
//!
//! # Concurrency
//!
//! One writer, many readers. `assign` must be serialized externally, normally
//! by holding the owning node's [`VersionLock`](crate::VersionLock). `get` and
//! `filled` may run concurrently with that writer: the payload is written
//! before the descriptor is published (Release), and readers load the
//! descriptor with Acquire. A reader racing an in-place overwrite may see
//! stale trailing bytes, never bytes outside the bag.

use std::alloc::{self, Layout};
use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU8;

use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::tracing_helpers::{debug_log, trace_log};

mod offset;
mod slice;


pub use offset::BagOffset;
pub use slice::BagStr;

/// Smallest region a bump allocation reserves room for.
///
/// Equal to the word size read by word-at-a-time suffix comparisons, so a
/// full word starting at any string's offset stays inside the capacity.
pub const MIN_REGION: usize = size_of::<u64>();

/// Bytes of a dump line shown per string.
const DUMP_PREFIX_LEN: usize = 40;

/// A string bag with 16-bit offsets, the usual choice for leaf key suffixes.
pub type SuffixBag<const W: usize> = StringBag<u16, W>;

// ============================================================================
//  LayoutError
// ============================================================================

/// Errors from [`StringBag::try_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Capacity does not exceed the header and descriptor table.
    CapacityTooSmall {
        /// Requested capacity.
        capacity: usize,
        /// Bytes taken by header and descriptors.
        overhead: usize,
    },

    /// Capacity exceeds what the offset type can address.
    CapacityTooLarge {
        /// Requested capacity.
        capacity: usize,
        /// Largest supported capacity.
        max: usize,
    },

    /// The allocator refused the request.
    AllocationFailed {
        /// Requested capacity.
        capacity: usize,
    },
}

impl StdFmt::Display for LayoutError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::CapacityTooSmall { capacity, overhead } => {
                write!(f, "string bag capacity {capacity} must exceed overhead {overhead}")
            }

            Self::CapacityTooLarge { capacity, max } => {
                write!(f, "string bag capacity {capacity} exceeds maximum {max}")
            }

            Self::AllocationFailed { capacity } => {
                write!(f, "failed to allocate {capacity}-byte string bag")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

// ============================================================================
//  StringBag
// ============================================================================

/// A fixed-width, bump-allocated collection of up to `W` strings.
///
/// # Type Parameters
///
/// * `T` - offset type ([`BagOffset`]); bounds the capacity
/// * `W` - number of slots. Part of the type, never stored in the bag.
///
/// # Example
///
/// ```rust
/// use masstree_core::SuffixBag;
///
/// let bag: SuffixBag<15> = SuffixBag::with_payload(64);
///
/// assert!(bag.assign(0, b"aaa"));
/// assert_eq!(bag.used_capacity(), SuffixBag::<15>::overhead() + 3);
/// assert_eq!(bag.get(0), b"aaa");
/// assert!(!bag.filled(1));
/// ```
pub struct StringBag<T: BagOffset, const W: usize> {
    ptr: NonNull<u8>,
    _marker: PhantomData<T>,
}

// SAFETY: every byte of the allocation is only accessed through atomics,
// except in `get_exclusive`, which requires `&mut self`.
unsafe impl<T: BagOffset, const W: usize> Send for StringBag<T, W> {}
unsafe impl<T: BagOffset, const W: usize> Sync for StringBag<T, W> {}

impl<T: BagOffset, const W: usize> StringBag<T, W> {
    const HEADER_SIZE: usize = 2 * T::BYTES;
    const DESCRIPTOR_SIZE: usize = 2 * T::BYTES;

    // ========================================================================
    //  Sizing
    // ========================================================================

    /// Bytes taken by the header and the descriptor table.
    #[must_use]
    #[inline(always)]
    pub const fn overhead() -> usize {
        Self::HEADER_SIZE + W * Self::DESCRIPTOR_SIZE
    }

    /// A capacity that can definitely hold `len` bytes of strings.
    #[must_use]
    #[inline(always)]
    pub const fn safe_size(len: usize) -> usize {
        Self::overhead() + len + MIN_REGION - 1
    }

    /// Largest capacity the offset type can address.
    #[must_use]
    #[inline(always)]
    pub const fn max_size() -> usize {
        T::MAX_SIZE
    }

    /// Number of slots.
    #[must_use]
    #[inline(always)]
    pub const fn width() -> usize {
        W
    }

    // ========================================================================
    //  Constructors
    // ========================================================================

    /// Create an empty bag of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `capacity <= overhead()`, if `capacity > max_size()`, or if
    /// the allocation fails.
    pub fn try_new(capacity: usize) -> Result<Self, LayoutError> {
        let overhead: usize = Self::overhead();

        if capacity <= overhead {
            return Err(LayoutError::CapacityTooSmall { capacity, overhead });
        }

        if capacity > Self::max_size() {
            return Err(LayoutError::CapacityTooLarge {
                capacity,
                max: Self::max_size(),
            });
        }

        let layout: Layout = Layout::from_size_align(capacity, T::ALIGN)
            .map_err(|_| LayoutError::AllocationFailed { capacity })?;

        // SAFETY: layout has non-zero size (capacity > overhead >= 2).
        let raw: *mut u8 = unsafe { alloc::alloc_zeroed(layout) };
        let ptr: NonNull<u8> = NonNull::new(raw).ok_or(LayoutError::AllocationFailed { capacity })?;

        let bag = Self {
            ptr,
            _marker: PhantomData,
        };

        // Descriptors are already zero: every slot starts unfilled.
        // `used` is biased like `capacity` so a bag filled to max_size() fits.
        T::store_field(bag.used_field(), overhead - 1, RELAXED);
        T::store_field(bag.capacity_field(), capacity - 1, RELAXED);

        trace_log!(capacity, overhead, width = W, "string bag created");

        Ok(bag)
    }

    /// Create an empty bag of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity <= overhead()` or `capacity > max_size()`, or if
    /// the allocation fails.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Ok(bag) => bag,
            Err(LayoutError::AllocationFailed { capacity }) => {
                alloc::handle_alloc_error(Self::layout_for(capacity))
            }
            Err(err) => panic!("{err}"),
        }
    }

    /// Create an empty bag sized by [`safe_size(len)`](Self::safe_size).
    ///
    /// # Panics
    ///
    /// Panics if the resulting capacity exceeds `max_size()`.
    #[must_use]
    pub fn with_payload(len: usize) -> Self {
        Self::new(Self::safe_size(len))
    }

    fn layout_for(capacity: usize) -> Layout {
        Layout::from_size_align(capacity, T::ALIGN).unwrap_or_else(|_| Layout::new::<u8>())
    }

    // ========================================================================
    //  Raw Access
    // ========================================================================

    #[inline(always)]
    fn used_field(&self) -> &T::Field {
        // SAFETY: offset 0 is inside the allocation and aligned for `T::Field`
        // (allocation alignment is 2·B). Zeroed memory is a valid atomic.
        unsafe { self.ptr.cast::<T::Field>().as_ref() }
    }

    #[inline(always)]
    fn capacity_field(&self) -> &T::Field {
        // SAFETY: offset B is inside the header and B-aligned.
        unsafe { self.ptr.add(T::BYTES).cast::<T::Field>().as_ref() }
    }

    #[inline(always)]
    fn descriptors(&self) -> &[T::Descriptor] {
        // SAFETY: the table spans HEADER_SIZE..overhead(), inside the
        // allocation because capacity > overhead(). Its start is 2·B-aligned.
        unsafe {
            std::slice::from_raw_parts(
                self.ptr.add(Self::HEADER_SIZE).cast::<T::Descriptor>().as_ptr(),
                W,
            )
        }
    }

    #[inline(always)]
    fn descriptor(&self, slot: usize) -> &T::Descriptor {
        assert!(slot < W, "slot {slot} >= width {W}");
        &self.descriptors()[slot]
    }

    #[inline(always)]
    fn bytes(&self, offset: usize, len: usize) -> &[AtomicU8] {
        // INVARIANT: every published descriptor, and every bump region, ends
        // at or before capacity.
        debug_assert!(
            offset + len <= self.capacity(),
            "region {offset}+{len} past capacity {}",
            self.capacity()
        );

        // SAFETY: the region is inside the allocation (see invariant above);
        // payload bytes are only ever accessed as `AtomicU8` while shared.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset).cast::<AtomicU8>().as_ptr(), len) }
    }

    // ========================================================================
    //  Capacity & Size
    // ========================================================================

    /// Capacity the bag was created with, including overhead.
    #[must_use]
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        T::load_field(self.capacity_field(), RELAXED) + 1
    }

    /// Bytes used so far, including overhead and abandoned regions.
    #[must_use]
    #[inline(always)]
    pub fn used_capacity(&self) -> usize {
        T::load_field(self.used_field(), READ_ORD) + 1
    }

    /// Bytes left for bump allocation.
    #[must_use]
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used_capacity()
    }

    // ========================================================================
    //  Slot Access
    // ========================================================================

    /// Return the string at `slot`.
    ///
    /// An unfilled slot returns an empty view.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= W`.
    #[must_use]
    #[inline]
    pub fn get(&self, slot: usize) -> BagStr<'_> {
        let (offset, len) = T::load_descriptor(self.descriptor(slot), READ_ORD);

        BagStr::new(self.bytes(offset, len), offset)
    }

    /// Return the string at `slot` as a plain byte slice.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= W`.
    #[must_use]
    pub fn get_exclusive(&mut self, slot: usize) -> &[u8] {
        let (offset, len) = T::load_descriptor(self.descriptor(slot), RELAXED);
        let region: &[AtomicU8] = self.bytes(offset, len);

        // SAFETY: `&mut self` rules out concurrent writers, and `AtomicU8`
        // has the same layout as `u8`.
        unsafe { std::slice::from_raw_parts(region.as_ptr().cast::<u8>(), region.len()) }
    }

    /// Is `slot` filled (non-empty)?
    ///
    /// # Panics
    ///
    /// Panics if `slot >= W`.
    #[must_use]
    #[inline]
    pub fn filled(&self, slot: usize) -> bool {
        T::load_descriptor(self.descriptor(slot), READ_ORD).1 > 0
    }

    /// Iterate over filled slots as `(slot, string)` pairs.
    pub fn iter_filled(&self) -> impl Iterator<Item = (usize, BagStr<'_>)> + '_ {
        (0..W).filter_map(|slot| {
            let s: BagStr<'_> = self.get(slot);
            (!s.is_empty()).then_some((slot, s))
        })
    }

    // ========================================================================
    //  Assignment
    // ========================================================================

    #[inline]
    fn copy_in(&self, offset: usize, s: &[u8]) {
        for (dst, &b) in self.bytes(offset, s.len()).iter().zip(s) {
            dst.store(b, RELAXED);
        }
    }

    /// Assign `s` to `slot`.
    ///
    /// - If `s` is no longer than the slot's current string, it is written
    ///   over the existing region and `used_capacity()` is unchanged.
    /// - Otherwise, if `used_capacity() + max(s.len(), MIN_REGION)` fits the
    ///   capacity, `s` is appended at the tail. The old region is abandoned.
    /// - Otherwise nothing changes and false is returned.
    ///
    /// Callers must serialize `assign` on a bag (normally by holding the
    /// owning node's lock). Readers need no coordination.
    ///
    /// # Returns
    ///
    /// `true` on success, `false` if the bag is full.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= W`.
    pub fn assign(&self, slot: usize, s: &[u8]) -> bool {
        let descriptor: &T::Descriptor = self.descriptor(slot);
        let (offset, current_len) = T::load_descriptor(descriptor, RELAXED);
        let len: usize = s.len();

        // Reuse the existing region in place.
        if len <= current_len {
            self.copy_in(offset, s);
            T::store_descriptor(descriptor, offset, len, WRITE_ORD);
            return true;
        }

        let used: usize = self.used_capacity();
        let capacity: usize = self.capacity();

        if used + len.max(MIN_REGION) > capacity {
            debug_log!(slot, len, used, capacity, "string bag full");
            return false;
        }

        // Payload first, then the descriptor, then the tail.
        self.copy_in(used, s);
        T::store_descriptor(descriptor, used, len, WRITE_ORD);
        T::store_field(self.used_field(), used + len - 1, WRITE_ORD);

        true
    }

    // ========================================================================
    //  Diagnostics
    // ========================================================================

    /// Human-readable listing of the bag, one line per filled slot.
    ///
    /// The first line is `{addr} ({overhead}:){used}:{capacity}...`, each slot
    /// line is `#{slot:x} {offset}:{len} {leading bytes}`. Every line starts
    /// with `prefix` followed by `indent` spaces. Not a stable format.
    #[must_use]
    pub fn dump(&self, prefix: &str, indent: usize) -> String {
        let mut out: String = format!(
            "{prefix}{:indent$}{:p} ({}:){}:{}...\n",
            "",
            self.ptr,
            Self::overhead(),
            self.used_capacity(),
            self.capacity(),
        );

        for (slot, s) in self.iter_filled() {
            let shown: Vec<u8> = s.iter().take(DUMP_PREFIX_LEN).collect();

            out.push_str(&format!(
                "{prefix}{:indent$}  #{slot:x} {}:{} {}\n",
                "",
                s.offset(),
                s.len(),
                String::from_utf8_lossy(&shown),
            ));
        }

        out
    }
}

impl<T: BagOffset, const W: usize> Drop for StringBag<T, W> {
    fn drop(&mut self) {
        let layout: Layout = Self::layout_for(self.capacity());

        // SAFETY: allocated in `try_new` with exactly this size and alignment.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl<T: BagOffset, const W: usize> StdFmt::Debug for StringBag<T, W> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("StringBag")
            .field("width", &W)
            .field("overhead", &Self::overhead())
            .field("used", &self.used_capacity())
            .field("capacity", &self.capacity())
            .field("slots", &FilledSlots(self))
            .finish()
    }
}

/// Debug adapter listing a bag's filled slots as a map.
struct FilledSlots<'a, T: BagOffset, const W: usize>(&'a StringBag<T, W>);

impl<T: BagOffset, const W: usize> StdFmt::Debug for FilledSlots<'_, T, W> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_map().entries(self.0.iter_filled()).finish()
    }
}

// ============================================================================
//  Tests
// ============================================================================

//! Offset types for [`StringBag`](super::StringBag).
//!
//! The offset type fixes the width of every header field and descriptor
//! half, and therefore the largest bag that can be addressed.

use std::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// An unsigned integer type usable as a string bag offset.
///
/// Implemented for `u8`, `u16` and `u32` (the last only on 64-bit targets).
/// Smaller types have lower overhead but support smaller bags.
pub trait BagOffset: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Atomic cell holding one header field.
    type Field: Send + Sync;

    /// Atomic cell holding one packed `(offset, length)` descriptor.
    type Descriptor: Send + Sync;

    /// Size of the offset type in bytes.
    const BYTES: usize;

    /// Largest representable capacity: `Self::MAX + 1`.
    const MAX_SIZE: usize;

    /// Alignment required by the bag allocation.
    const ALIGN: usize;

    /// Load a header field.
    fn load_field(field: &Self::Field, order: Ordering) -> usize;

    /// Store a header field. `value` must fit the offset type.
    fn store_field(field: &Self::Field, value: usize, order: Ordering);

    /// Load a descriptor as `(offset, length)`.
    fn load_descriptor(descriptor: &Self::Descriptor, order: Ordering) -> (usize, usize);

    /// Publish a descriptor with a single store.
    fn store_descriptor(descriptor: &Self::Descriptor, offset: usize, len: usize, order: Ordering);
}

macro_rules! impl_bag_offset {
    ($t:ty, $field:ty, $wide:ty, $descriptor:ty) => {
        const _: () = assert!(size_of::<$descriptor>() == 2 * size_of::<$t>());

        impl sealed::Sealed for $t {}

        #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
        impl BagOffset for $t {
            type Field = $field;
            type Descriptor = $descriptor;

            const BYTES: usize = size_of::<$t>();
            const MAX_SIZE: usize = <$t>::MAX as usize + 1;
            const ALIGN: usize = align_of::<$descriptor>();

            #[inline(always)]
            fn load_field(field: &$field, order: Ordering) -> usize {
                field.load(order) as usize
            }

            #[inline(always)]
            fn store_field(field: &$field, value: usize, order: Ordering) {
                debug_assert!(value <= <$t>::MAX as usize, "field value {value} overflows");
                field.store(value as $t, order);
            }

            #[inline(always)]
            fn load_descriptor(descriptor: &$descriptor, order: Ordering) -> (usize, usize) {
                let packed: $wide = descriptor.load(order);

                ((packed as $t) as usize, ((packed >> <$t>::BITS) as $t) as usize)
            }

            #[inline(always)]
            fn store_descriptor(descriptor: &$descriptor, offset: usize, len: usize, order: Ordering) {
                debug_assert!(offset <= <$t>::MAX as usize, "offset {offset} overflows");
                debug_assert!(len <= <$t>::MAX as usize, "length {len} overflows");

                let packed: $wide = (offset as $wide) | ((len as $wide) << <$t>::BITS);
                descriptor.store(packed, order);
            }
        }
    };
}

impl_bag_offset!(u8, AtomicU8, u16, AtomicU16);
impl_bag_offset!(u16, AtomicU16, u32, AtomicU32);
#[cfg(target_pointer_width = "64")]
impl_bag_offset!(u32, AtomicU32, u64, AtomicU64);

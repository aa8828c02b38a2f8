//! Standard memory orderings for lock-word and bag-descriptor access.
//!
//! These constants keep ordering usage consistent across the crate and make
//! the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading published state (lock word, bag descriptors).
/// Pairs with the writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing state under the lock (descriptor stores, flag marks).
/// Pairs with readers' Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for a successful lock-bit CAS.
pub const CAS_SUCCESS: Ordering = Ordering::Acquire;

/// Ordering for a failed lock-bit CAS. Only the current value is needed.
pub const CAS_FAILURE: Ordering = Ordering::Relaxed;

/// Ordering for loads made by the lock holder, and for payload bytes whose
/// visibility is carried by a descriptor publish.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for the unlock store (clear lock + bump counter).
/// Must be visible to readers validating a snapshot.
pub const UNLOCK_ORD: Ordering = Ordering::Release;

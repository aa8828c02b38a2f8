//! # `masstree-core`
//!
//! The two lowest-level primitives under a Masstree-style trie of B+trees:
//!
//! - [`VersionLock`]: a per-node spin lock whose single `u64` word also
//!   carries structural flags (inserting, splitting, deleted, root, leaf) and
//!   a version counter. Readers never lock; they bracket a read between
//!   [`VersionLock::stable`] and [`VersionLock::validate`] and retry on
//!   failure.
//! - [`StringBag`]: a fixed-width, bump-allocated bag of up to `W` strings
//!   packed into one allocation, used by leaves to store key suffixes
//!   without one heap allocation per key.
//!
//! ## Usage
//!
//! A writer locks the node, mutates its bag, and releases the lock, which
//! bumps the version. Readers read the bag without locking and validate.
//!
//! ```rust
//! use masstree_core::{SuffixBag, VersionLock};
//!
//! let lock = VersionLock::new(true);
//! let suffixes: SuffixBag<15> = SuffixBag::with_payload(64);
//!
//! // Writer
//! {
//!     let mut guard = lock.lock();
//!     guard.mark_insert();
//!     assert!(suffixes.assign(3, b"suffix"));
//! }
//!
//! // Reader
//! let value = loop {
//!     let before = lock.stable();
//!     let value = suffixes.get(3).to_vec();
//!     if lock.validate(before) {
//!         break value;
//!     }
//! };
//! assert_eq!(value, b"suffix");
//! ```
//!
//! ## Caller Contracts
//!
//! - `VersionLock::lock` spins without fairness. Callers lock nodes in a fixed
//!   root-to-leaf order and keep critical sections short.
//! - `StringBag::assign` must not run concurrently with another `assign` on
//!   the same bag; hold the owning node's lock.
//! - A full bag (`assign` returning false) is the caller's cue to split.
//!
//! ## Features
//!
//! - `tracing`: log lock contention and bag exhaustion through `tracing`.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Hot accessors are marked #[inline(always)] on purpose.
#![allow(clippy::inline_always)]

pub mod ordering;
pub mod stringbag;
mod tracing_helpers;
pub mod versionlock;

pub use stringbag::{BagOffset, BagStr, LayoutError, MIN_REGION, StringBag, SuffixBag};
pub use versionlock::{LockGuard, VersionLock, VersionSnapshot};

//! Filepath: src/versionlock.rs
//!
//! Optimistic version lock for tree nodes.
//!
//! [`VersionLock`] packs a lock bit, structural status flags and a version
//! counter into a single `u64`. Writers acquire the lock, readers never do:
//! they take a [`VersionSnapshot`] before reading and validate it afterwards.
//!
//! # Concurrency Model
//! 1. Readers: call `stable()`, read node fields, call `validate()`. Retry
//!    from `stable()` if validation fails.
//! 2. Writers: call `lock()` to get a [`LockGuard`], mutate the node, let the
//!    guard drop. Every release bumps the version counter.
//!
//! # Type-State Pattern
//! Flag mutators live on [`LockGuard`], so marking a node without holding its
//! lock does not compile. The guard releases the lock on drop (panic-safe).
//!
//! ```rust
//! use masstree_core::VersionLock;
//!
//! let lock = VersionLock::new(true);
//! let before = lock.stable();
//!
//! {
//!     let mut guard = lock.lock();
//!     guard.mark_insert();
//!     // Lock released when guard drops
//! }
//!
//! assert!(!lock.validate(before));
//! assert!(lock.version() > before.version());
//! ```
//!
//! # Fairness
//! `lock()` is an unfair spin lock. It never fails, which holds only because
//! callers lock nodes in a fixed root-to-leaf order and keep critical sections
//! short. Callers that need bounded waiting build their own retry policy on
//! [`VersionLock::try_lock`].

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, UNLOCK_ORD, WRITE_ORD};
use crate::tracing_helpers::{trace_log, warn_log};



// ============================================================================
//  Bit Constants
// ============================================================================

/// Lock bit: a writer holds the node.
const LOCK_BIT: u64 = 1 << 0;

/// Inserting bit: node is being inserted into.
const INSERTING_BIT: u64 = 1 << 1;

/// Splitting bit: node is being split.
const SPLITTING_BIT: u64 = 1 << 2;

/// Dirty mask: either inserting or splitting.
const DIRTY_MASK: u64 = INSERTING_BIT | SPLITTING_BIT;

/// Deleted bit: node is logically deleted.
const DELETED_BIT: u64 = 1 << 3;

/// Root bit: node is a tree root.
const ROOT_BIT: u64 = 1 << 4;

/// Is-leaf bit: node is a leaf (vs internode).
const ISLEAF_BIT: u64 = 1 << 5;

/// Position of the version counter.
const VERSION_SHIFT: u32 = 6;

/// Low bit of the version counter.
const VERSION_LOWBIT: u64 = 1 << VERSION_SHIFT;

/// Mask applied on release: clears the lock and dirty bits.
const UNLOCK_MASK: u64 = !(LOCK_BIT | DIRTY_MASK);

/// Spin rounds before `lock()` starts yielding to the scheduler.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Spin rounds after which a still-contended `lock()` is reported.
const SLOW_LOCK_ROUNDS: u32 = 1 << 16;

#[inline(always)]
fn backoff(rounds: u32) {
    if rounds < SPINS_BEFORE_YIELD {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

// ============================================================================
//  VersionSnapshot
// ============================================================================

/// A copy of a lock word taken at one instant.
///
/// Snapshots are what readers carry across an optimistic read, and what a
/// lock holder hands to [`LockGuard::assign_version`] to roll flags back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionSnapshot(u64);

impl VersionSnapshot {
    /// Was the lock held when the snapshot was taken?
    #[inline]
    #[must_use]
    pub const fn is_locked(self) -> bool {
        (self.0 & LOCK_BIT) != 0
    }

    /// Was the inserting flag set?
    #[inline]
    #[must_use]
    pub const fn inserting(self) -> bool {
        (self.0 & INSERTING_BIT) != 0
    }

    /// Was the splitting flag set?
    #[inline]
    #[must_use]
    pub const fn splitting(self) -> bool {
        (self.0 & SPLITTING_BIT) != 0
    }

    /// Was either dirty flag (inserting, splitting) set?
    #[inline]
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        (self.0 & DIRTY_MASK) != 0
    }

    /// Was the node marked deleted?
    #[inline]
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        (self.0 & DELETED_BIT) != 0
    }

    /// Was the node a root?
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        (self.0 & ROOT_BIT) != 0
    }

    /// Was the node a leaf?
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        (self.0 & ISLEAF_BIT) != 0
    }

    /// The version counter.
    #[inline]
    #[must_use]
    pub const fn version(self) -> u64 {
        self.0 >> VERSION_SHIFT
    }

    /// The raw lock word. Diagnostics only; the layout is not a stable format.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl StdFmt::Debug for VersionSnapshot {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("VersionSnapshot")
            .field("version", &self.version())
            .field("locked", &self.is_locked())
            .field("inserting", &self.inserting())
            .field("splitting", &self.splitting())
            .field("deleted", &self.is_deleted())
            .field("root", &self.is_root())
            .field("leaf", &self.is_leaf())
            .finish()
    }
}

// ============================================================================
//  VersionLock
// ============================================================================

/// A versioned spin lock for tree nodes.
///
/// # Layout
/// Bits 6-63: `version` | Bit 5: `is_leaf` | Bit 4: `root` | Bit 3: `deleted`
/// Bit 2: `splitting` | Bit 1: `inserting` | Bit 0: `locked`
///
/// The flags and the counter only change while the lock bit is set, and only
/// through the holder's [`LockGuard`]. Any thread may query them at any time;
/// a query reflects some recent atomic snapshot of the whole word.
///
/// # Example
///
/// ```rust
/// use masstree_core::VersionLock;
///
/// let v = VersionLock::new(true);
///
/// assert!(v.is_leaf());
/// assert!(!v.is_locked());
///
/// let guard = v.try_lock().expect("uncontended");
/// assert!(v.try_lock().is_none());
/// drop(guard);
/// ```
pub struct VersionLock {
    value: AtomicU64,
}

// ============================================================================
//  LockGuard (Type-State Pattern)
// ============================================================================

/// Proof that a [`VersionLock`] is held.
///
/// Cannot be constructed except through [`VersionLock::lock`] or
/// [`VersionLock::try_lock`]. Dropping the guard releases the lock and bumps
/// the version counter, even during unwinding.
///
/// Guards are `!Send` and `!Sync` via `PhantomData<*mut ()>`: a lock is
/// released by the thread that took it.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the lock"]
pub struct LockGuard<'a> {
    lock: &'a VersionLock,
    locked_value: u64,

    _marker: PhantomData<*mut ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Clear lock + dirty bits and bump the counter in one store.
        let new_value: u64 = self.locked_value.wrapping_add(VERSION_LOWBIT) & UNLOCK_MASK;

        self.lock.value.store(new_value, UNLOCK_ORD);
    }
}

impl<'a> LockGuard<'a> {
    #[inline]
    const fn new(lock: &'a VersionLock, locked_value: u64) -> Self {
        Self {
            lock,
            locked_value,
            _marker: PhantomData,
        }
    }

    /// The lock word as the holder currently sees it (lock bit set).
    #[inline]
    #[must_use]
    pub const fn snapshot(&self) -> VersionSnapshot {
        VersionSnapshot(self.locked_value)
    }

    /// Release the lock. Same as dropping the guard.
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }

    #[inline]
    fn publish(&mut self, value: u64) {
        debug_assert!(value & LOCK_BIT != 0, "publish would clear the lock bit");

        self.locked_value = value;
        self.lock.value.store(value, WRITE_ORD);
    }

    /// Mark the node as being inserted into.
    #[inline]
    pub fn mark_insert(&mut self) {
        self.publish(self.locked_value | INSERTING_BIT);
    }

    /// Mark the node as being split.
    #[inline]
    pub fn mark_split(&mut self) {
        self.publish(self.locked_value | SPLITTING_BIT);
    }

    /// Mark the node as deleted.
    ///
    /// Also sets the splitting bit: deletion is a structural change.
    #[inline]
    pub fn mark_deleted(&mut self) {
        self.publish(self.locked_value | DELETED_BIT | SPLITTING_BIT);
    }

    /// Set the root bit.
    #[inline]
    pub fn mark_root(&mut self) {
        self.publish(self.locked_value | ROOT_BIT);
    }

    /// Clear the root bit.
    #[inline]
    pub fn mark_nonroot(&mut self) {
        self.publish(self.locked_value & !ROOT_BIT);
    }

    /// Overwrite flags and counter with `snapshot`, keeping the lock held.
    ///
    /// Used to abandon a tentative mark made earlier in the critical section.
    /// `snapshot` should come from [`LockGuard::snapshot`] of this same
    /// critical section.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `snapshot` would move the counter backwards.
    #[inline]
    pub fn assign_version(&mut self, snapshot: VersionSnapshot) {
        debug_assert!(
            snapshot.version() >= self.snapshot().version(),
            "assign_version would roll the counter back: {} < {}",
            snapshot.version(),
            self.snapshot().version()
        );

        self.publish(snapshot.0 | LOCK_BIT);
    }
}

impl VersionLock {
    /// Create an unlocked, non-root version lock at counter zero.
    ///
    /// # Arguments
    /// - `is_leaf` - true for leaf nodes, false for internodes
    #[must_use]
    pub const fn new(is_leaf: bool) -> Self {
        let initial: u64 = if is_leaf { ISLEAF_BIT } else { 0 };

        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Create an unlocked root version lock at counter zero.
    #[must_use]
    pub const fn new_root(is_leaf: bool) -> Self {
        let initial: u64 = if is_leaf { ISLEAF_BIT | ROOT_BIT } else { ROOT_BIT };

        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Create a version lock from a raw word. Lock and dirty bits are cleared.
    ///
    /// Intended for tests and benchmarks that need a specific counter value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value & UNLOCK_MASK),
        }
    }

    // ========================================================================
    //  Flag Accessors
    // ========================================================================

    /// Check if this node is locked.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        (self.value.load(RELAXED) & LOCK_BIT) != 0
    }

    /// Check if this node is being inserted into.
    #[inline]
    #[must_use]
    pub fn inserting(&self) -> bool {
        (self.value.load(RELAXED) & INSERTING_BIT) != 0
    }

    /// Check if this node is being split.
    #[inline]
    #[must_use]
    pub fn splitting(&self) -> bool {
        (self.value.load(RELAXED) & SPLITTING_BIT) != 0
    }

    /// Check if any dirty bit is set (inserting or splitting).
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        (self.value.load(RELAXED) & DIRTY_MASK) != 0
    }

    /// Check if this node is logically deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        (self.value.load(RELAXED) & DELETED_BIT) != 0
    }

    /// Check if this is a root node.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        (self.value.load(RELAXED) & ROOT_BIT) != 0
    }

    /// Check if this is a leaf node.
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        (self.value.load(RELAXED) & ISLEAF_BIT) != 0
    }

    /// The current version counter.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Atomically read the whole lock word.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> VersionSnapshot {
        VersionSnapshot(self.value.load(READ_ORD))
    }

    // ========================================================================
    //  Optimistic Reads
    // ========================================================================

    /// Get an unlocked snapshot to begin an optimistic read.
    ///
    /// Spins while a writer holds the lock. Pair with [`validate`](Self::validate)
    /// once the read is done.
    #[inline]
    #[must_use]
    pub fn stable(&self) -> VersionSnapshot {
        let mut rounds: u32 = 0;

        loop {
            let value: u64 = self.value.load(READ_ORD);

            if value & LOCK_BIT == 0 {
                return VersionSnapshot(value);
            }

            rounds = rounds.saturating_add(1);
            backoff(rounds);
        }
    }

    /// Check that an optimistic read begun at `before` saw consistent data.
    ///
    /// Returns false if `before` was taken while the lock was held, or if the
    /// word has changed since (which includes being locked right now).
    #[inline]
    #[must_use]
    pub fn validate(&self, before: VersionSnapshot) -> bool {
        // Orders the caller's data loads before the reload below.
        fence(Ordering::Acquire);

        !before.is_locked() && self.value.load(RELAXED) == before.0
    }

    /// Check if the word has changed since `old`, ignoring the lock bit.
    ///
    /// XOR of only the lock bit equals `LOCK_BIT`, which is not greater than
    /// `LOCK_BIT`, so lock-only changes return false.
    #[inline]
    #[must_use]
    pub fn has_changed(&self, old: VersionSnapshot) -> bool {
        (old.0 ^ self.value.load(READ_ORD)) > LOCK_BIT
    }

    // ========================================================================
    //  Lock Operations (Type-State Pattern)
    // ========================================================================

    #[inline]
    fn acquired(&self, locked: u64) -> LockGuard<'_> {
        // Critical-section writes must not become visible before the lock bit.
        fence(Ordering::Release);

        LockGuard::new(self, locked)
    }

    /// Try to acquire the lock without blocking.
    ///
    /// Makes a single compare-and-swap attempt.
    ///
    /// # Returns
    /// `Some(guard)` if the lock was acquired, `None` if it is held elsewhere
    /// or the attempt lost a race.
    #[inline]
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        let value: u64 = self.value.load(RELAXED);

        if value & LOCK_BIT != 0 {
            return None;
        }

        let locked: u64 = value | LOCK_BIT;

        self.value
            .compare_exchange(value, locked, CAS_SUCCESS, CAS_FAILURE)
            .ok()
            .map(|_| self.acquired(locked))
    }

    /// Acquire the lock, spinning until it is free.
    ///
    /// Never fails. Spins with `spin_loop` for a short while, then yields to
    /// the scheduler between attempts.
    pub fn lock(&self) -> LockGuard<'_> {
        let mut rounds: u32 = 0;

        loop {
            let value: u64 = self.value.load(RELAXED);

            if value & LOCK_BIT == 0 {
                let locked: u64 = value | LOCK_BIT;

                if self
                    .value
                    .compare_exchange_weak(value, locked, CAS_SUCCESS, CAS_FAILURE)
                    .is_ok()
                {
                    if rounds > SPINS_BEFORE_YIELD {
                        trace_log!(rounds, "contended version lock acquired");
                    }

                    return self.acquired(locked);
                }
            }

            rounds = rounds.saturating_add(1);

            if rounds == SLOW_LOCK_ROUNDS {
                warn_log!(rounds, version = value >> VERSION_SHIFT, "SLOW_LOCK: version lock still held");
            }

            backoff(rounds);
        }
    }
}

impl Default for VersionLock {
    /// Creates a new non-root leaf lock.
    fn default() -> Self {
        Self::new(true)
    }
}

impl StdFmt::Debug for VersionLock {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_tuple("VersionLock").field(&self.snapshot()).finish()
    }
}

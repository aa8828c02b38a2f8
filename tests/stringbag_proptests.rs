//! Property-based tests for the `stringbag` module.
//!
//! A random sequence of assignments is replayed against a plain model of the
//! bump allocator; the bag must agree with it after every step.

use masstree_core::{MIN_REGION, StringBag};
use proptest::prelude::*;

const WIDTH: usize = 15;

type Bag = StringBag<u16, WIDTH>;

/// Reference model: per-slot (offset, bytes) plus the tail.
#[derive(Debug, Clone)]
struct Model {
    slots: Vec<(usize, Vec<u8>)>,
    used: usize,
    capacity: usize,
}

impl Model {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![(0, Vec::new()); WIDTH],
            used: Bag::overhead(),
            capacity,
        }
    }

    fn assign(&mut self, slot: usize, s: &[u8]) -> bool {
        let (offset, current) = &self.slots[slot];

        if s.len() <= current.len() {
            self.slots[slot] = (*offset, s.to_vec());
            return true;
        }

        if self.used + s.len().max(MIN_REGION) > self.capacity {
            return false;
        }

        self.slots[slot] = (self.used, s.to_vec());
        self.used += s.len();
        true
    }
}

// ============================================================================
//  Strategies
// ============================================================================

fn op() -> impl Strategy<Value = (usize, Vec<u8>)> {
    (0..WIDTH, prop::collection::vec(any::<u8>(), 0..24))
}

fn payload() -> impl Strategy<Value = usize> {
    0usize..200
}

// ============================================================================
//  Model Agreement
// ============================================================================

proptest! {
    /// The bag behaves exactly like the model for any assignment sequence.
    #[test]
    fn matches_model(len in payload(), ops in prop::collection::vec(op(), 0..64)) {
        let bag = Bag::with_payload(len);
        let mut model = Model::new(bag.capacity());

        for (slot, s) in &ops {
            prop_assert_eq!(bag.assign(*slot, s), model.assign(*slot, s));
            prop_assert_eq!(bag.used_capacity(), model.used);

            for (i, (offset, bytes)) in model.slots.iter().enumerate() {
                let got = bag.get(i);
                prop_assert_eq!(got.to_vec(), bytes.clone());
                prop_assert_eq!(bag.filled(i), !bytes.is_empty());
                if !bytes.is_empty() {
                    prop_assert_eq!(got.offset(), *offset);
                }
            }
        }
    }

    /// Success is decided exactly by the capacity formula; failure changes nothing.
    #[test]
    fn capacity_boundary(len in payload(), ops in prop::collection::vec(op(), 1..64)) {
        let bag = Bag::with_payload(len);

        for (slot, s) in &ops {
            let used = bag.used_capacity();
            let current = bag.get(*slot).to_vec();
            let current_offset = bag.get(*slot).offset();

            let fits = s.len() <= current.len()
                || used + s.len().max(MIN_REGION) <= bag.capacity();

            let ok = bag.assign(*slot, s);
            prop_assert_eq!(ok, fits);

            if !ok {
                prop_assert_eq!(bag.used_capacity(), used);
                prop_assert_eq!(bag.get(*slot).to_vec(), current);
                prop_assert_eq!(bag.get(*slot).offset(), current_offset);
            }
        }
    }

    /// Assigning a string no longer than the current one never grows the bag.
    #[test]
    fn in_place_never_grows(
        first in prop::collection::vec(any::<u8>(), 1..32),
        cut in any::<prop::sample::Index>(),
        slot in 0..WIDTH,
    ) {
        let bag = Bag::with_payload(64);
        prop_assert!(bag.assign(slot, &first));

        let used = bag.used_capacity();
        let offset = bag.get(slot).offset();
        let shorter = &first[..cut.index(first.len() + 1)];

        prop_assert!(bag.assign(slot, shorter));
        prop_assert_eq!(bag.used_capacity(), used);
        prop_assert_eq!(bag.get(slot), shorter);
        if !shorter.is_empty() {
            prop_assert_eq!(bag.get(slot).offset(), offset);
        }
    }

    /// used_capacity never decreases and never passes capacity.
    #[test]
    fn used_is_monotonic(len in payload(), ops in prop::collection::vec(op(), 0..64)) {
        let bag = Bag::with_payload(len);
        let mut prev = bag.used_capacity();

        for (slot, s) in &ops {
            let _ = bag.assign(*slot, s);
            let used = bag.used_capacity();
            prop_assert!(used >= prev);
            prop_assert!(used <= bag.capacity());
            prev = used;
        }
    }

    /// safe_size(len) always holds a single string of len bytes.
    #[test]
    fn safe_size_fits_payload(len in 0usize..1000, slot in 0..WIDTH) {
        let bag = Bag::with_payload(len);
        let s = vec![b'k'; len];

        prop_assert!(bag.assign(slot, &s));
        prop_assert_eq!(bag.get(slot), s.as_slice());
    }
}

// ============================================================================
//  Concrete Scenario
// ============================================================================

#[test]
fn grow_then_shrink_scenario() {
    let bag = Bag::new(Bag::safe_size(64));
    let overhead = Bag::overhead();

    assert!(bag.assign(0, b"aaa"));
    assert_eq!(bag.used_capacity(), overhead + 3);

    assert!(bag.assign(0, b"aaaaa"));
    assert_eq!(bag.used_capacity(), overhead + 3 + 5);
    let offset = bag.get(0).offset();

    assert!(bag.assign(0, b"a"));
    assert_eq!(bag.used_capacity(), overhead + 3 + 5);
    assert_eq!(bag.get(0).offset(), offset);
    assert_eq!(bag.get(0), b"a");
}

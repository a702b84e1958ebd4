//! CharacteristicKeySet 测试

use proptest::prelude::*;

use crate::pipeline::key::{
    CharacteristicIndex, CharacteristicKeySet, ConsecutiveRange, FactoryCharacteristicId, FactoryCharacteristicKey,
    FactoryIndex,
};

fn id(
    factory: u32,
    characteristic: u32,
) -> FactoryCharacteristicId {
    FactoryCharacteristicId {
        factory: FactoryIndex(factory),
        characteristic: CharacteristicIndex(characteristic),
    }
}

#[test]
fn test_touching_ranges_merge() {
    let mut range = ConsecutiveRange::new(0, 2);
    assert!(range.extend_subrange(&ConsecutiveRange::new(2, 3)));
    assert_eq!(range, ConsecutiveRange::new(0, 3));
    assert!(!range.extend_subrange(&ConsecutiveRange::new(4, 5)));
    assert_eq!(range.to_string(), "[0, 3)");
}

#[test]
#[should_panic(expected = "empty consecutive range")]
fn test_empty_consecutive_range_panics() {
    ConsecutiveRange::new(3, 3);
}

#[test]
fn test_overlapping_keys_compare_equal() {
    let a = FactoryCharacteristicKey::new(id(0, 1), ConsecutiveRange::new(0, 4));
    let b = FactoryCharacteristicKey::for_fill_index(id(0, 1), Some(2));
    let c = FactoryCharacteristicKey::for_fill_index(id(0, 2), Some(2));
    assert_eq!(a, b);
    assert!(a < c);
    assert_eq!(a.to_string(), "0:1[0, 4)");
}

#[test]
fn test_merge_needs_same_id() {
    let mut a = FactoryCharacteristicKey::for_fill_index(id(0, 1), Some(0));
    assert!(!a.merge(&FactoryCharacteristicKey::for_fill_index(id(1, 1), Some(1))));
    assert!(a.merge(&FactoryCharacteristicKey::for_fill_index(id(0, 1), Some(1))));
    assert_eq!(a.subrange(), ConsecutiveRange::new(0, 2));
}

#[test]
fn test_key_set_merges_and_finds() {
    let mut set = CharacteristicKeySet::new();
    set.insert(FactoryCharacteristicKey::for_fill_index(id(0, 0), Some(0)));
    set.insert(FactoryCharacteristicKey::for_fill_index(id(0, 0), Some(2)));
    assert_eq!(set.len(), 2);
    // Fills the gap and joins both neighbours.
    set.insert(FactoryCharacteristicKey::for_fill_index(id(0, 0), Some(1)));
    assert_eq!(set.len(), 1);
    assert_eq!(set.iter().next().map(|k| k.subrange()), Some(ConsecutiveRange::new(0, 3)));

    set.insert(FactoryCharacteristicKey::for_fill_index(id(0, 1), None));
    assert!(set.contains(id(0, 0), Some(1)));
    assert!(set.contains(id(0, 1), None));
    assert!(set.contains(id(0, 1), Some(0)));
    assert!(!set.contains(id(0, 0), Some(3)));
    assert!(!set.contains(id(1, 0), Some(0)));
}

proptest! {
    #[test]
    fn prop_key_set_contains_exactly_what_was_inserted(
        inserts in prop::collection::vec((0u32..3, 0i32..12), 0..40)
    ) {
        let mut set = CharacteristicKeySet::new();
        for &(c, fill) in &inserts {
            set.insert(FactoryCharacteristicKey::for_fill_index(id(0, c), Some(fill)));
        }

        let stored: Vec<_> = set.iter().copied().collect();
        for pair in stored.windows(2) {
            prop_assert!(pair[0] < pair[1]);
            if pair[0].id() == pair[1].id() {
                prop_assert!(pair[0].subrange().end() < pair[1].subrange().begin());
            }
        }
        for c in 0..3 {
            for fill in 0..12 {
                let expected = inserts.contains(&(c, fill));
                prop_assert_eq!(set.contains(id(0, c), Some(fill)), expected);
            }
        }
    }
}

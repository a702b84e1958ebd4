//! CharacteristicRange 与索引打包测试

use proptest::prelude::*;

use crate::pipeline::error::PipelineError;
use crate::pipeline::range::{bit_width, CharacteristicRange, IndexLayout, PipelineIndex};

#[test]
fn test_bit_width() {
    assert_eq!(bit_width(0), 0);
    assert_eq!(bit_width(1), 1);
    assert_eq!(bit_width(2), 2);
    assert_eq!(bit_width(3), 2);
    assert_eq!(bit_width(4), 3);
    assert_eq!(bit_width(u32::MAX), 32);
}

#[test]
fn test_range_width() {
    assert_eq!(CharacteristicRange::single(5).unwrap().range_width(), 0);
    assert_eq!(CharacteristicRange::new(0, 2).unwrap().range_width(), 1);
    assert_eq!(CharacteristicRange::new(0, 3).unwrap().range_width(), 2);
    assert_eq!(CharacteristicRange::new(-4, 4).unwrap().range_width(), 3);
    assert_eq!(CharacteristicRange::new(10, 14).unwrap().contribution(13), 3);
}

#[test]
fn test_empty_range_is_rejected() {
    assert!(matches!(
        CharacteristicRange::new(3, 3),
        Err(PipelineError::InvalidRange { begin: 3, end: 3 })
    ));
    assert!(CharacteristicRange::new(4, 1).is_err());
}

#[test]
fn test_ranges_at_the_ends_of_i32() {
    let full = CharacteristicRange::new(i32::MIN, i32::MAX).unwrap();
    assert_eq!(full.len(), u32::MAX);
    assert_eq!(full.range_width(), 32);
    assert_eq!(full.contribution(i32::MAX - 1), u64::from(u32::MAX) - 1);

    let top = CharacteristicRange::single(i32::MAX - 1).unwrap();
    assert_eq!(top.end(), i32::MAX);
    assert!(matches!(
        CharacteristicRange::single(i32::MAX),
        Err(PipelineError::InvalidRange { .. })
    ));
    assert_eq!(CharacteristicRange::default(), CharacteristicRange::single(0).unwrap());
}

#[test]
fn test_layout_wider_than_64_bits() {
    let layout = IndexLayout::new(vec![8, 32, 32]);
    assert_eq!(layout.total_width(), 72);
    assert!(!layout.fits());
    assert!(IndexLayout::new(vec![32, 32]).fits());
}

#[test]
#[should_panic(expected = "does not fit")]
fn test_placing_into_a_too_wide_layout_panics() {
    IndexLayout::new(vec![8, 32, 32]).place(0, 0);
}

#[test]
fn test_single_axis_contributes_nothing() {
    let layout = IndexLayout::from_ranges(&[
        CharacteristicRange::new(0, 3).unwrap(),
        CharacteristicRange::single(7).unwrap(),
        CharacteristicRange::new(0, 2).unwrap(),
    ]);
    assert_eq!(layout.width(1), 0);
    assert_eq!(layout.place(1, 0), 0);
    assert_eq!(layout.shift(0), 1);
    assert_eq!(layout.shift(2), 0);
    assert_eq!(layout.total_width(), 3);
}

#[test]
fn test_layout_matches_sequential_folding() {
    let ranges = [
        CharacteristicRange::new(0, 3).unwrap(),
        CharacteristicRange::new(0, 2).unwrap(),
    ];
    let layout = IndexLayout::from_ranges(&ranges);
    // (2, 1): acc = (0 << 2 | 2) << 1 | 1 = 5
    let folded = PipelineIndex::default().fold(2, 2).fold(1, 1);
    assert_eq!(folded, PipelineIndex(5));
    assert_eq!(layout.place(0, 2) | layout.place(1, 1), 5);
}

fn ranges() -> impl Strategy<Value = Vec<CharacteristicRange>> {
    prop::collection::vec((-8i32..8, 1i32..6), 1..5).prop_map(|axes| {
        axes.into_iter()
            .map(|(begin, len)| CharacteristicRange::new(begin, begin + len).unwrap())
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_every_tuple_gets_its_own_index(ranges in ranges()) {
        let layout = IndexLayout::from_ranges(&ranges);
        let mut seen = std::collections::HashSet::new();
        let mut tuples = vec![Vec::new()];
        for range in &ranges {
            tuples = tuples
                .into_iter()
                .flat_map(|prefix| (range.begin()..range.end()).map(move |v| {
                    let mut t = prefix.clone();
                    t.push(v);
                    t
                }))
                .collect();
        }
        for tuple in &tuples {
            let index = tuple
                .iter()
                .zip(&ranges)
                .enumerate()
                .fold(0u64, |acc, (k, (&v, range))| acc | layout.place(k, range.contribution(v)));
            let folded = tuple
                .iter()
                .zip(&ranges)
                .fold(PipelineIndex::default(), |acc, (&v, range)| acc.fold(range.range_width(), range.contribution(v)));
            prop_assert_eq!(index, folded.inner());
            prop_assert!(index < 1u64 << layout.total_width());
            prop_assert!(seen.insert(index));
        }
    }
}

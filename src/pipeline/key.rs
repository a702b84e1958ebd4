//! Keys that identify which fill indices of which characteristic use something.
//!
//! A [`FactoryCharacteristicKey`] is a characteristic of a factory together with
//! a consecutive range of fill indices. Keys with the same id never overlap;
//! adding an index next to (or inside) an existing range extends that range.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

/// Index of a pipeline factory within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryIndex(pub u32);

impl fmt::Display for FactoryIndex {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Factory({})", self.0)
    }
}

/// Index of a characteristic within its factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicIndex(pub u32);

/// A half-open range of fill indices, `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsecutiveRange {
    begin: i32,
    end: i32,
}

impl ConsecutiveRange {
    pub fn new(
        begin: i32,
        end: i32,
    ) -> Self {
        assert!(begin < end, "empty consecutive range [{}, {})", begin, end);
        Self { begin, end }
    }

    /// The range of one fill index; `None` (no fill) is slot 0.
    pub fn for_fill_index(fill_index: Option<i32>) -> Self {
        let index = fill_index.unwrap_or(0);
        Self::new(index, index + 1)
    }

    #[inline]
    pub fn begin(&self) -> i32 {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> i32 {
        self.end
    }

    #[inline]
    pub fn overlaps(
        &self,
        other: &ConsecutiveRange,
    ) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// Overlapping or touching.
    #[inline]
    pub fn joins(
        &self,
        other: &ConsecutiveRange,
    ) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    /// Grow to cover `other` when the two join. Returns whether it did.
    pub fn extend_subrange(
        &mut self,
        other: &ConsecutiveRange,
    ) -> bool {
        if !self.joins(other) {
            return false;
        }
        self.begin = self.begin.min(other.begin);
        self.end = self.end.max(other.end);
        true
    }
}

impl fmt::Display for ConsecutiveRange {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// A characteristic of a specific factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryCharacteristicId {
    pub factory: FactoryIndex,
    pub characteristic: CharacteristicIndex,
}

impl fmt::Display for FactoryCharacteristicId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.factory.0, self.characteristic.0)
    }
}

/// A characteristic id plus a range of its fill indices.
///
/// Ordered by id, then by subrange; overlapping subranges of the same id
/// compare equal, so a key finds the stored range that contains it.
#[derive(Debug, Clone, Copy)]
pub struct FactoryCharacteristicKey {
    id: FactoryCharacteristicId,
    subrange: ConsecutiveRange,
}

impl FactoryCharacteristicKey {
    pub fn new(
        id: FactoryCharacteristicId,
        subrange: ConsecutiveRange,
    ) -> Self {
        Self { id, subrange }
    }

    pub fn for_fill_index(
        id: FactoryCharacteristicId,
        fill_index: Option<i32>,
    ) -> Self {
        Self::new(id, ConsecutiveRange::for_fill_index(fill_index))
    }

    #[inline]
    pub fn id(&self) -> FactoryCharacteristicId {
        self.id
    }

    #[inline]
    pub fn subrange(&self) -> ConsecutiveRange {
        self.subrange
    }

    /// Extend this key with `other` when both have the same id and the
    /// subranges join.
    pub fn merge(
        &mut self,
        other: &FactoryCharacteristicKey,
    ) -> bool {
        self.id == other.id && self.subrange.extend_subrange(&other.subrange)
    }
}

impl PartialEq for FactoryCharacteristicKey {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FactoryCharacteristicKey {}

impl PartialOrd for FactoryCharacteristicKey {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FactoryCharacteristicKey {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.id.cmp(&other.id).then_with(|| {
            if self.subrange.overlaps(&other.subrange) {
                Ordering::Equal
            } else {
                self.subrange.begin.cmp(&other.subrange.begin)
            }
        })
    }
}

impl fmt::Display for FactoryCharacteristicKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}", self.id, self.subrange)
    }
}

/// A sorted set of keys that merges joining subranges.
#[derive(Debug, Clone, Default)]
pub struct CharacteristicKeySet {
    keys: SmallVec<[FactoryCharacteristicKey; 4]>,
}

impl CharacteristicKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`, merging it with every stored key of the same id it joins.
    pub fn insert(
        &mut self,
        key: FactoryCharacteristicKey,
    ) {
        let mut merged = key;
        self.keys.retain(|stored| !merged.merge(stored));
        let at = self.keys.partition_point(|stored| *stored < merged);
        self.keys.insert(at, merged);
    }

    pub fn contains(
        &self,
        id: FactoryCharacteristicId,
        fill_index: Option<i32>,
    ) -> bool {
        let probe = FactoryCharacteristicKey::for_fill_index(id, fill_index);
        self.keys.binary_search(&probe).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactoryCharacteristicKey> {
        self.keys.iter()
    }
}

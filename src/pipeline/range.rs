//! Axes of combinatorial variation and the combined pipeline index.
//!
//! Every axis is a half-open range `[begin, end)`. It needs
//! `range_width = bit_width(end - begin - 1)` bits to encode any of its values,
//! which is 0 for an axis with a single value. A tuple of axis values is packed
//! into one [`PipelineIndex`] by shifting in every axis in order:
//!
//! ```text
//!   acc = 0
//!   for each axis k:  acc = (acc << width_k) | (value_k - begin_k)
//! ```
//!
//! so axis 0 ends up in the most significant bits.

use std::fmt;

use super::error::PipelineError;

/// Number of bits needed to represent `value`.
#[inline]
pub fn bit_width(value: u32) -> u32 {
    u32::BITS - value.leading_zeros()
}

/// An immutable half-open integer range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRange {
    begin: i32,
    end: i32,
}

impl CharacteristicRange {
    pub fn new(
        begin: i32,
        end: i32,
    ) -> Result<Self, PipelineError> {
        if end <= begin {
            return Err(PipelineError::InvalidRange { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// The range `[value, value + 1)`.
    pub fn single(value: i32) -> Result<Self, PipelineError> {
        match value.checked_add(1) {
            Some(end) => Ok(Self { begin: value, end }),
            None => Err(PipelineError::InvalidRange { begin: value, end: value }),
        }
    }

    #[inline]
    pub fn begin(&self) -> i32 {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of values in the range.
    #[inline]
    pub fn len(&self) -> u32 {
        (i64::from(self.end) - i64::from(self.begin)) as u32
    }

    /// A range is never empty; present for API symmetry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn is_single(&self) -> bool {
        self.len() == 1
    }

    #[inline]
    pub fn contains(
        &self,
        value: i32,
    ) -> bool {
        (self.begin..self.end).contains(&value)
    }

    /// Bits needed to encode `value - begin` for every value in the range.
    #[inline]
    pub fn range_width(&self) -> u32 {
        bit_width(self.len() - 1)
    }

    /// The bits this axis contributes for `value`, before shifting.
    #[inline]
    pub fn contribution(
        &self,
        value: i32,
    ) -> u64 {
        debug_assert!(self.contains(value), "{} not in {}", value, self);
        (i64::from(value) - i64::from(self.begin)) as u64
    }
}

/// `[0, 1)`, the range of a plain characteristic.
impl Default for CharacteristicRange {
    fn default() -> Self {
        Self { begin: 0, end: 1 }
    }
}

impl fmt::Display for CharacteristicRange {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// The combined, bit-packed index of one pipeline variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineIndex(pub u64);

impl PipelineIndex {
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }

    /// Shift in the next axis.
    #[inline]
    pub fn fold(
        self,
        width: u32,
        contribution: u64,
    ) -> Self {
        debug_assert!(width == 64 || contribution >> width == 0);
        if width == 0 {
            return self;
        }
        PipelineIndex((self.0 << width) | contribution)
    }
}

impl fmt::Display for PipelineIndex {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where each axis lands in the combined index.
///
/// Fixed once the axes are known, so contributions can be OR-ed in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexLayout {
    widths: Vec<u32>,
    shifts: Vec<u32>,
}

impl IndexLayout {
    pub fn new(widths: Vec<u32>) -> Self {
        let mut shifts = vec![0; widths.len()];
        let mut shift = 0;
        for (k, width) in widths.iter().enumerate().rev() {
            shifts[k] = shift;
            shift += width;
        }
        Self { widths, shifts }
    }

    pub fn from_ranges<'a>(ranges: impl IntoIterator<Item = &'a CharacteristicRange>) -> Self {
        Self::new(ranges.into_iter().map(CharacteristicRange::range_width).collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.widths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    #[inline]
    pub fn width(
        &self,
        axis: usize,
    ) -> u32 {
        self.widths[axis]
    }

    #[inline]
    pub fn shift(
        &self,
        axis: usize,
    ) -> u32 {
        self.shifts[axis]
    }

    /// Total number of bits of the combined index.
    pub fn total_width(&self) -> u32 {
        self.widths.iter().sum()
    }

    /// Whether every combined index fits in a [`PipelineIndex`].
    #[inline]
    pub fn fits(&self) -> bool {
        self.total_width() <= u64::BITS
    }

    /// The bits of axis `axis` placed at their final position.
    ///
    /// # Panics
    ///
    /// If the layout does not [fit](IndexLayout::fits).
    #[inline]
    pub fn place(
        &self,
        axis: usize,
        contribution: u64,
    ) -> u64 {
        if self.widths[axis] == 0 {
            return 0;
        }
        assert!(self.fits(), "index layout of {} bits does not fit in 64", self.total_width());
        contribution << self.shifts[axis]
    }
}

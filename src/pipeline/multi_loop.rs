//! Resumable N-nested loops.
//!
//! [`MultiLoop`] is the state of `N` nested `for` loops: one counter per loop
//! and the index of the loop that is currently running. Since all of it lives
//! in a value instead of on the call stack, a task can suspend in the middle of
//! the body and continue where it left off.
//!
//! [`MultiLoopCursor`] runs the loops as four program points,
//!
//! ```text
//!   top_for:      if finished: done
//!   top_while:    if counter out of range: goto bottom_for
//!                 if not innermost: descend, goto top_while
//!                 <body>                         (advance() returns here)
//!   bottom_while: increment counter, goto top_while
//!   bottom_for:   leave loop (increments outer counter), goto top_for
//! ```
//!
//! and returns at the body, so the next call resumes at `bottom_while`. The
//! tuples come out in lexicographic order with the last axis varying fastest.

use smallvec::SmallVec;

use super::range::CharacteristicRange;

/// One tuple of loop counters.
pub type LoopTuple = SmallVec<[i32; 8]>;

/// The counters of `N` nested loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiLoop {
    bounds: SmallVec<[(i32, i32); 8]>,
    counters: LoopTuple,
    current: usize,
    finished: bool,
}

impl MultiLoop {
    /// Loops over `[begin, end)` per axis, outermost first.
    ///
    /// With no axes the loop is finished right away.
    pub fn new(bounds: impl IntoIterator<Item = (i32, i32)>) -> Self {
        let bounds: SmallVec<[(i32, i32); 8]> = bounds.into_iter().collect();
        let counters: LoopTuple = bounds.iter().map(|&(begin, _)| begin).collect();
        let finished = bounds.is_empty();
        Self {
            bounds,
            counters,
            current: 0,
            finished,
        }
    }

    pub fn from_ranges<'a>(ranges: impl IntoIterator<Item = &'a CharacteristicRange>) -> Self {
        Self::new(ranges.into_iter().map(|r| (r.begin(), r.end())))
    }

    /// Number of nested loops.
    #[inline]
    pub fn loops(&self) -> usize {
        self.bounds.len()
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Index of the running loop, 0 being the outermost.
    #[inline]
    pub fn current_loop(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn is_innermost(&self) -> bool {
        self.current + 1 == self.bounds.len()
    }

    /// Counter of the running loop.
    #[inline]
    pub fn value(&self) -> i32 {
        self.counters[self.current]
    }

    #[inline]
    pub fn counter(
        &self,
        axis: usize,
    ) -> i32 {
        self.counters[axis]
    }

    #[inline]
    pub fn counters(&self) -> &[i32] {
        &self.counters
    }

    /// Whether the running loop's counter is below its end.
    #[inline]
    pub fn in_range(&self) -> bool {
        self.value() < self.bounds[self.current].1
    }

    /// Increment the counter of the running loop.
    #[inline]
    pub fn increment(&mut self) {
        self.counters[self.current] += 1;
    }

    /// Enter the next inner loop, starting at `begin` or at its lower bound.
    ///
    /// # Panics
    ///
    /// If the running loop is the innermost one.
    pub fn inner_loop(
        &mut self,
        begin: Option<i32>,
    ) {
        assert!(!self.is_innermost(), "inner_loop called in the innermost loop");
        self.current += 1;
        self.counters[self.current] = begin.unwrap_or(self.bounds[self.current].0);
    }

    /// Leave the running loop and increment the counter of the enclosing one.
    ///
    /// Leaving the outermost loop finishes.
    pub fn next_loop(&mut self) {
        if self.current == 0 {
            self.finished = true;
            return;
        }
        self.current -= 1;
        self.counters[self.current] += 1;
    }

    /// Total number of tuples, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        if self.bounds.is_empty() {
            return 0;
        }
        self.bounds
            .iter()
            .map(|&(begin, end)| (i64::from(end) - i64::from(begin)).max(0) as u64)
            .fold(1, u64::saturating_mul)
    }
}

/// The four program points of the nested loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPoint {
    TopFor,
    TopWhile,
    BottomWhile,
    BottomFor,
}

/// Drives a [`MultiLoop`] one body at a time.
#[derive(Debug, Clone)]
pub struct MultiLoopCursor {
    multi_loop: MultiLoop,
    point: LoopPoint,
    start_of_next_loop: Option<i32>,
    visited: u64,
}

impl MultiLoopCursor {
    pub fn new(multi_loop: MultiLoop) -> Self {
        Self {
            multi_loop,
            point: LoopPoint::TopFor,
            start_of_next_loop: None,
            visited: 0,
        }
    }

    #[inline]
    pub fn multi_loop(&self) -> &MultiLoop {
        &self.multi_loop
    }

    #[inline]
    pub fn point(&self) -> LoopPoint {
        self.point
    }

    /// Number of bodies entered so far.
    #[inline]
    pub fn visited(&self) -> u64 {
        self.visited
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.multi_loop.finished()
    }

    /// Start the next inner loop that is entered at `value` instead of at its
    /// lower bound. Applies to one descent only.
    pub fn start_next_loop_at(
        &mut self,
        value: i32,
    ) {
        self.start_of_next_loop = Some(value);
    }

    /// Run to the next body and return its tuple, or `None` once finished.
    pub fn advance(&mut self) -> Option<LoopTuple> {
        loop {
            match self.point {
                LoopPoint::TopFor => {
                    if self.multi_loop.finished() {
                        return None;
                    }
                    self.point = LoopPoint::TopWhile;
                }
                LoopPoint::TopWhile => {
                    if !self.multi_loop.in_range() {
                        self.point = LoopPoint::BottomFor;
                    } else if self.multi_loop.is_innermost() {
                        self.point = LoopPoint::BottomWhile;
                        self.visited += 1;
                        return Some(self.multi_loop.counters.clone());
                    } else {
                        let begin = self.start_of_next_loop.take();
                        self.multi_loop.inner_loop(begin);
                    }
                }
                LoopPoint::BottomWhile => {
                    self.multi_loop.increment();
                    self.point = LoopPoint::TopWhile;
                }
                LoopPoint::BottomFor => {
                    self.multi_loop.next_loop();
                    self.point = LoopPoint::TopFor;
                }
            }
        }
    }
}

/// Iterator over every tuple of a [`MultiLoop`].
#[derive(Debug, Clone)]
pub struct MultiLoopIter {
    cursor: MultiLoopCursor,
}

impl Iterator for MultiLoopIter {
    type Item = LoopTuple;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance()
    }
}

impl IntoIterator for MultiLoop {
    type Item = LoopTuple;
    type IntoIter = MultiLoopIter;

    fn into_iter(self) -> Self::IntoIter {
        MultiLoopIter {
            cursor: MultiLoopCursor::new(self),
        }
    }
}

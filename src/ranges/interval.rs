//! Intervals and per-field interval unions.
//!
//! A `FieldRange` is an ordered, disjoint union of intervals over the key
//! domain. The universal range spans `MinKey..=MaxKey`; the empty range has
//! no intervals and can match nothing.

use std::fmt;

use crate::key::KeyValue;

/// A single interval `(lo, hi)` with per-bound inclusivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub lo: KeyValue,
    pub lo_inclusive: bool,
    pub hi: KeyValue,
    pub hi_inclusive: bool,
}

impl Interval {
    /// The interval spanning the whole key domain.
    pub fn universal() -> Self {
        Self {
            lo: KeyValue::MinKey,
            lo_inclusive: true,
            hi: KeyValue::MaxKey,
            hi_inclusive: true,
        }
    }

    /// A single-point interval.
    pub fn point(value: KeyValue) -> Self {
        Self {
            lo: value.clone(),
            lo_inclusive: true,
            hi: value,
            hi_inclusive: true,
        }
    }

    pub fn new(lo: KeyValue, lo_inclusive: bool, hi: KeyValue, hi_inclusive: bool) -> Self {
        Self {
            lo,
            lo_inclusive,
            hi,
            hi_inclusive,
        }
    }

    /// True when lo == hi and both bounds are inclusive.
    pub fn is_point(&self) -> bool {
        self.lo_inclusive && self.hi_inclusive && self.lo == self.hi
    }

    /// True when the interval contains at least one value.
    pub fn is_nonempty(&self) -> bool {
        match self.lo.cmp(&self.hi) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.lo_inclusive && self.hi_inclusive,
            std::cmp::Ordering::Greater => false,
        }
    }

    /// Intersection, or `None` when disjoint.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let (lo, lo_inclusive) = match self.lo.cmp(&other.lo) {
            std::cmp::Ordering::Greater => (self.lo.clone(), self.lo_inclusive),
            std::cmp::Ordering::Less => (other.lo.clone(), other.lo_inclusive),
            std::cmp::Ordering::Equal => {
                (self.lo.clone(), self.lo_inclusive && other.lo_inclusive)
            }
        };
        let (hi, hi_inclusive) = match self.hi.cmp(&other.hi) {
            std::cmp::Ordering::Less => (self.hi.clone(), self.hi_inclusive),
            std::cmp::Ordering::Greater => (other.hi.clone(), other.hi_inclusive),
            std::cmp::Ordering::Equal => {
                (self.hi.clone(), self.hi_inclusive && other.hi_inclusive)
            }
        };
        let candidate = Interval::new(lo, lo_inclusive, hi, hi_inclusive);
        candidate.is_nonempty().then_some(candidate)
    }

    /// True when the two intervals overlap or touch, so their union is one
    /// interval.
    fn touches(&self, other: &Interval) -> bool {
        // Assumes self.lo <= other.lo (caller sorts first).
        match self.hi.cmp(&other.lo) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.hi_inclusive || other.lo_inclusive,
            std::cmp::Ordering::Less => false,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lo_inclusive { '[' } else { '(' };
        let close = if self.hi_inclusive { ']' } else { ')' };
        write!(f, "{}{}, {}{}", open, self.lo, self.hi, close)
    }
}

/// An ordered, disjoint union of intervals for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRange {
    intervals: Vec<Interval>,
}

impl FieldRange {
    /// The range matching every value.
    pub fn universal() -> Self {
        Self {
            intervals: vec![Interval::universal()],
        }
    }

    /// The range matching no value.
    pub fn empty() -> Self {
        Self { intervals: vec![] }
    }

    /// A single-point range.
    pub fn point(value: KeyValue) -> Self {
        Self {
            intervals: vec![Interval::point(value)],
        }
    }

    /// A finite set of points.
    pub fn finite_set(values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self::from_intervals(values.into_iter().map(Interval::point).collect())
    }

    /// Build from arbitrary intervals, normalizing to sorted disjoint form.
    pub fn from_intervals(mut intervals: Vec<Interval>) -> Self {
        intervals.retain(Interval::is_nonempty);
        intervals.sort_by(|a, b| {
            a.lo.cmp(&b.lo)
                .then_with(|| b.lo_inclusive.cmp(&a.lo_inclusive))
        });
        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                Some(last) if last.touches(&interval) => {
                    match last.hi.cmp(&interval.hi) {
                        std::cmp::Ordering::Less => {
                            last.hi = interval.hi;
                            last.hi_inclusive = interval.hi_inclusive;
                        }
                        std::cmp::Ordering::Equal => {
                            last.hi_inclusive = last.hi_inclusive || interval.hi_inclusive;
                        }
                        std::cmp::Ordering::Greater => {}
                    }
                }
                _ => merged.push(interval),
            }
        }
        Self { intervals: merged }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_universal(&self) -> bool {
        self.intervals.len() == 1 && self.intervals[0] == Interval::universal()
    }

    /// True for a single point interval (an equality constraint).
    pub fn is_point(&self) -> bool {
        self.intervals.len() == 1 && self.intervals[0].is_point()
    }

    /// The points of a finite union of point intervals, or `None`.
    pub fn finite_points(&self) -> Option<Vec<&KeyValue>> {
        if self.intervals.is_empty() {
            return None;
        }
        self.intervals
            .iter()
            .map(|i| i.is_point().then_some(&i.lo))
            .collect()
    }

    /// Intersect two ranges (conjunction of constraints).
    pub fn intersect(&self, other: &FieldRange) -> FieldRange {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(i) = a.intersect(b) {
                    out.push(i);
                }
            }
        }
        FieldRange::from_intervals(out)
    }

    /// Union two ranges (disjunction of constraints).
    pub fn union(&self, other: &FieldRange) -> FieldRange {
        let mut out = self.intervals.clone();
        out.extend(other.intervals.iter().cloned());
        FieldRange::from_intervals(out)
    }

    /// Lower bound of the enclosing interval (`MinKey` for the empty range).
    pub fn min_bound(&self) -> (KeyValue, bool) {
        match self.intervals.first() {
            Some(i) => (i.lo.clone(), i.lo_inclusive),
            None => (KeyValue::MinKey, true),
        }
    }

    /// Upper bound of the enclosing interval (`MaxKey` for the empty range).
    pub fn max_bound(&self) -> (KeyValue, bool) {
        match self.intervals.last() {
            Some(i) => (i.hi.clone(), i.hi_inclusive),
            None => (KeyValue::MaxKey, true),
        }
    }
}

impl fmt::Display for FieldRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return write!(f, "(empty)");
        }
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, " u ")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

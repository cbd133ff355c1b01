//! Shape-only query patterns.
//!
//! Two queries share a pattern iff every field agrees on range *kind* (not
//! on constants) and they request the same sort. Pattern equality is the
//! plan cache key, deliberately coarse so one winning plan serves every
//! query of the same shape.

use std::fmt;

use crate::query::SortKey;

use super::interval::FieldRange;

/// The shape of one field's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// Unconstrained
    Universal,
    /// Single point (equality)
    Point,
    /// Finite union of points (`$in`)
    FiniteSet,
    /// Anything else with at least one value
    Range,
    /// No value can match
    Empty,
}

impl RangeKind {
    /// Classify a range.
    pub fn of(range: &FieldRange) -> Self {
        if range.is_empty() {
            RangeKind::Empty
        } else if range.is_universal() {
            RangeKind::Universal
        } else if range.is_point() {
            RangeKind::Point
        } else if range.finite_points().is_some() {
            RangeKind::FiniteSet
        } else {
            RangeKind::Range
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RangeKind::Universal => "universal",
            RangeKind::Point => "point",
            RangeKind::FiniteSet => "finite-set",
            RangeKind::Range => "range",
            RangeKind::Empty => "empty",
        }
    }
}

/// Canonical, hashable summary of (range set shape, sort).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPattern {
    fields: Vec<(String, RangeKind)>,
    sort: Vec<(String, i32)>,
}

impl QueryPattern {
    pub(crate) fn new(fields: Vec<(String, RangeKind)>, sort: &SortKey) -> Self {
        Self {
            fields,
            sort: sort
                .fields
                .iter()
                .map(|(f, d)| (f.clone(), d.as_i32()))
                .collect(),
        }
    }

    /// Field shapes in sorted field order.
    pub fn fields(&self) -> &[(String, RangeKind)] {
        &self.fields
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, kind)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, kind.as_str())?;
        }
        write!(f, "}} sort {{")?;
        for (i, (name, dir)) in self.sort.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:+}", name, dir)?;
        }
        write!(f, "}}")
    }
}

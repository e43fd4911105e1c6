//! Axis-aligned interval boxes
//!
//! An [`IntervalBox`] is a product of closed per-dimension intervals. Boxes
//! are compared by interior volume: two boxes sharing only a face do not
//! overlap. Canonicalization rounds every bound to a fixed number of decimal
//! digits and exposes the result as an exact integer [`BoxKey`] so that
//! deduplication never depends on float equality of unrounded values.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GeometryError};

/// Default tolerance for [`IntervalBox::contains`]
pub const CONTAINMENT_EPSILON: f64 = 1e-9;

/// Largest supported rounding precision; beyond it `10^p` loses exactness
pub const MAX_PRECISION: u32 = 15;

/// Closed interval `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub low: f64,
    pub high: f64,
}

impl Interval {
    #[inline]
    pub fn new(low: f64, high: f64) -> Self {
        debug_assert!(low <= high, "Inverted interval [{}, {}]", low, high);
        Self { low, high }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    /// Positive-length intersection
    #[inline]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.low < other.high && other.low < self.high
    }

    /// Closed intersection, touching endpoints included
    #[inline]
    pub fn touches(&self, other: &Interval) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    #[inline]
    pub fn contains(&self, other: &Interval, epsilon: f64) -> bool {
        other.low >= self.low - epsilon && other.high <= self.high + epsilon
    }
}

/// Scale factor for rounding to `precision` decimal digits
#[inline]
pub(crate) fn scale(precision: u32) -> f64 {
    10f64.powi(precision as i32)
}

/// Rounds to a multiple of `1 / scale`, normalizing negative zero
#[inline]
fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale + 0.0
}

/// Checks that a rounding precision is usable
pub fn check_precision(precision: u32) -> Result<(), ConfigError> {
    if precision > MAX_PRECISION {
        return Err(ConfigError::InvalidPrecision {
            precision,
            max: MAX_PRECISION,
        });
    }
    Ok(())
}

/// Axis-aligned hyperrectangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalBox {
    intervals: Vec<Interval>,
}

impl IntervalBox {
    /// Creates a box, rejecting empty, inverted or non-finite bounds
    pub fn new(intervals: Vec<Interval>) -> Result<Self, GeometryError> {
        if intervals.is_empty() {
            return Err(GeometryError::EmptyBox);
        }
        for (dimension, interval) in intervals.iter().enumerate() {
            if !interval.low.is_finite() || !interval.high.is_finite() {
                return Err(GeometryError::NonFinite { dimension });
            }
            if interval.low > interval.high {
                return Err(GeometryError::InvertedInterval {
                    dimension,
                    low: interval.low,
                    high: interval.high,
                });
            }
        }
        Ok(Self { intervals })
    }

    /// Creates a box from `(low, high)` pairs
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Result<Self, GeometryError> {
        Self::new(bounds.iter().map(|&(low, high)| Interval { low, high }).collect())
    }

    /// Internal constructor for bounds derived from valid boxes
    #[inline]
    pub(crate) fn from_valid(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.intervals.len()
    }

    #[inline]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    #[inline]
    pub fn interval(&self, dimension: usize) -> Interval {
        self.intervals[dimension]
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.intervals.iter().map(|i| (i.low, i.high)).collect()
    }

    /// Product of the per-dimension widths
    pub fn area(&self) -> f64 {
        self.intervals.iter().map(Interval::width).product()
    }

    pub fn center(&self, dimension: usize) -> f64 {
        self.intervals[dimension].midpoint()
    }

    /// Whether every interval of `other` lies within the matching interval
    /// of `self`, up to [`CONTAINMENT_EPSILON`]
    pub fn contains(&self, other: &IntervalBox) -> bool {
        self.contains_within(other, CONTAINMENT_EPSILON)
    }

    pub fn contains_within(&self, other: &IntervalBox, epsilon: f64) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .intervals
                .iter()
                .zip(&other.intervals)
                .all(|(outer, inner)| outer.contains(inner, epsilon))
    }

    /// Whether the two boxes share positive volume
    pub fn overlaps(&self, other: &IntervalBox) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .intervals
                .iter()
                .zip(&other.intervals)
                .all(|(a, b)| a.overlaps(b))
    }

    /// Closed bounding-box intersection, as used by index queries
    pub fn touches(&self, other: &IntervalBox) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .intervals
                .iter()
                .zip(&other.intervals)
                .all(|(a, b)| a.touches(b))
    }

    /// Intersection with positive volume, if any
    pub fn intersection(&self, other: &IntervalBox) -> Option<IntervalBox> {
        if !self.overlaps(other) {
            return None;
        }
        let intervals = self
            .intervals
            .iter()
            .zip(&other.intervals)
            .map(|(a, b)| Interval {
                low: a.low.max(b.low),
                high: a.high.min(b.high),
            })
            .collect();
        Some(Self::from_valid(intervals))
    }

    /// Smallest box enclosing both
    pub fn merge(&self, other: &IntervalBox) -> IntervalBox {
        let intervals = self
            .intervals
            .iter()
            .zip(&other.intervals)
            .map(|(a, b)| Interval {
                low: a.low.min(b.low),
                high: a.high.max(b.high),
            })
            .collect();
        Self::from_valid(intervals)
    }

    /// Box-minus-box decomposition
    ///
    /// Returns at most `2 * dimensions` disjoint boxes covering
    /// `self \ other`. Slabs are peeled one dimension at a time, each slab
    /// clipped to the intersection range in the dimensions already peeled.
    /// Zero-width slabs are never emitted.
    pub fn subtract(&self, other: &IntervalBox) -> Vec<IntervalBox> {
        if !self.overlaps(other) {
            return vec![self.clone()];
        }

        let mut pieces = Vec::with_capacity(2 * self.dimensions());
        let mut working = self.intervals.clone();

        for dimension in 0..working.len() {
            let cut = other.intervals[dimension];
            let current = working[dimension];

            if current.low < cut.low {
                let mut slab = working.clone();
                slab[dimension] = Interval { low: current.low, high: cut.low };
                pieces.push(Self::from_valid(slab));
                working[dimension].low = cut.low;
            }
            if current.high > cut.high {
                let mut slab = working.clone();
                slab[dimension] = Interval { low: cut.high, high: current.high };
                pieces.push(Self::from_valid(slab));
                working[dimension].high = cut.high;
            }
        }

        pieces
    }

    /// Rounds every bound to `precision` decimal digits
    pub fn round(&self, precision: u32) -> IntervalBox {
        let scale = scale(precision);
        let intervals = self
            .intervals
            .iter()
            .map(|i| Interval {
                low: round_to(i.low, scale),
                high: round_to(i.high, scale),
            })
            .collect();
        Self::from_valid(intervals)
    }

    /// Canonical lookup key at `precision` decimal digits
    pub fn key(&self, precision: u32) -> BoxKey {
        BoxKey::canonical(self, precision)
    }

    /// Any width at or below `width`
    pub fn is_negligible(&self, width: f64) -> bool {
        self.intervals.iter().any(|i| i.width() <= width)
    }

    /// Any zero width
    pub fn is_degenerate(&self) -> bool {
        self.is_negligible(0.0)
    }

    /// Lexicographic total order over `(low, high)` per dimension
    pub fn total_cmp(&self, other: &IntervalBox) -> Ordering {
        for (a, b) in self.intervals.iter().zip(&other.intervals) {
            let ordering = a.low.total_cmp(&b.low).then(a.high.total_cmp(&b.high));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.dimensions().cmp(&other.dimensions())
    }

    pub(crate) fn check_dimensions(&self, expected: usize) -> Result<(), ConfigError> {
        if self.dimensions() != expected {
            return Err(ConfigError::DimensionMismatch {
                expected,
                actual: self.dimensions(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for IntervalBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {})", interval.low, interval.high)?;
        }
        write!(f, "]")
    }
}

/// Canonical box identity
///
/// Each bound is stored as the integer multiple of `10^-precision` it
/// rounds to, so equal keys mean equal canonical boxes exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoxKey {
    precision: u32,
    bounds: Vec<[i64; 2]>,
}

impl BoxKey {
    pub fn canonical(bounds: &IntervalBox, precision: u32) -> Self {
        let scale = scale(precision);
        let bounds = bounds
            .intervals
            .iter()
            .map(|i| [(i.low * scale).round() as i64, (i.high * scale).round() as i64])
            .collect();
        Self { precision, bounds }
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    /// The canonical box this key stands for
    pub fn to_box(&self) -> IntervalBox {
        let scale = scale(self.precision);
        let intervals = self
            .bounds
            .iter()
            .map(|[low, high]| Interval {
                low: *low as f64 / scale + 0.0,
                high: *high as f64 / scale + 0.0,
            })
            .collect();
        IntervalBox::from_valid(intervals)
    }
}

/// Sum of box areas
pub fn total_area<'a>(boxes: impl IntoIterator<Item = &'a IntervalBox>) -> f64 {
    boxes.into_iter().map(IntervalBox::area).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bx(bounds: &[(f64, f64)]) -> IntervalBox {
        IntervalBox::from_bounds(bounds).unwrap()
    }

    #[test]
    fn test_construction_rejects_malformed_bounds() {
        assert_eq!(IntervalBox::from_bounds(&[]), Err(GeometryError::EmptyBox));
        assert!(matches!(
            IntervalBox::from_bounds(&[(0.0, 1.0), (2.0, 1.0)]),
            Err(GeometryError::InvertedInterval { dimension: 1, .. })
        ));
        assert!(matches!(
            IntervalBox::from_bounds(&[(f64::NAN, 1.0)]),
            Err(GeometryError::NonFinite { dimension: 0 })
        ));
    }

    #[test]
    fn test_area_is_product_of_widths() {
        assert_abs_diff_eq!(bx(&[(0.0, 2.0), (1.0, 4.0)]).area(), 6.0);
        assert_abs_diff_eq!(bx(&[(0.0, 2.0), (1.0, 1.0)]).area(), 0.0);
    }

    #[test]
    fn test_containment_per_dimension() {
        let outer = bx(&[(0.0, 10.0), (0.0, 10.0)]);
        assert!(outer.contains(&bx(&[(0.0, 10.0), (2.0, 3.0)])));
        assert!(outer.contains(&bx(&[(1e-10 * -1.0, 5.0), (2.0, 3.0)])));
        assert!(!outer.contains(&bx(&[(1.0, 2.0), (9.0, 10.5)])));
        assert!(!outer.contains(&bx(&[(-0.1, 2.0), (1.0, 2.0)])));
        assert!(!outer.contains(&bx(&[(1.0, 2.0)])));
    }

    #[test]
    fn test_shared_face_is_not_overlap() {
        let a = bx(&[(0.0, 5.0), (0.0, 5.0)]);
        let b = bx(&[(5.0, 10.0), (0.0, 5.0)]);
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_subtract_one_dimension() {
        let pieces = bx(&[(0.0, 10.0)]).subtract(&bx(&[(0.0, 5.0)]));
        assert_eq!(pieces, vec![bx(&[(5.0, 10.0)])]);

        let pieces = bx(&[(0.0, 10.0)]).subtract(&bx(&[(3.0, 4.0)]));
        assert_eq!(pieces, vec![bx(&[(0.0, 3.0)]), bx(&[(4.0, 10.0)])]);
    }

    #[test]
    fn test_subtract_hole_yields_four_pieces_in_two_dimensions() {
        let outer = bx(&[(0.0, 4.0), (0.0, 4.0)]);
        let hole = bx(&[(1.0, 2.0), (1.0, 2.0)]);
        let pieces = outer.subtract(&hole);

        assert_eq!(pieces.len(), 4);
        assert_abs_diff_eq!(total_area(&pieces), 15.0, epsilon = 1e-12);
        for (i, a) in pieces.iter().enumerate() {
            assert!(!a.overlaps(&hole));
            for b in &pieces[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
    }

    #[test]
    fn test_subtract_covering_box_leaves_nothing() {
        let pieces = bx(&[(1.0, 2.0), (1.0, 2.0)]).subtract(&bx(&[(0.0, 3.0), (0.0, 3.0)]));
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_rounding_canonicalizes_keys() {
        let a = bx(&[(0.00001, 1.0)]);
        let b = bx(&[(0.0000099, 1.0)]);
        assert_eq!(a.round(3), bx(&[(0.0, 1.0)]));
        assert_eq!(a.key(3), b.key(3));
        assert_eq!(a.key(3).to_box(), a.round(3));
        assert_ne!(a.key(6), b.key(6));
    }

    #[test]
    fn test_rounding_normalizes_negative_zero() {
        let rounded = bx(&[(-0.0001, 1.0)]).round(3);
        assert!(rounded.interval(0).low.is_sign_positive());
        assert_eq!(rounded.key(3), bx(&[(0.0, 1.0)]).key(3));
    }

    #[test]
    fn test_negligible_width() {
        assert!(bx(&[(0.0, 1e-7), (0.0, 1.0)]).is_negligible(1e-6));
        assert!(!bx(&[(0.0, 1e-3), (0.0, 1.0)]).is_negligible(1e-6));
        assert!(bx(&[(1.0, 1.0)]).is_degenerate());
    }

    #[test]
    fn test_precision_limit() {
        assert!(check_precision(3).is_ok());
        assert!(check_precision(MAX_PRECISION + 1).is_err());
    }
}

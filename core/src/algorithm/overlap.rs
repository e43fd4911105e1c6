//! Overlap resolution
//!
//! Turns a batch of possibly overlapping labelled boxes into a disjoint,
//! single-labelled covering of the same region. The splitting itself is
//! done by bulk-loading a temporary [`SpatialIndex`]; this module checks
//! the result before handing it on:
//!
//! - every emitted box queried back against the index finds itself,
//! - no two emitted boxes share interior volume,
//! - every input box is covered by emitted boxes with its full area.
//!
//! Any failure is an [`InvariantViolation`] and aborts the run.

use log::{debug, error, trace};

use crate::config::AnalysisConfig;
use crate::data_structures::SpatialIndex;
use crate::error::{ConfigError, InvariantViolation, MosaicError};
use crate::geometry::{check_precision, total_labeled_area, IntervalBox, Label, LabeledBox};

const STAGE: &str = "overlap resolution";

/// Disjoint re-labelling of box batches
#[derive(Debug, Clone)]
pub struct OverlapResolver {
    dimensions: usize,
    precision: u32,
    negligible_width: f64,
    area_tolerance: f64,
}

impl OverlapResolver {
    pub fn new(dimensions: usize, precision: u32) -> Result<Self, ConfigError> {
        if dimensions == 0 {
            return Err(ConfigError::InvalidDimensions(dimensions));
        }
        check_precision(precision)?;
        Ok(Self {
            dimensions,
            precision,
            negligible_width: 1e-6,
            area_tolerance: 1e-8,
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.dimensions, config.precision)?
            .with_tolerances(config.negligible_width, config.area_tolerance))
    }

    pub fn with_tolerances(mut self, negligible_width: f64, area_tolerance: f64) -> Self {
        self.negligible_width = negligible_width;
        self.area_tolerance = area_tolerance;
        self
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    #[inline]
    pub fn negligible_width(&self) -> f64 {
        self.negligible_width
    }

    #[inline]
    pub fn area_tolerance(&self) -> f64 {
        self.area_tolerance
    }

    /// Splits `boxes` into a disjoint covering
    ///
    /// Regions claimed by several labels take the highest-precedence one.
    /// The output is rounded to the resolver precision, sorted, and free of
    /// negligible slivers.
    pub fn resolve(&self, boxes: &[LabeledBox]) -> Result<Vec<LabeledBox>, MosaicError> {
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut index = SpatialIndex::new(self.dimensions, self.precision)?;
        index.add_many(boxes)?;
        index.flush();

        let resolved = index.entries();
        self.check_disjoint(&index, &resolved)?;
        self.check_coverage(&index, boxes)?;

        let before = total_labeled_area(&resolved);
        let mut kept: Vec<LabeledBox> = resolved
            .into_iter()
            .filter(|entry| !entry.bounds.is_negligible(self.negligible_width))
            .collect();
        kept.sort_by(|a, b| a.bounds.total_cmp(&b.bounds));

        let dropped = before - total_labeled_area(&kept);
        if dropped > 0.0 {
            trace!("Dropped negligible slivers with total area {:e}", dropped);
        }
        debug!("Resolved {} boxes into {} disjoint pieces", boxes.len(), kept.len());
        Ok(kept)
    }

    /// [`Self::resolve`] for boxes without labels
    pub fn resolve_unlabeled(&self, boxes: &[IntervalBox]) -> Result<Vec<IntervalBox>, MosaicError> {
        let labeled: Vec<LabeledBox> = boxes
            .iter()
            .map(|b| LabeledBox::new(b.clone(), Label::Ignore))
            .collect();
        Ok(self.resolve(&labeled)?.into_iter().map(|entry| entry.bounds).collect())
    }

    fn check_disjoint(&self, index: &SpatialIndex, resolved: &[LabeledBox]) -> Result<(), MosaicError> {
        for entry in resolved {
            let candidates = index.query_overlapping(&entry.bounds)?;
            if !candidates.iter().any(|candidate| candidate == entry) {
                error!("{} does not resolve against its own index", entry);
                return Err(InvariantViolation::UnresolvedBox(entry.to_string()).into());
            }
            if let Some(other) = candidates
                .iter()
                .find(|candidate| candidate.bounds != entry.bounds && candidate.bounds.overlaps(&entry.bounds))
            {
                error!("Resolved boxes {} and {} overlap", entry, other);
                return Err(InvariantViolation::Overlap {
                    stage: STAGE,
                    first: entry.to_string(),
                    second: other.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Each rounded input must be covered by resolved pieces
    fn check_coverage(&self, index: &SpatialIndex, boxes: &[LabeledBox]) -> Result<(), MosaicError> {
        for input in boxes {
            let rounded = input.bounds.round(self.precision);
            if rounded.is_degenerate() {
                continue;
            }
            let expected = rounded.area();
            let actual: f64 = index
                .query_overlapping(&rounded)?
                .iter()
                .filter_map(|entry| entry.bounds.intersection(&rounded))
                .map(|shared| shared.area())
                .sum();
            if (expected - actual).abs() > self.area_tolerance {
                error!("Input {} covered by area {} of {}", rounded, actual, expected);
                return Err(InvariantViolation::AreaMismatch {
                    stage: STAGE,
                    expected,
                    actual,
                }
                .into());
            }
        }
        Ok(())
    }
}

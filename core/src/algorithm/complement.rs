//! Complement of a batch against the classified index
//!
//! For every current box, each overlapping index entry is intersected with
//! what is left of the box (the intersection keeps the entry's label) and
//! then subtracted from it. Whatever survives every subtraction has not
//! been classified yet. Chunks of the batch are processed in parallel
//! against a shared read-only index; all merging happens afterwards on the
//! calling thread.

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use super::overlap::OverlapResolver;
use crate::config::AnalysisConfig;
use crate::data_structures::SpatialIndex;
use crate::error::{ConfigError, InvariantViolation, MosaicError};
use crate::geometry::{total_area, total_labeled_area, IntervalBox, LabeledBox};
use crate::optimization::ChunkPool;

const STAGE: &str = "complement";

/// Split of a batch into unclassified and already classified parts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplementResult {
    /// Regions not covered by any index entry
    pub remaining: Vec<IntervalBox>,
    /// Regions covered by an entry, with that entry's label
    pub intersected: Vec<LabeledBox>,
}

impl ComplementResult {
    pub fn total_area(&self) -> f64 {
        total_area(&self.remaining) + total_labeled_area(&self.intersected)
    }

    pub fn is_covered(&self) -> bool {
        self.remaining.is_empty()
    }

    fn merge(&mut self, other: ComplementResult) {
        self.remaining.extend(other.remaining);
        self.intersected.extend(other.intersected);
    }
}

/// Parallel set difference and intersection against a [`SpatialIndex`]
#[derive(Debug, Clone)]
pub struct ComplementComputer {
    resolver: OverlapResolver,
    chunk_size: usize,
}

impl ComplementComputer {
    pub fn new(resolver: OverlapResolver, chunk_size: usize) -> Self {
        Self {
            resolver,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(OverlapResolver::from_config(config)?, config.complement_chunk_size))
    }

    /// Splits `current` into the parts the index covers and the rest
    ///
    /// `current` may overlap itself; it is made disjoint first so covered
    /// area is not double counted. Only flushed index entries are seen.
    pub fn compute(
        &self,
        current: &[IntervalBox],
        index: &SpatialIndex,
        pool: &ChunkPool,
    ) -> Result<ComplementResult, MosaicError> {
        let mut disjoint = self.resolver.resolve_unlabeled(current)?;
        if disjoint.is_empty() {
            return Ok(ComplementResult::default());
        }
        if index.is_empty() {
            return Ok(ComplementResult {
                remaining: disjoint,
                intersected: Vec::new(),
            });
        }
        if !index.is_flushed() {
            warn!("Computing a complement against an index with unflushed writes");
        }
        disjoint.sort_by(|a, b| a.total_cmp(b));

        let chunks = pool.map_chunks("complement", &disjoint, self.chunk_size, |chunk| {
            Self::compute_chunk(chunk, index)
        })?;

        let mut result = ComplementResult::default();
        for chunk in chunks {
            result.merge(chunk?);
        }

        let expected = total_area(&disjoint);
        let actual = result.total_area();
        if (expected - actual).abs() > self.resolver.area_tolerance() {
            error!("Complement lost area: {} of {}", actual, expected);
            return Err(InvariantViolation::AreaMismatch {
                stage: STAGE,
                expected,
                actual,
            }
            .into());
        }

        let width = self.resolver.negligible_width();
        result.remaining.retain(|b| !b.is_negligible(width));
        result.intersected.retain(|b| !b.bounds.is_negligible(width));
        result.remaining.sort_by(|a, b| a.total_cmp(b));
        result.intersected.sort_by(|a, b| a.bounds.total_cmp(&b.bounds));

        debug!(
            "Complement of {} boxes: {} remaining, {} intersected",
            disjoint.len(),
            result.remaining.len(),
            result.intersected.len()
        );
        Ok(result)
    }

    /// Complement of a single chunk; no shared mutable state
    pub fn compute_chunk(chunk: &[IntervalBox], index: &SpatialIndex) -> Result<ComplementResult, ConfigError> {
        let mut result = ComplementResult::default();
        for current in chunk {
            let mut working = vec![current.clone()];
            for entry in index.query_overlapping(current)? {
                if !entry.bounds.overlaps(current) {
                    continue;
                }
                let mut next = Vec::with_capacity(working.len());
                for piece in working {
                    if let Some(shared) = piece.intersection(&entry.bounds) {
                        result.intersected.push(LabeledBox::new(shared, entry.label));
                        next.extend(piece.subtract(&entry.bounds));
                    } else {
                        next.push(piece);
                    }
                }
                working = next;
                if working.is_empty() {
                    break;
                }
            }
            result.remaining.extend(working);
        }
        Ok(result)
    }
}

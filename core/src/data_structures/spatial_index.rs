//! Spatial index over disjoint labelled boxes
//!
//! The index keeps its entries pairwise disjoint at all times: inserting a
//! box that overlaps stored entries splits it (and, when labels disagree,
//! the stored entries too) along the overlap boundary, so every point of
//! the covered region carries exactly one label. Entries are canonical:
//! bounds are rounded to the index precision before insertion and every
//! entry is uniquely identified by its [`BoxKey`].
//!
//! Writes go to a pending buffer and become visible to
//! [`SpatialIndex::query_overlapping`] after [`SpatialIndex::flush`], which
//! re-packs the whole tree in one Sort-Tile-Recursive pass. The buffer is
//! flushed on its own when it outgrows a bound proportional to the square
//! root of the index size, keeping bulk insertion of large batches cheap.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::rtree::RTree;
use crate::error::{ConfigError, MosaicError, StorageError};
use crate::geometry::{check_precision, BoxKey, IntervalBox, LabeledBox};

/// Pending-buffer size below which no automatic flush happens
const PENDING_FLOOR: usize = 256;

/// On-disk form of an index
#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    dimensions: usize,
    precision: u32,
    entries: Vec<LabeledBox>,
}

/// Bulk-loadable spatial index of labelled boxes
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    dimensions: usize,
    precision: u32,
    /// Entry storage; `None` marks an entry removed by a split
    slots: Vec<Option<LabeledBox>>,
    keys: HashMap<BoxKey, usize>,
    tree: RTree,
    /// Slots inserted since the last flush
    pending: Vec<usize>,
    live: usize,
}

impl SpatialIndex {
    /// Creates an empty index
    pub fn new(dimensions: usize, precision: u32) -> Result<Self, ConfigError> {
        if dimensions == 0 {
            return Err(ConfigError::InvalidDimensions(dimensions));
        }
        check_precision(precision)?;
        Ok(Self {
            dimensions,
            precision,
            slots: Vec::new(),
            keys: HashMap::new(),
            tree: RTree::default(),
            pending: Vec::new(),
            live: 0,
        })
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Number of stored entries, flushed or not
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether every write is visible to queries
    pub fn is_flushed(&self) -> bool {
        self.pending.is_empty() && self.tree.len() == self.live
    }

    /// Drops every entry and switches to `dimensions`
    pub fn reset(&mut self, dimensions: usize) -> Result<(), ConfigError> {
        *self = Self::new(dimensions, self.precision)?;
        Ok(())
    }

    /// Bulk-inserts labelled boxes
    ///
    /// Each box is rounded to the index precision and split against the
    /// stored entries it overlaps. Where labels agree the stored entry
    /// stays whole; where they differ the shared region is carved out as
    /// its own entry carrying [`crate::geometry::Label::resolve`] of both
    /// labels. Degenerate pieces are dropped.
    pub fn add_many(&mut self, boxes: &[LabeledBox]) -> Result<(), MosaicError> {
        for labeled in boxes {
            labeled.bounds.check_dimensions(self.dimensions)?;
        }
        let before = self.live;
        for labeled in boxes {
            if self.pending.len() > self.pending_bound() {
                trace!("Pending buffer at {} entries, repacking", self.pending.len());
                self.flush();
            }
            self.insert_resolved(labeled.round(self.precision));
        }
        debug!(
            "Inserted {} boxes as {} net new entries ({} total)",
            boxes.len(),
            self.live as isize - before as isize,
            self.live
        );
        Ok(())
    }

    /// Makes every buffered write visible to queries
    pub fn flush(&mut self) {
        if self.is_flushed() && self.slots.len() == self.live {
            return;
        }
        let entries: Vec<LabeledBox> = self.slots.drain(..).flatten().collect();
        self.rebuild(entries);
    }

    /// Entries whose bounding box touches `query`
    ///
    /// Only flushed entries are visible. The result is a candidate set:
    /// boxes sharing just a face with `query` are included, so callers
    /// check exact overlap themselves.
    pub fn query_overlapping(&self, query: &IntervalBox) -> Result<Vec<LabeledBox>, ConfigError> {
        query.check_dimensions(self.dimensions)?;
        let mut slots = Vec::new();
        self.tree.query(query, &mut slots);
        slots.sort_unstable();
        Ok(slots
            .into_iter()
            .filter_map(|slot| self.slots[slot].clone())
            .collect())
    }

    /// Whether an entry with exactly this canonical box is stored
    pub fn contains_key(&self, bounds: &IntervalBox) -> bool {
        self.keys.contains_key(&bounds.key(self.precision))
    }

    /// Entry stored under exactly this canonical box
    pub fn get(&self, bounds: &IntervalBox) -> Option<&LabeledBox> {
        self.keys
            .get(&bounds.key(self.precision))
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    /// The index's own disjoint representation, in insertion order
    pub fn entries(&self) -> Vec<LabeledBox> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledBox> {
        self.slots.iter().flatten()
    }

    pub fn total_area(&self) -> f64 {
        self.iter().map(LabeledBox::area).sum()
    }

    /// Writes every entry, flushed or not
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let snapshot = IndexSnapshot {
            dimensions: self.dimensions,
            precision: self.precision,
            entries: self.entries(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, &snapshot)?;
        writer.flush()?;
        debug!("Saved {} index entries to {}", snapshot.entries.len(), path.display());
        Ok(())
    }

    /// Reads an index written by [`SpatialIndex::save`]
    ///
    /// At the saved precision the entries are bulk-loaded as stored; at a
    /// different precision they are re-rounded and re-inserted, which may
    /// split or drop entries.
    pub fn load(path: &Path, precision: u32) -> Result<Self, MosaicError> {
        if !path.exists() {
            return Err(StorageError::MissingFile(path.to_path_buf()).into());
        }
        let reader = BufReader::new(File::open(path)?);
        let snapshot: IndexSnapshot = bincode::deserialize_from(reader).map_err(StorageError::from)?;

        let mut index = Self::new(snapshot.dimensions, precision)?;
        if snapshot.precision == precision {
            for entry in &snapshot.entries {
                entry.bounds.check_dimensions(snapshot.dimensions)?;
            }
            index.rebuild(snapshot.entries);
        } else {
            debug!(
                "Re-rounding {} entries from precision {} to {}",
                snapshot.entries.len(),
                snapshot.precision,
                precision
            );
            index.add_many(&snapshot.entries)?;
            index.flush();
        }
        Ok(index)
    }

    fn pending_bound(&self) -> usize {
        PENDING_FLOOR.max(4 * (self.live as f64).sqrt() as usize)
    }

    /// Replaces storage with `entries` and packs a fresh tree
    fn rebuild(&mut self, entries: Vec<LabeledBox>) {
        self.keys.clear();
        self.pending.clear();
        self.slots = Vec::with_capacity(entries.len());
        for entry in entries {
            self.keys.insert(entry.bounds.key(self.precision), self.slots.len());
            self.slots.push(Some(entry));
        }
        self.live = self.slots.len();
        self.tree = RTree::bulk_load(
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, e.bounds.clone())))
                .collect(),
        );
    }

    /// Slots overlapping `query`, including unflushed ones
    fn candidates(&self, query: &IntervalBox) -> Vec<usize> {
        let mut slots = Vec::new();
        self.tree.query(query, &mut slots);
        slots.extend(self.pending.iter().copied());
        slots.sort_unstable();
        slots.dedup();
        slots.retain(|&slot| {
            self.slots[slot]
                .as_ref()
                .is_some_and(|entry| entry.bounds.overlaps(query))
        });
        slots
    }

    fn insert_resolved(&mut self, incoming: LabeledBox) {
        if incoming.bounds.is_degenerate() {
            return;
        }

        let mut working = vec![incoming.bounds.clone()];
        for slot in self.candidates(&incoming.bounds) {
            let Some(existing) = self.slots[slot].clone() else {
                continue;
            };

            if existing.label != incoming.label {
                self.remove_slot(slot);
                for piece in existing.bounds.subtract(&incoming.bounds) {
                    self.push_entry(LabeledBox::new(piece, existing.label));
                }
                if let Some(shared) = existing.bounds.intersection(&incoming.bounds) {
                    self.push_entry(LabeledBox::new(shared, existing.label.resolve(incoming.label)));
                }
            }

            working = working
                .into_iter()
                .flat_map(|piece| piece.subtract(&existing.bounds))
                .collect();
        }

        for piece in working {
            self.push_entry(LabeledBox::new(piece, incoming.label));
        }
    }

    fn push_entry(&mut self, entry: LabeledBox) {
        if entry.bounds.is_degenerate() {
            return;
        }
        let slot = self.slots.len();
        self.keys.insert(entry.bounds.key(self.precision), slot);
        self.slots.push(Some(entry));
        self.pending.push(slot);
        self.live += 1;
    }

    fn remove_slot(&mut self, slot: usize) {
        if let Some(entry) = self.slots[slot].take() {
            self.keys.remove(&entry.bounds.key(self.precision));
            self.live -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Label;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn lb(bounds: &[(f64, f64)], label: Label) -> LabeledBox {
        LabeledBox::new(IntervalBox::from_bounds(bounds).unwrap(), label)
    }

    fn sorted(mut boxes: Vec<LabeledBox>) -> Vec<LabeledBox> {
        boxes.sort_by(|a, b| a.bounds.total_cmp(&b.bounds));
        boxes
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        assert!(SpatialIndex::new(0, 3).is_err());
        let mut index = SpatialIndex::new(2, 3).unwrap();
        let err = index.add_many(&[lb(&[(0.0, 1.0)], Label::Safe)]).unwrap_err();
        assert!(matches!(
            err,
            MosaicError::Config(ConfigError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(index.query_overlapping(&IntervalBox::from_bounds(&[(0.0, 1.0)]).unwrap()).is_err());
    }

    #[test]
    fn test_queries_see_writes_after_flush() {
        let mut index = SpatialIndex::new(1, 3).unwrap();
        index.add_many(&[lb(&[(0.0, 5.0)], Label::Safe)]).unwrap();
        assert!(!index.is_flushed());
        let query = IntervalBox::from_bounds(&[(1.0, 2.0)]).unwrap();
        assert!(index.query_overlapping(&query).unwrap().is_empty());

        index.flush();
        assert!(index.is_flushed());
        assert_eq!(index.query_overlapping(&query).unwrap(), vec![lb(&[(0.0, 5.0)], Label::Safe)]);
    }

    #[test]
    fn test_conflicting_labels_split_into_three() {
        let mut index = SpatialIndex::new(1, 3).unwrap();
        index
            .add_many(&[lb(&[(0.0, 10.0)], Label::Safe), lb(&[(5.0, 15.0)], Label::Unsafe)])
            .unwrap();
        index.flush();

        assert_eq!(
            sorted(index.entries()),
            vec![
                lb(&[(0.0, 5.0)], Label::Safe),
                lb(&[(5.0, 10.0)], Label::Unsafe),
                lb(&[(10.0, 15.0)], Label::Unsafe),
            ]
        );
        assert_abs_diff_eq!(index.total_area(), 15.0);
    }

    #[test]
    fn test_equal_labels_keep_stored_entry_whole() {
        let mut index = SpatialIndex::new(1, 3).unwrap();
        index
            .add_many(&[lb(&[(0.0, 10.0)], Label::Safe), lb(&[(5.0, 15.0)], Label::Safe)])
            .unwrap();
        assert_eq!(
            sorted(index.entries()),
            vec![lb(&[(0.0, 10.0)], Label::Safe), lb(&[(10.0, 15.0)], Label::Safe)]
        );
    }

    #[test]
    fn test_duplicate_canonical_box_is_absorbed() {
        let mut index = SpatialIndex::new(1, 3).unwrap();
        index
            .add_many(&[lb(&[(0.00001, 1.0)], Label::Safe), lb(&[(0.0000099, 1.0)], Label::Safe)])
            .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains_key(&IntervalBox::from_bounds(&[(0.0, 1.0)]).unwrap()));
    }

    #[test]
    fn test_large_batch_stays_disjoint_across_automatic_flushes() {
        let mut boxes = Vec::new();
        for i in 0..60 {
            for j in 0..60 {
                let (x, y) = (i as f64 * 0.5, j as f64 * 0.5);
                let label = if (i + j) % 3 == 0 { Label::Unsafe } else { Label::Safe };
                boxes.push(lb(&[(x, x + 1.0), (y, y + 1.0)], label));
            }
        }
        let mut index = SpatialIndex::new(2, 3).unwrap();
        index.add_many(&boxes).unwrap();
        index.flush();

        assert_abs_diff_eq!(index.total_area(), 30.5 * 30.5, epsilon = 1e-8);
        for entry in index.iter() {
            let neighbours = index.query_overlapping(&entry.bounds).unwrap();
            let overlapping: Vec<_> = neighbours
                .iter()
                .filter(|other| other.bounds.overlaps(&entry.bounds))
                .collect();
            assert_eq!(overlapping, vec![entry]);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");

        let mut index = SpatialIndex::new(2, 3).unwrap();
        index
            .add_many(&[
                lb(&[(0.0, 1.0), (0.0, 1.0)], Label::Safe),
                lb(&[(0.5, 2.0), (0.5, 2.0)], Label::Unsafe),
                lb(&[(3.0, 4.0), (0.0, 0.25)], Label::Ignore),
            ])
            .unwrap();
        index.flush();
        index.save(&path).unwrap();

        let loaded = SpatialIndex::load(&path, 3).unwrap();
        assert_eq!(loaded.entries(), index.entries());
        let query = IntervalBox::from_bounds(&[(0.0, 3.5), (0.0, 1.0)]).unwrap();
        assert_eq!(
            loaded.query_overlapping(&query).unwrap(),
            index.query_overlapping(&query).unwrap()
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SpatialIndex::load(&dir.path().join("absent.bin"), 3).unwrap_err();
        assert!(matches!(err, MosaicError::Storage(StorageError::MissingFile(_))));
    }

    #[test]
    fn test_reset_changes_dimensions() {
        let mut index = SpatialIndex::new(1, 3).unwrap();
        index.add_many(&[lb(&[(0.0, 1.0)], Label::Safe)]).unwrap();
        index.reset(2).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), 2);
    }
}

//! On-disk checkpoints
//!
//! A checkpoint directory holds four files:
//!
//! | file | content | format |
//! |---|---|---|
//! | `index.bin` | index entries and labels | bincode |
//! | `states.bin` | id/box bijection, layer map, id counter | bincode |
//! | `graph.json` | nodes and weighted edges | node-link JSON |
//! | `loop.json` | timestep, frontier, progress history | JSON |
//!
//! `loop.json` is written last, so a directory without it holds no
//! complete checkpoint.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::data_structures::{ReachBounds, SpatialIndex, StateId, TransitionGraph};
use crate::error::{MosaicError, StorageError};
use crate::execution::ProgressStats;

pub const INDEX_FILE: &str = "index.bin";
pub const LOOP_FILE: &str = "loop.json";

/// Analysis loop position at the time of a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    /// Next timestep to process
    pub timestep: u32,
    pub root: Option<StateId>,
    pub frontier: Vec<StateId>,
    pub root_bounds: Option<ReachBounds>,
    pub history: Vec<ProgressStats>,
}

/// Everything needed to resume a run
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub index: SpatialIndex,
    pub graph: TransitionGraph,
    pub state: LoopState,
}

impl Checkpoint {
    /// Writes a checkpoint into `dir`, creating it if needed
    pub fn save(
        dir: &Path,
        index: &SpatialIndex,
        graph: &TransitionGraph,
        state: &LoopState,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(dir)?;
        index.save(&dir.join(INDEX_FILE))?;
        graph.save(dir)?;

        let mut writer = BufWriter::new(File::create(dir.join(LOOP_FILE))?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;

        info!(
            "Checkpoint at timestep {} written to {} ({} entries, {} states)",
            state.timestep,
            dir.display(),
            index.len(),
            graph.node_count()
        );
        Ok(())
    }

    /// Reads a checkpoint written by [`Checkpoint::save`]
    ///
    /// Index entries are re-rounded when `precision` differs from the
    /// saved one.
    pub fn load(dir: &Path, precision: u32) -> Result<Self, MosaicError> {
        let loop_path = dir.join(LOOP_FILE);
        if !loop_path.exists() {
            return Err(StorageError::MissingFile(loop_path).into());
        }
        let state: LoopState =
            serde_json::from_reader(BufReader::new(File::open(&loop_path)?)).map_err(StorageError::from)?;
        let index = SpatialIndex::load(&dir.join(INDEX_FILE), precision)?;
        let graph = TransitionGraph::load(dir)?;

        if index.dimensions() != graph.dimensions() {
            return Err(StorageError::Corrupt(format!(
                "index has {} dimensions, graph has {}",
                index.dimensions(),
                graph.dimensions()
            ))
            .into());
        }
        for id in state.root.iter().chain(&state.frontier) {
            if !graph.contains(*id) {
                return Err(StorageError::Corrupt(format!("loop state refers to unknown state {}", id)).into());
            }
        }

        info!("Loaded checkpoint at timestep {} from {}", state.timestep, dir.display());
        Ok(Self { index, graph, state })
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(LOOP_FILE).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Layer;
    use crate::geometry::{IntervalBox, Label, LabeledBox};
    use tempfile::TempDir;

    fn bx(bounds: &[(f64, f64)]) -> IntervalBox {
        IntervalBox::from_bounds(bounds).unwrap()
    }

    #[test]
    fn test_round_trip_reproduces_queries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run");

        let mut index = SpatialIndex::new(2, 3).unwrap();
        index
            .add_many(&[
                LabeledBox::new(bx(&[(0.0, 2.0), (0.0, 2.0)]), Label::Safe),
                LabeledBox::new(bx(&[(1.0, 3.0), (1.0, 3.0)]), Label::Unsafe),
            ])
            .unwrap();
        index.flush();

        let mut graph = TransitionGraph::new(2, 3).unwrap();
        let root = graph.intern(&bx(&[(0.0, 3.0), (0.0, 3.0)]), Layer::step(0)).unwrap();
        let child = graph.add_successor(root, &bx(&[(1.0, 4.0), (0.0, 3.0)]), Layer::step(1)).unwrap();

        let state = LoopState {
            timestep: 1,
            root: Some(root),
            frontier: vec![child],
            root_bounds: None,
            history: vec![ProgressStats::new(0)],
        };
        assert!(!Checkpoint::exists(&path));
        Checkpoint::save(&path, &index, &graph, &state).unwrap();
        assert!(Checkpoint::exists(&path));

        let loaded = Checkpoint::load(&path, 3).unwrap();
        assert_eq!(loaded.state, state);
        let window = bx(&[(0.5, 1.5), (0.5, 1.5)]);
        assert_eq!(
            loaded.index.query_overlapping(&window).unwrap(),
            index.query_overlapping(&window).unwrap()
        );
        assert_eq!(loaded.graph.successors(root), graph.successors(root));
        assert_eq!(loaded.graph.layer(Layer::step(1)), &[child]);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let err = Checkpoint::load(dir.path(), 3).unwrap_err();
        assert!(matches!(err, MosaicError::Storage(StorageError::MissingFile(_))));
    }
}

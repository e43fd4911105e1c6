//! MOSAIC interval-set bookkeeping engine
//!
//! Reachability-style safety analysis of a control policy propagates sets
//! of states forward in time as axis-aligned interval boxes. This crate
//! holds the bookkeeping that keeps such an analysis sound: a bulk-loaded
//! spatial index over disjoint labelled boxes, the overlap resolver and
//! complement computer that maintain the disjointness and area invariants,
//! the transition graph handed to a probabilistic model checker, and the
//! analysis loop that drives them against external collaborators.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod algorithm;
pub mod config;
pub mod data_structures;
pub mod error;
pub mod execution;
pub mod geometry;
pub mod optimization;
pub mod storage;

pub use crate::algorithm::{
    Classification, Classifier, ComplementComputer, ComplementResult, EnvironmentStepper,
    ModelChecker, OverlapResolver, StepOutcome, Successor,
};
pub use crate::config::{AnalysisConfig, PruneCriterion};
pub use crate::data_structures::{
    Layer, ModelExport, ReachBounds, SpatialIndex, StateId, TransitionGraph,
};
pub use crate::error::{MosaicError, Result};
pub use crate::execution::{AnalysisLoop, AnalysisReport, ProgressStats};
pub use crate::geometry::{BoxKey, Interval, IntervalBox, Label, LabeledBox};

/// Initializes `env_logger` with an `info` default filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}

//! Per-timestep progress counters

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_structures::ReachBounds;

/// Counters collected while processing one timestep
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub timestep: u32,
    /// Frontier states processed
    pub frontier: usize,
    /// Successor boxes produced by the stepper
    pub seen: usize,
    /// Successors that mapped onto an existing state
    pub already_visited: usize,
    pub safe: usize,
    pub unsafe_count: usize,
    pub ignored: usize,
    pub terminal: usize,
    pub irrelevant: usize,
    /// Classify/complement rounds until the frontier was covered
    pub refinement_rounds: usize,
}

impl ProgressStats {
    pub fn new(timestep: u32) -> Self {
        Self {
            timestep,
            ..Self::default()
        }
    }

    /// Successors that became new frontier states
    pub fn fresh(&self) -> usize {
        self.seen.saturating_sub(self.already_visited + self.terminal)
    }
}

impl fmt::Display for ProgressStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={} frontier={} seen={} already_visited={} safe={} unsafe={} ignored={} terminal={} irrelevant={}",
            self.timestep,
            self.frontier,
            self.seen,
            self.already_visited,
            self.safe,
            self.unsafe_count,
            self.ignored,
            self.terminal,
            self.irrelevant
        )
    }
}

/// Summary of a finished or interrupted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Timesteps completed
    pub timesteps: u32,
    pub states: usize,
    pub terminal: usize,
    pub irrelevant: usize,
    /// Latest reachability bounds from the root to the terminal states
    pub root_bounds: Option<ReachBounds>,
    pub history: Vec<ProgressStats>,
}

impl AnalysisReport {
    pub fn last(&self) -> Option<&ProgressStats> {
        self.history.last()
    }
}

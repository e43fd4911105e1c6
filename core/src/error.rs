//! Error taxonomy for the bookkeeping engine
//!
//! Errors fall into four families with different handling: configuration
//! errors and invariant violations abort a run, collaborator failures are
//! caught at the call site and treated conservatively, and degenerate
//! geometry is filtered silently and never surfaces here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::data_structures::StateId;

/// Configuration errors, fatal at construction time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Dimension mismatch: expected {expected}, found {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid dimensionality: {0}")]
    InvalidDimensions(usize),

    #[error("Invalid rounding precision: {precision} (maximum {max})")]
    InvalidPrecision { precision: u32, max: u32 },

    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Malformed box construction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("A box needs at least one dimension")]
    EmptyBox,

    #[error("Inverted interval in dimension {dimension}: [{low}, {high}]")]
    InvertedInterval { dimension: usize, low: f64, high: f64 },

    #[error("Non-finite bound in dimension {dimension}")]
    NonFinite { dimension: usize },
}

/// Broken geometric or bookkeeping invariant
///
/// Downstream probabilities are meaningless once one of these fires, so
/// they are never corrected silently.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("Area mismatch after {stage}: expected {expected}, actual {actual}")]
    AreaMismatch {
        stage: &'static str,
        expected: f64,
        actual: f64,
    },

    #[error("Overlapping boxes after {stage}: {first} and {second}")]
    Overlap {
        stage: &'static str,
        first: String,
        second: String,
    },

    #[error("Box {0} does not resolve against its own index")]
    UnresolvedBox(String),

    #[error("State {0} was never interned")]
    UnknownState(StateId),

    #[error("State {0} is already bound to a different box")]
    DuplicateState(StateId),

    #[error("Invalid transition probability {probability} on {parent} -> {child}")]
    InvalidProbability {
        parent: StateId,
        child: StateId,
        probability: f64,
    },

    #[error("Outgoing weights of state {parent} sum to {total}")]
    OutgoingWeights { parent: StateId, total: f64 },

    #[error("Timestep {timestep} still has {remaining} unclassified boxes after {rounds} rounds")]
    Unconverged {
        timestep: u32,
        remaining: usize,
        rounds: usize,
    },
}

/// Failure reported by an external collaborator
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Binary serialization error: {0}")]
    BinaryError(#[from] bincode::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing checkpoint file: {0}")]
    MissingFile(PathBuf),

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),
}

/// Worker pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to build worker pool: {0}")]
    Build(String),

    #[error("{label}: workers disconnected after {received} of {expected} chunks")]
    Disconnected {
        label: String,
        received: usize,
        expected: usize,
    },
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl MosaicError {
    /// Whether the error must abort the current run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MosaicError::Collaborator(_))
    }
}

impl From<io::Error> for MosaicError {
    fn from(error: io::Error) -> Self {
        MosaicError::Storage(StorageError::IoError(error))
    }
}

pub type Result<T> = std::result::Result<T, MosaicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_mismatch_surfaces_values() {
        let err: MosaicError = InvariantViolation::AreaMismatch {
            stage: "overlap resolution",
            expected: 15.0,
            actual: 20.0,
        }
        .into();

        let message = err.to_string();
        assert!(message.contains("15"));
        assert!(message.contains("20"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_collaborator_errors_are_recoverable() {
        let err: MosaicError = CollaboratorError::new("model checker", "timeout").into();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "model checker failed: timeout");
    }
}

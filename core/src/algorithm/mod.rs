//! Box-set algorithms and collaborator interfaces
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod complement;
pub mod overlap;
pub mod traits;

pub use self::complement::{ComplementComputer, ComplementResult};
pub use self::overlap::OverlapResolver;
pub use self::traits::{Classification, Classifier, EnvironmentStepper, ModelChecker, StepOutcome, Successor};

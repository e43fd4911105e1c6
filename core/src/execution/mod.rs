//! Analysis orchestration and progress reporting
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod analysis;
pub mod progress;

pub use self::analysis::AnalysisLoop;
pub use self::progress::{AnalysisReport, ProgressStats};

//! Checkpoint persistence
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod checkpoint;

pub use self::checkpoint::{Checkpoint, LoopState, INDEX_FILE, LOOP_FILE};

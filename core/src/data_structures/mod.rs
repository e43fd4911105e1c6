//! Core data structures: the disjoint box index and the transition graph
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

mod rtree;
pub mod spatial_index;
pub mod transition_graph;

pub use self::spatial_index::SpatialIndex;
pub use self::transition_graph::{
    Layer, ModelExport, ReachBounds, StateDistribution, StateId, StateNode, TransitionGraph,
    DEFAULT_STICKY_SPLIT, WEIGHT_TOLERANCE,
};

//! Interval-box geometry
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod interval_box;
pub mod labeled;

pub use self::interval_box::{
    check_precision, total_area, BoxKey, Interval, IntervalBox, CONTAINMENT_EPSILON, MAX_PRECISION,
};
pub use self::labeled::{area_by_label, total_labeled_area, Label, LabeledBox};

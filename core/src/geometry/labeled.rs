//! Labelled boxes
//!
//! Labels start as the classifier verdict (`Safe`, `Unsafe`, `Ignore`) and
//! are also the action handed to the environment stepper. When two boxes
//! with different labels overlap, the shared region takes the label with
//! the higher precedence: `Unsafe > Safe > Ignore`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::interval_box::IntervalBox;

/// Classification label, ordered by precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Ignore,
    Safe,
    Unsafe,
}

impl Label {
    pub fn from_safe(safe: bool) -> Self {
        if safe {
            Label::Safe
        } else {
            Label::Unsafe
        }
    }

    /// Label of a region claimed by both `self` and `other`
    #[inline]
    pub fn resolve(self, other: Label) -> Label {
        self.max(other)
    }

    /// Whether boxes with this label are handed to the environment stepper
    #[inline]
    pub fn is_stepped(self) -> bool {
        self != Label::Ignore
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Ignore => "ignore",
            Label::Safe => "safe",
            Label::Unsafe => "unsafe",
        };
        f.write_str(name)
    }
}

/// An interval box with its label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledBox {
    pub bounds: IntervalBox,
    pub label: Label,
}

impl LabeledBox {
    pub fn new(bounds: IntervalBox, label: Label) -> Self {
        Self { bounds, label }
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.bounds.area()
    }

    pub fn round(&self, precision: u32) -> Self {
        Self::new(self.bounds.round(precision), self.label)
    }
}

impl fmt::Display for LabeledBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bounds, self.label)
    }
}

pub fn total_labeled_area<'a>(boxes: impl IntoIterator<Item = &'a LabeledBox>) -> f64 {
    boxes.into_iter().map(LabeledBox::area).sum()
}

/// Area covered per label
pub fn area_by_label<'a>(boxes: impl IntoIterator<Item = &'a LabeledBox>) -> BTreeMap<Label, f64> {
    let mut areas = BTreeMap::new();
    for labeled in boxes {
        *areas.entry(labeled.label).or_insert(0.0) += labeled.area();
    }
    areas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_precedence() {
        assert_eq!(Label::Safe.resolve(Label::Unsafe), Label::Unsafe);
        assert_eq!(Label::Unsafe.resolve(Label::Safe), Label::Unsafe);
        assert_eq!(Label::Ignore.resolve(Label::Safe), Label::Safe);
        assert_eq!(Label::Ignore.resolve(Label::Ignore), Label::Ignore);
    }

    #[test]
    fn test_area_by_label() {
        let boxes = vec![
            LabeledBox::new(IntervalBox::from_bounds(&[(0.0, 2.0)]).unwrap(), Label::Safe),
            LabeledBox::new(IntervalBox::from_bounds(&[(2.0, 3.0)]).unwrap(), Label::Safe),
            LabeledBox::new(IntervalBox::from_bounds(&[(3.0, 7.0)]).unwrap(), Label::Unsafe),
        ];
        let areas = area_by_label(&boxes);
        assert_eq!(areas[&Label::Safe], 3.0);
        assert_eq!(areas[&Label::Unsafe], 4.0);
        assert!(!areas.contains_key(&Label::Ignore));
        assert_eq!(total_labeled_area(&boxes), 7.0);
    }
}

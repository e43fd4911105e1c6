//! Collaborator interfaces
//!
//! The network/MILP classifier, the environment step function and the
//! probabilistic model checker live outside this crate. The analysis loop
//! talks to them only through these traits; implementations are shared
//! read-only across worker threads, hence the `Send + Sync` bounds.

use serde::{Deserialize, Serialize};

use crate::data_structures::{ModelExport, ReachBounds, StateId, DEFAULT_STICKY_SPLIT};
use crate::error::CollaboratorError;
use crate::geometry::{total_area, IntervalBox, Label, LabeledBox};

/// Classifier verdict over a batch of boxes
///
/// The three lists together must cover the input batch with the same area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub safe_boxes: Vec<IntervalBox>,
    pub unsafe_boxes: Vec<IntervalBox>,
    pub ignore_boxes: Vec<IntervalBox>,
}

impl Classification {
    /// Everything labelled `Ignore`
    pub fn ignore_all(boxes: &[IntervalBox]) -> Self {
        Self {
            ignore_boxes: boxes.to_vec(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.safe_boxes.is_empty() && self.unsafe_boxes.is_empty() && self.ignore_boxes.is_empty()
    }

    pub fn total_area(&self) -> f64 {
        total_area(&self.safe_boxes) + total_area(&self.unsafe_boxes) + total_area(&self.ignore_boxes)
    }

    pub fn extend(&mut self, other: Classification) {
        self.safe_boxes.extend(other.safe_boxes);
        self.unsafe_boxes.extend(other.unsafe_boxes);
        self.ignore_boxes.extend(other.ignore_boxes);
    }

    pub fn into_labeled(self) -> Vec<LabeledBox> {
        let tag = |boxes: Vec<IntervalBox>, label: Label| {
            boxes.into_iter().map(move |b| LabeledBox::new(b, label))
        };
        tag(self.safe_boxes, Label::Safe)
            .chain(tag(self.unsafe_boxes, Label::Unsafe))
            .chain(tag(self.ignore_boxes, Label::Ignore))
            .collect()
    }
}

/// Labels boxes with the action chosen by the policy
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str {
        "classifier"
    }

    fn classify(&self, boxes: &[IntervalBox]) -> Result<Classification, CollaboratorError>;
}

/// One possible image of a stepped box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Successor {
    pub bounds: IntervalBox,
    pub probability: f64,
}

impl Successor {
    pub fn new(bounds: IntervalBox, probability: f64) -> Self {
        Self { bounds, probability }
    }
}

/// Stepper output for a single labelled box
///
/// `next` continues in the frontier, `terminal` ends the episode. The
/// probabilities across both lists sum to one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub next: Vec<Successor>,
    pub terminal: Vec<Successor>,
}

impl StepOutcome {
    pub fn deterministic(next: IntervalBox) -> Self {
        Self {
            next: vec![Successor::new(next, 1.0)],
            terminal: Vec::new(),
        }
    }

    pub fn terminal(bounds: IntervalBox) -> Self {
        Self {
            next: Vec::new(),
            terminal: vec![Successor::new(bounds, 1.0)],
        }
    }

    /// The chosen action with probability `p`, the previous one otherwise
    pub fn sticky(main: IntervalBox, sticky: IntervalBox, p: f64) -> Self {
        Self {
            next: vec![Successor::new(main, p), Successor::new(sticky, 1.0 - p)],
            terminal: Vec::new(),
        }
    }

    pub fn sticky_default(main: IntervalBox, sticky: IntervalBox) -> Self {
        Self::sticky(main, sticky, DEFAULT_STICKY_SPLIT)
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty() && self.terminal.is_empty()
    }

    pub fn total_probability(&self) -> f64 {
        self.next.iter().chain(&self.terminal).map(|s| s.probability).sum()
    }
}

/// Applies the environment dynamics to labelled boxes
pub trait EnvironmentStepper: Send + Sync {
    fn name(&self) -> &str {
        "environment"
    }

    /// Returns exactly one outcome per input box, in input order
    fn step(&self, boxes: &[LabeledBox]) -> Result<Vec<StepOutcome>, CollaboratorError>;
}

/// Probabilistic model checker
pub trait ModelChecker: Send + Sync {
    fn name(&self) -> &str {
        "model checker"
    }

    /// Bounds on the probability of reaching any of `targets` from `root`
    fn reach_bounds(
        &self,
        model: &ModelExport,
        targets: &[StateId],
        root: StateId,
    ) -> Result<ReachBounds, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bx(low: f64, high: f64) -> IntervalBox {
        IntervalBox::from_bounds(&[(low, high)]).unwrap()
    }

    #[test]
    fn test_classification_into_labeled() {
        let classification = Classification {
            safe_boxes: vec![bx(0.0, 1.0)],
            unsafe_boxes: vec![bx(1.0, 3.0)],
            ignore_boxes: vec![bx(3.0, 3.5)],
        };
        assert_abs_diff_eq!(classification.total_area(), 3.5);

        let labels: Vec<Label> = classification.into_labeled().iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![Label::Safe, Label::Unsafe, Label::Ignore]);
    }

    #[test]
    fn test_sticky_outcome_sums_to_one() {
        let outcome = StepOutcome::sticky_default(bx(0.0, 1.0), bx(0.5, 1.5));
        assert_abs_diff_eq!(outcome.total_probability(), 1.0);
        assert_abs_diff_eq!(outcome.next[0].probability, 0.8);
    }
}

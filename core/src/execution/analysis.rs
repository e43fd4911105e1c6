//! Timestep-by-timestep analysis driver
//!
//! One [`AnalysisLoop`] owns the spatial index and the transition graph of
//! a run. Each timestep:
//!
//! 1. the frontier boxes are checked against the index; uncovered parts go
//!    to the classifier, are made disjoint and inserted, until the whole
//!    frontier is covered by classified entries;
//! 2. each frontier state is labelled in place, or linked to its
//!    classified pieces in the `t.split` layer when several labels cover it;
//! 3. stepped pieces go to the environment stepper, and their successors
//!    become the states of layer `t + 1`;
//! 4. the model checker marks states that no longer matter as irrelevant,
//!    which removes them from the frontier.
//!
//! Workers only read; all index and graph mutation happens here.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::algorithm::{
    Classification, Classifier, ComplementComputer, EnvironmentStepper, ModelChecker, OverlapResolver,
    StepOutcome,
};
use crate::config::{AnalysisConfig, PruneCriterion};
use crate::data_structures::{Layer, ReachBounds, SpatialIndex, StateId, TransitionGraph, WEIGHT_TOLERANCE};
use crate::error::{CollaboratorError, ConfigError, InvariantViolation, MosaicError};
use crate::execution::progress::{AnalysisReport, ProgressStats};
use crate::geometry::{total_area, IntervalBox, Label, LabeledBox};
use crate::optimization::ChunkPool;
use crate::storage::{Checkpoint, LoopState};

/// Driver of one analysis run
pub struct AnalysisLoop {
    config: AnalysisConfig,
    index: SpatialIndex,
    graph: TransitionGraph,
    pool: ChunkPool,
    resolver: OverlapResolver,
    complement: ComplementComputer,
    classifier: Arc<dyn Classifier>,
    stepper: Arc<dyn EnvironmentStepper>,
    checker: Option<Arc<dyn ModelChecker>>,
    root: Option<StateId>,
    timestep: u32,
    frontier: Vec<StateId>,
    root_bounds: Option<ReachBounds>,
    history: Vec<ProgressStats>,
}

impl AnalysisLoop {
    pub fn new(
        config: AnalysisConfig,
        classifier: Arc<dyn Classifier>,
        stepper: Arc<dyn EnvironmentStepper>,
    ) -> Result<Self, MosaicError> {
        config.validate()?;
        let index = SpatialIndex::new(config.dimensions, config.precision)?;
        let graph = TransitionGraph::new(config.dimensions, config.precision)?;
        Self::assemble(config, index, graph, classifier, stepper)
    }

    /// Continues a run from a checkpoint directory
    pub fn resume(
        dir: &Path,
        config: AnalysisConfig,
        classifier: Arc<dyn Classifier>,
        stepper: Arc<dyn EnvironmentStepper>,
    ) -> Result<Self, MosaicError> {
        config.validate()?;
        let checkpoint = Checkpoint::load(dir, config.precision)?;
        if checkpoint.graph.dimensions() != config.dimensions {
            return Err(ConfigError::DimensionMismatch {
                expected: config.dimensions,
                actual: checkpoint.graph.dimensions(),
            }
            .into());
        }

        let mut analysis = Self::assemble(config, checkpoint.index, checkpoint.graph, classifier, stepper)?;
        let state = checkpoint.state;
        analysis.timestep = state.timestep;
        analysis.root = state.root;
        analysis.frontier = state.frontier;
        analysis.root_bounds = state.root_bounds;
        analysis.history = state.history;
        info!(
            "Resumed at timestep {} with {} frontier states",
            analysis.timestep,
            analysis.frontier.len()
        );
        Ok(analysis)
    }

    fn assemble(
        config: AnalysisConfig,
        index: SpatialIndex,
        graph: TransitionGraph,
        classifier: Arc<dyn Classifier>,
        stepper: Arc<dyn EnvironmentStepper>,
    ) -> Result<Self, MosaicError> {
        let pool = ChunkPool::new(config.workers, config.poll_interval())?;
        let resolver = OverlapResolver::from_config(&config)?;
        let complement = ComplementComputer::new(resolver.clone(), config.complement_chunk_size);
        Ok(Self {
            config,
            index,
            graph,
            pool,
            resolver,
            complement,
            classifier,
            stepper,
            checker: None,
            root: None,
            timestep: 0,
            frontier: Vec::new(),
            root_bounds: None,
            history: Vec::new(),
        })
    }

    /// Enables pruning through `checker`
    pub fn with_model_checker(mut self, checker: Arc<dyn ModelChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    pub fn root(&self) -> Option<StateId> {
        self.root
    }

    /// Next timestep to process
    pub fn timestep(&self) -> u32 {
        self.timestep
    }

    pub fn frontier(&self) -> &[StateId] {
        &self.frontier
    }

    pub fn history(&self) -> &[ProgressStats] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.frontier.is_empty() || self.timestep >= self.config.horizon
    }

    /// Starts a fresh run from `initial`, discarding any previous state
    pub fn initialize(&mut self, initial: &IntervalBox) -> Result<StateId, MosaicError> {
        self.index.reset(self.config.dimensions)?;
        self.graph.reset();
        self.timestep = 0;
        self.root_bounds = None;
        self.history.clear();

        let root = self.graph.intern(initial, Layer::step(0))?;
        self.root = Some(root);
        self.frontier = vec![root];
        info!("Analysis initialized from {} (horizon {})", initial, self.config.horizon);
        Ok(root)
    }

    pub fn run(&mut self, initial: &IntervalBox) -> Result<AnalysisReport, MosaicError> {
        self.initialize(initial)?;
        self.run_to_completion()
    }

    /// Steps until the frontier empties or the horizon is reached
    pub fn run_to_completion(&mut self) -> Result<AnalysisReport, MosaicError> {
        while self.step()? {}
        let report = self.report();
        info!(
            "Analysis finished after {} timesteps: {} states, {} terminal, {} irrelevant",
            report.timesteps, report.states, report.terminal, report.irrelevant
        );
        Ok(report)
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            timesteps: self.timestep,
            states: self.graph.node_count(),
            terminal: self.graph.terminal_states().len(),
            irrelevant: self.graph.irrelevant_states().len(),
            root_bounds: self.root_bounds,
            history: self.history.clone(),
        }
    }

    pub fn save_checkpoint(&self, dir: &Path) -> Result<(), MosaicError> {
        let state = LoopState {
            timestep: self.timestep,
            root: self.root,
            frontier: self.frontier.clone(),
            root_bounds: self.root_bounds,
            history: self.history.clone(),
        };
        Checkpoint::save(dir, &self.index, &self.graph, &state)?;
        Ok(())
    }

    /// Processes one timestep; returns whether another one is pending
    pub fn step(&mut self) -> Result<bool, MosaicError> {
        if self.is_finished() {
            return Ok(false);
        }
        let root = self.root.ok_or_else(|| ConfigError::InvalidParameter {
            name: "initial_state",
            reason: "initialize the analysis before stepping".to_string(),
        })?;
        let t = self.timestep;
        let mut stats = ProgressStats::new(t);

        let frontier: Vec<StateId> = self
            .frontier
            .iter()
            .copied()
            .filter(|&id| self.graph.is_relevant(id) && self.graph.node(id).is_some_and(|n| !n.terminal))
            .collect();
        stats.frontier = frontier.len();
        let mut current = Vec::with_capacity(frontier.len());
        for &id in &frontier {
            let bounds = self.graph.box_of(id).ok_or(InvariantViolation::UnknownState(id))?;
            current.push(bounds.clone());
        }

        let assigned = self.assign_labels(&current, &mut stats)?;
        let to_step = self.refine_frontier(&frontier, &assigned, &mut stats)?;
        let next = self.step_environment(&to_step, &mut stats)?;

        self.timestep = t + 1;
        self.frontier = next;
        if self.checker.is_some() && self.config.prunes_at(t) {
            self.prune(root, &mut stats)?;
        }
        self.graph.validate_outgoing(WEIGHT_TOLERANCE * 10.0)?;

        info!("{}", stats);
        self.history.push(stats);

        if let Some(dir) = self.config.checkpoint_dir.clone() {
            self.save_checkpoint(&dir)?;
        }
        Ok(!self.is_finished())
    }

    /// Classifies until `current` is covered by index entries
    ///
    /// Returns the disjoint labelled pieces of `current`.
    fn assign_labels(
        &mut self,
        current: &[IntervalBox],
        stats: &mut ProgressStats,
    ) -> Result<Vec<LabeledBox>, MosaicError> {
        let mut remaining = 0;
        for round in 0..self.config.max_refinements {
            let result = self.complement.compute(current, &self.index, &self.pool)?;
            if result.is_covered() {
                stats.refinement_rounds = round + 1;
                return Ok(result.intersected);
            }
            remaining = result.remaining.len();
            debug!(
                "t={} round {}: {} uncovered boxes, {} already classified",
                self.timestep,
                round,
                remaining,
                result.intersected.len()
            );

            let mut uncovered: Vec<IntervalBox> = result
                .remaining
                .iter()
                .map(|b| b.round(self.config.precision))
                .collect();
            uncovered.sort_by(|a, b| a.total_cmp(b));

            let classification = self.classify(&uncovered)?;
            let expected = total_area(&uncovered);
            let actual = classification.total_area();
            if (expected - actual).abs() > self.config.area_tolerance {
                error!("Classifier changed the area of its batch: {} -> {}", expected, actual);
                return Err(InvariantViolation::AreaMismatch {
                    stage: "classification",
                    expected,
                    actual,
                }
                .into());
            }

            let resolved = self.resolver.resolve(&classification.into_labeled())?;
            self.index.add_many(&resolved)?;
            self.index.flush();
        }

        let rounds = self.config.max_refinements;
        error!("t={}: {} boxes still uncovered after {} rounds", self.timestep, remaining, rounds);
        Err(InvariantViolation::Unconverged {
            timestep: self.timestep,
            remaining,
            rounds,
        }
        .into())
    }

    /// Runs the classifier on worker chunks
    ///
    /// A failing chunk, or an empty answer for a non-empty chunk, is logged
    /// and labelled `Ignore`.
    fn classify(&self, boxes: &[IntervalBox]) -> Result<Classification, MosaicError> {
        let size = self.config.step_chunk_size;
        let classifier = &self.classifier;
        let answers = self
            .pool
            .map_chunks("classify", boxes, size, |chunk| classifier.classify(chunk))?;

        let mut classification = Classification::default();
        for (chunk, answer) in boxes.chunks(size).zip(answers) {
            match answer {
                Ok(verdict) if verdict.is_empty() => {
                    warn!(
                        "{} returned nothing for {} boxes, labelling them ignore",
                        classifier.name(),
                        chunk.len()
                    );
                    classification.extend(Classification::ignore_all(chunk));
                }
                Ok(verdict) => classification.extend(verdict),
                Err(err) => {
                    warn!("{}; labelling {} boxes ignore", err, chunk.len());
                    classification.extend(Classification::ignore_all(chunk));
                }
            }
        }
        Ok(classification)
    }

    /// Labels frontier states and collects the pieces to step
    fn refine_frontier(
        &mut self,
        frontier: &[StateId],
        assigned: &[LabeledBox],
        stats: &mut ProgressStats,
    ) -> Result<Vec<(StateId, LabeledBox)>, MosaicError> {
        let mut pieces = SpatialIndex::new(self.config.dimensions, self.config.precision)?;
        pieces.add_many(assigned)?;
        pieces.flush();

        let split = Layer::split(self.timestep);
        let mut to_step = Vec::new();
        let mut queued = HashSet::new();

        for &id in frontier {
            let bounds = self.graph.box_of(id).ok_or(InvariantViolation::UnknownState(id))?.clone();
            let mut parts: Vec<LabeledBox> = pieces
                .query_overlapping(&bounds)?
                .into_iter()
                .filter_map(|piece| {
                    piece
                        .bounds
                        .intersection(&bounds)
                        .map(|shared| LabeledBox::new(shared, piece.label))
                })
                .collect();
            parts.sort_by(|a, b| a.bounds.total_cmp(&b.bounds));

            let covered: f64 = parts.iter().map(LabeledBox::area).sum();
            if (covered - bounds.area()).abs() > self.config.area_tolerance {
                error!("State {} {} is covered by area {}", id, bounds, covered);
                return Err(InvariantViolation::AreaMismatch {
                    stage: "refinement",
                    expected: bounds.area(),
                    actual: covered,
                }
                .into());
            }

            if let [only] = parts.as_slice() {
                if only.bounds.contains_within(&bounds, self.config.containment_epsilon) {
                    self.graph.set_label(id, only.label)?;
                    self.count_label(only.label, stats);
                    if only.label.is_stepped() && queued.insert(id) {
                        to_step.push((id, LabeledBox::new(bounds, only.label)));
                    }
                    continue;
                }
            }

            let mut distribution = Vec::with_capacity(parts.len());
            for part in parts {
                let child = self.graph.intern(&part.bounds, split)?;
                self.graph.set_label(child, part.label)?;
                self.count_label(part.label, stats);
                distribution.push((child, part.area() / covered));
                let fresh = self.graph.out_degree(child) == 0;
                if part.label.is_stepped() && fresh && queued.insert(child) {
                    let child_bounds = self.graph.box_of(child).ok_or(InvariantViolation::UnknownState(child))?;
                    to_step.push((child, LabeledBox::new(child_bounds.clone(), part.label)));
                }
            }
            self.graph.add_distribution(id, &distribution)?;
        }
        Ok(to_step)
    }

    fn count_label(&self, label: Label, stats: &mut ProgressStats) {
        match label {
            Label::Safe => stats.safe += 1,
            Label::Unsafe => stats.unsafe_count += 1,
            Label::Ignore => stats.ignored += 1,
        }
    }

    /// Steps labelled states and interns their successors
    ///
    /// Returns the new frontier: successors seen for the first time that
    /// are not terminal.
    fn step_environment(
        &mut self,
        to_step: &[(StateId, LabeledBox)],
        stats: &mut ProgressStats,
    ) -> Result<Vec<StateId>, MosaicError> {
        let boxes: Vec<LabeledBox> = to_step.iter().map(|(_, b)| b.clone()).collect();
        let stepper = &self.stepper;
        let answers = self
            .pool
            .map_chunks("step", &boxes, self.config.step_chunk_size, |chunk| stepper.step(chunk))?;

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(boxes.len());
        for answer in answers {
            outcomes.extend(answer?);
        }
        if outcomes.len() != boxes.len() {
            return Err(CollaboratorError::new(
                stepper.name(),
                format!("returned {} outcomes for {} boxes", outcomes.len(), boxes.len()),
            )
            .into());
        }

        let next_layer = Layer::step(self.timestep + 1);
        let mut next = Vec::new();
        let mut queued = HashSet::new();
        for ((parent, _), outcome) in to_step.iter().zip(outcomes) {
            let mut distribution = Vec::with_capacity(outcome.next.len() + outcome.terminal.len());
            for successor in &outcome.next {
                let (child, created) = self.graph.intern_with_status(&successor.bounds, next_layer)?;
                stats.seen += 1;
                if created {
                    if queued.insert(child) {
                        next.push(child);
                    }
                } else {
                    stats.already_visited += 1;
                }
                distribution.push((child, successor.probability));
            }
            for successor in &outcome.terminal {
                let child = self.graph.intern(&successor.bounds, next_layer)?;
                self.graph.mark_terminal(child)?;
                stats.seen += 1;
                stats.terminal += 1;
                distribution.push((child, successor.probability));
            }
            self.graph.add_distribution(*parent, &distribution)?;
        }

        next.retain(|&id| self.graph.node(id).is_some_and(|node| !node.terminal));
        Ok(next)
    }

    /// Marks frontier states below the relevance threshold irrelevant
    ///
    /// A failed checker query counts as zero probability. Afterwards the
    /// root's bounds to the terminal states are refreshed.
    fn prune(&mut self, root: StateId, stats: &mut ProgressStats) -> Result<(), MosaicError> {
        let Some(checker) = self.checker.clone() else {
            return Ok(());
        };
        let terminals = self.graph.terminal_states();
        let model = self.graph.export_for_model_checker(root);
        self.graph.mark_exported();

        let criterion = self.config.prune_criterion;
        if criterion == PruneCriterion::ReachUnsafe && terminals.is_empty() {
            debug!("No terminal states yet, skipping pruning");
        } else if !self.frontier.is_empty() {
            let answers = self.pool.map_chunks("prune", &self.frontier, self.config.step_chunk_size, |chunk| {
                chunk
                    .iter()
                    .map(|&state| {
                        let bounds = match criterion {
                            PruneCriterion::ReachFromRoot => checker.reach_bounds(&model, &[state], root),
                            PruneCriterion::ReachUnsafe => checker.reach_bounds(&model, &terminals, state),
                        };
                        (state, bounds)
                    })
                    .collect::<Vec<_>>()
            })?;

            for (state, answer) in answers.into_iter().flatten() {
                let relevant = match answer {
                    Ok(bounds) => {
                        self.graph.set_reach_bounds(state, bounds)?;
                        bounds.max_max >= self.config.relevance_threshold
                    }
                    Err(err) => {
                        warn!("{}; treating state {} as irrelevant", err, state);
                        false
                    }
                };
                if !relevant {
                    self.graph.mark_irrelevant(state)?;
                    stats.irrelevant += 1;
                }
            }
            self.frontier.retain(|&id| self.graph.is_relevant(id));
        }

        if !terminals.is_empty() {
            match checker.reach_bounds(&model, &terminals, root) {
                Ok(bounds) => {
                    self.graph.set_reach_bounds(root, bounds)?;
                    self.root_bounds = Some(bounds);
                    info!(
                        "Root reaches a terminal state with probability in [{:.6}, {:.6}]",
                        bounds.min_min, bounds.max_max
                    );
                }
                Err(err) => warn!("{}; root bounds unavailable", err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::ModelExport;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    struct AllSafe;

    impl Classifier for AllSafe {
        fn classify(&self, boxes: &[IntervalBox]) -> Result<Classification, CollaboratorError> {
            Ok(Classification {
                safe_boxes: boxes.to_vec(),
                ..Classification::default()
            })
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _: &[IntervalBox]) -> Result<Classification, CollaboratorError> {
            Err(CollaboratorError::new("solver", "infeasible"))
        }
    }

    struct HalfArea;

    impl Classifier for HalfArea {
        fn classify(&self, boxes: &[IntervalBox]) -> Result<Classification, CollaboratorError> {
            let safe_boxes = boxes
                .iter()
                .map(|b| {
                    let i = b.interval(0);
                    IntervalBox::from_bounds(&[(i.low, i.midpoint())]).unwrap()
                })
                .collect();
            Ok(Classification {
                safe_boxes,
                ..Classification::default()
            })
        }
    }

    /// Shifts boxes right by one; boxes reaching past 4 terminate
    struct Shift;

    impl EnvironmentStepper for Shift {
        fn step(&self, boxes: &[LabeledBox]) -> Result<Vec<StepOutcome>, CollaboratorError> {
            Ok(boxes
                .iter()
                .map(|b| {
                    let i = b.bounds.interval(0);
                    let shifted = IntervalBox::from_bounds(&[(i.low + 1.0, i.high + 1.0)]).unwrap();
                    if i.high > 4.0 {
                        StepOutcome::terminal(shifted)
                    } else {
                        StepOutcome::deterministic(shifted)
                    }
                })
                .collect())
        }
    }

    struct Certain;

    impl ModelChecker for Certain {
        fn reach_bounds(&self, _: &ModelExport, _: &[StateId], _: StateId) -> Result<ReachBounds, CollaboratorError> {
            Ok(ReachBounds::exact(1.0))
        }
    }

    struct Unavailable;

    impl ModelChecker for Unavailable {
        fn reach_bounds(&self, _: &ModelExport, _: &[StateId], _: StateId) -> Result<ReachBounds, CollaboratorError> {
            Err(CollaboratorError::new("model checker", "connection refused"))
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            workers: 2,
            poll_interval_ms: 1,
            step_chunk_size: 1,
            complement_chunk_size: 2,
            ..AnalysisConfig::default()
        }
    }

    fn bx(low: f64, high: f64) -> IntervalBox {
        IntervalBox::from_bounds(&[(low, high)]).unwrap()
    }

    fn shifting(classifier: Arc<dyn Classifier>) -> AnalysisLoop {
        AnalysisLoop::new(config(), classifier, Arc::new(Shift)).unwrap()
    }

    #[test]
    fn test_run_until_frontier_empties() {
        crate::init_logging();
        let mut analysis = shifting(Arc::new(AllSafe)).with_model_checker(Arc::new(Certain));
        let report = analysis.run(&bx(0.0, 2.0)).unwrap();

        // [0,2] -> [1,3] split into [1,2] and [2,3] -> [3,4] -> [4,5] -> terminal [5,6]
        assert_eq!(report.timesteps, 4);
        assert_eq!(report.states, 7);
        assert_eq!(report.terminal, 1);
        assert_eq!(report.irrelevant, 0);
        assert_eq!(report.root_bounds, Some(ReachBounds::exact(1.0)));
        assert_eq!(report.history[1].already_visited, 1);
        assert_eq!(report.history[1].seen, 2);

        let graph = analysis.graph();
        assert_eq!(
            graph.successors(StateId(1)),
            vec![(StateId(2), Some(0.5)), (StateId(3), Some(0.5))]
        );
        assert_eq!(graph.layer(Layer::split(1)), &[StateId(2), StateId(3)]);
        assert_eq!(graph.node(StateId(4)).and_then(|n| n.label), Some(Label::Safe));
        assert!(graph.validate_outgoing(1e-9).is_ok());
        assert_abs_diff_eq!(analysis.index().total_area(), 5.0, epsilon = 1e-8);
    }

    #[test]
    fn test_horizon_bounds_the_run() {
        let mut analysis = AnalysisLoop::new(
            AnalysisConfig { horizon: 2, ..config() },
            Arc::new(AllSafe),
            Arc::new(Shift),
        )
        .unwrap();
        let report = analysis.run(&bx(0.0, 2.0)).unwrap();
        assert_eq!(report.timesteps, 2);
        assert_eq!(analysis.frontier().len(), 1);
        assert!(!analysis.step().unwrap());
    }

    #[test]
    fn test_checker_failure_marks_frontier_irrelevant() {
        let mut analysis = shifting(Arc::new(AllSafe)).with_model_checker(Arc::new(Unavailable));
        let report = analysis.run(&bx(0.0, 2.0)).unwrap();

        assert_eq!(report.timesteps, 1);
        assert_eq!(report.irrelevant, 1);
        assert!(!analysis.graph().is_relevant(StateId(1)));
        assert!(analysis.graph().contains(StateId(1)));
        assert!(report.root_bounds.is_none());
    }

    #[test]
    fn test_classifier_failure_labels_ignore() {
        let mut analysis = shifting(Arc::new(Failing));
        let report = analysis.run(&bx(0.0, 2.0)).unwrap();

        assert_eq!(report.timesteps, 1);
        assert_eq!(report.states, 1);
        assert_eq!(report.history[0].ignored, 1);
        assert_eq!(analysis.index().entries(), vec![LabeledBox::new(bx(0.0, 2.0), Label::Ignore)]);
    }

    #[test]
    fn test_classifier_area_loss_is_fatal() {
        let mut analysis = shifting(Arc::new(HalfArea));
        let err = analysis.run(&bx(0.0, 2.0)).unwrap_err();
        assert!(matches!(
            err,
            MosaicError::Invariant(InvariantViolation::AreaMismatch { stage: "classification", .. })
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_step_requires_initialization() {
        let mut analysis = shifting(Arc::new(AllSafe));
        assert!(!analysis.step().unwrap());
        analysis.frontier = vec![StateId(0)];
        assert!(matches!(analysis.step(), Err(MosaicError::Config(_))));
    }

    #[test]
    fn test_resume_matches_uninterrupted_run() {
        let dir = TempDir::new().unwrap();
        let mut reference = shifting(Arc::new(AllSafe));
        let expected = reference.run(&bx(0.0, 2.0)).unwrap();

        let mut first = shifting(Arc::new(AllSafe));
        first.initialize(&bx(0.0, 2.0)).unwrap();
        assert!(first.step().unwrap());
        assert!(first.step().unwrap());
        first.save_checkpoint(dir.path()).unwrap();

        let mut resumed = AnalysisLoop::resume(dir.path(), config(), Arc::new(AllSafe), Arc::new(Shift)).unwrap();
        assert_eq!(resumed.timestep(), 2);
        assert_eq!(resumed.frontier(), first.frontier());
        let report = resumed.run_to_completion().unwrap();

        assert_eq!(report, expected);
        assert_eq!(resumed.index().entries().len(), reference.index().entries().len());
    }

    #[test]
    fn test_checkpoint_dir_is_written_every_step() {
        let dir = TempDir::new().unwrap();
        let config = AnalysisConfig {
            checkpoint_dir: Some(dir.path().join("ckpt")),
            ..config()
        };
        let mut analysis = AnalysisLoop::new(config, Arc::new(AllSafe), Arc::new(Shift)).unwrap();
        analysis.initialize(&bx(0.0, 2.0)).unwrap();
        analysis.step().unwrap();
        assert!(Checkpoint::exists(&dir.path().join("ckpt")));
    }
}

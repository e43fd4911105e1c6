//! Transition graph over interned box states
//!
//! Every canonical box maps to exactly one integer [`StateId`], assigned
//! monotonically on first insertion and never reused. Directed edges carry
//! transition probabilities; the graph is exported as one probability
//! distribution per state for an external probabilistic model checker.
//!
//! Persistence splits the graph in two: the id/box bijection, layer map
//! and id counter go to a compact bincode file, and the directed graph
//! itself is written as node-link JSON.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, InvariantViolation, MosaicError, StorageError};
use crate::geometry::{check_precision, BoxKey, IntervalBox, Label};

/// Tolerance on the per-parent sum of outgoing probabilities
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Default probability of the non-sticky successor
pub const DEFAULT_STICKY_SPLIT: f64 = 0.8;

/// State identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u64);

impl StateId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discovery layer of a state: a timestep, or the refinement of one
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Layer {
    pub timestep: u32,
    pub split: bool,
}

impl Layer {
    pub fn step(timestep: u32) -> Self {
        Self { timestep, split: false }
    }

    pub fn split(timestep: u32) -> Self {
        Self { timestep, split: true }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.split {
            write!(f, "{}.split", self.timestep)
        } else {
            write!(f, "{}", self.timestep)
        }
    }
}

/// Probability bounds returned by a model checker
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReachBounds {
    pub min_min: f64,
    pub min_max: f64,
    pub max_min: f64,
    pub max_max: f64,
}

impl ReachBounds {
    /// Bounds of a model without nondeterminism
    pub fn exact(probability: f64) -> Self {
        Self {
            min_min: probability,
            min_max: probability,
            max_min: probability,
            max_max: probability,
        }
    }
}

/// One state's outgoing distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDistribution {
    pub state: StateId,
    pub successors: Vec<(StateId, f64)>,
}

/// Graph as handed to the model checker
///
/// States without a distribution are absorbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExport {
    pub root: StateId,
    pub states: Vec<StateId>,
    pub distributions: Vec<StateDistribution>,
}

impl ModelExport {
    pub fn distribution(&self, state: StateId) -> Option<&[(StateId, f64)]> {
        self.distributions
            .binary_search_by_key(&state, |d| d.state)
            .ok()
            .map(|i| self.distributions[i].successors.as_slice())
    }
}

/// Bijective map between state ids and canonical boxes
#[derive(Debug, Clone, Default)]
pub struct StateBijection {
    forward: HashMap<StateId, BoxKey>,
    inverse: HashMap<BoxKey, StateId>,
}

impl StateBijection {
    pub fn id_of(&self, key: &BoxKey) -> Option<StateId> {
        self.inverse.get(key).copied()
    }

    pub fn key_of(&self, id: StateId) -> Option<&BoxKey> {
        self.forward.get(&id)
    }

    /// Returns the id bound to `key`, binding `next` on a miss
    ///
    /// The flag is `true` when a new binding was made.
    pub fn insert_or_get(&mut self, key: BoxKey, next: StateId) -> Result<(StateId, bool), InvariantViolation> {
        if let Some(&id) = self.inverse.get(&key) {
            return Ok((id, false));
        }
        if self.forward.contains_key(&next) {
            return Err(InvariantViolation::DuplicateState(next));
        }
        self.forward.insert(next, key.clone());
        self.inverse.insert(key, next);
        Ok((next, true))
    }

    pub fn remove(&mut self, id: StateId) -> Option<BoxKey> {
        let key = self.forward.remove(&id)?;
        self.inverse.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    fn sorted(&self) -> Vec<(StateId, BoxKey)> {
        let mut pairs: Vec<_> = self.forward.iter().map(|(id, key)| (*id, key.clone())).collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs
    }
}

/// Layer to ids multimap, with the reverse membership
#[derive(Debug, Clone, Default)]
pub struct LayerMap {
    layers: BTreeMap<Layer, Vec<StateId>>,
    membership: HashMap<StateId, Layer>,
}

impl LayerMap {
    pub fn insert(&mut self, layer: Layer, id: StateId) {
        if self.membership.insert(id, layer).is_none() {
            self.layers.entry(layer).or_default().push(id);
        }
    }

    pub fn remove(&mut self, id: StateId) -> Option<Layer> {
        let layer = self.membership.remove(&id)?;
        if let Some(ids) = self.layers.get_mut(&layer) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.layers.remove(&layer);
            }
        }
        Some(layer)
    }

    pub fn ids(&self, layer: Layer) -> &[StateId] {
        self.layers.get(&layer).map_or(&[], Vec::as_slice)
    }

    pub fn layer_of(&self, id: StateId) -> Option<Layer> {
        self.membership.get(&id).copied()
    }

    pub fn layers(&self) -> impl Iterator<Item = (&Layer, &Vec<StateId>)> {
        self.layers.iter()
    }
}

/// Per-state attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNode {
    pub bounds: IntervalBox,
    pub layer: Layer,
    pub label: Option<Label>,
    pub terminal: bool,
    pub irrelevant: bool,
    pub reach: Option<ReachBounds>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatesSnapshot {
    dimensions: usize,
    precision: u32,
    next_id: u64,
    bijection: Vec<(StateId, BoxKey)>,
    layers: Vec<(Layer, Vec<StateId>)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeLinkGraph {
    directed: bool,
    nodes: Vec<NodeRecord>,
    links: Vec<LinkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: StateId,
    #[serde(flatten)]
    node: StateNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkRecord {
    source: StateId,
    target: StateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<f64>,
}

/// Directed graph of interned states with weighted transitions
#[derive(Debug, Clone)]
pub struct TransitionGraph {
    dimensions: usize,
    precision: u32,
    next_id: u64,
    states: StateBijection,
    layers: LayerMap,
    nodes: HashMap<StateId, StateNode>,
    /// Edge weight `None` means "share uniformly with the other unset edges"
    graph: DiGraphMap<StateId, Option<f64>>,
    needs_export: bool,
}

impl TransitionGraph {
    pub fn new(dimensions: usize, precision: u32) -> Result<Self, ConfigError> {
        if dimensions == 0 {
            return Err(ConfigError::InvalidDimensions(dimensions));
        }
        check_precision(precision)?;
        Ok(Self {
            dimensions,
            precision,
            next_id: 0,
            states: StateBijection::default(),
            layers: LayerMap::default(),
            nodes: HashMap::new(),
            graph: DiGraphMap::new(),
            needs_export: false,
        })
    }

    /// Clears every state; ids restart from zero
    pub fn reset(&mut self) {
        info!("Resetting the transition graph");
        self.next_id = 0;
        self.states = StateBijection::default();
        self.layers = LayerMap::default();
        self.nodes.clear();
        self.graph.clear();
        self.needs_export = false;
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the graph changed since the last [`Self::mark_exported`]
    pub fn needs_export(&self) -> bool {
        self.needs_export
    }

    pub fn mark_exported(&mut self) {
        self.needs_export = false;
    }

    /// Interns `bounds`, returning its id
    ///
    /// Equal canonical boxes always yield the same id; the layer of an
    /// already interned state is left unchanged.
    pub fn intern(&mut self, bounds: &IntervalBox, layer: Layer) -> Result<StateId, MosaicError> {
        self.intern_with_status(bounds, layer).map(|(id, _)| id)
    }

    /// Like [`Self::intern`], also reporting whether the state is new
    pub fn intern_with_status(
        &mut self,
        bounds: &IntervalBox,
        layer: Layer,
    ) -> Result<(StateId, bool), MosaicError> {
        bounds.check_dimensions(self.dimensions)?;
        let key = bounds.key(self.precision);
        let (id, created) = self.states.insert_or_get(key.clone(), StateId(self.next_id))?;
        if created {
            self.next_id += 1;
            self.layers.insert(layer, id);
            self.nodes.insert(
                id,
                StateNode {
                    bounds: key.to_box(),
                    layer,
                    label: None,
                    terminal: false,
                    irrelevant: false,
                    reach: None,
                },
            );
            self.graph.add_node(id);
            self.needs_export = true;
        }
        Ok((id, created))
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn id_of(&self, bounds: &IntervalBox) -> Option<StateId> {
        self.states.id_of(&bounds.key(self.precision))
    }

    pub fn box_of(&self, id: StateId) -> Option<&IntervalBox> {
        self.nodes.get(&id).map(|node| &node.bounds)
    }

    pub fn node(&self, id: StateId) -> Option<&StateNode> {
        self.nodes.get(&id)
    }

    /// Ids discovered in `layer`, in discovery order
    pub fn layer(&self, layer: Layer) -> &[StateId] {
        self.layers.ids(layer)
    }

    pub fn layer_of(&self, id: StateId) -> Option<Layer> {
        self.layers.layer_of(id)
    }

    /// Adds or overwrites the edge `parent -> child`
    ///
    /// Keeping the outgoing weights of a parent summing to one is the
    /// caller's job; [`Self::validate_outgoing`] checks it.
    pub fn add_edge(&mut self, parent: StateId, child: StateId, probability: f64) -> Result<(), MosaicError> {
        self.require(parent)?;
        self.require(child)?;
        if !(probability.is_finite() && probability > 0.0 && probability <= 1.0 + WEIGHT_TOLERANCE) {
            return Err(InvariantViolation::InvalidProbability {
                parent,
                child,
                probability,
            }
            .into());
        }
        self.graph.add_edge(parent, child, Some(probability));
        self.needs_export = true;
        Ok(())
    }

    /// Adds an unweighted edge, split uniformly on export
    pub fn connect(&mut self, parent: StateId, child: StateId) -> Result<(), MosaicError> {
        self.require(parent)?;
        self.require(child)?;
        self.graph.add_edge(parent, child, None);
        self.needs_export = true;
        Ok(())
    }

    /// Adds a whole outgoing distribution, merging repeated children
    ///
    /// Every weight must lie in `[0, 1]` and together they must sum to one.
    pub fn add_distribution(&mut self, parent: StateId, successors: &[(StateId, f64)]) -> Result<(), MosaicError> {
        if successors.is_empty() {
            return Ok(());
        }
        for &(child, probability) in successors {
            if !(probability.is_finite() && (0.0..=1.0).contains(&probability)) {
                return Err(InvariantViolation::InvalidProbability {
                    parent,
                    child,
                    probability,
                }
                .into());
            }
        }
        let total: f64 = successors.iter().map(|(_, p)| p).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(InvariantViolation::OutgoingWeights { parent, total }.into());
        }
        let mut merged: BTreeMap<StateId, f64> = BTreeMap::new();
        for &(child, probability) in successors {
            *merged.entry(child).or_insert(0.0) += probability;
        }
        // Zero-weight successors carry no edge.
        for (child, probability) in merged.into_iter().filter(|(_, p)| *p > 0.0) {
            self.add_edge(parent, child, probability.min(1.0))?;
        }
        Ok(())
    }

    /// Deterministic successor: interns `bounds` and links it with weight 1
    pub fn add_successor(&mut self, parent: StateId, bounds: &IntervalBox, layer: Layer) -> Result<StateId, MosaicError> {
        let child = self.intern(bounds, layer)?;
        self.add_edge(parent, child, 1.0)?;
        Ok(child)
    }

    /// Sticky-action successors with weights `p` and `1 - p`
    ///
    /// If both boxes intern to the same state the two weights collapse
    /// into a single edge of weight one.
    pub fn add_sticky_successors(
        &mut self,
        parent: StateId,
        successor: &IntervalBox,
        sticky: &IntervalBox,
        layer: Layer,
        p: f64,
    ) -> Result<(StateId, StateId), MosaicError> {
        let successor_id = self.intern(successor, layer)?;
        let sticky_id = self.intern(sticky, layer)?;
        self.add_distribution(parent, &[(successor_id, p), (sticky_id, 1.0 - p)])?;
        Ok((successor_id, sticky_id))
    }

    pub fn successors(&self, id: StateId) -> Vec<(StateId, Option<f64>)> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut out: Vec<_> = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .map(|child| (child, self.graph.edge_weight(id, child).copied().flatten()))
            .collect();
        out.sort_by_key(|(child, _)| *child);
        out
    }

    pub fn out_degree(&self, id: StateId) -> usize {
        if !self.graph.contains_node(id) {
            return 0;
        }
        self.graph.neighbors_directed(id, Direction::Outgoing).count()
    }

    pub fn set_label(&mut self, id: StateId, label: Label) -> Result<(), MosaicError> {
        self.node_mut(id)?.label = Some(label);
        Ok(())
    }

    pub fn mark_terminal(&mut self, id: StateId) -> Result<(), MosaicError> {
        self.node_mut(id)?.terminal = true;
        self.needs_export = true;
        Ok(())
    }

    /// Excludes a state from future frontier expansion; it stays in the graph
    pub fn mark_irrelevant(&mut self, id: StateId) -> Result<(), MosaicError> {
        self.node_mut(id)?.irrelevant = true;
        Ok(())
    }

    pub fn set_reach_bounds(&mut self, id: StateId, bounds: ReachBounds) -> Result<(), MosaicError> {
        self.node_mut(id)?.reach = Some(bounds);
        Ok(())
    }

    pub fn is_relevant(&self, id: StateId) -> bool {
        self.nodes.get(&id).is_some_and(|node| !node.irrelevant)
    }

    pub fn terminal_states(&self) -> Vec<StateId> {
        let mut ids: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.terminal)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn irrelevant_states(&self) -> Vec<StateId> {
        let mut ids: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.irrelevant)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Checks that every parent with weighted edges sums to one
    pub fn validate_outgoing(&self, tolerance: f64) -> Result<(), InvariantViolation> {
        for parent in self.graph.nodes() {
            let weights: Vec<Option<f64>> = self
                .graph
                .neighbors_directed(parent, Direction::Outgoing)
                .map(|child| self.graph.edge_weight(parent, child).copied().flatten())
                .collect();
            if weights.is_empty() || weights.iter().all(Option::is_none) {
                continue;
            }
            let total: f64 = export_weights(&weights).iter().sum();
            if (total - 1.0).abs() > tolerance {
                return Err(InvariantViolation::OutgoingWeights { parent, total });
            }
        }
        Ok(())
    }

    /// Removes `id`, then every state no longer connected to `root`
    ///
    /// Connectivity ignores edge direction. Removed states leave the
    /// bijection and layer map too; their ids are not reused. Returns the
    /// removed ids in ascending order.
    pub fn purge_branch(&mut self, id: StateId, root: StateId) -> Result<Vec<StateId>, MosaicError> {
        self.require(id)?;
        self.graph.remove_node(id);

        let reachable = self.undirected_reach(root);
        let mut removed: Vec<StateId> = self
            .nodes
            .keys()
            .copied()
            .filter(|node| *node == id || !reachable.contains(node))
            .collect();
        removed.sort_unstable();

        for &node in &removed {
            self.graph.remove_node(node);
            self.nodes.remove(&node);
            self.states.remove(node);
            self.layers.remove(node);
        }
        self.needs_export = true;
        debug!("Purged {} states after removing {}", removed.len(), id);
        Ok(removed)
    }

    /// Distributions for every state with outgoing edges
    ///
    /// Weighted edges keep their weight; unset edges share `1 / out-degree`.
    pub fn export_for_model_checker(&self, root: StateId) -> ModelExport {
        let mut states: Vec<StateId> = self.nodes.keys().copied().collect();
        states.sort_unstable();

        let distributions = states
            .iter()
            .filter_map(|&state| {
                let successors = self.successors(state);
                if successors.is_empty() {
                    return None;
                }
                let weights: Vec<Option<f64>> = successors.iter().map(|(_, w)| *w).collect();
                let successors = successors
                    .iter()
                    .zip(export_weights(&weights))
                    .map(|((child, _), weight)| (*child, weight))
                    .collect();
                Some(StateDistribution { state, successors })
            })
            .collect();

        ModelExport {
            root,
            states,
            distributions,
        }
    }

    /// Writes `states.bin` and `graph.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<(), StorageError> {
        let snapshot = StatesSnapshot {
            dimensions: self.dimensions,
            precision: self.precision,
            next_id: self.next_id,
            bijection: self.states.sorted(),
            layers: self
                .layers
                .layers()
                .map(|(layer, ids)| (*layer, ids.clone()))
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(dir.join(STATES_FILE))?);
        bincode::serialize_into(&mut writer, &snapshot)?;
        writer.flush()?;

        let mut ids: Vec<StateId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        let nodes = ids
            .iter()
            .filter_map(|id| {
                self.nodes.get(id).map(|node| NodeRecord {
                    id: *id,
                    node: node.clone(),
                })
            })
            .collect();
        let mut links: Vec<LinkRecord> = self
            .graph
            .all_edges()
            .map(|(source, target, p)| LinkRecord {
                source,
                target,
                p: *p,
            })
            .collect();
        links.sort_by_key(|link| (link.source, link.target));

        let document = NodeLinkGraph {
            directed: true,
            nodes,
            links,
        };
        let mut writer = BufWriter::new(File::create(dir.join(GRAPH_FILE))?);
        serde_json::to_writer(&mut writer, &document)?;
        writer.flush()?;

        debug!(
            "Saved {} states and {} transitions to {}",
            self.nodes.len(),
            self.graph.edge_count(),
            dir.display()
        );
        Ok(())
    }

    /// Reads a graph written by [`Self::save`]
    pub fn load(dir: &Path) -> Result<Self, MosaicError> {
        let states_path = dir.join(STATES_FILE);
        let graph_path = dir.join(GRAPH_FILE);
        for path in [&states_path, &graph_path] {
            if !path.exists() {
                return Err(StorageError::MissingFile(path.clone()).into());
            }
        }

        let snapshot: StatesSnapshot =
            bincode::deserialize_from(BufReader::new(File::open(&states_path)?)).map_err(StorageError::from)?;
        let document: NodeLinkGraph =
            serde_json::from_reader(BufReader::new(File::open(&graph_path)?)).map_err(StorageError::from)?;

        let mut graph = Self::new(snapshot.dimensions, snapshot.precision)?;
        graph.next_id = snapshot.next_id;
        for (id, key) in snapshot.bijection {
            if id.0 >= snapshot.next_id {
                return Err(StorageError::Corrupt(format!("state {} beyond id counter {}", id, snapshot.next_id)).into());
            }
            graph.states.insert_or_get(key, id)?;
        }
        for (layer, ids) in snapshot.layers {
            for id in ids {
                graph.layers.insert(layer, id);
            }
        }
        for record in document.nodes {
            if graph.states.key_of(record.id).is_none() {
                return Err(StorageError::Corrupt(format!("state {} missing from the bijection", record.id)).into());
            }
            graph.graph.add_node(record.id);
            graph.nodes.insert(record.id, record.node);
        }
        if graph.nodes.len() != graph.states.len() {
            return Err(StorageError::Corrupt(format!(
                "{} graph nodes for {} interned states",
                graph.nodes.len(),
                graph.states.len()
            ))
            .into());
        }
        for link in document.links {
            graph.require(link.source)?;
            graph.require(link.target)?;
            graph.graph.add_edge(link.source, link.target, link.p);
        }
        graph.needs_export = true;
        Ok(graph)
    }

    fn require(&self, id: StateId) -> Result<(), InvariantViolation> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(InvariantViolation::UnknownState(id))
        }
    }

    fn node_mut(&mut self, id: StateId) -> Result<&mut StateNode, InvariantViolation> {
        self.nodes.get_mut(&id).ok_or(InvariantViolation::UnknownState(id))
    }

    fn undirected_reach(&self, root: StateId) -> HashSet<StateId> {
        let mut seen = HashSet::new();
        if !self.graph.contains_node(root) {
            return seen;
        }
        let mut queue = VecDeque::from([root]);
        seen.insert(root);
        while let Some(node) = queue.pop_front() {
            let neighbours = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .chain(self.graph.neighbors_directed(node, Direction::Incoming));
            for next in neighbours {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

pub(crate) const STATES_FILE: &str = "states.bin";
pub(crate) const GRAPH_FILE: &str = "graph.json";

/// Resolves unset weights to a uniform `1 / n` share
fn export_weights(weights: &[Option<f64>]) -> Vec<f64> {
    let uniform = 1.0 / weights.len() as f64;
    weights.iter().map(|w| w.unwrap_or(uniform)).collect()
}

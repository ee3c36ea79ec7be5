//! Relationship graph store
//!
//! Persistent multi-relationship graph of entities, values, and attributes.
//! Nodes come from fact subjects and objects; each fact contributes one
//! directed edge labeled by its attribute. Re-ingesting an identical fact
//! reinforces the existing edge instead of duplicating it, and nodes that
//! appear in the same turn with an overlapping context tag get a dedicated
//! co-occurrence relation reinforced in both directions.
//!
//! The store is process-wide state shared across turns and owners. All
//! mutating calls funnel through one serialization point - callers hold the
//! store behind a [`SharedGraph`] mutex - so `update`, `save`, and `load`
//! never interleave.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    CO_OCCURRENCE_RELATION, EDGE_INITIAL_WEIGHT, EDGE_REINFORCEMENT,
};
use crate::types::{Fact, Insight};
use crate::validation::{validate_fact, validate_insight, validate_owner_id};

/// Cap on nodes considered by the co-occurrence pass per batch
///
/// Bounds the worst-case pair explosion the same way the retrieval-side
/// co-activation recording does; a turn rarely touches more than a handful
/// of nodes.
const COOCCURRENCE_MAX_NODES: usize = 20;

/// Pluggable label normalization strategy
///
/// Resolving "I" vs "user" vs synonyms to one node is an open alias-merging
/// problem; the store only fixes the seam. The default strategy trims and
/// collapses whitespace and nothing more.
pub trait LabelNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

/// Default normalizer: trim and collapse inner whitespace
#[derive(Debug, Default, Clone)]
pub struct WhitespaceNormalizer;

impl LabelNormalizer for WhitespaceNormalizer {
    fn normalize(&self, raw: &str) -> String {
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Node identity: `(owner_id, normalized_label)`
///
/// Two facts referencing the same label for the same owner resolve to the
/// same node; the graph holds multiple owners' subgraphs but never merges
/// nodes across owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub owner_id: String,
    pub label: String,
}

impl NodeKey {
    pub fn new(owner_id: &str, label: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            label: label.into(),
        }
    }
}

/// Whether a node entered the graph as a fact subject or object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Value,
}

/// Entity or value node
///
/// Attached insights live in a separate non-owning index on the store, not
/// inside the node, so nodes and insights never form reference cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub label: String,
    pub kind: NodeKind,
    pub owner_id: String,
}

/// Edge identity: directed multi-edge keyed by relation within a node pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeKey,
    pub target: NodeKey,
    pub relation_type: String,
}

/// Directed relationship edge with co-occurrence strength
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub relation_type: String,
    pub owner_id: String,

    /// Co-occurrence strength; starts at 1 and grows by a fixed reinforcement
    /// constant on every re-observation
    pub weight: f64,

    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

/// A fact rejected during an update, with its batch index and reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFact {
    pub index: usize,
    pub reason: String,
}

/// Source/target/relation triple for delta reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub source: String,
    pub target: String,
    pub relation_type: String,
}

/// What one update call did to the graph, for observability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDelta {
    pub owner_id: String,
    pub nodes_added: Vec<String>,
    pub edges_added: Vec<EdgeRef>,
    pub edges_reinforced: Vec<EdgeRef>,
    /// Number of (insight, node) attachments performed
    pub insights_attached: usize,
    pub rejected: Vec<RejectedFact>,
}

impl GraphDelta {
    fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            ..Default::default()
        }
    }

    /// True when the update changed nothing and rejected nothing
    pub fn is_empty(&self) -> bool {
        self.nodes_added.is_empty()
            && self.edges_added.is_empty()
            && self.edges_reinforced.is_empty()
            && self.insights_attached == 0
            && self.rejected.is_empty()
    }
}

/// Node/edge/insight counts - cheap observability snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub insight_count: usize,
}

/// The single-writer handle the coordinator shares across turns
pub type SharedGraph = Arc<parking_lot::Mutex<GraphStore>>;

/// Multi-relationship graph store
pub struct GraphStore {
    pub(crate) nodes: HashMap<NodeKey, Node>,
    pub(crate) edges: BTreeMap<EdgeKey, Edge>,

    /// Undirected adjacency over directed edges, for breadth-limited
    /// traversal; only ever links nodes of the same owner
    pub(crate) adjacency: HashMap<NodeKey, BTreeSet<NodeKey>>,

    /// Shared insight storage; nodes reference insights by id
    pub(crate) insights: HashMap<Uuid, Insight>,

    /// Non-owning attachment index: node -> ordered insight ids
    pub(crate) attached: HashMap<NodeKey, Vec<Uuid>>,

    normalizer: Arc<dyn LabelNormalizer>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create an empty graph with the default label normalizer
    pub fn new() -> Self {
        Self::with_normalizer(Arc::new(WhitespaceNormalizer))
    }

    /// Create an empty graph with a custom label normalization strategy
    pub fn with_normalizer(normalizer: Arc<dyn LabelNormalizer>) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: BTreeMap::new(),
            adjacency: HashMap::new(),
            insights: HashMap::new(),
            attached: HashMap::new(),
            normalizer,
        }
    }

    pub(crate) fn from_parts(
        nodes: HashMap<NodeKey, Node>,
        edges: BTreeMap<EdgeKey, Edge>,
        insights: HashMap<Uuid, Insight>,
        attached: HashMap<NodeKey, Vec<Uuid>>,
    ) -> Self {
        let mut adjacency: HashMap<NodeKey, BTreeSet<NodeKey>> = HashMap::new();
        for key in edges.keys() {
            adjacency
                .entry(key.source.clone())
                .or_default()
                .insert(key.target.clone());
            adjacency
                .entry(key.target.clone())
                .or_default()
                .insert(key.source.clone());
        }
        Self {
            nodes,
            edges,
            adjacency,
            insights,
            attached,
            normalizer: Arc::new(WhitespaceNormalizer),
        }
    }

    /// Fold a batch of facts and insights into the graph
    ///
    /// Malformed facts are rejected individually into the delta, never
    /// failing the batch. The update is planned first as a pure mutation
    /// list (the only fallible phase), then applied infallibly, so an
    /// interrupted plan leaves the graph untouched - partial node creation
    /// without matching edges is not a persistable state.
    pub fn update(
        &mut self,
        facts: &[Fact],
        insights: &[Insight],
        owner_id: &str,
    ) -> Result<GraphDelta> {
        validate_owner_id(owner_id).map_err(|e| anyhow!("invalid owner_id: {e}"))?;

        let mut delta = GraphDelta::new(owner_id);
        let now = Utc::now();

        // --- Planning phase: nothing below touches self ---

        // New nodes in first-seen order, existing Value nodes to promote,
        // direct fact edges (each occurrence reinforces), and the tag sets
        // seen per node this batch.
        let mut planned_nodes: Vec<(NodeKey, NodeKind)> = Vec::new();
        let mut planned_set: HashSet<NodeKey> = HashSet::new();
        let mut promote_to_entity: Vec<NodeKey> = Vec::new();
        let mut fact_edges: Vec<EdgeKey> = Vec::new();
        let mut touched: Vec<NodeKey> = Vec::new();
        let mut touched_set: HashSet<NodeKey> = HashSet::new();
        let mut node_tags: HashMap<NodeKey, HashSet<String>> = HashMap::new();

        fn note_node(
            store: &GraphStore,
            planned_nodes: &mut Vec<(NodeKey, NodeKind)>,
            planned_set: &mut HashSet<NodeKey>,
            promote: &mut Vec<NodeKey>,
            key: &NodeKey,
            kind: NodeKind,
        ) {
            match store.nodes.get(key) {
                Some(existing) => {
                    // A label first seen as an object can later show up as a
                    // subject; promote it, never the other way around.
                    if existing.kind == NodeKind::Value
                        && kind == NodeKind::Entity
                        && !promote.contains(key)
                    {
                        promote.push(key.clone());
                    }
                }
                None => {
                    if planned_set.insert(key.clone()) {
                        planned_nodes.push((key.clone(), kind));
                    } else if kind == NodeKind::Entity {
                        // Planned earlier in this batch as a Value
                        for (planned_key, planned_kind) in planned_nodes.iter_mut() {
                            if planned_key == key {
                                *planned_kind = NodeKind::Entity;
                            }
                        }
                    }
                }
            }
        }

        for (index, fact) in facts.iter().enumerate() {
            if let Err(e) = validate_fact(fact) {
                delta.rejected.push(RejectedFact {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
            if fact.owner_id != owner_id {
                delta.rejected.push(RejectedFact {
                    index,
                    reason: format!(
                        "fact owner '{}' does not match update owner '{}'",
                        fact.owner_id, owner_id
                    ),
                });
                continue;
            }

            let subject_label = self.normalizer.normalize(&fact.entity);
            if subject_label.is_empty() {
                delta.rejected.push(RejectedFact {
                    index,
                    reason: "entity empty after normalization".to_string(),
                });
                continue;
            }
            let subject = NodeKey::new(owner_id, subject_label.clone());
            note_node(
                self,
                &mut planned_nodes,
                &mut planned_set,
                &mut promote_to_entity,
                &subject,
                NodeKind::Entity,
            );
            if touched_set.insert(subject.clone()) {
                touched.push(subject.clone());
            }

            let tags: HashSet<String> = fact
                .context_tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            node_tags
                .entry(subject.clone())
                .or_default()
                .extend(tags.iter().cloned());

            let object_label = self.normalizer.normalize(&fact.value);
            if !object_label.is_empty() && object_label != subject_label {
                let object = NodeKey::new(owner_id, object_label);
                note_node(
                    self,
                    &mut planned_nodes,
                    &mut planned_set,
                    &mut promote_to_entity,
                    &object,
                    NodeKind::Value,
                );
                if touched_set.insert(object.clone()) {
                    touched.push(object.clone());
                }
                node_tags
                    .entry(object.clone())
                    .or_default()
                    .extend(tags.iter().cloned());

                fact_edges.push(EdgeKey {
                    source: subject,
                    target: object,
                    relation_type: fact.attribute.trim().to_string(),
                });
            }
        }

        // Co-occurrence pass: every unordered pair of touched nodes that
        // shares at least one context tag, and is not already linked by a
        // direct fact edge from this batch, gets the co_occurrence relation
        // reinforced in both directions. This is what lets later multi-hop
        // association queries cross from a person to a topic to a related
        // person with no direct fact between them.
        let direct_pairs: HashSet<(NodeKey, NodeKey)> = fact_edges
            .iter()
            .flat_map(|e| {
                [
                    (e.source.clone(), e.target.clone()),
                    (e.target.clone(), e.source.clone()),
                ]
            })
            .collect();
        let mut co_edges: Vec<EdgeKey> = Vec::new();
        let co_candidates: &[NodeKey] = if touched.len() > COOCCURRENCE_MAX_NODES {
            tracing::debug!(
                touched = touched.len(),
                cap = COOCCURRENCE_MAX_NODES,
                "co-occurrence pass truncated to first {} nodes",
                COOCCURRENCE_MAX_NODES
            );
            &touched[..COOCCURRENCE_MAX_NODES]
        } else {
            &touched
        };
        for i in 0..co_candidates.len() {
            for j in (i + 1)..co_candidates.len() {
                let a = &co_candidates[i];
                let b = &co_candidates[j];
                if direct_pairs.contains(&(a.clone(), b.clone())) {
                    continue;
                }
                let share_tag = match (node_tags.get(a), node_tags.get(b)) {
                    (Some(ta), Some(tb)) => !ta.is_disjoint(tb),
                    _ => false,
                };
                if share_tag {
                    co_edges.push(EdgeKey {
                        source: a.clone(),
                        target: b.clone(),
                        relation_type: CO_OCCURRENCE_RELATION.to_string(),
                    });
                    co_edges.push(EdgeKey {
                        source: b.clone(),
                        target: a.clone(),
                        relation_type: CO_OCCURRENCE_RELATION.to_string(),
                    });
                }
            }
        }

        // --- Apply phase: infallible from here on ---

        for (key, kind) in planned_nodes {
            self.nodes.insert(
                key.clone(),
                Node {
                    label: key.label.clone(),
                    kind,
                    owner_id: key.owner_id.clone(),
                },
            );
            delta.nodes_added.push(key.label);
        }
        for key in promote_to_entity {
            if let Some(node) = self.nodes.get_mut(&key) {
                node.kind = NodeKind::Entity;
            }
        }

        let mut created_this_batch: HashSet<EdgeKey> = HashSet::new();
        let mut reinforced_this_batch: HashSet<EdgeKey> = HashSet::new();
        for key in fact_edges.into_iter().chain(co_edges.into_iter()) {
            let edge_ref = EdgeRef {
                source: key.source.label.clone(),
                target: key.target.label.clone(),
                relation_type: key.relation_type.clone(),
            };
            match self.edges.entry(key.clone()) {
                std::collections::btree_map::Entry::Occupied(mut occupied) => {
                    let edge = occupied.get_mut();
                    edge.weight += EDGE_REINFORCEMENT;
                    edge.last_reinforced_at = now;
                    if !created_this_batch.contains(&key)
                        && reinforced_this_batch.insert(key.clone())
                    {
                        delta.edges_reinforced.push(edge_ref);
                    }
                }
                std::collections::btree_map::Entry::Vacant(vacant) => {
                    vacant.insert(Edge {
                        relation_type: key.relation_type.clone(),
                        owner_id: owner_id.to_string(),
                        weight: EDGE_INITIAL_WEIGHT,
                        created_at: now,
                        last_reinforced_at: now,
                    });
                    self.adjacency
                        .entry(key.source.clone())
                        .or_default()
                        .insert(key.target.clone());
                    self.adjacency
                        .entry(key.target.clone())
                        .or_default()
                        .insert(key.source.clone());
                    created_this_batch.insert(key);
                    delta.edges_added.push(edge_ref);
                }
            }
        }

        // Insight attachment: only to nodes referenced by the insight's own
        // source facts. Node keys are derived from the fact identity tuple,
        // so insights over facts from earlier turns still land on the right
        // nodes if those facts were ever ingested.
        for insight in insights {
            if let Err(e) = validate_insight(insight) {
                tracing::warn!(owner_id, error = %e, "dropping malformed insight");
                continue;
            }
            if insight.owner_id != owner_id {
                tracing::warn!(
                    owner_id,
                    insight_owner = %insight.owner_id,
                    "dropping insight with mismatched owner"
                );
                continue;
            }

            let mut targets: Vec<NodeKey> = Vec::new();
            for fact_id in &insight.source_fact_ids {
                if fact_id.owner_id != owner_id {
                    continue;
                }
                let subject = NodeKey::new(owner_id, self.normalizer.normalize(&fact_id.entity));
                let object = NodeKey::new(owner_id, self.normalizer.normalize(&fact_id.value));
                for key in [subject, object] {
                    if !key.label.is_empty()
                        && self.nodes.contains_key(&key)
                        && !targets.contains(&key)
                    {
                        targets.push(key);
                    }
                }
            }
            if targets.is_empty() {
                continue;
            }

            self.insights.entry(insight.id).or_insert_with(|| insight.clone());
            for key in targets {
                let list = self.attached.entry(key).or_default();
                if !list.contains(&insight.id) {
                    list.push(insight.id);
                    delta.insights_attached += 1;
                }
            }
        }

        if !delta.is_empty() {
            tracing::debug!(
                owner_id,
                nodes_added = delta.nodes_added.len(),
                edges_added = delta.edges_added.len(),
                edges_reinforced = delta.edges_reinforced.len(),
                insights_attached = delta.insights_attached,
                rejected = delta.rejected.len(),
                "graph updated"
            );
        }
        Ok(delta)
    }

    /// Breadth-limited multi-hop traversal within one owner's subgraph
    ///
    /// Follows edges in either direction, returns reached nodes in BFS order,
    /// excluding the start node. Unknown labels return an empty result.
    pub fn neighbors(&self, owner_id: &str, label: &str, max_hops: usize) -> Vec<Node> {
        let start = NodeKey::new(owner_id, self.normalizer.normalize(label));
        if max_hops == 0 || !self.nodes.contains_key(&start) {
            return Vec::new();
        }

        let mut visited: HashSet<NodeKey> = HashSet::new();
        visited.insert(start.clone());
        let mut frontier = vec![start];
        let mut reached: Vec<Node> = Vec::new();

        for _ in 0..max_hops {
            let mut next_frontier = Vec::new();
            for key in &frontier {
                let Some(adjacent) = self.adjacency.get(key) else {
                    continue;
                };
                for neighbor in adjacent {
                    if neighbor.owner_id != owner_id {
                        continue;
                    }
                    if visited.insert(neighbor.clone()) {
                        if let Some(node) = self.nodes.get(neighbor) {
                            reached.push(node.clone());
                        }
                        next_frontier.push(neighbor.clone());
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        reached
    }

    /// Look up a node by owner and raw label
    pub fn node(&self, owner_id: &str, label: &str) -> Option<&Node> {
        let key = NodeKey::new(owner_id, self.normalizer.normalize(label));
        self.nodes.get(&key)
    }

    /// Weight of a specific directed edge, if it exists
    pub fn edge_weight(
        &self,
        owner_id: &str,
        source: &str,
        target: &str,
        relation_type: &str,
    ) -> Option<f64> {
        let key = EdgeKey {
            source: NodeKey::new(owner_id, self.normalizer.normalize(source)),
            target: NodeKey::new(owner_id, self.normalizer.normalize(target)),
            relation_type: relation_type.to_string(),
        };
        self.edges.get(&key).map(|e| e.weight)
    }

    /// Insights attached to a node, in attachment order
    pub fn attached_insights(&self, owner_id: &str, label: &str) -> Vec<&Insight> {
        let key = NodeKey::new(owner_id, self.normalizer.normalize(label));
        self.attached
            .get(&key)
            .map(|ids| ids.iter().filter_map(|id| self.insights.get(id)).collect())
            .unwrap_or_default()
    }

    /// Node count, optionally filtered to one owner
    pub fn node_count(&self, owner_id: Option<&str>) -> usize {
        match owner_id {
            None => self.nodes.len(),
            Some(owner) => self.nodes.keys().filter(|k| k.owner_id == owner).count(),
        }
    }

    /// Edge count, optionally filtered to one owner
    pub fn edge_count(&self, owner_id: Option<&str>) -> usize {
        match owner_id {
            None => self.edges.len(),
            Some(owner) => self
                .edges
                .values()
                .filter(|e| e.owner_id == owner)
                .count(),
        }
    }

    /// Graph statistics snapshot
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            insight_count: self.insights.len(),
        }
    }

    /// Serialize to the node-link JSON form
    pub fn to_node_link_json(&self) -> Result<String> {
        crate::interchange::node_link::to_json(self)
    }

    /// Parse a graph from the node-link JSON form
    pub fn from_node_link_json(json: &str) -> Result<Self> {
        crate::interchange::node_link::from_json(json)
    }

    /// Serialize to the portable GraphML form
    pub fn to_graphml(&self) -> String {
        crate::interchange::graphml::to_graphml(self)
    }

    /// Parse a graph from the portable GraphML form
    pub fn from_graphml(xml: &str) -> Result<Self> {
        crate::interchange::graphml::from_graphml(xml)
    }

    /// Persist both serialization forms under `dir`
    ///
    /// Writes `graph.json` (node-link, the primary load format) and
    /// `graph.graphml` (portable export) via temp file + atomic rename.
    /// Callers hold the store's mutex for the duration, so a save never
    /// interleaves with an update. I/O failure here is fatal to the
    /// operation and surfaced - a corrupted or unwritten graph must not be
    /// silently accepted.
    pub fn save(&self, dir: &std::path::Path) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating graph directory {}", dir.display()))?;

        let json_path = dir.join("graph.json");
        let graphml_path = dir.join("graph.graphml");

        write_atomic(&json_path, self.to_node_link_json()?.as_bytes())?;
        write_atomic(&graphml_path, self.to_graphml().as_bytes())?;

        tracing::info!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            path = %dir.display(),
            "graph checkpoint written"
        );
        Ok((json_path, graphml_path))
    }

    /// Load a graph previously written by [`GraphStore::save`]
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        let json_path = dir.join("graph.json");
        let data = std::fs::read_to_string(&json_path)
            .with_context(|| format!("reading graph from {}", json_path.display()))?;
        let store = Self::from_node_link_json(&data)?;
        tracing::info!(
            nodes = store.nodes.len(),
            edges = store.edges.len(),
            insights = store.insights.len(),
            "graph loaded"
        );
        Ok(store)
    }
}

/// Write bytes to `path` via a temp file in the same directory plus rename,
/// so readers never observe a half-written checkpoint
fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

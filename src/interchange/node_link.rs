//! Node-link JSON serialization
//!
//! Schema: `{directed, multigraph, nodes[], links[], insights[]}` where each
//! node carries its owner, kind, and ordered attached-insight ids; links
//! carry relation type, owner, weight, and both timestamps; and the shared
//! insight records live once in a top-level array. `load(save(G))` is
//! graph-isomorphic to `G` with identical attributes and weights.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{Edge, EdgeKey, GraphStore, Node, NodeKey, NodeKind};
use crate::types::Insight;

/// Top-level node-link document
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeLinkDocument {
    pub directed: bool,
    pub multigraph: bool,
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
    /// Shared insight storage; nodes reference these by id
    #[serde(default)]
    pub insights: Vec<Insight>,
}

/// One graph node
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node label; unique per owner, not globally
    pub id: String,
    pub owner_id: String,
    pub kind: NodeKind,
    /// Ordered attached-insight ids
    #[serde(default)]
    pub insights: Vec<Uuid>,
}

/// One directed edge
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub owner_id: String,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

/// Serialize a graph store to the node-link JSON form
pub fn to_json(store: &GraphStore) -> Result<String> {
    // Deterministic output: nodes sorted by key, edges already in key order
    let mut node_keys: Vec<&NodeKey> = store.nodes.keys().collect();
    node_keys.sort();

    let nodes: Vec<NodeRecord> = node_keys
        .iter()
        .map(|&key| {
            let node = &store.nodes[key];
            NodeRecord {
                id: node.label.clone(),
                owner_id: node.owner_id.clone(),
                kind: node.kind,
                insights: store.attached.get(key).cloned().unwrap_or_default(),
            }
        })
        .collect();

    let links: Vec<LinkRecord> = store
        .edges
        .iter()
        .map(|(key, edge)| LinkRecord {
            source: key.source.label.clone(),
            target: key.target.label.clone(),
            relation_type: edge.relation_type.clone(),
            owner_id: edge.owner_id.clone(),
            weight: edge.weight,
            created_at: edge.created_at,
            last_reinforced_at: edge.last_reinforced_at,
        })
        .collect();

    let mut insights: Vec<Insight> = store.insights.values().cloned().collect();
    insights.sort_by_key(|i| i.id);

    let document = NodeLinkDocument {
        directed: true,
        multigraph: true,
        nodes,
        links,
        insights,
    };
    serde_json::to_string_pretty(&document).context("serializing node-link document")
}

/// Reconstruct a graph store from the node-link JSON form
pub fn from_json(json: &str) -> Result<GraphStore> {
    let document: NodeLinkDocument =
        serde_json::from_str(json).context("parsing node-link document")?;
    if !document.directed {
        bail!("node-link document is not a directed graph");
    }

    let insight_index: HashMap<Uuid, Insight> = document
        .insights
        .into_iter()
        .map(|i| (i.id, i))
        .collect();

    let mut nodes: HashMap<NodeKey, Node> = HashMap::new();
    let mut attached: HashMap<NodeKey, Vec<Uuid>> = HashMap::new();
    for record in document.nodes {
        let key = NodeKey::new(&record.owner_id, record.id.clone());
        if record.id.is_empty() {
            bail!("node with empty label for owner '{}'", record.owner_id);
        }
        let referenced: Vec<Uuid> = record
            .insights
            .into_iter()
            .filter(|id| {
                let known = insight_index.contains_key(id);
                if !known {
                    tracing::warn!(insight_id = %id, "node references unknown insight; dropping");
                }
                known
            })
            .collect();
        if !referenced.is_empty() {
            attached.insert(key.clone(), referenced);
        }
        nodes.insert(
            key,
            Node {
                label: record.id,
                kind: record.kind,
                owner_id: record.owner_id,
            },
        );
    }

    let mut edges: BTreeMap<EdgeKey, Edge> = BTreeMap::new();
    for record in document.links {
        let source = NodeKey::new(&record.owner_id, record.source.clone());
        let target = NodeKey::new(&record.owner_id, record.target.clone());
        if !nodes.contains_key(&source) || !nodes.contains_key(&target) {
            bail!(
                "link {} -[{}]-> {} references a missing node",
                record.source,
                record.relation_type,
                record.target
            );
        }
        edges.insert(
            EdgeKey {
                source,
                target,
                relation_type: record.relation_type.clone(),
            },
            Edge {
                relation_type: record.relation_type,
                owner_id: record.owner_id,
                weight: record.weight,
                created_at: record.created_at,
                last_reinforced_at: record.last_reinforced_at,
            },
        );
    }

    // Keep only insights some node actually references
    let referenced: std::collections::HashSet<Uuid> =
        attached.values().flatten().copied().collect();
    let insights: HashMap<Uuid, Insight> = insight_index
        .into_iter()
        .filter(|(id, _)| referenced.contains(id))
        .collect();

    Ok(GraphStore::from_parts(nodes, edges, insights, attached))
}

//! GraphML serialization
//!
//! Portable graph-exchange form for external tooling. The writer emits a
//! strict one-element-per-line document with declared attribute keys; the
//! parser reads exactly that shape back. Attached insights ride along as a
//! JSON-encoded node attribute so the round trip preserves them losslessly.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::graph::{Edge, EdgeKey, GraphStore, Node, NodeKey, NodeKind};
use crate::types::Insight;

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

/// Serialize a graph store to GraphML
pub fn to_graphml(store: &GraphStore) -> String {
    let mut node_keys: Vec<&NodeKey> = store.nodes.keys().collect();
    node_keys.sort();
    let id_of: HashMap<&NodeKey, String> = node_keys
        .iter()
        .enumerate()
        .map(|(i, key)| (*key, format!("n{i}")))
        .collect();

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(out, "<graphml xmlns=\"{GRAPHML_NS}\">");
    for (id, target, ty) in [
        ("label", "node", "string"),
        ("owner_id", "node", "string"),
        ("kind", "node", "string"),
        ("insights", "node", "string"),
        ("relation_type", "edge", "string"),
        ("edge_owner_id", "edge", "string"),
        ("weight", "edge", "double"),
        ("created_at", "edge", "string"),
        ("last_reinforced_at", "edge", "string"),
    ] {
        let _ = writeln!(
            out,
            "  <key id=\"{id}\" for=\"{target}\" attr.name=\"{id}\" attr.type=\"{ty}\"/>"
        );
    }
    out.push_str("  <graph edgedefault=\"directed\">\n");

    for key in &node_keys {
        let node = &store.nodes[*key];
        let _ = writeln!(out, "    <node id=\"{}\">", id_of[*key]);
        let _ = writeln!(out, "      <data key=\"label\">{}</data>", escape(&node.label));
        let _ = writeln!(
            out,
            "      <data key=\"owner_id\">{}</data>",
            escape(&node.owner_id)
        );
        let kind = match node.kind {
            NodeKind::Entity => "entity",
            NodeKind::Value => "value",
        };
        let _ = writeln!(out, "      <data key=\"kind\">{kind}</data>");
        if let Some(ids) = store.attached.get(*key) {
            let records: Vec<&Insight> =
                ids.iter().filter_map(|id| store.insights.get(id)).collect();
            if !records.is_empty() {
                // serde_json emits single-line JSON, which keeps the
                // one-element-per-line contract intact
                let json = serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string());
                let _ = writeln!(out, "      <data key=\"insights\">{}</data>", escape(&json));
            }
        }
        out.push_str("    </node>\n");
    }

    for (key, edge) in &store.edges {
        let _ = writeln!(
            out,
            "    <edge source=\"{}\" target=\"{}\">",
            id_of[&key.source], id_of[&key.target]
        );
        let _ = writeln!(
            out,
            "      <data key=\"relation_type\">{}</data>",
            escape(&edge.relation_type)
        );
        let _ = writeln!(
            out,
            "      <data key=\"edge_owner_id\">{}</data>",
            escape(&edge.owner_id)
        );
        let _ = writeln!(out, "      <data key=\"weight\">{}</data>", edge.weight);
        let _ = writeln!(
            out,
            "      <data key=\"created_at\">{}</data>",
            edge.created_at.to_rfc3339()
        );
        let _ = writeln!(
            out,
            "      <data key=\"last_reinforced_at\">{}</data>",
            edge.last_reinforced_at.to_rfc3339()
        );
        out.push_str("    </edge>\n");
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

/// Reconstruct a graph store from GraphML written by [`to_graphml`]
pub fn from_graphml(xml: &str) -> Result<GraphStore> {
    let mut nodes: HashMap<NodeKey, Node> = HashMap::new();
    let mut attached: HashMap<NodeKey, Vec<Uuid>> = HashMap::new();
    let mut insights: HashMap<Uuid, Insight> = HashMap::new();
    let mut edges: BTreeMap<EdgeKey, Edge> = BTreeMap::new();
    let mut key_of_id: HashMap<String, NodeKey> = HashMap::new();

    enum Element {
        None,
        Node { id: String },
        Edge { source: String, target: String },
    }
    let mut current = Element::None;
    let mut data: HashMap<String, String> = HashMap::new();

    for raw_line in xml.lines() {
        let line = raw_line.trim();
        if let Some(rest) = line.strip_prefix("<node ") {
            let id = attr(rest, "id").ok_or_else(|| anyhow!("node element without id"))?;
            current = Element::Node { id };
            data.clear();
        } else if let Some(rest) = line.strip_prefix("<edge ") {
            let source = attr(rest, "source").ok_or_else(|| anyhow!("edge without source"))?;
            let target = attr(rest, "target").ok_or_else(|| anyhow!("edge without target"))?;
            current = Element::Edge { source, target };
            data.clear();
        } else if line.starts_with("<data ") {
            let key = attr(line, "key").ok_or_else(|| anyhow!("data element without key"))?;
            let value = line
                .split_once('>')
                .and_then(|(_, rest)| rest.strip_suffix("</data>"))
                .ok_or_else(|| anyhow!("malformed data element: {line}"))?;
            data.insert(key, unescape(value));
        } else if line == "</node>" {
            let Element::Node { id } = std::mem::replace(&mut current, Element::None) else {
                bail!("unmatched </node>");
            };
            let label = data
                .remove("label")
                .ok_or_else(|| anyhow!("node {id} missing label"))?;
            let owner_id = data
                .remove("owner_id")
                .ok_or_else(|| anyhow!("node {id} missing owner_id"))?;
            let kind = match data.remove("kind").as_deref() {
                Some("entity") => NodeKind::Entity,
                Some("value") => NodeKind::Value,
                other => bail!("node {id} has unknown kind {other:?}"),
            };
            let key = NodeKey::new(&owner_id, label.clone());
            if let Some(json) = data.remove("insights") {
                let records: Vec<Insight> =
                    serde_json::from_str(&json).context("parsing attached insights")?;
                let ids: Vec<Uuid> = records.iter().map(|i| i.id).collect();
                for record in records {
                    insights.entry(record.id).or_insert(record);
                }
                attached.insert(key.clone(), ids);
            }
            nodes.insert(
                key.clone(),
                Node {
                    label,
                    kind,
                    owner_id,
                },
            );
            key_of_id.insert(id, key);
            data.clear();
        } else if line == "</edge>" {
            let Element::Edge { source, target } = std::mem::replace(&mut current, Element::None)
            else {
                bail!("unmatched </edge>");
            };
            let source_key = key_of_id
                .get(&source)
                .ok_or_else(|| anyhow!("edge references unknown node {source}"))?
                .clone();
            let target_key = key_of_id
                .get(&target)
                .ok_or_else(|| anyhow!("edge references unknown node {target}"))?
                .clone();
            let relation_type = data
                .remove("relation_type")
                .ok_or_else(|| anyhow!("edge missing relation_type"))?;
            let owner_id = data
                .remove("edge_owner_id")
                .ok_or_else(|| anyhow!("edge missing owner_id"))?;
            let weight: f64 = data
                .remove("weight")
                .ok_or_else(|| anyhow!("edge missing weight"))?
                .parse()
                .context("parsing edge weight")?;
            let created_at = parse_timestamp(
                data.remove("created_at")
                    .ok_or_else(|| anyhow!("edge missing created_at"))?,
            )?;
            let last_reinforced_at = parse_timestamp(
                data.remove("last_reinforced_at")
                    .ok_or_else(|| anyhow!("edge missing last_reinforced_at"))?,
            )?;
            edges.insert(
                EdgeKey {
                    source: source_key,
                    target: target_key,
                    relation_type: relation_type.clone(),
                },
                Edge {
                    relation_type,
                    owner_id,
                    weight,
                    created_at,
                    last_reinforced_at,
                },
            );
            data.clear();
        }
        // Declaration, key definitions, graph open/close: nothing to extract
    }

    Ok(GraphStore::from_parts(nodes, edges, insights, attached))
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("parsing timestamp '{value}'"))
}

/// Extract an attribute value from an element fragment: `id="..."`
fn attr(fragment: &str, name: &str) -> Option<String> {
    let marker = format!("{name}=\"");
    let start = fragment.find(&marker)? + marker.len();
    let end = fragment[start..].find('"')? + start;
    Some(unescape(&fragment[start..end]))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&#10;", "\n")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        let text = "a<b>&\"quoted\"&'apos'\nnewline";
        assert_eq!(unescape(&escape(text)), text);
    }

    #[test]
    fn test_attr_extraction() {
        assert_eq!(attr("id=\"n0\">", "id"), Some("n0".to_string()));
        assert_eq!(
            attr("source=\"n0\" target=\"n1\">", "target"),
            Some("n1".to_string())
        );
        assert_eq!(attr("id=\"n0\">", "missing"), None);
    }
}

//! Graph query engine: the validated corpus graph and depth-bounded neighborhoods around one node.
use petgraph::{graph::NodeIndex, Directed, Graph};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
};

use crate::{properties::DocId, query::CorpusSnapshot};

pub const TAG_NODE_PREFIX: &str = "tags";

/// Graph node identity. Serializes as the bare document id, or as the `tags/{tag}` string of a tag
/// pseudo-node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    Document(DocId),
    Tag(String),
}

impl NodeId {
    pub fn tag(tag: &str) -> NodeId {
        NodeId::Tag(format!("{TAG_NODE_PREFIX}/{tag}"))
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, NodeId::Tag(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeId::Document(id) => write!(f, "{id}"),
            NodeId::Tag(tag) => write!(f, "{tag}"),
        }
    }
}

impl From<DocId> for NodeId {
    fn from(id: DocId) -> Self {
        NodeId::Document(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Document,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub title: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

impl GraphNode {
    /// A node for `id` built without corpus data. Document nodes carry the id as their title and
    /// an empty slug until a caller fills them in.
    pub fn detached(id: &NodeId) -> GraphNode {
        match id {
            NodeId::Document(doc) => GraphNode {
                id: id.clone(),
                title: doc.to_string(),
                slug: String::new(),
                kind: NodeKind::Document,
            },
            NodeId::Tag(path) => {
                let tag = path
                    .strip_prefix(TAG_NODE_PREFIX)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .unwrap_or(path);
                GraphNode {
                    id: id.clone(),
                    title: format!("#{tag}"),
                    slug: path.clone(),
                    kind: NodeKind::Tag,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
}

/// `{nodes, links}` as consumed by graph visualizations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkGraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphEdge>,
}

impl LinkGraph {
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|node| &node.id == id)
    }

    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().map(|node| node.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index the graph for traversal. Edge direction is kept; traversal ignores it.
    fn as_petgraph(&self) -> (Graph<usize, (), Directed>, HashMap<&NodeId, NodeIndex>) {
        let mut graph = Graph::with_capacity(self.nodes.len(), self.links.len());
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (position, node) in self.nodes.iter().enumerate() {
            index.insert(&node.id, graph.add_node(position));
        }
        for edge in self.links.iter() {
            if let (Some(source), Some(target)) = (index.get(&edge.source), index.get(&edge.target)) {
                graph.add_edge(*source, *target, ());
            }
        }
        (graph, index)
    }
}

/// Build the full corpus graph from a snapshot. Only live documents become nodes, and only edges
/// between two live, distinct documents survive. With `include_tags`, every distinct tag of a live
/// document becomes a pseudo-node linked from each document carrying it.
pub fn build_graph(snapshot: &CorpusSnapshot, include_tags: bool) -> LinkGraph {
    let live: BTreeMap<DocId, _> = snapshot
        .live_documents()
        .map(|doc| (doc.id, doc))
        .collect();

    let mut nodes: Vec<GraphNode> = live
        .values()
        .map(|doc| GraphNode {
            id: NodeId::Document(doc.id),
            title: doc.title.clone(),
            slug: doc.slug.clone(),
            kind: NodeKind::Document,
        })
        .collect();

    let mut links: BTreeSet<GraphEdge> = snapshot
        .edges
        .iter()
        .filter(|edge| edge.source != edge.target)
        .filter(|edge| live.contains_key(&edge.source) && live.contains_key(&edge.target))
        .map(|edge| GraphEdge {
            source: NodeId::Document(edge.source),
            target: NodeId::Document(edge.target),
        })
        .collect();
    let dropped = snapshot.edges.len() - links.len();
    if dropped > 0 {
        tracing::trace!("[build_graph] dropped {dropped} edge(s) to hidden or repeated targets");
    }

    if include_tags {
        let mut tags = BTreeSet::new();
        for (owner, tag) in snapshot.tags.iter() {
            if live.contains_key(owner) {
                tags.insert(tag.as_str());
                links.insert(GraphEdge {
                    source: NodeId::Document(*owner),
                    target: NodeId::tag(tag),
                });
            }
        }
        nodes.extend(tags.into_iter().map(|tag| GraphNode {
            id: NodeId::tag(tag),
            title: format!("#{tag}"),
            slug: format!("{TAG_NODE_PREFIX}/{tag}"),
            kind: NodeKind::Tag,
        }));
    }

    LinkGraph {
        nodes,
        links: links.into_iter().collect(),
    }
}

/// Nodes within `depth` hops of `focal`, ignoring edge direction, plus the edges among them.
///
/// A negative `depth` returns the whole graph. The focal node is always part of the result: one
/// that is missing from `graph` (a draft, a deleted document, an unknown tag) comes back detached,
/// with no edges. When the result exceeds `max_nodes`, the focal node and all of its direct
/// neighbors are kept regardless; the remaining budget is filled in graph order.
pub fn neighborhood(
    graph: &LinkGraph,
    focal: &NodeId,
    depth: i32,
    max_nodes: Option<usize>,
) -> LinkGraph {
    let (pg, index) = graph.as_petgraph();
    let focal_idx = index.get(focal).copied();

    let mut visited: HashSet<NodeIndex> = match focal_idx {
        _ if depth < 0 => pg.node_indices().collect(),
        Some(idx) => traverse(&pg, idx, depth),
        None => HashSet::new(),
    };
    match focal_idx {
        Some(idx) => {
            visited.insert(idx);
        }
        None => tracing::debug!("[neighborhood] {focal} is not in the graph, returning it detached"),
    }

    if let Some(max) = max_nodes {
        // A detached focal node takes one slot of the budget.
        let budget = max.saturating_sub(usize::from(focal_idx.is_none()));
        if visited.len() > budget {
            let mut keep: HashSet<NodeIndex> = HashSet::new();
            if let Some(idx) = focal_idx {
                keep.insert(idx);
                keep.extend(
                    pg.neighbors_undirected(idx)
                        .filter(|nb| visited.contains(nb)),
                );
            }
            for idx in pg.node_indices() {
                if keep.len() >= budget {
                    break;
                }
                if visited.contains(&idx) {
                    keep.insert(idx);
                }
            }
            tracing::debug!(
                "[neighborhood] truncated {} nodes to {} around {focal}",
                visited.len(),
                keep.len()
            );
            visited = keep;
        }
    }

    let kept: HashSet<&NodeId> = visited
        .iter()
        .map(|idx| &graph.nodes[pg[*idx]].id)
        .collect();
    let mut nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .filter(|node| kept.contains(&node.id))
        .cloned()
        .collect();
    if focal_idx.is_none() {
        nodes.insert(0, GraphNode::detached(focal));
    }
    LinkGraph {
        nodes,
        links: graph
            .links
            .iter()
            .filter(|edge| kept.contains(&edge.source) && kept.contains(&edge.target))
            .cloned()
            .collect(),
    }
}

/// Level-ordered breadth-first walk. `None` in the queue marks the end of a level; popping it
/// spends one unit of depth.
fn traverse(pg: &Graph<usize, (), Directed>, focal: NodeIndex, depth: i32) -> HashSet<NodeIndex> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<Option<NodeIndex>> = VecDeque::from([Some(focal), None]);
    let mut remaining = depth;
    while let Some(entry) = queue.pop_front() {
        match entry {
            None => {
                if remaining <= 0 || queue.is_empty() {
                    break;
                }
                remaining -= 1;
                queue.push_back(None);
            }
            Some(idx) => {
                if !visited.insert(idx) {
                    continue;
                }
                for neighbor in pg.neighbors_undirected(idx) {
                    if !visited.contains(&neighbor) {
                        queue.push_back(Some(neighbor));
                    }
                }
            }
        }
    }
    visited
}

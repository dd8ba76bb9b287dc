//! Linkbase module: the in-memory link store and the read models derived from a corpus snapshot.
//!
//! # Module Organization
//!
//! - [`base`]: [`MemoryLinkStore`], the always-available [`LinkStore`](crate::query::LinkStore)
//! - [`graph`]: the validated corpus graph and neighborhood extraction
//! - [`index`]: the content-index export with its stale fallback
//!
//! ```rust
//! use trellis_core::linkbase::{build_graph, neighborhood, NodeId};
//! use trellis_core::properties::{DocId, Document, EdgeKind, EdgeRecord};
//! use trellis_core::query::CorpusSnapshot;
//!
//! let snapshot = CorpusSnapshot {
//!     documents: vec![Document::new(1, "A", ""), Document::new(2, "B", "")],
//!     edges: vec![EdgeRecord { source: DocId(1), target: DocId(2), kind: EdgeKind::Internal }],
//!     tags: vec![(DocId(1), "project".to_string())],
//! };
//! let graph = build_graph(&snapshot, true);
//! assert_eq!(graph.nodes.len(), 3);
//! let local = neighborhood(&graph, &NodeId::Document(DocId(2)), 0, None);
//! assert_eq!(local.nodes.len(), 1);
//! assert!(local.links.is_empty());
//! ```

mod base;
pub mod graph;
pub mod index;

#[cfg(test)]
mod tests;

pub use base::MemoryLinkStore;
pub use graph::{build_graph, neighborhood, GraphEdge, GraphNode, LinkGraph, NodeId, NodeKind};
pub use index::{
    build_content_index, ContentIndex, ContentIndexEntry, ContentIndexExporter, IndexExport,
};

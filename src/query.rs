use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
};

use crate::{
    links::CorpusSlugs,
    properties::{DocId, Document, DocumentSummary, EdgeKind, EdgeRecord, OutgoingLink, TagCount},
    TrellisError,
};

/// The persisted link graph: documents, their derived edges and their tag sets.
///
/// Edges and tags are never written individually. [`LinkStore::recompute`] replaces everything a
/// document owns in one transaction, so calling it twice with the same input leaves the store
/// unchanged. Navigation reads ([`backlinks`](LinkStore::backlinks),
/// [`forward_links`](LinkStore::forward_links), tag listings) only ever return documents that are
/// published and not deleted; edge rows pointing at hidden documents stay in storage.
///
/// Callers serialize recomputes of the same document. Recomputes of different documents touch
/// disjoint rows.
pub trait LinkStore: Sync {
    /// Insert or replace a document row. Ingestion owns documents; this is its entry point.
    fn upsert_document(
        &self,
        doc: Document,
    ) -> impl Future<Output = Result<(), TrellisError>> + Send;

    fn document(
        &self,
        id: DocId,
    ) -> impl Future<Output = Result<Option<Document>, TrellisError>> + Send;

    /// Replace the outgoing edges and tags of `id`. Only internal and embed links whose target slug
    /// maps to a stored, non-deleted document become edges; duplicates are dropped.
    fn recompute(
        &self,
        id: DocId,
        links: &[OutgoingLink],
        tags: &[String],
    ) -> impl Future<Output = Result<(), TrellisError>> + Send;

    /// Live documents linking to `id`, in id order. Empty when `id` itself is not live.
    fn backlinks(
        &self,
        id: DocId,
    ) -> impl Future<Output = Result<Vec<DocumentSummary>, TrellisError>> + Send;

    /// Live documents `id` links to, in id order. Empty when `id` itself is not live.
    fn forward_links(
        &self,
        id: DocId,
    ) -> impl Future<Output = Result<Vec<DocumentSummary>, TrellisError>> + Send;

    /// Tags owned by `id`, sorted.
    fn tags_of(&self, id: DocId)
        -> impl Future<Output = Result<Vec<String>, TrellisError>> + Send;

    /// Every tag on a live document with its document count, most used first, then by name.
    fn all_tags(&self) -> impl Future<Output = Result<Vec<TagCount>, TrellisError>> + Send;

    fn documents_by_tag(
        &self,
        tag: &str,
    ) -> impl Future<Output = Result<Vec<DocumentSummary>, TrellisError>> + Send;

    /// Slugs of every non-deleted document, in id order.
    fn corpus_slugs(&self) -> impl Future<Output = Result<CorpusSlugs, TrellisError>> + Send;

    /// Everything needed to build the graph or the content index in one read.
    fn snapshot(&self) -> impl Future<Output = Result<CorpusSnapshot, TrellisError>> + Send;
}

/// Keep the links that can become edges, deduplicated by `(target, kind)`, in input order.
pub fn edge_candidates(links: &[OutgoingLink]) -> Vec<(&str, EdgeKind)> {
    let mut seen = BTreeSet::new();
    links
        .iter()
        .filter(|link| link.kind != EdgeKind::External)
        .map(|link| (link.target.as_str(), link.kind))
        .filter(|candidate| seen.insert(*candidate))
        .collect()
}

/// Tags as stored: trimmed, empty ones dropped, deduplicated and sorted.
pub fn normalize_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// A point-in-time copy of the store. Deleted documents are excluded; unpublished ones are kept so
/// consumers can apply their own visibility rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub documents: Vec<Document>,
    pub edges: Vec<EdgeRecord>,
    pub tags: Vec<(DocId, String)>,
}

impl CorpusSnapshot {
    pub fn live_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().filter(|doc| doc.is_live())
    }

    pub fn document_map(&self) -> BTreeMap<DocId, &Document> {
        self.documents.iter().map(|doc| (doc.id, doc)).collect()
    }

    /// Sorted tags per document.
    pub fn tags_by_document(&self) -> BTreeMap<DocId, Vec<String>> {
        let mut tags: BTreeMap<DocId, Vec<String>> = BTreeMap::new();
        for (id, tag) in self.tags.iter() {
            tags.entry(*id).or_default().push(tag.clone());
        }
        for list in tags.values_mut() {
            list.sort();
            list.dedup();
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn candidates_drop_external_and_duplicates() {
        let links = vec![
            OutgoingLink::internal("b"),
            OutgoingLink {
                target: "https://x.org".to_string(),
                kind: EdgeKind::External,
                exists: true,
            },
            OutgoingLink::internal("b"),
            OutgoingLink {
                target: "b".to_string(),
                kind: EdgeKind::Embed,
                exists: true,
            },
        ];
        assert_eq!(
            edge_candidates(&links),
            vec![("b", EdgeKind::Internal), ("b", EdgeKind::Embed)]
        );
    }

    #[test]
    fn tag_normalization() {
        let tags = vec![" b ".to_string(), "a".to_string(), "".to_string(), "b".to_string()];
        assert_eq!(
            normalize_tags(&tags).into_iter().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}

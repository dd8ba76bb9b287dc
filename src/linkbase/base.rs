use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    links::CorpusSlugs,
    properties::{DocId, Document, DocumentSummary, EdgeKind, EdgeRecord, OutgoingLink, TagCount},
    query::{edge_candidates, normalize_tags, CorpusSnapshot, LinkStore},
    TrellisError,
};

#[derive(Debug, Default)]
struct LinkBaseState {
    documents: BTreeMap<DocId, Document>,
    edges: BTreeSet<EdgeRecord>,
    tags: BTreeSet<(DocId, String)>,
}

impl LinkBaseState {
    fn is_live(&self, id: DocId) -> bool {
        self.documents.get(&id).is_some_and(Document::is_live)
    }

    /// Insert `doc`, refusing a live slug already held by another live document.
    fn insert(&mut self, doc: Document) -> Result<(), TrellisError> {
        if !doc.is_deleted {
            let clash = self
                .documents
                .values()
                .find(|other| other.id != doc.id && !other.is_deleted && other.slug == doc.slug);
            if let Some(other) = clash {
                return Err(TrellisError::Store(format!(
                    "slug '{}' already belongs to document {}",
                    doc.slug, other.id
                )));
            }
        }
        self.documents.insert(doc.id, doc);
        Ok(())
    }

    fn live_summaries<I: IntoIterator<Item = DocId>>(&self, ids: I) -> Vec<DocumentSummary> {
        ids.into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.documents.get(&id))
            .filter(|doc| doc.is_live())
            .map(Document::summary)
            .collect()
    }
}

/// In-memory [`LinkStore`]. Holds the whole corpus behind one lock, which also makes every
/// `recompute` trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    state: RwLock<LinkBaseState>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `documents`. Fails on the first live slug held by two live documents.
    pub fn from_documents<I: IntoIterator<Item = Document>>(
        documents: I,
    ) -> Result<Self, TrellisError> {
        let store = MemoryLinkStore::new();
        {
            let mut state = store.state.write();
            for doc in documents {
                state.insert(doc)?;
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().documents.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }
}

impl LinkStore for MemoryLinkStore {
    async fn upsert_document(&self, doc: Document) -> Result<(), TrellisError> {
        self.state.write().insert(doc)
    }

    async fn document(&self, id: DocId) -> Result<Option<Document>, TrellisError> {
        Ok(self.state.read().documents.get(&id).cloned())
    }

    async fn recompute(
        &self,
        id: DocId,
        links: &[OutgoingLink],
        tags: &[String],
    ) -> Result<(), TrellisError> {
        let mut state = self.state.write();
        if !state.documents.contains_key(&id) {
            return Err(TrellisError::NotFound(format!("document {id}")));
        }
        let slug_ids: BTreeMap<&str, DocId> = state
            .documents
            .values()
            .filter(|doc| !doc.is_deleted)
            .map(|doc| (doc.slug.as_str(), doc.id))
            .collect();
        let new_edges: Vec<EdgeRecord> = edge_candidates(links)
            .into_iter()
            .filter_map(|(target, kind)| {
                slug_ids.get(target).map(|target| EdgeRecord {
                    source: id,
                    target: *target,
                    kind,
                })
            })
            .collect();
        let dropped = edge_candidates(links).len() - new_edges.len();
        if dropped > 0 {
            tracing::debug!("[MemoryLinkStore.recompute] {dropped} link(s) of {id} have no target document");
        }

        state.edges.retain(|edge| edge.source != id);
        state.tags.retain(|(owner, _)| *owner != id);
        state.edges.extend(new_edges);
        let owned: Vec<(DocId, String)> =
            normalize_tags(tags).into_iter().map(|tag| (id, tag)).collect();
        state.tags.extend(owned);
        Ok(())
    }

    async fn backlinks(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        let state = self.state.read();
        if !state.is_live(id) {
            return Ok(Vec::new());
        }
        let sources = state
            .edges
            .iter()
            .filter(|edge| edge.target == id)
            .map(|edge| edge.source);
        Ok(state.live_summaries(sources))
    }

    async fn forward_links(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        let state = self.state.read();
        if !state.is_live(id) {
            return Ok(Vec::new());
        }
        let targets = state
            .edges
            .iter()
            .filter(|edge| edge.source == id)
            .map(|edge| edge.target);
        Ok(state.live_summaries(targets))
    }

    async fn tags_of(&self, id: DocId) -> Result<Vec<String>, TrellisError> {
        Ok(self
            .state
            .read()
            .tags
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, tag)| tag.clone())
            .collect())
    }

    async fn all_tags(&self) -> Result<Vec<TagCount>, TrellisError> {
        let state = self.state.read();
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for (owner, tag) in state.tags.iter() {
            if state.is_live(*owner) {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        Ok(tags)
    }

    async fn documents_by_tag(&self, tag: &str) -> Result<Vec<DocumentSummary>, TrellisError> {
        let state = self.state.read();
        let owners = state
            .tags
            .iter()
            .filter(|(_, owned)| owned == tag)
            .map(|(owner, _)| *owner);
        Ok(state.live_summaries(owners))
    }

    async fn corpus_slugs(&self) -> Result<CorpusSlugs, TrellisError> {
        let state = self.state.read();
        Ok(state
            .documents
            .values()
            .filter(|doc| !doc.is_deleted)
            .map(|doc| doc.slug.clone())
            .collect())
    }

    async fn snapshot(&self) -> Result<CorpusSnapshot, TrellisError> {
        let state = self.state.read();
        let documents: Vec<Document> = state
            .documents
            .values()
            .filter(|doc| !doc.is_deleted)
            .cloned()
            .collect();
        let kept: BTreeSet<DocId> = documents.iter().map(|doc| doc.id).collect();
        Ok(CorpusSnapshot {
            edges: state
                .edges
                .iter()
                .filter(|edge| kept.contains(&edge.source))
                .copied()
                .collect(),
            tags: state
                .tags
                .iter()
                .filter(|(owner, _)| kept.contains(owner))
                .cloned()
                .collect(),
            documents,
        })
    }
}

impl MemoryLinkStore {
    /// Edge kinds stored between two documents, mostly for tests and diagnostics.
    pub fn edge_kinds(&self, source: DocId, target: DocId) -> Vec<EdgeKind> {
        self.state
            .read()
            .edges
            .iter()
            .filter(|edge| edge.source == source && edge.target == target)
            .map(|edge| edge.kind)
            .collect()
    }
}

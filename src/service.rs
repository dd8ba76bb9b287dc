//! The link-service surface used by article read/write workflows.
//!
//! [`LinkService`] owns a [`LinkStore`] and the configured pipeline. Writes go through
//! [`LinkService::update_links`] (one document) or [`LinkService::rebuild`] (the whole corpus); every
//! other method is a read.
use std::sync::Arc;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    batch::{BatchReport, BatchRenderer},
    cache::{spawn_cleanup, ContentCache},
    codec::{PipelineOptions, ProcessedDocument, Processor},
    config::{GraphOptions, TrellisConfig},
    linkbase::{build_graph, neighborhood, ContentIndexExporter, IndexExport, LinkGraph, NodeId},
    properties::{DocId, DocumentSummary, TagCount},
    query::LinkStore,
    TrellisError,
};

pub struct LinkService<S: LinkStore> {
    store: S,
    processor: Processor,
    graph: GraphOptions,
    exporter: ContentIndexExporter,
    sweeper: Option<JoinHandle<()>>,
}

impl<S: LinkStore> LinkService<S> {
    pub fn new(store: S, config: &TrellisConfig) -> Self {
        let pipeline = PipelineOptions::new(config.transform.clone(), config.links);
        LinkService {
            store,
            processor: Processor::new(pipeline),
            graph: config.graph,
            exporter: ContentIndexExporter::new(config.index.clone()),
            sweeper: None,
        }
    }

    /// Memoize pipeline runs through a shared cache. The cache may be shared with other services
    /// running different option sets.
    ///
    /// Inside a tokio runtime this also starts a sweep of the cache every
    /// `cache.cleanup_interval_secs`, stopped when the service is dropped.
    pub fn with_cache(
        mut self,
        cache: Arc<ContentCache<ProcessedDocument>>,
        config: &TrellisConfig,
    ) -> Self {
        if let Some(previous) = self.sweeper.take() {
            previous.abort();
        }
        self.sweeper = match Handle::try_current() {
            Ok(_) => Some(spawn_cleanup(cache.clone(), config.cache.cleanup_interval())),
            Err(_) => {
                tracing::debug!("[LinkService] no runtime, content cache sweep not started");
                None
            }
        };
        self.processor = self.processor.clone().with_cache(cache, config.cache.ttl());
        self
    }

    /// Whether a background cache sweep is running for this service.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Run the pipeline over `content` as the body of document `id` and persist the resulting
    /// edges and tags. Links resolve against the slugs currently stored.
    #[tracing::instrument(skip(self, content))]
    pub async fn update_links(
        &self,
        id: DocId,
        content: &str,
    ) -> Result<ProcessedDocument, TrellisError> {
        let doc = self
            .store
            .document(id)
            .await?
            .ok_or_else(|| TrellisError::NotFound(format!("document {id}")))?;
        let corpus = self.store.corpus_slugs().await?;
        let processed = self.processor.process(content, &doc.slug, &corpus)?;
        self.store
            .recompute(id, &processed.links, &processed.tags)
            .await?;
        let broken = processed.links.iter().filter(|link| !link.exists).count();
        if broken > 0 {
            tracing::debug!("[LinkService.update_links] '{}' has {broken} broken link(s)", doc.slug);
        }
        Ok(processed)
    }

    pub async fn get_backlinks(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        self.store.backlinks(id).await
    }

    pub async fn get_forward_links(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        self.store.forward_links(id).await
    }

    pub async fn get_tags(&self, id: DocId) -> Result<Vec<String>, TrellisError> {
        self.store.tags_of(id).await
    }

    pub async fn get_articles_by_tag(&self, tag: &str) -> Result<Vec<DocumentSummary>, TrellisError> {
        self.store.documents_by_tag(tag).await
    }

    pub async fn get_all_tags(&self) -> Result<Vec<TagCount>, TrellisError> {
        self.store.all_tags().await
    }

    /// The full validated corpus graph.
    #[tracing::instrument(skip(self))]
    pub async fn get_graph_data(&self) -> Result<LinkGraph, TrellisError> {
        let snapshot = self.store.snapshot().await?;
        Ok(build_graph(&snapshot, self.graph.include_tags))
    }

    /// The subgraph within `depth` hops of `focal`; a negative depth returns the whole graph. A
    /// focal document outside the graph (unpublished, deleted, isolated from the live set) still
    /// comes back as a single node, titled from the store when the store knows it.
    #[tracing::instrument(skip(self))]
    pub async fn get_neighborhood(
        &self,
        focal: &NodeId,
        depth: i32,
    ) -> Result<LinkGraph, TrellisError> {
        let graph = self.get_graph_data().await?;
        let mut hood = neighborhood(&graph, focal, depth, self.graph.max_nodes);
        if let NodeId::Document(id) = focal {
            if !graph.contains(focal) {
                if let Some(doc) = self.store.document(*id).await? {
                    if let Some(node) = hood.nodes.iter_mut().find(|node| &node.id == focal) {
                        node.title = doc.title;
                        node.slug = doc.slug;
                    }
                }
            }
        }
        Ok(hood)
    }

    /// [`get_neighborhood`](Self::get_neighborhood) at the configured local depth.
    pub async fn get_local_graph(&self, id: DocId) -> Result<LinkGraph, TrellisError> {
        self.get_neighborhood(&NodeId::Document(id), self.graph.local_depth)
            .await
    }

    /// [`get_neighborhood`](Self::get_neighborhood) at the configured corpus-wide depth.
    pub async fn get_global_graph(&self, id: DocId) -> Result<LinkGraph, TrellisError> {
        self.get_neighborhood(&NodeId::Document(id), self.graph.global_depth)
            .await
    }

    /// Regenerate the content index. A failed regeneration serves the last good export, marked
    /// stale.
    #[tracing::instrument(skip(self))]
    pub async fn content_index(&self) -> Result<IndexExport, TrellisError> {
        self.exporter.export(self.store.snapshot().await)
    }

    /// Pre-render every stored document and recompute links and tags from the results. Slugs of
    /// the whole corpus are known before any document resolves its links; recomputes then run one
    /// document at a time.
    #[tracing::instrument(skip(self, renderer))]
    pub async fn rebuild(&self, renderer: &BatchRenderer) -> Result<BatchReport, TrellisError> {
        let snapshot = self.store.snapshot().await?;
        let mut report = renderer.run(snapshot.documents).await?;
        let mut persisted = Vec::with_capacity(report.succeeded.len());
        for (id, processed) in report.succeeded.drain(..) {
            match self
                .store
                .recompute(id, &processed.links, &processed.tags)
                .await
            {
                Ok(()) => persisted.push((id, processed)),
                Err(e) => {
                    tracing::warn!("[LinkService.rebuild] recompute of {id} failed: {e}");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report.succeeded = persisted;
        report.failed.sort();
        tracing::info!(
            "[LinkService.rebuild] {} documents recomputed, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

impl<S: LinkStore> Drop for LinkService<S> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

//! Bulk pre-render over a bounded worker pool.
//!
//! Workers pull documents from one shared queue and run the pipeline on tokio's blocking pool.
//! Transient failures are retried with exponential backoff; anything still failing is reported per
//! document while the rest of the batch carries on. Once the optional deadline has passed, queued
//! documents are reported as skipped rather than failed.
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, thread, time::Duration};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedSender},
    time::{sleep, Instant},
};

use crate::{
    codec::{PipelineOptions, ProcessedDocument, Processor},
    config::{BatchOptions, LinkOptions, TransformOptions},
    event::BatchEvent,
    links::CorpusSlugs,
    properties::{DocId, Document},
    TrellisError,
};

/// Outcome of one batch run. Each list is sorted by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T = ProcessedDocument> {
    pub succeeded: Vec<(DocId, T)>,
    /// Document id and the last error message.
    pub failed: Vec<(DocId, String)>,
    pub skipped: Vec<DocId>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        BatchReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    /// succeeded, failed, skipped
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.succeeded.len(), self.failed.len(), self.skipped.len())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

enum Outcome<T> {
    Rendered(DocId, T),
    Failed(DocId, String),
    Skipped(DocId),
}

#[derive(Clone)]
pub struct BatchRenderer {
    options: BatchOptions,
    processor: Processor,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl BatchRenderer {
    pub fn new(options: BatchOptions, processor: Processor) -> Self {
        BatchRenderer {
            options,
            processor,
            events: None,
        }
    }

    /// A renderer using the lightweight pre-render preset for the given link options.
    pub fn prerender(options: BatchOptions, links: LinkOptions) -> Self {
        let pipeline = PipelineOptions::new(TransformOptions::prerender(), links);
        BatchRenderer::new(options, Processor::new(pipeline))
    }

    pub fn with_events(mut self, tx: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// One worker per `docs_per_worker` queued documents, at least one, capped by both the
    /// available cores and `max_workers`.
    pub fn worker_count(&self, queued: usize) -> usize {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let wanted = (queued / self.options.docs_per_worker.max(1)).max(1);
        wanted.min(cores.min(self.options.max_workers.max(1)))
    }

    /// Pre-render `docs` with the renderer's pipeline. Existence is checked against the slugs of
    /// every non-deleted document in the batch, collected before any document is rendered.
    pub async fn run(&self, docs: Vec<Document>) -> Result<BatchReport, TrellisError> {
        let processor = self.processor.clone();
        self.run_with(docs, move |doc, corpus| {
            processor.process(&doc.content, &doc.slug, corpus)
        })
        .await
    }

    #[tracing::instrument(skip(self, docs, job), fields(docs = docs.len()))]
    pub async fn run_with<T, F>(
        &self,
        docs: Vec<Document>,
        job: F,
    ) -> Result<BatchReport<T>, TrellisError>
    where
        T: Send + 'static,
        F: Fn(&Document, &CorpusSlugs) -> Result<T, TrellisError> + Send + Sync + 'static,
    {
        let total = docs.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }
        let corpus = Arc::new(CorpusSlugs::new(
            docs.iter()
                .filter(|doc| !doc.is_deleted)
                .map(|doc| doc.slug.clone()),
        ));
        let workers = self.worker_count(total);
        self.emit(BatchEvent::Started(total, workers));
        tracing::info!("[BatchRenderer.run] {total} documents on {workers} workers");

        let deadline = self
            .options
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let queue = Arc::new(Mutex::new(VecDeque::from(docs)));
        let job = Arc::new(job);
        let (tx, mut rx) = unbounded_channel::<Outcome<T>>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let corpus = corpus.clone();
            let job = job.clone();
            let tx = tx.clone();
            let renderer = self.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let Some(doc) = queue.lock().pop_front() else {
                        break;
                    };
                    let outcome = if deadline.is_some_and(|at| Instant::now() >= at) {
                        renderer.emit(BatchEvent::Skipped(doc.id));
                        Outcome::Skipped(doc.id)
                    } else {
                        renderer.attempt(doc, &corpus, &job).await
                    };
                    if tx.send(outcome).is_err() {
                        tracing::debug!("[BatchRenderer] worker {worker} lost its collector");
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut report = BatchReport::default();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Outcome::Rendered(id, value) => report.succeeded.push((id, value)),
                Outcome::Failed(id, msg) => report.failed.push((id, msg)),
                Outcome::Skipped(id) => report.skipped.push(id),
            }
        }
        for handle in handles {
            handle.await?;
        }

        report.succeeded.sort_by_key(|(id, _)| *id);
        report.failed.sort();
        report.skipped.sort();
        let (ok, failed, skipped) = report.counts();
        self.emit(BatchEvent::Finished(ok, failed, skipped));
        if failed > 0 || skipped > 0 {
            tracing::warn!(
                "[BatchRenderer.run] {ok} succeeded, {failed} failed, {skipped} skipped"
            );
        } else {
            tracing::info!("[BatchRenderer.run] {ok} succeeded");
        }
        Ok(report)
    }

    /// Run `job` for one document, retrying transient errors. A panicking job surfaces as a
    /// transient [`TrellisError::Worker`].
    async fn attempt<T, F>(&self, doc: Document, corpus: &Arc<CorpusSlugs>, job: &Arc<F>) -> Outcome<T>
    where
        T: Send + 'static,
        F: Fn(&Document, &CorpusSlugs) -> Result<T, TrellisError> + Send + Sync + 'static,
    {
        let id = doc.id;
        let doc = Arc::new(doc);
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let (doc, corpus, job) = (doc.clone(), corpus.clone(), job.clone());
            let result = tokio::task::spawn_blocking(move || job.as_ref()(doc.as_ref(), corpus.as_ref()))
                .await
                .unwrap_or_else(|join_err| Err(join_err.into()));
            match result {
                Ok(value) => {
                    self.emit(BatchEvent::Rendered(id, attempt));
                    return Outcome::Rendered(id, value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!("[BatchRenderer] {id} attempt {attempt} failed, retrying: {e}");
                    self.emit(BatchEvent::Retrying(id, attempt, e.to_string()));
                    sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("[BatchRenderer] {id} failed after {attempt} attempt(s): {e}");
                    self.emit(BatchEvent::Failed(id, e.to_string()));
                    return Outcome::Failed(id, e.to_string());
                }
            }
        }
    }

    /// `backoff_ms`, doubled per previous attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.options.backoff_ms << (attempt - 1).min(10))
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.send(event).map_err(TrellisError::from) {
                tracing::debug!("[BatchRenderer] {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn renderer(options: BatchOptions) -> BatchRenderer {
        BatchRenderer::new(options, Processor::new(PipelineOptions::default()))
    }

    fn quick() -> BatchOptions {
        BatchOptions {
            backoff_ms: 1,
            ..Default::default()
        }
    }

    fn corpus_docs(n: i64) -> Vec<Document> {
        (1..=n)
            .map(|i| {
                let next = if i == n { 1 } else { i + 1 };
                Document::new(i, &format!("Doc {i}"), &format!("Links to [[doc-{next}]] #batch"))
            })
            .collect()
    }

    #[test_log::test]
    fn worker_sizing() {
        let batch = renderer(BatchOptions {
            max_workers: 3,
            docs_per_worker: 10,
            ..Default::default()
        });
        assert_eq!(batch.worker_count(0), 1);
        assert_eq!(batch.worker_count(9), 1);
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(batch.worker_count(25), 2.min(cores));
        assert_eq!(batch.worker_count(10_000), 3.min(cores));
    }

    #[test_log::test]
    fn backoff_doubles() {
        let batch = renderer(BatchOptions {
            backoff_ms: 50,
            ..Default::default()
        });
        assert_eq!(batch.backoff(1), Duration::from_millis(50));
        assert_eq!(batch.backoff(3), Duration::from_millis(200));
    }

    #[test_log::test(tokio::test)]
    async fn renders_against_the_whole_batch() {
        let report = renderer(quick()).run(corpus_docs(20)).await.expect("batch");
        assert_eq!(report.counts(), (20, 0, 0));
        assert!(report.is_clean());
        let ids: Vec<i64> = report.succeeded.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        for (_, doc) in report.succeeded.iter() {
            assert!(doc.links.iter().all(|link| link.exists));
            assert_eq!(doc.tags, vec!["batch"]);
        }
    }

    #[test_log::test(tokio::test)]
    async fn prerender_preset_skips_diagrams() {
        let batch = BatchRenderer::prerender(quick(), LinkOptions::default());
        assert_eq!(batch.processor().options().transform, TransformOptions::prerender());
        let doc = Document::new(1, "Chart", "```mermaid\ngraph TD\n```\n");
        let report = batch.run(vec![doc]).await.expect("batch");
        assert!(!report.succeeded[0].1.has_diagram);
    }

    #[test_log::test(tokio::test)]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let report = renderer(quick())
            .run_with(corpus_docs(1), move |doc, _| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TrellisError::Worker("flaky".to_string()))
                } else {
                    Ok(doc.slug.clone())
                }
            })
            .await
            .expect("batch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.succeeded, vec![(DocId(1), "doc-1".to_string())]);
    }

    #[test_log::test(tokio::test)]
    async fn failures_are_reported_per_document() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let report = renderer(quick())
            .run_with(corpus_docs(4), move |doc, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                match doc.id.0 {
                    2 => Err(TrellisError::Codec("bad input".to_string())),
                    3 => Err(TrellisError::Io("disk".to_string())),
                    _ => Ok(()),
                }
            })
            .await
            .expect("batch");
        assert_eq!(report.counts(), (2, 2, 0));
        assert_eq!(report.failed[0].0, DocId(2));
        assert!(report.failed[0].1.contains("bad input"));
        assert_eq!(report.failed[1].0, DocId(3));
        // 1 + 1 (not transient) + 3 (transient, exhausted) + 1
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test_log::test(tokio::test)]
    async fn panicking_jobs_become_failures() {
        let report = renderer(BatchOptions {
            max_attempts: 2,
            ..quick()
        })
        .run_with(corpus_docs(2), |doc, _| {
            if doc.id.0 == 1 {
                panic!("boom");
            }
            Ok(doc.id.0)
        })
        .await
        .expect("batch");
        assert_eq!(report.succeeded, vec![(DocId(2), 2)]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("panicked"));
    }

    #[test_log::test(tokio::test)]
    async fn elapsed_deadline_skips_the_queue() {
        let (tx, mut rx) = unbounded_channel();
        let report = renderer(BatchOptions {
            deadline_secs: Some(0),
            ..quick()
        })
        .with_events(tx)
        .run(corpus_docs(3))
        .await
        .expect("batch");
        assert_eq!(report.counts(), (0, 0, 3));
        assert_eq!(report.skipped, vec![DocId(1), DocId(2), DocId(3)]);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(BatchEvent::Started(3, _))));
        assert_eq!(events.last(), Some(&BatchEvent::Finished(0, 0, 3)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, BatchEvent::Skipped(_)))
                .count(),
            3
        );
    }

    #[test_log::test(tokio::test)]
    async fn empty_batch() {
        let report = renderer(quick()).run(Vec::new()).await.expect("batch");
        assert_eq!(report.counts(), (0, 0, 0));
    }
}

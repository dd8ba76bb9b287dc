//! Document transformation pipeline.
//!
//! Raw wiki-markup flows through a fixed sequence of stages:
//!
//! 1. [`preprocess`](preprocess::preprocess) - lexical rewrites (comments, callout continuation,
//!    table escapes, wiki-link normalization)
//! 2. [`parse`](ast::parse) - pulldown-cmark events folded into a [`Node`](ast::Node) tree
//! 3. [`transform`](transform::transform) - ordered rewrite passes: wiki-links and embeds, inline
//!    rules (highlight, arrows, tags), link resolution, callouts, diagrams
//! 4. [`render_html`](render::render_html) - the tree flattened back into events and serialized
//!
//! Tags and outgoing links are collected along the way and returned beside the html, ready for
//! [`LinkStore::recompute`](crate::query::LinkStore::recompute).
//!
//! ```rust
//! use trellis_core::{codec::{process, PipelineOptions}, links::CorpusSlugs};
//!
//! let corpus = CorpusSlugs::new(["a", "document-b"]);
//! let doc = process("See [[Document B]] and #project", "a", &corpus, &PipelineOptions::default())
//!     .unwrap();
//! assert_eq!(doc.tags, vec!["project".to_string()]);
//! assert_eq!(doc.links[0].target, "document-b");
//! ```
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::{
    cache::{content_key, ContentCache},
    config::{LinkOptions, TransformOptions},
    error::TrellisError,
    links::CorpusSlugs,
    properties::OutgoingLink,
};

pub mod ast;
pub mod frontmatter;
pub mod preprocess;
pub mod render;
pub mod transform;

pub use frontmatter::Frontmatter;

pub const EXCERPT_CHARS: usize = 150;
pub const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub transform: TransformOptions,
    pub links: LinkOptions,
}

impl PipelineOptions {
    pub fn new(transform: TransformOptions, links: LinkOptions) -> Self {
        PipelineOptions { transform, links }
    }
}

/// Everything one pipeline run produces for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub html: String,
    pub frontmatter: Option<Frontmatter>,
    /// Slugified, deduplicated, front matter tags first.
    pub tags: Vec<String>,
    /// Embeds first, then links in document order; deduplicated.
    pub links: Vec<OutgoingLink>,
    pub excerpt: String,
    pub reading_time: String,
    pub has_diagram: bool,
}

impl ProcessedDocument {
    /// Links that can become graph edges.
    pub fn internal_links(&self) -> impl Iterator<Item = &OutgoingLink> {
        self.links
            .iter()
            .filter(|link| link.kind != crate::properties::EdgeKind::External)
    }
}

/// Run the whole pipeline over one document. Malformed markup never fails the run; errors are
/// reserved for the html serializer.
pub fn process(
    content: &str,
    slug: &str,
    corpus: &CorpusSlugs,
    options: &PipelineOptions,
) -> Result<ProcessedDocument, TrellisError> {
    let text = preprocess::preprocess(content, &options.transform);
    let mut nodes = ast::parse(&text);
    let frontmatter = frontmatter::take_frontmatter(&mut nodes);

    let mut ctx = transform::TransformContext::new(&options.transform, &options.links, slug, corpus);
    if let Some(fm) = &frontmatter {
        for tag in fm.tags.iter() {
            ctx.add_tag(tag);
        }
    }
    let nodes = transform::transform(nodes, &mut ctx);
    let html = render::render_html(&nodes, &options.transform, &options.links)?;
    let (tags, links, has_diagram) = ctx.into_outputs();

    let plain = ast::plain_text(&nodes);
    let excerpt = frontmatter
        .as_ref()
        .and_then(|fm| fm.excerpt.clone())
        .unwrap_or_else(|| excerpt(&plain, EXCERPT_CHARS));
    Ok(ProcessedDocument {
        html,
        frontmatter,
        tags,
        links,
        excerpt,
        reading_time: reading_time(&plain),
        has_diagram,
    })
}

/// First `max_chars` characters of whitespace-collapsed text, with `...` when truncated.
pub fn excerpt(plain: &str, max_chars: usize) -> String {
    let collapsed = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

pub fn reading_time(plain: &str) -> String {
    let words = plain.split_whitespace().count();
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    format!("{minutes} min read")
}

/// The pipeline bound to one option set, optionally memoized through a shared [`ContentCache`].
#[derive(Clone)]
pub struct Processor {
    options: PipelineOptions,
    cache: Option<Arc<ContentCache<ProcessedDocument>>>,
    ttl: Duration,
}

impl Processor {
    pub fn new(options: PipelineOptions) -> Self {
        Processor {
            options,
            cache: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ContentCache<ProcessedDocument>>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.ttl = ttl;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn cache(&self) -> Option<&Arc<ContentCache<ProcessedDocument>>> {
        self.cache.as_ref()
    }

    pub fn process(
        &self,
        content: &str,
        slug: &str,
        corpus: &CorpusSlugs,
    ) -> Result<ProcessedDocument, TrellisError> {
        let Some(cache) = &self.cache else {
            return process(content, slug, corpus, &self.options);
        };
        let scope = format!("{slug}:{}", corpus.fingerprint());
        let key = content_key(content, &scope, &self.options)?;
        if let Some(hit) = cache.get(&key) {
            tracing::trace!("[Processor::process] cache hit for '{slug}'");
            return Ok(hit);
        }
        let processed = process(content, slug, corpus, &self.options)?;
        cache.set(key, processed.clone(), self.ttl);
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::EdgeKind;
    use test_log::test;

    #[test]
    fn end_to_end_document() {
        let corpus = CorpusSlugs::new(["a", "document-b"]);
        let doc = process(
            "---\ntitle: A\ntags: [Intro]\n---\nSee [[Document B]] and #project\n",
            "a",
            &corpus,
            &PipelineOptions::default(),
        )
        .expect("process");
        assert_eq!(doc.tags, vec!["intro".to_string(), "project".to_string()]);
        assert_eq!(doc.links, vec![OutgoingLink::internal("document-b")]);
        assert_eq!(doc.frontmatter.and_then(|fm| fm.title).as_deref(), Some("A"));
        assert_eq!(doc.excerpt, "See Document B and #project");
        assert_eq!(doc.reading_time, "1 min read");
        assert!(!doc.has_diagram);
        assert!(!doc.html.contains("title: A"));
    }

    #[test]
    fn summary_fields() {
        let long = "word ".repeat(450);
        assert_eq!(reading_time(&long), "3 min read");
        assert_eq!(reading_time(""), "1 min read");
        let cut = excerpt(&long, 12);
        assert_eq!(cut, "word word wo...");
        assert_eq!(excerpt("  short \n text ", 150), "short text");
    }

    #[test]
    fn external_links_are_not_edges() {
        let doc = process(
            "[[x]] [y](https://example.com) ![[pic.png]]",
            "s",
            &CorpusSlugs::default(),
            &PipelineOptions::default(),
        )
        .expect("process");
        let kinds: Vec<EdgeKind> = doc.internal_links().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![EdgeKind::Embed, EdgeKind::Internal]);
        assert_eq!(doc.links.len(), 3);
    }

    #[test]
    fn processor_memoizes_per_option_set() {
        let cache = Arc::new(ContentCache::new());
        let full = Processor::new(PipelineOptions::default())
            .with_cache(cache.clone(), Duration::from_secs(60));
        let light = Processor::new(PipelineOptions::new(
            TransformOptions::prerender(),
            LinkOptions::default(),
        ))
        .with_cache(cache.clone(), Duration::from_secs(60));
        let corpus = CorpusSlugs::new(["s"]);
        let content = "```mermaid\nA-->B\n```\n";

        let first = full.process(content, "s", &corpus).expect("process");
        assert!(first.has_diagram);
        assert_eq!(cache.len(), 1);
        assert_eq!(full.process(content, "s", &corpus).expect("process"), first);
        assert_eq!(cache.len(), 1);

        let lite = light.process(content, "s", &corpus).expect("process");
        assert!(!lite.has_diagram);
        assert_eq!(cache.len(), 2);

        full.process(content, "s", &CorpusSlugs::new(["s", "t"]))
            .expect("process");
        assert_eq!(cache.len(), 3);
    }
}

//! Content-index export: a stateless projection of documents, edges and tags keyed by slug.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{config::IndexOptions, properties::DocId, query::CorpusSnapshot, TrellisError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentIndexEntry {
    pub slug: String,
    pub file_path: String,
    pub title: String,
    /// Slugs of live link targets, sorted.
    pub links: Vec<String>,
    pub tags: Vec<String>,
    /// Always empty in the exported form.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
}

pub type ContentIndex = BTreeMap<String, ContentIndexEntry>;

/// Project a snapshot onto the content index. Only live documents appear, and their `links` only
/// name live documents.
pub fn build_content_index(snapshot: &CorpusSnapshot, options: &IndexOptions) -> ContentIndex {
    let live: BTreeMap<DocId, _> = snapshot
        .live_documents()
        .map(|doc| (doc.id, doc))
        .collect();
    let mut links: BTreeMap<DocId, BTreeSet<&str>> = BTreeMap::new();
    for edge in snapshot.edges.iter() {
        if let (true, Some(target)) = (live.contains_key(&edge.source), live.get(&edge.target)) {
            links
                .entry(edge.source)
                .or_default()
                .insert(target.slug.as_str());
        }
    }
    let mut tags = snapshot.tags_by_document();
    let prefix = options.path_prefix.trim_end_matches('/');

    live.values()
        .map(|doc| {
            let file_path = if prefix.is_empty() {
                doc.slug.clone()
            } else {
                format!("{prefix}/{}", doc.slug)
            };
            let entry = ContentIndexEntry {
                slug: doc.slug.clone(),
                file_path,
                title: doc.title.clone(),
                links: links
                    .remove(&doc.id)
                    .map(|targets| targets.into_iter().map(str::to_string).collect())
                    .unwrap_or_default(),
                tags: tags.remove(&doc.id).unwrap_or_default(),
                content: String::new(),
                id: Some(doc.id.0),
            };
            (doc.slug.clone(), entry)
        })
        .collect()
}

/// Structural checks on an index: keys match slugs and every link names an entry.
pub fn validate(index: &ContentIndex) -> Result<(), TrellisError> {
    for (key, entry) in index.iter() {
        if key != &entry.slug {
            return Err(TrellisError::Custom(format!(
                "content index key '{key}' does not match entry slug '{}'",
                entry.slug
            )));
        }
        if let Some(missing) = entry.links.iter().find(|link| !index.contains_key(*link)) {
            return Err(TrellisError::Custom(format!(
                "content index entry '{key}' links to unknown slug '{missing}'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExport {
    pub entries: ContentIndex,
    /// Set when `entries` is the last good export because regeneration failed.
    pub stale: bool,
    /// Seconds since the epoch at which `entries` were generated.
    pub generated_at: u64,
}

/// Regenerates the content index on demand and falls back to the last good copy when that fails.
#[derive(Debug, Default)]
pub struct ContentIndexExporter {
    options: IndexOptions,
    last_good: Mutex<Option<IndexExport>>,
}

impl ContentIndexExporter {
    pub fn new(options: IndexOptions) -> Self {
        ContentIndexExporter {
            options,
            last_good: Mutex::new(None),
        }
    }

    /// Export from a freshly loaded snapshot. A failed load or invalid projection yields the last
    /// good export marked stale; with no previous export the error is returned.
    pub fn export(
        &self,
        snapshot: Result<CorpusSnapshot, TrellisError>,
    ) -> Result<IndexExport, TrellisError> {
        let fresh = snapshot.and_then(|snapshot| {
            let entries = build_content_index(&snapshot, &self.options);
            validate(&entries)?;
            Ok(entries)
        });
        match fresh {
            Ok(entries) => {
                let export = IndexExport {
                    entries,
                    stale: false,
                    generated_at: now_secs(),
                };
                *self.last_good.lock() = Some(export.clone());
                Ok(export)
            }
            Err(e) => match self.last_good.lock().clone() {
                Some(mut previous) => {
                    tracing::warn!(
                        "[ContentIndexExporter.export] regeneration failed, serving stale index: {e}"
                    );
                    previous.stale = true;
                    Ok(previous)
                }
                None => Err(e),
            },
        }
    }

    pub fn last_good(&self) -> Option<IndexExport> {
        self.last_good.lock().clone()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

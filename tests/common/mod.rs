//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::PathBuf;
use tempfile::TempDir;
use trellis_core::properties::{DocId, Document, PublishStatus};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub const DOC_A: DocId = DocId(1);
#[allow(dead_code)]
pub const DOC_B: DocId = DocId(2);
#[allow(dead_code)]
pub const IDEA: DocId = DocId(3);
#[allow(dead_code)]
pub const DRAFT: DocId = DocId(4);
#[allow(dead_code)]
pub const OLD: DocId = DocId(5);

/// Five documents: A links B, B links A, the idea note links A and a missing page, a draft links B
/// and a deleted document links A.
#[allow(dead_code)]
pub fn corpus_documents() -> Vec<Document> {
    vec![
        Document::new(1, "Document A", "See [[Document B]] and #project"),
        Document::new(
            2,
            "Document B",
            "Back to [[Document A#Intro|A]].\n\n![[chart.png|300x200]]\n",
        ),
        Document::new(
            3,
            "First Idea",
            "> [!idea]\n> Builds on [[Document A]] and [[missing page]]\n\n#project #Idea\n",
        )
        .with_slug("notes/first-idea"),
        Document::new(4, "Draft", "Draft about [[Document B]] #project")
            .with_status(PublishStatus::Draft),
        Document::new(5, "Old", "Old notes on [[Document A]] #legacy").deleted(),
    ]
}

/// Write the live part of [`corpus_documents`] as markdown files.
///
/// Returns the corpus root (e.g. `<temp_dir>/corpus/`).
#[allow(dead_code)]
pub fn create_test_corpus(temp_dir: &TempDir) -> PathBuf {
    let root = temp_dir.path().join("corpus");
    std::fs::create_dir_all(root.join("notes")).unwrap();
    for doc in corpus_documents().into_iter().take(3) {
        let file = match doc.slug.as_str() {
            "notes/first-idea" => root.join("notes").join("First Idea.md"),
            _ => root.join(format!("{}.md", doc.title)),
        };
        std::fs::write(file, doc.content).unwrap();
    }
    root
}

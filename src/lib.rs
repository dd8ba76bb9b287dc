//! # trellis-core
//!
//! A wiki-markup transformation pipeline and link-graph engine.
//!
//! ## Overview
//!
//! trellis-core turns markdown written with wiki conventions (`[[links]]`, `![[embeds]]`,
//! `> [!callouts]`, `#tags`, `==highlights==`) into HTML, and records what each document links to
//! and how it is tagged in a **link store**. The store answers backlink, forward-link and tag
//! queries, and feeds a corpus graph from which depth-bounded **neighborhoods** are cut for
//! visualization.
//!
//! ### Key Features
//!
//! - **Ordered pass pipeline**: preprocess, parse, a fixed sequence of tree-rewriting passes, render
//! - **Link resolution**: absolute, shortest-match and relative strategies with existence checks
//!   against the corpus slug set
//! - **Broken-link rendering**: links to missing documents render distinctly instead of failing
//! - **Atomic recompute**: a document's edges and tags are replaced in one transaction
//! - **Graph neighborhoods**: level-ordered traversal with tag pseudo-nodes and a node budget
//! - **Bulk pre-render**: bounded worker pool with retry, backoff and a batch deadline
//!
//! ## Architecture
//!
//! - **[`codec`]**: the document pipeline ([`codec::process`], [`codec::Processor`])
//! - **[`links`]**: link classification and resolution against [`links::CorpusSlugs`]
//! - **[`query`]**: the [`query::LinkStore`] contract and [`query::CorpusSnapshot`]
//! - **[`linkbase`]**: the in-memory store, graph building and the content-index export
//! - **`db`**: the SQLite store (feature `service`)
//! - **[`cache`]**: TTL content cache keyed by content and options
//! - **[`batch`]**: bulk pre-render
//! - **[`service`]**: [`service::LinkService`], the read/write surface over a store
//! - **[`config`]**: per-stage options and the TOML config provider
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_core::{
//!     config::TrellisConfig,
//!     linkbase::MemoryLinkStore,
//!     properties::{DocId, Document},
//!     service::LinkService,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryLinkStore::from_documents([
//!         Document::new(1, "Document A", ""),
//!         Document::new(2, "Document B", ""),
//!     ])?;
//!     let service = LinkService::new(store, &TrellisConfig::default());
//!
//!     let processed = service
//!         .update_links(DocId(1), "See [[Document B]] and #project")
//!         .await?;
//!     assert!(processed.html.contains(r#"href="/document-b""#));
//!
//!     let backlinks = service.get_backlinks(DocId(2)).await?;
//!     assert_eq!(backlinks[0].slug, "document-a");
//!     assert_eq!(service.get_tags(DocId(1)).await?, vec!["project"]);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - **`service`**: SQLite-backed [`query::LinkStore`] via sqlx
//! - **`bin`**: the `trellis` command-line tool

pub mod batch;
pub mod cache;
pub mod codec;
pub mod config;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod event;
pub mod linkbase;
pub mod links;
pub mod paths;
pub mod properties;
pub mod query;
pub mod service;

pub use error::TrellisError;

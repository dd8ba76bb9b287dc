//! trellis CLI tool
//!
//! Command-line interface for rendering wiki-flavored markdown and inspecting the link graph of a
//! directory of documents with trellis-core.
//!
//! ## Commands
//!
//! - `render <file>`: Render one file to HTML on stdout
//! - `index <dir>`: Pre-render a directory, recompute its links and print the content index JSON
//! - `graph <dir> <slug>`: Print the neighborhood of one document as JSON (`--depth N` or
//!   `--global`)
//!
//! Every command accepts `--config <toml>`; a missing file falls back to defaults.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::unbounded_channel;
use trellis_core::{
    batch::BatchRenderer,
    codec::{PipelineOptions, Processor},
    config::{get_content, ConfigProvider, TomlConfigProvider, TrellisConfig},
    event::BatchEvent,
    linkbase::{MemoryLinkStore, NodeId},
    links::CorpusSlugs,
    paths::{corpus::relative_slug_source, load_documents, slugify_path},
    query::LinkStore,
    service::LinkService,
    TrellisError,
};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about = "Render wiki-flavored markdown and inspect its link graph", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a single markdown file to HTML
    Render {
        file: PathBuf,

        /// Corpus directory used for link existence checks (default: the file's directory)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },

    /// Pre-render a directory and print its content index
    Index {
        dir: PathBuf,

        /// Print batch progress to stderr
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the neighborhood around one document
    Graph {
        dir: PathBuf,

        /// Slug of the focal document, e.g. `notes/first-idea`
        slug: String,

        /// Neighborhood depth; negative for the whole graph (default: configured local depth)
        #[arg(long, allow_hyphen_values = true, conflicts_with = "global")]
        depth: Option<i32>,

        /// Use the configured corpus-wide depth instead of the local one
        #[arg(long)]
        global: bool,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<TrellisConfig, TrellisError> {
    match path {
        Some(path) => TomlConfigProvider::new(path).get_config(),
        None => Ok(TrellisConfig::default()),
    }
}

/// Load `dir`, pre-render it and recompute every document's links into a fresh in-memory store.
async fn build_service(
    dir: &Path,
    config: &TrellisConfig,
    verbose: bool,
) -> Result<LinkService<MemoryLinkStore>, TrellisError> {
    let store = MemoryLinkStore::from_documents(load_documents(dir)?)?;
    let service = LinkService::new(store, config);

    let (tx, mut rx) = unbounded_channel::<BatchEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if verbose {
                eprintln!("[batch] {event}");
            }
        }
    });
    let pipeline = PipelineOptions::new(config.transform.clone(), config.links);
    let renderer = BatchRenderer::new(config.batch, Processor::new(pipeline)).with_events(tx);
    let report = service.rebuild(&renderer).await?;
    drop(renderer);
    printer.await?;

    for (id, msg) in report.failed.iter() {
        eprintln!("failed {id}: {msg}");
    }
    if !report.skipped.is_empty() {
        eprintln!("skipped {} document(s) after the deadline", report.skipped.len());
    }
    Ok(service)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Render { file, corpus } => {
            let root = match corpus {
                Some(root) => root,
                None => file
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            let corpus_docs = load_documents(&root)?;
            let slugs = CorpusSlugs::new(corpus_docs.into_iter().map(|doc| doc.slug));
            let source = match relative_slug_source(&root, &file) {
                Ok(source) => source,
                Err(_) => file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            let slug = slugify_path(&source);
            let content = get_content(&file)?;
            let processor = Processor::new(PipelineOptions::new(config.transform, config.links));
            let processed = processor.process(&content, &slug, &slugs)?;
            print!("{}", processed.html);
        }
        Commands::Index { dir, verbose } => {
            let export = runtime.block_on(async {
                let service = build_service(&dir, &config, verbose).await?;
                service.content_index().await
            })?;
            println!("{}", serde_json::to_string_pretty(&export.entries)?);
        }
        Commands::Graph {
            dir,
            slug,
            depth,
            global,
        } => {
            let graph = runtime.block_on(async {
                let service = build_service(&dir, &config, false).await?;
                let id = service
                    .store()
                    .snapshot()
                    .await?
                    .documents
                    .iter()
                    .find(|doc| doc.slug == slug)
                    .map(|doc| doc.id)
                    .ok_or_else(|| TrellisError::NotFound(format!("document '{slug}'")))?;
                match (global, depth) {
                    (true, _) => service.get_global_graph(id).await,
                    (false, Some(depth)) => {
                        service
                            .get_neighborhood(&NodeId::Document(id), depth)
                            .await
                    }
                    (false, None) => service.get_local_graph(id).await,
                }
            })?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
    }

    Ok(())
}

use crate::error::TrellisError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

/// Options for the preprocessor and the inline transform engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    /// Strip `%% ... %%` comment spans.
    pub comments: bool,
    /// `==text==` highlight spans.
    pub highlight: bool,
    /// `[[target#anchor|alias]]` links and `![[...]]` embeds.
    pub wikilinks: bool,
    /// `> [!kind]` admonition blocks.
    pub callouts: bool,
    /// Flag fenced code blocks in `diagram_languages` for diagram rendering.
    pub diagrams: bool,
    pub diagram_languages: Vec<String>,
    /// Inline `#tag` tokens.
    pub parse_tags: bool,
    /// ASCII arrow glyph substitution.
    pub parse_arrows: bool,
    /// Keep `#^block-id` anchors verbatim instead of slugifying them as headings.
    pub parse_block_references: bool,
    pub enable_video_embed: bool,
    pub enable_youtube_embed: bool,
    /// Render links to documents missing from the corpus as disabled spans.
    pub disable_broken_links: bool,
    /// Destination prefix for rewritten tag links.
    pub tag_index_base: String,
    pub lazy_load: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            comments: true,
            highlight: true,
            wikilinks: true,
            callouts: true,
            diagrams: true,
            diagram_languages: vec!["mermaid".to_string()],
            parse_tags: true,
            parse_arrows: true,
            parse_block_references: true,
            enable_video_embed: true,
            enable_youtube_embed: true,
            disable_broken_links: false,
            tag_index_base: "/tags".to_string(),
            lazy_load: true,
        }
    }
}

impl TransformOptions {
    /// Lightweight preset used by bulk pre-rendering: no diagrams, comments or arrow glyphs.
    pub fn prerender() -> Self {
        TransformOptions {
            diagrams: false,
            comments: false,
            parse_arrows: false,
            ..Default::default()
        }
    }

    pub fn is_diagram_language(&self, lang: &str) -> bool {
        self.diagrams
            && self
                .diagram_languages
                .iter()
                .any(|known| known.eq_ignore_ascii_case(lang))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkStrategy {
    /// Targets are already corpus-rooted.
    Absolute,
    /// Match by basename or path suffix, preferring the shallowest candidate.
    #[default]
    Shortest,
    /// Targets are relative to the linking document's directory.
    Relative,
}

/// What existence means when the corpus slug set is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePolicy {
    /// Assume every internal target exists (bulk ingestion, validation deferred).
    #[default]
    Optimistic,
    /// Fail closed: no corpus, no existing targets.
    Strict,
}

/// Tie-break among equally short candidates of the shortest strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First candidate in corpus iteration order.
    #[default]
    CorpusOrder,
    Lexicographic,
}

/// Options for link resolution and link rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    pub strategy: LinkStrategy,
    pub existence: ExistencePolicy,
    pub tie_break: TieBreak,
    /// Show only the basename of un-aliased internal links.
    pub pretty_links: bool,
    pub external_link_icon: bool,
    pub open_links_in_new_tab: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            strategy: LinkStrategy::Shortest,
            existence: ExistencePolicy::Optimistic,
            tie_break: TieBreak::CorpusOrder,
            pretty_links: true,
            external_link_icon: true,
            open_links_in_new_tab: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Neighborhood depth for a single document view.
    pub local_depth: i32,
    /// Depth for the corpus-wide view. Negative means unbounded.
    pub global_depth: i32,
    pub include_tags: bool,
    pub max_nodes: Option<usize>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            local_depth: 1,
            global_depth: -1,
            include_tags: true,
            max_nodes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            ttl_secs: 300,
            cleanup_interval_secs: 600,
        }
    }
}

impl CacheOptions {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Hard cap on workers, applied after sizing to available cores.
    pub max_workers: usize,
    /// One worker per this many queued documents, before capping.
    pub docs_per_worker: usize,
    pub max_attempts: u32,
    /// Base delay between attempts; doubles per retry.
    pub backoff_ms: u64,
    pub deadline_secs: Option<u64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            max_workers: 4,
            docs_per_worker: 128,
            max_attempts: 3,
            backoff_ms: 100,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Directory prefix used for the `filePath` of content-index entries.
    pub path_prefix: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            path_prefix: "articles".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrellisConfig {
    pub transform: TransformOptions,
    pub links: LinkOptions,
    pub graph: GraphOptions,
    pub cache: CacheOptions,
    pub batch: BatchOptions,
    pub index: IndexOptions,
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<TrellisConfig, TrellisError>;
    fn set_config(&self, config: &TrellisConfig) -> Result<(), TrellisError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<TrellisConfig, TrellisError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(TrellisConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn set_config(&self, config: &TrellisConfig) -> Result<(), TrellisError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, TrellisError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}

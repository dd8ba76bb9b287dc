//! Link resolution: turn a raw link target found in one document into a canonical, corpus-relative
//! slug, classify it, and decide whether it exists.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

use crate::{
    config::{ExistencePolicy, LinkOptions, LinkStrategy, TieBreak},
    paths::{slugify_path, split_anchor, to_anchor, SlugPath},
};

/// The slugs known at resolution time, in corpus iteration order.
#[derive(Debug, Clone, Default)]
pub struct CorpusSlugs {
    ordered: Vec<String>,
    index: HashSet<String>,
    fingerprint: String,
}

impl CorpusSlugs {
    pub fn new<I, S>(slugs: I) -> CorpusSlugs
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut index = HashSet::new();
        let mut hasher = Sha256::new();
        for slug in slugs.into_iter().map(Into::into) {
            if index.insert(slug.clone()) {
                hasher.update(slug.as_bytes());
                hasher.update(b"\n");
                ordered.push(slug);
            }
        }
        CorpusSlugs {
            ordered,
            index,
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.index.contains(slug)
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    /// Stable digest of the ordered slug list, used in content-cache keys.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl<S: Into<String>> FromIterator<S> for CorpusSlugs {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        CorpusSlugs::new(iter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkClass {
    /// Points at a document of this corpus.
    Internal,
    /// A fully qualified URL.
    External,
    /// A fragment within the linking document itself.
    Anchor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    /// Canonical slug for internal links, the URL for external ones, the source slug for anchors.
    pub target: String,
    pub anchor: Option<String>,
    /// Authoritative only relative to the corpus snapshot used when resolving.
    pub exists: bool,
    pub class: LinkClass,
}

impl ResolvedLink {
    pub fn is_internal(&self) -> bool {
        self.class == LinkClass::Internal
    }

    /// Root-relative destination for rendering.
    pub fn href(&self) -> String {
        let fragment = self
            .anchor
            .as_ref()
            .map(|anchor| format!("#{anchor}"))
            .unwrap_or_default();
        match self.class {
            LinkClass::External => self.target.clone(),
            LinkClass::Anchor => fragment,
            LinkClass::Internal => format!("/{}{}", self.target, fragment),
        }
    }
}

/// A fully qualified URL. Host-less schemes other than mail/phone/data are treated as internal so
/// titles like `Notes: Weekly` stay wiki targets.
pub fn is_external(target: &str) -> bool {
    match Url::parse(target.trim()) {
        Ok(url) => url.has_host() || matches!(url.scheme(), "mailto" | "tel" | "data"),
        Err(_) => false,
    }
}

/// Normalize an anchor: block references (`^id`) are kept verbatim, heading anchors are slugged.
pub fn normalize_anchor(anchor: &str) -> Option<String> {
    let anchor = anchor.trim().trim_start_matches('#');
    if anchor.is_empty() {
        None
    } else if anchor.starts_with('^') {
        Some(anchor.to_string())
    } else {
        let slugged = to_anchor(anchor);
        (!slugged.is_empty()).then_some(slugged)
    }
}

/// Resolve `raw_target`, found in the document `source_slug`, against `corpus`.
pub fn resolve(
    source_slug: &str,
    raw_target: &str,
    options: &LinkOptions,
    corpus: &CorpusSlugs,
) -> ResolvedLink {
    let raw_target = raw_target.trim();
    if is_external(raw_target) {
        return ResolvedLink {
            target: raw_target.to_string(),
            anchor: None,
            exists: true,
            class: LinkClass::External,
        };
    }

    let (path, anchor) = split_anchor(raw_target);
    let anchor = anchor.and_then(normalize_anchor);
    if path.trim().is_empty() {
        return ResolvedLink {
            target: source_slug.to_string(),
            anchor,
            exists: true,
            class: LinkClass::Anchor,
        };
    }

    let canonical = slugify_path(path);
    let rooted = path.trim_start().starts_with('/');
    let explicitly_relative = {
        let trimmed = path.trim_start();
        trimmed.starts_with("./") || trimmed.starts_with("../")
    };
    let target = match options.strategy {
        LinkStrategy::Absolute => SlugPath::new(&canonical).normalize(),
        LinkStrategy::Relative if rooted => SlugPath::new(&canonical).normalize(),
        LinkStrategy::Relative => SlugPath::new(source_slug).join(&canonical),
        LinkStrategy::Shortest if explicitly_relative => SlugPath::new(source_slug).join(&canonical),
        LinkStrategy::Shortest => shortest_match(source_slug, &canonical, options.tie_break, corpus)
            .unwrap_or_else(|| SlugPath::new(&canonical).normalize()),
    };

    let exists = if corpus.is_empty() {
        options.existence == ExistencePolicy::Optimistic
    } else {
        corpus.contains(&target)
    };
    if !exists {
        tracing::debug!("[resolve] '{raw_target}' in '{source_slug}' -> '{target}' does not exist");
    }

    ResolvedLink {
        target,
        anchor,
        exists,
        class: LinkClass::Internal,
    }
}

/// Candidates are corpus slugs equal to `canonical` or ending in `/{canonical}`. Candidates sharing
/// the source's directory come first, then shallower paths. Remaining ties go to `tie_break`.
fn shortest_match(
    source_slug: &str,
    canonical: &str,
    tie_break: TieBreak,
    corpus: &CorpusSlugs,
) -> Option<String> {
    let canonical = SlugPath::new(canonical).normalize();
    if canonical.is_empty() {
        return None;
    }
    let suffix = format!("/{canonical}");
    let source_dir = SlugPath::new(source_slug).dir();
    let mut best: Option<((bool, usize), &str)> = None;
    for candidate in corpus.iter() {
        if candidate != canonical && !candidate.ends_with(&suffix) {
            continue;
        }
        let candidate_path = SlugPath::new(candidate);
        let rank = (candidate_path.dir() != source_dir, candidate_path.depth());
        let replace = match best {
            None => true,
            Some((best_rank, best_slug)) => {
                rank < best_rank
                    || (rank == best_rank
                        && tie_break == TieBreak::Lexicographic
                        && candidate < best_slug)
            }
        };
        if replace {
            best = Some((rank, candidate));
        }
    }
    best.map(|(_, slug)| slug.to_string())
}

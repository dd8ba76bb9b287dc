/// [crate::properties] holds the records shared by the pipeline, the link stores and the graph
/// query engine.
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::{error::TrellisError, paths::slugify_segment};

/// Numeric document handle, as assigned by the external document store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocId(pub i64);

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for DocId {
    fn from(id: i64) -> Self {
        DocId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Published => "published",
            PublishStatus::Archived => "archived",
        }
    }
}

impl FromStr for PublishStatus {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PublishStatus::Draft),
            "published" => Ok(PublishStatus::Published),
            "archived" => Ok(PublishStatus::Archived),
            other => Err(TrellisError::Serialization(format!(
                "unknown publish status '{other}'"
            ))),
        }
    }
}

/// One transformable unit. Created and updated by ingestion; this crate only reads it and derives
/// edges and tags from its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub status: PublishStatus,
    pub is_deleted: bool,
}

impl Document {
    /// A published document whose slug is derived from its title.
    pub fn new(id: i64, title: &str, content: &str) -> Document {
        Document {
            id: DocId(id),
            slug: slugify_segment(title),
            title: title.to_string(),
            content: content.to_string(),
            excerpt: None,
            status: PublishStatus::Published,
            is_deleted: false,
        }
    }

    pub fn with_slug(mut self, slug: &str) -> Document {
        self.slug = slug.to_string();
        self
    }

    pub fn with_status(mut self, status: PublishStatus) -> Document {
        self.status = status;
        self
    }

    pub fn deleted(mut self) -> Document {
        self.is_deleted = true;
        self
    }

    /// Published and not soft-deleted: the only documents navigation and graph views may show.
    pub fn is_live(&self) -> bool {
        self.status == PublishStatus::Published && !self.is_deleted
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary::from(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Internal,
    External,
    Embed,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Internal => "internal",
            EdgeKind::External => "external",
            EdgeKind::Embed => "embed",
        }
    }
}

impl FromStr for EdgeKind {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(EdgeKind::Internal),
            "external" => Ok(EdgeKind::External),
            "embed" => Ok(EdgeKind::Embed),
            other => Err(TrellisError::Serialization(format!(
                "unknown edge kind '{other}'"
            ))),
        }
    }
}

/// An outgoing reference collected while transforming one document. `target` is a canonical slug
/// for internal and embed links, and the raw URL for external ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutgoingLink {
    pub target: String,
    pub kind: EdgeKind,
    pub exists: bool,
}

impl OutgoingLink {
    pub fn internal(target: &str) -> OutgoingLink {
        OutgoingLink {
            target: target.to_string(),
            kind: EdgeKind::Internal,
            exists: true,
        }
    }
}

/// A persisted edge between two stored documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: DocId,
    pub target: DocId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocId,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        DocumentSummary {
            id: doc.id,
            title: doc.title.clone(),
            slug: doc.slug.clone(),
            excerpt: doc.excerpt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

#[cfg(feature = "service")]
fn decode_err(err: TrellisError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for Document {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status_str: &str = row.try_get("status")?;
        Ok(Document {
            id: DocId(row.try_get("id")?),
            slug: row.try_get("slug")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            excerpt: row.try_get("excerpt")?,
            status: PublishStatus::from_str(status_str).map_err(decode_err)?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for DocumentSummary {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(DocumentSummary {
            id: DocId(row.try_get("id")?),
            title: row.try_get("title")?,
            slug: row.try_get("slug")?,
            excerpt: row.try_get("excerpt")?,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for EdgeRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let kind_str: &str = row.try_get("kind")?;
        Ok(EdgeRecord {
            source: DocId(row.try_get("source_id")?),
            target: DocId(row.try_get("target_id")?),
            kind: EdgeKind::from_str(kind_str).map_err(decode_err)?,
        })
    }
}

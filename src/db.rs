//! SQLite-backed [`LinkStore`].
//!
//! Documents live in `documents`; derived state lives in `document_links` and `document_tags` and
//! is only ever rewritten wholesale per source document by [`LinkStore::recompute`]. A partial
//! unique index keeps slugs unique among non-deleted rows.
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Pool, QueryBuilder,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    str::FromStr,
};

use crate::{
    links::CorpusSlugs,
    properties::{DocId, Document, DocumentSummary, EdgeRecord, OutgoingLink, TagCount},
    query::{edge_candidates, normalize_tags, CorpusSnapshot, LinkStore},
    TrellisError,
};

pub const LINK_STORE_DB: &str = "sqlite:trellis.db";

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    pub async fn open(db_path: PathBuf) -> Result<DbConnection, TrellisError> {
        Ok(DbConnection(db_init(db_path).await?))
    }

    /// Map target slugs to the ids of non-deleted documents, in chunks that respect the bind
    /// parameter limit.
    async fn lookup_slugs(
        conn: &mut SqliteConnection,
        slugs: &BTreeSet<&str>,
    ) -> Result<BTreeMap<String, i64>, TrellisError> {
        let mut found = BTreeMap::new();
        let slugs: Vec<&str> = slugs.iter().copied().collect();
        for chunk in slugs.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT slug, id FROM documents WHERE is_deleted = 0 AND slug IN (",
            );
            let mut separated = qb.separated(", ");
            for slug in chunk {
                separated.push_bind(slug.to_string());
            }
            separated.push_unseparated(")");
            let rows: Vec<(String, i64)> = qb
                .build_query_as()
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "[DbConnection.lookup_slugs] SQL error resolving {} slugs\n\terror: {}",
                        chunk.len(),
                        e
                    );
                    e
                })?;
            found.extend(rows);
        }
        Ok(found)
    }

    /// Batch insert edge rows. A unique violation means a concurrent writer raced us on the same
    /// rows; fall back to row-at-a-time inserts that skip whatever already exists.
    async fn insert_edges(
        conn: &mut SqliteConnection,
        edges: &[EdgeRecord],
    ) -> Result<(), TrellisError> {
        for chunk in edges.chunks(SQLITE_LIMIT_VARIABLE_NUMBER / 3) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO document_links (source_id, target_id, kind) ",
            );
            qb.push_values(chunk.iter(), |mut b, edge| {
                b.push_bind(edge.source.0)
                    .push_bind(edge.target.0)
                    .push_bind(edge.kind.as_str());
            });
            match qb.build().execute(&mut *conn).await {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(
                        "[DbConnection.insert_edges] batch hit existing rows, inserting {} edges \
                        individually",
                        chunk.len()
                    );
                    for edge in chunk {
                        sqlx::query(
                            "INSERT OR IGNORE INTO document_links (source_id, target_id, kind) \
                            VALUES (?, ?, ?)",
                        )
                        .bind(edge.source.0)
                        .bind(edge.target.0)
                        .bind(edge.kind.as_str())
                        .execute(&mut *conn)
                        .await?;
                    }
                }
                Err(e) => {
                    tracing::error!("[DbConnection.insert_edges] SQL error\n\terror: {}", e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn insert_tags(
        conn: &mut SqliteConnection,
        id: DocId,
        tags: &BTreeSet<String>,
    ) -> Result<(), TrellisError> {
        let tags: Vec<&String> = tags.iter().collect();
        for chunk in tags.chunks(SQLITE_LIMIT_VARIABLE_NUMBER / 2) {
            let mut qb =
                QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO document_tags (document_id, tag) ");
            qb.push_values(chunk.iter(), |mut b, tag| {
                b.push_bind(id.0).push_bind(tag.to_string());
            });
            qb.build().execute(&mut *conn).await.map_err(|e| {
                tracing::error!("[DbConnection.insert_tags] SQL error for {id}\n\terror: {}", e);
                e
            })?;
        }
        Ok(())
    }

    pub async fn document_count(&self) -> Result<i64, TrellisError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE is_deleted = 0")
            .fetch_one(&self.0)
            .await?)
    }

    /// Live summaries joined through `document_links`. `anchor` names the bound column and `other`
    /// the column whose documents are returned.
    async fn linked_summaries(
        &self,
        id: DocId,
        anchor: &str,
        other: &str,
    ) -> Result<Vec<DocumentSummary>, TrellisError> {
        let sql = format!(
            "SELECT DISTINCT d.id, d.title, d.slug, d.excerpt FROM document_links l \
            JOIN documents d ON d.id = l.{other} \
            WHERE l.{anchor} = ? \
            AND d.status = 'published' AND d.is_deleted = 0 \
            AND EXISTS (SELECT 1 FROM documents a WHERE a.id = l.{anchor} \
                AND a.status = 'published' AND a.is_deleted = 0) \
            ORDER BY d.id"
        );
        Ok(sqlx::query_as::<_, DocumentSummary>(&sql)
            .bind(id.0)
            .fetch_all(&self.0)
            .await
            .map_err(|e| {
                tracing::error!(
                    "[DbConnection.linked_summaries] SQL error for {id} ({anchor})\n\terror: {}",
                    e
                );
                e
            })?)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

impl LinkStore for DbConnection {
    #[tracing::instrument(skip(self, doc), fields(id = %doc.id))]
    async fn upsert_document(&self, doc: Document) -> Result<(), TrellisError> {
        sqlx::query(
            "INSERT INTO documents (id, slug, title, content, excerpt, status, is_deleted) \
            VALUES (?, ?, ?, ?, ?, ?, ?) \
            ON CONFLICT(id) DO UPDATE SET slug = excluded.slug, title = excluded.title, \
            content = excluded.content, excerpt = excluded.excerpt, status = excluded.status, \
            is_deleted = excluded.is_deleted",
        )
        .bind(doc.id.0)
        .bind(&doc.slug)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.excerpt)
        .bind(doc.status.as_str())
        .bind(doc.is_deleted)
        .execute(&self.0)
        .await
        .map_err(|e| {
            tracing::error!(
                "[DbConnection.upsert_document] SQL error writing '{}'\n\terror: {}",
                doc.slug,
                e
            );
            e
        })?;
        Ok(())
    }

    async fn document(&self, id: DocId) -> Result<Option<Document>, TrellisError> {
        Ok(
            sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&self.0)
                .await?,
        )
    }

    #[tracing::instrument(skip(self, links, tags))]
    async fn recompute(
        &self,
        id: DocId,
        links: &[OutgoingLink],
        tags: &[String],
    ) -> Result<(), TrellisError> {
        let mut tx = self.0.begin().await?;
        let known: Option<i64> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if known.is_none() {
            return Err(TrellisError::NotFound(format!("document {id}")));
        }

        sqlx::query("DELETE FROM document_links WHERE source_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_tags WHERE document_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        let candidates = edge_candidates(links);
        if !candidates.is_empty() {
            let slugs: BTreeSet<&str> = candidates.iter().map(|(slug, _)| *slug).collect();
            let ids = DbConnection::lookup_slugs(&mut *tx, &slugs).await?;
            let edges: Vec<EdgeRecord> = candidates
                .iter()
                .filter_map(|(slug, kind)| {
                    ids.get(*slug).map(|target| EdgeRecord {
                        source: id,
                        target: DocId(*target),
                        kind: *kind,
                    })
                })
                .collect();
            if edges.len() < candidates.len() {
                tracing::debug!(
                    "[DbConnection.recompute] {} link(s) of {id} have no target document",
                    candidates.len() - edges.len()
                );
            }
            DbConnection::insert_edges(&mut *tx, &edges).await?;
        }

        let tags = normalize_tags(tags);
        if !tags.is_empty() {
            DbConnection::insert_tags(&mut *tx, id, &tags).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn backlinks(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        self.linked_summaries(id, "target_id", "source_id").await
    }

    async fn forward_links(&self, id: DocId) -> Result<Vec<DocumentSummary>, TrellisError> {
        self.linked_summaries(id, "source_id", "target_id").await
    }

    async fn tags_of(&self, id: DocId) -> Result<Vec<String>, TrellisError> {
        Ok(
            sqlx::query_scalar("SELECT tag FROM document_tags WHERE document_id = ? ORDER BY tag")
                .bind(id.0)
                .fetch_all(&self.0)
                .await?,
        )
    }

    async fn all_tags(&self) -> Result<Vec<TagCount>, TrellisError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT t.tag, COUNT(*) AS count FROM document_tags t \
            JOIN documents d ON d.id = t.document_id \
            WHERE d.status = 'published' AND d.is_deleted = 0 \
            GROUP BY t.tag ORDER BY count DESC, t.tag ASC",
        )
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            tracing::error!("[DbConnection.all_tags] SQL error\n\terror: {}", e);
            e
        })?;
        Ok(rows
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag,
                count: count.max(0) as u64,
            })
            .collect())
    }

    async fn documents_by_tag(&self, tag: &str) -> Result<Vec<DocumentSummary>, TrellisError> {
        Ok(sqlx::query_as::<_, DocumentSummary>(
            "SELECT d.id, d.title, d.slug, d.excerpt FROM document_tags t \
            JOIN documents d ON d.id = t.document_id \
            WHERE t.tag = ? AND d.status = 'published' AND d.is_deleted = 0 \
            ORDER BY d.id",
        )
        .bind(tag)
        .fetch_all(&self.0)
        .await?)
    }

    async fn corpus_slugs(&self) -> Result<CorpusSlugs, TrellisError> {
        let slugs: Vec<String> =
            sqlx::query_scalar("SELECT slug FROM documents WHERE is_deleted = 0 ORDER BY id")
                .fetch_all(&self.0)
                .await?;
        Ok(CorpusSlugs::new(slugs))
    }

    #[tracing::instrument(skip(self))]
    async fn snapshot(&self) -> Result<CorpusSnapshot, TrellisError> {
        let mut tx = self.0.begin().await?;
        let documents: Vec<Document> =
            sqlx::query_as("SELECT * FROM documents WHERE is_deleted = 0 ORDER BY id")
                .fetch_all(&mut *tx)
                .await?;
        let edges: Vec<EdgeRecord> = sqlx::query_as(
            "SELECT l.source_id, l.target_id, l.kind FROM document_links l \
            JOIN documents d ON d.id = l.source_id WHERE d.is_deleted = 0 \
            ORDER BY l.source_id, l.target_id, l.kind",
        )
        .fetch_all(&mut *tx)
        .await?;
        let tags: Vec<(i64, String)> = sqlx::query_as(
            "SELECT t.document_id, t.tag FROM document_tags t \
            JOIN documents d ON d.id = t.document_id WHERE d.is_deleted = 0 \
            ORDER BY t.document_id, t.tag",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::debug!(
            "snapshot: {} documents, {} edges, {} tags",
            documents.len(),
            edges.len(),
            tags.len()
        );
        Ok(CorpusSnapshot {
            documents,
            edges,
            tags: tags.into_iter().map(|(id, tag)| (DocId(id), tag)).collect(),
        })
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_link_tables",
        sql: "\
        CREATE TABLE documents (id INTEGER PRIMARY KEY, slug TEXT NOT NULL, title TEXT NOT NULL, \
            content TEXT NOT NULL DEFAULT '', excerpt TEXT, status TEXT NOT NULL DEFAULT 'draft', \
            is_deleted INTEGER NOT NULL DEFAULT 0); \
        CREATE UNIQUE INDEX documents_live_slug ON documents(slug) WHERE is_deleted = 0; \
        CREATE TABLE document_links (source_id INTEGER NOT NULL, target_id INTEGER NOT NULL, \
            kind TEXT NOT NULL, UNIQUE(source_id, target_id, kind)); \
        CREATE INDEX document_links_target ON document_links(target_id); \
        CREATE TABLE document_tags (document_id INTEGER NOT NULL, tag TEXT NOT NULL, \
            UNIQUE(document_id, tag)); \
        CREATE INDEX document_tags_tag ON document_tags(tag);",
        kind: MigrationType::ReversibleUp,
    }])
}

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, sqlx::Error> {
    let path = db_path.to_str().ok_or_else(|| {
        sqlx::Error::Configuration(format!("database path {db_path:?} is not valid UTF-8").into())
    })?;
    let fqdb = format!("sqlite:{path}");
    tracing::debug!("Initializing link store db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let (documents, edges): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM documents), (SELECT COUNT(*) FROM document_links)",
    )
    .fetch_one(&pool)
    .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored document count:\t{:?} \n \
         \tStored edge count:\t{:?}",
        documents,
        edges
    );

    Ok(pool)
}

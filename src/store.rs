//! Vector store adapter.
//!
//! A uniform contract over the embedding + ANN engine backing the
//! knowledge collection. The engine here is SQLite: one database file
//! inside the configured store directory, embeddings stored as
//! little-endian f32 BLOBs, similarity computed by brute-force scan over
//! the (metadata-filtered) candidate rows.
//!
//! # Contract
//!
//! - `upsert` is idempotent by `record_id`; batches of up to
//!   [`UPSERT_BATCH`] rows are committed per transaction. Re-indexing an
//!   unchanged source is a no-op observable only through an unchanged
//!   `count()`.
//! - `query` applies a conjunction of metadata equality predicates and
//!   returns up to `k` hits ordered by ascending distance.
//! - `reset` destroys the collection.
//!
//! Storage errors surface as [`CoraError::Storage`]; the store never
//! retries internally.
//!
//! # Distance
//!
//! Embeddings are unit-normalized on write and on query; distance is
//! squared L2 between unit vectors (`2 − 2·cosθ`, range `[0, 4]`), and
//! `similarity = 1 / (1 + distance)`.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::EmbeddingProvider;
use crate::error::CoraError;
use crate::models::{Hit, IndexedRecord, RecordMetadata};

/// Fixed collection name; the table inside the store database.
pub const COLLECTION: &str = "rayied_knowledge_base";

/// Maximum records per upsert transaction.
pub const UPSERT_BATCH: usize = 64;

/// Conjunction of metadata equality predicates for queries.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub language: Option<String>,
    pub app_name: Option<String>,
    pub kind: Option<String>,
}

impl MetadataFilter {
    pub fn none() -> Self {
        Self::default()
    }
}

pub struct VectorStore {
    pool: SqlitePool,
    embedder: Box<dyn EmbeddingProvider>,
    dir: std::path::PathBuf,
}

impl VectorStore {
    /// Opens (or creates) the store directory and runs the idempotent
    /// schema migration.
    pub async fn open(dir: &Path, embedder: Box<dyn EmbeddingProvider>) -> Result<Self, CoraError> {
        std::fs::create_dir_all(dir).map_err(|e| CoraError::Storage(e.to_string()))?;
        let db_path = dir.join("cora.sqlite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| CoraError::Storage(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;

        Ok(Self {
            pool,
            embedder,
            dir: dir.to_path_buf(),
        })
    }

    /// The directory this store persists into.
    pub fn location(&self) -> &Path {
        &self.dir
    }

    /// Embed a single query text, unit-normalized.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, CoraError> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| CoraError::Embedding("empty embedding response".to_string()))?;
        normalize(&mut vector);
        Ok(vector)
    }

    /// Upserts records, embedding any that lack a vector. Returns the
    /// number of rows written.
    pub async fn upsert(&self, records: Vec<IndexedRecord>) -> Result<usize, CoraError> {
        let mut written = 0usize;

        for batch in records.chunks(UPSERT_BATCH) {
            // Embed the texts that arrived without vectors, in one call
            let pending: Vec<String> = batch
                .iter()
                .filter(|r| r.embedding.is_none())
                .map(|r| r.text.clone())
                .collect();
            let mut computed = if pending.is_empty() {
                Vec::new()
            } else {
                self.embedder.embed(&pending).await?
            }
            .into_iter();

            let mut tx = self.pool.begin().await?;

            for record in batch {
                let mut embedding = match &record.embedding {
                    Some(v) => v.clone(),
                    None => computed
                        .next()
                        .ok_or_else(|| CoraError::Embedding("short embed response".to_string()))?,
                };
                normalize(&mut embedding);

                let meta = &record.metadata;
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {COLLECTION}
                        (record_id, text, kind, article_id, app_name, language, title, source_path, chunk_ordinal, embedding)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(record_id) DO UPDATE SET
                        text = excluded.text,
                        kind = excluded.kind,
                        article_id = excluded.article_id,
                        app_name = excluded.app_name,
                        language = excluded.language,
                        title = excluded.title,
                        source_path = excluded.source_path,
                        chunk_ordinal = excluded.chunk_ordinal,
                        embedding = excluded.embedding
                    "#
                ))
                .bind(&record.record_id)
                .bind(&record.text)
                .bind(&meta.kind)
                .bind(&meta.article_id)
                .bind(&meta.app_name)
                .bind(&meta.language)
                .bind(&meta.title)
                .bind(&meta.source_path)
                .bind(meta.chunk_ordinal)
                .bind(vec_to_blob(&embedding))
                .execute(&mut *tx)
                .await?;

                written += 1;
            }

            tx.commit().await?;
        }

        Ok(written)
    }

    /// Returns up to `k` hits ordered by ascending distance, restricted
    /// to rows matching every predicate in `filter`.
    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<Hit>, CoraError> {
        let mut sql = format!(
            "SELECT record_id, text, kind, article_id, app_name, language, title, source_path, chunk_ordinal, embedding FROM {COLLECTION} WHERE 1=1"
        );
        if filter.language.is_some() {
            sql.push_str(" AND language = ?");
        }
        if filter.app_name.is_some() {
            sql.push_str(" AND app_name = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ref language) = filter.language {
            query = query.bind(language);
        }
        if let Some(ref app_name) = filter.app_name {
            query = query.bind(app_name);
        }
        if let Some(ref kind) = filter.kind {
            query = query.bind(kind);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<Hit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let distance = l2_distance_sq(embedding, &stored);
                Hit {
                    record_id: row.get("record_id"),
                    text: row.get("text"),
                    metadata: RecordMetadata {
                        kind: row.get("kind"),
                        article_id: row.get("article_id"),
                        app_name: row.get("app_name"),
                        language: row.get("language"),
                        title: row.get("title"),
                        source_path: row.get("source_path"),
                        chunk_ordinal: row.get("chunk_ordinal"),
                    },
                    distance,
                    similarity: 1.0 / (1.0 + distance),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    pub async fn count(&self) -> Result<i64, CoraError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {COLLECTION}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Destroys the collection and recreates it empty.
    pub async fn reset(&self) -> Result<(), CoraError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {COLLECTION}"))
            .execute(&self.pool)
            .await?;
        migrate(&self.pool).await?;
        Ok(())
    }
}

async fn migrate(pool: &SqlitePool) -> Result<(), CoraError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {COLLECTION} (
            record_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            kind TEXT NOT NULL,
            article_id TEXT,
            app_name TEXT,
            language TEXT NOT NULL,
            title TEXT,
            source_path TEXT,
            chunk_ordinal INTEGER,
            embedding BLOB NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    for column in ["kind", "language", "app_name"] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{COLLECTION}_{column} ON {COLLECTION} ({column})"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Squared L2 distance. Returns the maximum unit-sphere distance (4.0)
/// for mismatched or empty inputs so malformed rows sort last.
pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 4.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::record_id;

    fn make_record(id_suffix: &str, text: &str, language: &str, app: Option<&str>) -> IndexedRecord {
        IndexedRecord {
            record_id: record_id("article", id_suffix, language, 0),
            text: text.to_string(),
            embedding: None,
            metadata: RecordMetadata {
                kind: "article".to_string(),
                article_id: Some(id_suffix.to_string()),
                app_name: app.map(str::to_string),
                language: language.to_string(),
                title: Some(text.split('\n').next().unwrap_or_default().to_string()),
                source_path: None,
                chunk_ordinal: None,
            },
        }
    }

    async fn open_store(dir: &Path) -> VectorStore {
        VectorStore::open(dir, Box::new(HashEmbedder::new(64)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let records = vec![
            make_record("1", "Password reset steps", "en", Some("ana")),
            make_record("2", "SIM activation guide", "en", Some("ana")),
        ];
        let written = store.upsert(records).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let records = vec![
            make_record("1", "Password reset steps", "en", None),
            make_record("1", "Password reset steps", "ar", None),
        ];
        store.upsert(records.clone()).await.unwrap();
        let count_once = store.count().await.unwrap();
        store.upsert(records).await.unwrap();
        assert_eq!(store.count().await.unwrap(), count_once);
    }

    #[tokio::test]
    async fn test_query_filter_conjunction() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .upsert(vec![
                make_record("1", "password reset", "en", Some("ana")),
                make_record("2", "password reset", "ar", Some("ana")),
                make_record("3", "password reset", "en", Some("hakki")),
            ])
            .await
            .unwrap();

        let query = store.embed_query("password reset").await.unwrap();
        let filter = MetadataFilter {
            language: Some("en".to_string()),
            app_name: Some("ana".to_string()),
            kind: None,
        };
        let hits = store.query(&query, 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.article_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_similarity_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .upsert(vec![
                make_record("1", "password reset", "en", None),
                make_record("2", "network signal coverage", "en", None),
            ])
            .await
            .unwrap();

        let query = store.embed_query("password reset").await.unwrap();
        let hits = store.query(&query, 10, &MetadataFilter::none()).await.unwrap();
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!(hit.distance >= 0.0);
            assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
            assert!((hit.similarity - 1.0 / (1.0 + hit.distance)).abs() < 1e-6);
        }
        // Exact text match must rank first
        assert_eq!(hits[0].metadata.article_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_reset_destroys_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .upsert(vec![make_record("1", "anything", "en", None)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_l2_distance_identical_is_zero() {
        let v = vec![0.6f32, 0.8];
        assert!(l2_distance_sq(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_l2_distance_mismatched_lengths() {
        assert_eq!(l2_distance_sq(&[1.0], &[1.0, 0.0]), 4.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0f32, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}

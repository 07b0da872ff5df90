//! Knowledge-base indexer.
//!
//! Walks a data tree and turns two kinds of sources into vector-store
//! records:
//!
//! - **Structured articles** (`*.json`) — each file holds one article or
//!   a list of articles; one record is emitted per non-empty language
//!   variant, with payload `"[Article {id}] [{app}] {title}\n{body}"`.
//! - **Long documents** (`*.pdf`) — text is extracted per page, chunked
//!   by the character-window chunker, and one record is emitted per
//!   chunk with its page span.
//!
//! Files whose name contains `ignored` are skipped. Enumeration is
//! sorted by relative path so batch order is stable across runs, and
//! record ids are deterministic, so running the indexer twice over an
//! unchanged tree leaves the collection unchanged.
//!
//! A malformed file is recorded in the report's error list and must not
//! prevent indexing the rest of the tree.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::chunker::{chunk_pages, PageText};
use crate::config::Config;
use crate::models::{
    record_id, Article, DocumentChunk, IndexedRecord, RecordMetadata, SUPPORTED_LANGUAGES,
};
use crate::store::{VectorStore, UPSERT_BATCH};

/// A per-item failure captured during an index run.
#[derive(Debug, Clone)]
pub struct IndexError {
    pub path: String,
    pub message: String,
}

/// Summary of one index run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_seen: usize,
    pub article_records: usize,
    pub chunk_records: usize,
    pub records_written: usize,
    pub errors: Vec<IndexError>,
}

/// Runs a full index pass over `data_dir`.
///
/// With `reset` the collection is destroyed first; otherwise the run is
/// an additive upsert. Returns the report; only an unrecoverable store
/// error aborts the run.
pub async fn run_index(
    store: &VectorStore,
    config: &Config,
    data_dir: &Path,
    reset: bool,
) -> Result<IndexReport> {
    if reset {
        println!("Resetting vector store...");
        store.reset().await?;
    }

    if !data_dir.exists() {
        anyhow::bail!("Data directory not found: {}", data_dir.display());
    }

    let include_set = build_globset(&["**/*.json", "**/*.pdf"])?;
    let mut report = IndexReport::default();
    let mut buffer: Vec<IndexedRecord> = Vec::new();

    let mut files: Vec<(std::path::PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(data_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(data_dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if !include_set.is_match(&rel_str) {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if file_name.contains("ignored") {
            println!("Skipping: {} (ignored)", rel_str);
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    // Sorted enumeration keeps batch order deterministic
    files.sort_by(|a, b| a.1.cmp(&b.1));

    println!("Indexing directory: {}", data_dir.display());
    println!("  candidate files: {}", files.len());

    for (path, rel_str) in &files {
        report.files_seen += 1;

        let outcome = if rel_str.ends_with(".json") {
            index_json_file(path, rel_str, &mut buffer, &mut report)
        } else {
            index_pdf_file(path, rel_str, config, &mut buffer, &mut report)
        };

        if let Err(e) = outcome {
            println!("  error in {}: {}", rel_str, e);
            report.errors.push(IndexError {
                path: rel_str.clone(),
                message: e.to_string(),
            });
        }

        while buffer.len() >= UPSERT_BATCH {
            let batch: Vec<IndexedRecord> = buffer.drain(..UPSERT_BATCH).collect();
            report.records_written += store.upsert(batch).await?;
        }
    }

    if !buffer.is_empty() {
        report.records_written += store.upsert(std::mem::take(&mut buffer)).await?;
    }

    println!("index run complete");
    println!("  files seen: {}", report.files_seen);
    println!("  article records: {}", report.article_records);
    println!("  chunk records: {}", report.chunk_records);
    println!("  records written: {}", report.records_written);
    if !report.errors.is_empty() {
        println!("  errors ({}):", report.errors.len());
        for error in &report.errors {
            println!("    {}: {}", error.path, error.message);
        }
    }

    Ok(report)
}

/// Parses a JSON article file and buffers one record per non-empty
/// language variant.
fn index_json_file(
    path: &Path,
    rel_str: &str,
    buffer: &mut Vec<IndexedRecord>,
    report: &mut IndexReport,
) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;

    let articles: Vec<Article> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    let mut count = 0usize;
    for article in &articles {
        for language in SUPPORTED_LANGUAGES {
            let body = article.body.get(language);
            if body.trim().is_empty() {
                continue;
            }
            let title = article.title.get(language);
            let payload = format!(
                "[Article {}] [{}] {}\n{}",
                article.id, article.app_name, title, body
            );

            buffer.push(IndexedRecord {
                record_id: record_id("article", &article.id, language, 0),
                text: payload,
                embedding: None,
                metadata: RecordMetadata {
                    kind: "article".to_string(),
                    article_id: Some(article.id.clone()),
                    app_name: Some(article.app_name.clone()),
                    language: language.to_string(),
                    title: if title.is_empty() {
                        None
                    } else {
                        Some(title.to_string())
                    },
                    source_path: None,
                    chunk_ordinal: None,
                },
            });
            count += 1;
        }
    }

    println!("  {}: {} article variants", rel_str, count);
    report.article_records += count;
    Ok(())
}

/// Extracts per-page text from a PDF and buffers one record per chunk.
///
/// Chunk language is `"unknown"`: the indexer runs offline and does not
/// call the language detector.
fn index_pdf_file(
    path: &Path,
    rel_str: &str,
    config: &Config,
    buffer: &mut Vec<IndexedRecord>,
    report: &mut IndexReport,
) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))?;

    let page_texts: Vec<PageText> = pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText { page: i + 1, text })
        .collect();

    let chunks: Vec<DocumentChunk> = chunk_pages(
        &page_texts,
        config.indexing.chunk_size,
        config.indexing.chunk_overlap,
    )
    .into_iter()
    .map(|chunk| DocumentChunk {
        source_path: rel_str.to_string(),
        ordinal: chunk.ordinal,
        text: chunk.text,
        page_start: chunk.page_start as i64,
        page_end: chunk.page_end as i64,
        language: "unknown".to_string(),
    })
    .collect();

    let count = chunks.len();
    for chunk in chunks {
        buffer.push(IndexedRecord {
            record_id: record_id("pdf", &chunk.source_path, &chunk.language, chunk.ordinal),
            text: chunk.text,
            embedding: None,
            metadata: RecordMetadata {
                kind: "pdf".to_string(),
                article_id: None,
                app_name: None,
                language: chunk.language,
                title: None,
                source_path: Some(chunk.source_path),
                chunk_ordinal: Some(chunk.ordinal),
            },
        });
    }

    println!("  {}: {} chunks", rel_str, count);
    report.chunk_records += count;
    Ok(())
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    const ARTICLES: &str = r#"[
        {
            "id": "17",
            "app_name": "ana",
            "title": {"en": "Password reset", "ar": "إعادة تعيين كلمة المرور"},
            "body": {"en": "Open the app and tap forgot password.", "ar": "افتح التطبيق واضغط نسيت كلمة المرور."}
        },
        {
            "id": "18",
            "app_name": "self-care",
            "title": {"en": "eSIM activation"},
            "body": {"en": "Request an eSIM through the app.", "ckb": "داواکاری eSIM بکە لە ئەپەکە."}
        }
    ]"#;

    async fn store_in(dir: &Path) -> VectorStore {
        VectorStore::open(dir, Box::new(HashEmbedder::new(64)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_articles_per_language_variant() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("articles.json"), ARTICLES).unwrap();

        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();

        let report = run_index(&store, &config, &data, false).await.unwrap();
        // Article 17: en + ar; article 18: en + ckb
        assert_eq!(report.article_records, 4);
        assert_eq!(report.records_written, 4);
        assert!(report.errors.is_empty());
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_index_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("articles.json"), ARTICLES).unwrap();

        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();

        run_index(&store, &config, &data, false).await.unwrap();
        let count_once = store.count().await.unwrap();
        run_index(&store, &config, &data, false).await.unwrap();
        assert_eq!(store.count().await.unwrap(), count_once);
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_abort_run() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("articles.json"), ARTICLES).unwrap();
        std::fs::write(data.join("broken.json"), "{not json").unwrap();
        std::fs::write(data.join("fake.pdf"), b"this is not a pdf").unwrap();

        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();

        let report = run_index(&store, &config, &data, false).await.unwrap();
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.article_records, 4);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ignored_files_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("articles_ignored.json"), ARTICLES).unwrap();

        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();

        let report = run_index(&store, &config, &data, false).await.unwrap();
        assert_eq!(report.files_seen, 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_then_reindex() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("articles.json"), ARTICLES).unwrap();

        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();

        run_index(&store, &config, &data, false).await.unwrap();
        let report = run_index(&store, &config, &data, true).await.unwrap();
        assert_eq!(report.records_written, 4);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_missing_data_dir_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp.path().join("store")).await;
        let config = Config::default();
        let missing = tmp.path().join("nope");
        assert!(run_index(&store, &config, &missing, false).await.is_err());
    }
}

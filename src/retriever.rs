//! Semantic retrieval over the vector collection.
//!
//! Translates a natural-language query into ranked, filtered,
//! score-normalized hits:
//!
//! 1. Embed the query via the store's embedding capability.
//! 2. Fetch `max(k, 3)` candidates with the metadata filter applied.
//! 3. Drop hits below the similarity threshold.
//! 4. Return up to `k` hits, descending similarity, ties broken by
//!    ascending record id.
//!
//! The default threshold of 0.3 sits between "barely relevant" (~0.25
//! under the store's normalization) and "strong match" (~0.5); raising
//! it much further collapses recall on the multilingual corpus.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::Config;
use crate::error::CoraError;
use crate::models::Hit;
use crate::store::{MetadataFilter, VectorStore};

pub struct Retriever {
    store: Arc<VectorStore>,
    k: usize,
    threshold: f32,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, config: &Config) -> Self {
        Self {
            store,
            k: config.retrieval.k,
            threshold: config.retrieval.threshold,
        }
    }

    /// Retrieve with explicit `k` and `threshold`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
        threshold: f32,
    ) -> Result<Vec<Hit>, CoraError> {
        let embedding = self.store.embed_query(query).await?;
        let k_raw = k.max(3);
        let mut hits = self.store.query(&embedding, k_raw, filter).await?;

        hits.retain(|hit| hit.similarity >= threshold);
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Retrieve with the configured defaults (`k`, `threshold`).
    pub async fn retrieve_default(
        &self,
        query: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<Hit>, CoraError> {
        self.retrieve(query, self.k, filter, self.threshold).await
    }

    /// Renders hits into the context block consumed by the prompt
    /// assembler. Empty for no hits.
    pub fn format_context(hits: &[Hit]) -> String {
        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(out, "[Source {}] [type={}]", i + 1, hit.metadata.kind);
            if let Some(ref article_id) = hit.metadata.article_id {
                let _ = write!(out, " [article_id={}]", article_id);
            }
            if let Some(ref source_path) = hit.metadata.source_path {
                let _ = write!(out, " [source={}]", source_path);
            }
            let _ = write!(out, " [similarity={:.2}]", hit.similarity);
            out.push('\n');
            out.push_str(&hit.text);
        }
        out
    }

    /// Retrieve and render in one step.
    pub async fn retrieve_and_format(
        &self,
        query: &str,
        filter: &MetadataFilter,
    ) -> Result<String, CoraError> {
        let hits = self.retrieve_default(query, filter).await?;
        Ok(Self::format_context(&hits))
    }

    /// Same pipeline projected to unique article ids in ranked order;
    /// non-article hits are excluded.
    pub async fn article_recommendations(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<String>, CoraError> {
        let mut filter = filter.clone();
        filter.kind = Some("article".to_string());

        let hits = self.retrieve(query, k, &filter, self.threshold).await?;

        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for hit in &hits {
            if let Some(ref article_id) = hit.metadata.article_id {
                if seen.insert(article_id.clone()) {
                    ids.push(article_id.clone());
                }
            }
        }
        Ok(ids)
    }
}

//! Ticket classification.
//!
//! One classification request retrieves context, asks the model for a
//! strict-JSON routing decision, validates the schema, and fails closed:
//! missing keys or a wrong summary language set are a
//! [`CoraError::Validation`], never a silently patched result. Unknown
//! label values pass through unchanged; routing policy lives with the
//! caller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CoraError;
use crate::llm::{GenerateOptions, LlmClient};
use crate::models::{ClassificationResult, SUPPORTED_LANGUAGES};
use crate::prompts;
use crate::retriever::Retriever;
use crate::store::MetadataFilter;

pub struct Classifier {
    retriever: Arc<Retriever>,
    llm: Arc<dyn LlmClient>,
    config: Arc<Config>,
}

impl Classifier {
    pub fn new(retriever: Arc<Retriever>, llm: Arc<dyn LlmClient>, config: Arc<Config>) -> Self {
        Self {
            retriever,
            llm,
            config,
        }
    }

    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, CoraError> {
        let retrieval_ceiling = Duration::from_secs(self.config.retrieval.timeout_secs);
        let context = match tokio::time::timeout(
            retrieval_ceiling,
            self.retriever
                .retrieve_and_format(text, &MetadataFilter::none()),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!(error = %e, "classification retrieval degraded to empty context");
                String::new()
            }
            Err(_) => {
                warn!("classification retrieval ceiling breached");
                String::new()
            }
        };

        let system = prompts::classification_prompt(&context);
        let options = GenerateOptions::classification(&self.config.llm.model);
        let ceiling = Duration::from_secs(self.config.qa.answer_timeout_secs);

        let value =
            match tokio::time::timeout(ceiling, self.llm.generate_json(&system, text, &options))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(CoraError::Timeout("classification")),
            };

        let mut result = validate_classification(value)?;

        // The model may not cite articles; fall back to retrieval-ranked
        // recommendations so the routing decision still carries references.
        if result.recommended_article_ids.is_empty() {
            if let Ok(ids) = self
                .retriever
                .article_recommendations(text, self.config.retrieval.k, &MetadataFilter::none())
                .await
            {
                result.recommended_article_ids = ids;
            }
        }

        info!(
            category = %result.category,
            routing = %result.routing_department,
            sentiment = %result.sentiment,
            "ticket classified"
        );

        Ok(result)
    }
}

/// Validates the model's JSON against the result schema.
///
/// Required: every key present; `summaries` keyed by exactly the
/// supported language set; `recommended_article_ids` a list of strings
/// (numbers are accepted and stringified).
pub fn validate_classification(
    value: serde_json::Value,
) -> Result<ClassificationResult, CoraError> {
    let object = value
        .as_object()
        .ok_or_else(|| CoraError::Validation("classifier output is not a JSON object".into()))?;

    let required = [
        "detected_language",
        "detected_dialect",
        "category",
        "issue_type",
        "routing_department",
        "recommended_article_ids",
        "sentiment",
        "summaries",
    ];
    for key in required {
        if !object.contains_key(key) {
            return Err(CoraError::Validation(format!("missing required key: {}", key)));
        }
    }

    let string_field = |key: &str| -> Result<String, CoraError> {
        object[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoraError::Validation(format!("{} must be a string", key)))
    };

    let ids = object["recommended_article_ids"]
        .as_array()
        .ok_or_else(|| CoraError::Validation("recommended_article_ids must be a list".into()))?;
    let mut recommended_article_ids = Vec::with_capacity(ids.len());
    for id in ids {
        match id {
            serde_json::Value::String(s) => recommended_article_ids.push(s.clone()),
            serde_json::Value::Number(n) => recommended_article_ids.push(n.to_string()),
            _ => {
                return Err(CoraError::Validation(
                    "recommended_article_ids must contain strings".into(),
                ))
            }
        }
    }

    let summaries_object = object["summaries"]
        .as_object()
        .ok_or_else(|| CoraError::Validation("summaries must be an object".into()))?;
    let mut summaries = std::collections::BTreeMap::new();
    for language in SUPPORTED_LANGUAGES {
        let summary = summaries_object
            .get(language)
            .and_then(|s| s.as_str())
            .ok_or_else(|| {
                CoraError::Validation(format!("summaries missing language: {}", language))
            })?;
        summaries.insert(language.to_string(), summary.to_string());
    }
    for key in summaries_object.keys() {
        if !SUPPORTED_LANGUAGES.contains(&key.as_str()) {
            return Err(CoraError::Validation(format!(
                "summaries has unsupported language: {}",
                key
            )));
        }
    }

    Ok(ClassificationResult {
        detected_language: string_field("detected_language")?,
        detected_dialect: string_field("detected_dialect")?,
        category: string_field("category")?,
        issue_type: string_field("issue_type")?,
        routing_department: string_field("routing_department")?,
        recommended_article_ids,
        sentiment: string_field("sentiment")?,
        summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::TokenStream;
    use crate::models::{record_id, IndexedRecord, RecordMetadata};
    use crate::store::VectorStore;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    fn valid_output(ids: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "detected_language": "en",
            "detected_dialect": "",
            "category": "account",
            "issue_type": "login-failure",
            "routing_department": "technical-support",
            "recommended_article_ids": ids,
            "sentiment": "negative",
            "summaries": {
                "en": "Customer cannot log in",
                "ar": "العميل لا يستطيع تسجيل الدخول",
                "ckb": "کڕیار ناتوانێت بچێتە ژوورەوە",
                "kmr": "Mişterî nikare têkeve"
            }
        })
    }

    #[test]
    fn test_validate_accepts_schema() {
        let result = validate_classification(valid_output(serde_json::json!(["17"]))).unwrap();
        assert_eq!(result.category, "account");
        assert_eq!(result.recommended_article_ids, vec!["17"]);
        assert_eq!(result.summaries.len(), 4);
    }

    #[test]
    fn test_validate_stringifies_numeric_ids() {
        let result = validate_classification(valid_output(serde_json::json!([17, "21"]))).unwrap();
        assert_eq!(result.recommended_article_ids, vec!["17", "21"]);
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let mut output = valid_output(serde_json::json!([]));
        output.as_object_mut().unwrap().remove("sentiment");
        assert!(matches!(
            validate_classification(output),
            Err(CoraError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_summary_language() {
        let mut output = valid_output(serde_json::json!([]));
        output["summaries"].as_object_mut().unwrap().remove("kmr");
        assert!(matches!(
            validate_classification(output),
            Err(CoraError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_extra_summary_language() {
        let mut output = valid_output(serde_json::json!([]));
        output["summaries"]["ku"] = serde_json::json!("extra");
        assert!(matches!(
            validate_classification(output),
            Err(CoraError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_passes_unknown_enum_values_through() {
        let mut output = valid_output(serde_json::json!([]));
        output["category"] = serde_json::json!("quantum-billing");
        let result = validate_classification(output).unwrap();
        assert_eq!(result.category, "quantum-billing");
    }

    struct JsonLlm {
        output: serde_json::Value,
    }

    #[async_trait]
    impl LlmClient for JsonLlm {
        async fn generate(
            &self,
            _system: &str,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<String, CoraError> {
            Ok(self.output.to_string())
        }

        async fn stream(
            &self,
            _system: &str,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<TokenStream, CoraError> {
            Ok(futures_util::stream::iter(vec![Ok(self.output.to_string())]).boxed())
        }
    }

    #[tokio::test]
    async fn test_classify_backfills_recommendations_from_retrieval() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::default());
        let store = VectorStore::open(tmp.path(), Box::new(HashEmbedder::new(128)))
            .await
            .unwrap();
        store
            .upsert(vec![IndexedRecord {
                record_id: record_id("article", "17", "en", 0),
                text: "cannot login password reset".to_string(),
                embedding: None,
                metadata: RecordMetadata {
                    kind: "article".to_string(),
                    article_id: Some("17".to_string()),
                    language: "en".to_string(),
                    ..Default::default()
                },
            }])
            .await
            .unwrap();
        let retriever = Arc::new(Retriever::new(Arc::new(store), &config));
        let llm = Arc::new(JsonLlm {
            output: valid_output(serde_json::json!([])),
        });
        let classifier = Classifier::new(retriever, llm, config);

        let result = classifier.classify("I cannot login").await.unwrap();
        assert_eq!(result.recommended_article_ids, vec!["17"]);
    }
}

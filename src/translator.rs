//! Client for the external translation service.
//!
//! Translation is best-effort decoration: every failure path (transport
//! error, timeout, junk payload) returns the input text unchanged and is
//! reported as a no-op, never as an error the caller has to handle. The
//! request timeout is the hard ceiling configured by
//! `translator.timeout_secs` (default 5 s).
//!
//! Wire contract: `POST {base}/translate` with `{text, source, target}`,
//! responding `{translated_text, source_lang}`. `source = "auto"`
//! performs language detection.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::TranslatorConfig;

/// Outcome of a translation call. `translated` is false when the service
/// no-opped and `text` is the input unchanged.
#[derive(Debug, Clone)]
pub struct Translation {
    pub text: String,
    pub detected: Option<String>,
    pub translated: bool,
}

pub struct Translator {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: Option<String>,
    source_lang: Option<String>,
}

impl Translator {
    pub fn new(config: &TranslatorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Detect the language of `text`. Returns `None` on any failure.
    pub async fn detect(&self, text: &str) -> Option<String> {
        let outcome = self.call(text, "auto", "en").await?;
        outcome.source_lang
    }

    /// Translate `text` from `source` to `target`. Falls back to the
    /// input unchanged on any failure.
    pub async fn translate(&self, text: &str, source: &str, target: &str) -> Translation {
        match self.call(text, source, target).await {
            Some(response) => {
                let detected = response.source_lang;
                match response.translated_text {
                    Some(translated) if !translated.trim().is_empty() => Translation {
                        text: translated,
                        detected,
                        translated: true,
                    },
                    _ => Translation {
                        text: text.to_string(),
                        detected,
                        translated: false,
                    },
                }
            }
            None => Translation {
                text: text.to_string(),
                detected: None,
                translated: false,
            },
        }
    }

    async fn call(&self, text: &str, source: &str, target: &str) -> Option<TranslateResponse> {
        let url = format!("{}/translate", self.base_url);
        let body = serde_json::json!({
            "text": text,
            "source": source,
            "target": target,
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "translator unreachable, falling through");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), "translator rejected request");
            return None;
        }

        match response.json::<TranslateResponse>().await {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(error = %e, "translator returned junk");
                None
            }
        }
    }
}

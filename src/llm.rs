//! Uniform contract over the generative backend.
//!
//! [`LlmClient`] exposes the two shapes the pipeline needs: one-shot
//! generation (with a strict-JSON variant that retries once on parse
//! failure) and token streaming. [`OllamaClient`] implements it against
//! an Ollama-compatible `/api/generate` endpoint.
//!
//! The streaming response is newline-delimited JSON; chunks are split on
//! line boundaries from the raw byte stream, so a token is emitted as
//! soon as its line is complete. Dropping the stream drops the
//! underlying connection, which is how caller cancellation propagates.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;

use crate::error::CoraError;

/// Sampling options for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: Option<u32>,
    pub num_predict: Option<u32>,
    /// Request strict-JSON output mode from the backend.
    pub json: bool,
}

impl GenerateOptions {
    /// Deterministic, low-temperature settings for classification.
    pub fn classification(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: 0.4,
            top_p: 0.15,
            seed: Some(42),
            num_predict: Some(256),
            json: true,
        }
    }

    /// Conversational settings for Q&A.
    pub fn qa(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: 0.3,
            top_p: 0.85,
            seed: None,
            num_predict: Some(300),
            json: false,
        }
    }
}

/// A finite, non-restartable sequence of token chunks.
pub type TokenStream = BoxStream<'static, Result<String, CoraError>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One-shot generation; returns the full completion text.
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, CoraError>;

    /// Token streaming; the stream ends at the model's stop condition.
    async fn stream(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TokenStream, CoraError>;

    /// Strict-JSON generation: forces JSON mode, retries once with the
    /// same prompt on parse failure, then fails with [`CoraError::Llm`].
    async fn generate_json(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<serde_json::Value, CoraError> {
        let mut opts = options.clone();
        opts.json = true;

        let mut last_err = String::new();
        for _attempt in 0..2 {
            let text = self.generate(system, prompt, &opts).await?;
            match serde_json::from_str(text.trim()) {
                Ok(value) => return Ok(value),
                Err(e) => last_err = format!("{} (output: {:.120})", e, text),
            }
        }
        Err(CoraError::Llm(format!(
            "model did not produce valid JSON after retry: {}",
            last_err
        )))
    }
}

/// Client for an Ollama-compatible generation endpoint.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaClient {
    /// No client-level timeout: streaming responses outlive any fixed
    /// ceiling, and the engine applies its own per-subsystem deadlines.
    pub fn new(host: &str) -> Self {
        Self {
            base_url: host.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> serde_json::Value {
        let mut sampling = serde_json::json!({
            "temperature": options.temperature,
            "top_p": options.top_p,
        });
        if let Some(seed) = options.seed {
            sampling["seed"] = seed.into();
        }
        if let Some(num_predict) = options.num_predict {
            sampling["num_predict"] = num_predict.into();
        }

        let mut body = serde_json::json!({
            "model": options.model,
            "system": system,
            "prompt": prompt,
            "stream": stream,
            "options": sampling,
        });
        if options.json {
            body["format"] = "json".into();
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, CoraError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoraError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoraError::Llm(format!(
                "generation backend error {}: {}",
                status, text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, CoraError> {
        let body = self.request_body(system, prompt, options, false);
        let response = self.send(&body).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoraError::Llm(e.to_string()))?;
        Ok(parsed.response.trim().to_string())
    }

    async fn stream(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TokenStream, CoraError> {
        let body = self.request_body(system, prompt, options, true);
        let response = self.send(&body).await?;

        struct State {
            bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
            buffer: String,
            pending: VecDeque<String>,
            done: bool,
        }

        let state = State {
            bytes: response.bytes_stream().boxed(),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }

                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        st.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = st.buffer.find('\n') {
                            let line = st.buffer[..pos].trim().to_string();
                            st.buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<StreamChunk>(&line) {
                                Ok(parsed) => {
                                    if !parsed.response.is_empty() {
                                        st.pending.push_back(parsed.response);
                                    }
                                    if parsed.done {
                                        st.done = true;
                                        break;
                                    }
                                }
                                Err(e) => {
                                    st.done = true;
                                    return Some((
                                        Err(CoraError::Llm(format!(
                                            "malformed stream chunk: {}",
                                            e
                                        ))),
                                        st,
                                    ));
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(CoraError::Llm(e.to_string())), st));
                    }
                    None => {
                        st.done = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_default_option_sets() {
        let classify = GenerateOptions::classification("qwen2.5:7b");
        assert!((classify.temperature - 0.4).abs() < f32::EPSILON);
        assert!((classify.top_p - 0.15).abs() < f32::EPSILON);
        assert_eq!(classify.seed, Some(42));
        assert_eq!(classify.num_predict, Some(256));
        assert!(classify.json);

        let qa = GenerateOptions::qa("qwen2.5:7b");
        assert!((qa.temperature - 0.3).abs() < f32::EPSILON);
        assert!((qa.top_p - 0.85).abs() < f32::EPSILON);
        assert!(qa.seed.is_none());
        assert!(!qa.json);
    }

    #[tokio::test]
    async fn test_generate_parses_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"model": "m", "stream": false}"#);
            then.status(200)
                .json_body(serde_json::json!({"response": "  hello there  ", "done": true}));
        });

        let client = OllamaClient::new(&server.url(""));
        let text = client
            .generate("sys", "prompt", &GenerateOptions::qa("m"))
            .await
            .unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn test_generate_json_retries_once_then_fails() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .json_body(serde_json::json!({"response": "definitely not json"}));
        });

        let client = OllamaClient::new(&server.url(""));
        let result = client
            .generate_json("sys", "prompt", &GenerateOptions::classification("m"))
            .await;
        assert!(matches!(result, Err(CoraError::Llm(_))));
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn test_generate_json_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"format": "json"}"#);
            then.status(200)
                .json_body(serde_json::json!({"response": "{\"category\": \"network\"}"}));
        });

        let client = OllamaClient::new(&server.url(""));
        let value = client
            .generate_json("sys", "prompt", &GenerateOptions::classification("m"))
            .await
            .unwrap();
        assert_eq!(value["category"], "network");
    }

    #[tokio::test]
    async fn test_stream_emits_tokens_until_done() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"stream": true}"#);
            then.status(200).body(concat!(
                "{\"response\": \"Try \", \"done\": false}\n",
                "{\"response\": \"restarting\", \"done\": false}\n",
                "{\"response\": \".\", \"done\": true}\n",
            ));
        });

        let client = OllamaClient::new(&server.url(""));
        let mut stream = client
            .stream("sys", "prompt", &GenerateOptions::qa("m"))
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(item) = stream.next().await {
            tokens.push(item.unwrap());
        }
        assert_eq!(tokens.join(""), "Try restarting.");
    }

    #[tokio::test]
    async fn test_backend_error_surfaces_as_llm_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500).body("model blew up");
        });

        let client = OllamaClient::new(&server.url(""));
        let result = client
            .generate("sys", "prompt", &GenerateOptions::qa("m"))
            .await;
        assert!(matches!(result, Err(CoraError::Llm(_))));
    }
}

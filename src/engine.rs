//! Q&A orchestration.
//!
//! One request flows detect → retrieve → assemble → generate → translate
//! out → commit turns → project sources. Two entry points share the
//! pipeline: [`QaEngine::ask`] (blocking) and [`QaEngine::ask_stream`]
//! (token streaming with a terminal payload).
//!
//! # Degradation
//!
//! Retrieval failures and timeouts degrade to the empty-context path:
//! the caller still gets a 200 with the canned no-information answer and
//! `confidence = "low"`. Generation failures surface as
//! [`CoraError::Llm`] on the blocking path and as a safe fallback final
//! event on the streaming path. Translation never fails a request.
//!
//! # Session ordering
//!
//! The user/assistant pair is committed only after the full answer text
//! has been observed (stream fully drained). A client disconnect mid-
//! stream therefore leaves the session untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CoraError;
use crate::llm::{GenerateOptions, LlmClient};
use crate::models::{AnswerResult, Hit, SourceRef};
use crate::prompts;
use crate::retriever::Retriever;
use crate::session::SessionManager;
use crate::store::MetadataFilter;
use crate::translator::Translator;

/// Parameters of one Q&A request.
#[derive(Debug, Clone)]
pub struct AskParams {
    pub question: String,
    pub language: Option<String>,
    pub app_name: Option<String>,
    pub session_id: Option<String>,
}

/// Events emitted on the streaming path: token chunks, then exactly one
/// terminal payload.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Final(AnswerResult),
}

pub struct QaEngine {
    retriever: Arc<Retriever>,
    translator: Arc<Translator>,
    sessions: Arc<SessionManager>,
    llm: Arc<dyn LlmClient>,
    config: Arc<Config>,
}

impl QaEngine {
    pub fn new(
        retriever: Arc<Retriever>,
        translator: Arc<Translator>,
        sessions: Arc<SessionManager>,
        llm: Arc<dyn LlmClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            retriever,
            translator,
            sessions,
            llm,
            config,
        }
    }

    /// Answer a question, blocking until the full result is available.
    pub async fn ask(&self, params: AskParams) -> Result<AnswerResult, CoraError> {
        let (session_id, is_new) = self.sessions.get_or_create(params.session_id.as_deref());
        let language = self.resolve_language(&params).await;

        info!(
            session_id = %session_id,
            new_session = is_new,
            language = %language,
            active_sessions = self.sessions.active_count(),
            question = %params.question,
            "Q&A request"
        );

        let hits = self.retrieve_degraded(&params).await;

        if hits.is_empty() {
            let answer = self.localize(prompts::NO_INFO_ANSWER, &language).await;
            self.sessions
                .append_exchange(&session_id, &params.question, &answer);
            return Ok(AnswerResult {
                answer,
                sources: Vec::new(),
                confidence: "low".to_string(),
                retrieved_docs: 0,
                session_id,
                language,
            });
        }

        let confidence = confidence_label(&hits).to_string();
        let (system, user) = self.assemble(&session_id, &params.question, &hits);
        let options = GenerateOptions::qa(&self.config.llm.model);

        let wall_clock = Duration::from_secs(self.config.qa.answer_timeout_secs);
        let english =
            match tokio::time::timeout(wall_clock, self.llm.generate(&system, &user, &options))
                .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(session_id = %session_id, "Q&A wall-clock ceiling breached");
                    let answer = self.localize(prompts::FALLBACK_ANSWER, &language).await;
                    return Ok(AnswerResult {
                        answer,
                        sources: Vec::new(),
                        confidence: "low".to_string(),
                        retrieved_docs: hits.len(),
                        session_id,
                        language,
                    });
                }
            };

        let answer = self.localize(&english, &language).await;
        self.sessions
            .append_exchange(&session_id, &params.question, &answer);

        info!(
            session_id = %session_id,
            confidence = %confidence,
            retrieved_docs = hits.len(),
            "Q&A answered"
        );

        Ok(AnswerResult {
            answer,
            sources: project_sources(&hits),
            confidence,
            retrieved_docs: hits.len(),
            session_id,
            language,
        })
    }

    /// Streaming variant. Returns the resolved session id up front (for
    /// the `X-Session-ID` header) plus the event stream. Dropping the
    /// stream cancels generation and skips the session commit.
    pub fn ask_stream(self: Arc<Self>, params: AskParams) -> (String, ReceiverStream<StreamEvent>) {
        let (session_id, _) = self.sessions.get_or_create(params.session_id.as_deref());
        let (tx, rx) = mpsc::channel(32);

        let engine = Arc::clone(&self);
        let sid = session_id.clone();
        tokio::spawn(async move {
            engine.run_stream(params, sid, tx).await;
        });

        (session_id, ReceiverStream::new(rx))
    }

    async fn run_stream(&self, params: AskParams, session_id: String, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        let language = self.resolve_language(&params).await;
        let hits = self.retrieve_degraded(&params).await;

        if hits.is_empty() {
            let answer = self.localize(prompts::NO_INFO_ANSWER, &language).await;
            if tx.send(StreamEvent::Chunk(answer.clone())).await.is_err() {
                return;
            }
            self.sessions
                .append_exchange(&session_id, &params.question, &answer);
            let _ = tx
                .send(StreamEvent::Final(AnswerResult {
                    answer,
                    sources: Vec::new(),
                    confidence: "low".to_string(),
                    retrieved_docs: 0,
                    session_id,
                    language,
                }))
                .await;
            return;
        }

        let confidence = confidence_label(&hits).to_string();
        let (system, user) = self.assemble(&session_id, &params.question, &hits);
        let options = GenerateOptions::qa(&self.config.llm.model);

        if is_english(&language) {
            self.stream_english(
                params, session_id, language, hits, confidence, system, user, options, started, tx,
            )
            .await;
        } else {
            // Token-level streaming would stream the wrong language here:
            // generate the full English answer, translate, emit one chunk.
            self.stream_translated(
                params, session_id, language, hits, confidence, system, user, options, tx,
            )
            .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_english(
        &self,
        params: AskParams,
        session_id: String,
        language: String,
        hits: Vec<Hit>,
        confidence: String,
        system: String,
        user: String,
        options: GenerateOptions,
        started: Instant,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut stream = match self.llm.stream(&system, &user, &options).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "stream setup failed");
                let _ = tx
                    .send(StreamEvent::Final(self.fallback_result(
                        &session_id,
                        &language,
                        hits.len(),
                    )))
                    .await;
                return;
            }
        };

        use futures_util::StreamExt;
        let idle = Duration::from_secs(self.config.qa.stream_idle_timeout_secs);
        let wall_clock = Duration::from_secs(self.config.qa.answer_timeout_secs);
        let mut full = String::new();

        loop {
            let next = tokio::time::timeout(idle, stream.next()).await;
            match next {
                Err(_) => {
                    warn!(session_id = %session_id, "token inactivity ceiling breached");
                    let _ = tx
                        .send(StreamEvent::Final(self.fallback_result(
                            &session_id,
                            &language,
                            hits.len(),
                        )))
                        .await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(Ok(token))) => {
                    full.push_str(&token);
                    if tx.send(StreamEvent::Chunk(token)).await.is_err() {
                        // Client disconnected: drop the stream (closing the
                        // backend connection) without committing the turn.
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "generation failed mid-stream");
                    let _ = tx
                        .send(StreamEvent::Final(self.fallback_result(
                            &session_id,
                            &language,
                            hits.len(),
                        )))
                        .await;
                    return;
                }
            }

            if started.elapsed() > wall_clock {
                warn!(session_id = %session_id, "Q&A wall-clock ceiling breached mid-stream");
                let _ = tx
                    .send(StreamEvent::Final(self.fallback_result(
                        &session_id,
                        &language,
                        hits.len(),
                    )))
                    .await;
                return;
            }
        }

        self.sessions
            .append_exchange(&session_id, &params.question, &full);
        let _ = tx
            .send(StreamEvent::Final(AnswerResult {
                answer: full,
                sources: project_sources(&hits),
                confidence,
                retrieved_docs: hits.len(),
                session_id,
                language,
            }))
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_translated(
        &self,
        params: AskParams,
        session_id: String,
        language: String,
        hits: Vec<Hit>,
        confidence: String,
        system: String,
        user: String,
        options: GenerateOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let wall_clock = Duration::from_secs(self.config.qa.answer_timeout_secs);
        let english =
            match tokio::time::timeout(wall_clock, self.llm.generate(&system, &user, &options))
                .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(error = %e, "generation failed");
                    let _ = tx
                        .send(StreamEvent::Final(self.fallback_result(
                            &session_id,
                            &language,
                            hits.len(),
                        )))
                        .await;
                    return;
                }
                Err(_) => {
                    warn!(session_id = %session_id, "Q&A wall-clock ceiling breached");
                    let _ = tx
                        .send(StreamEvent::Final(self.fallback_result(
                            &session_id,
                            &language,
                            hits.len(),
                        )))
                        .await;
                    return;
                }
            };

        let answer = self.localize(&english, &language).await;
        if tx.send(StreamEvent::Chunk(answer.clone())).await.is_err() {
            return;
        }
        self.sessions
            .append_exchange(&session_id, &params.question, &answer);
        let _ = tx
            .send(StreamEvent::Final(AnswerResult {
                answer,
                sources: project_sources(&hits),
                confidence,
                retrieved_docs: hits.len(),
                session_id,
                language,
            }))
            .await;
    }

    /// Language resolution: explicit parameter wins, then detection
    /// (bounded by the translator's own timeout), then `"en"`.
    async fn resolve_language(&self, params: &AskParams) -> String {
        if let Some(ref language) = params.language {
            if !language.trim().is_empty() {
                return language.trim().to_lowercase();
            }
        }
        self.translator
            .detect(&params.question)
            .await
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|| "en".to_string())
    }

    /// Retrieval with its 2 s ceiling; errors and timeouts degrade to the
    /// empty-context path instead of failing the request.
    async fn retrieve_degraded(&self, params: &AskParams) -> Vec<Hit> {
        let filter = MetadataFilter {
            app_name: params.app_name.clone(),
            ..MetadataFilter::none()
        };
        let ceiling = Duration::from_secs(self.config.retrieval.timeout_secs);

        match tokio::time::timeout(
            ceiling,
            self.retriever.retrieve_default(&params.question, &filter),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "retrieval degraded to empty context");
                Vec::new()
            }
            Err(_) => {
                warn!("retrieval ceiling breached, degraded to empty context");
                Vec::new()
            }
        }
    }

    /// Builds the (system, user) prompt pair from context and a history
    /// snapshot taken under the session lock.
    fn assemble(&self, session_id: &str, question: &str, hits: &[Hit]) -> (String, String) {
        let context = Retriever::format_context(hits);
        let history = self
            .sessions
            .history(session_id, self.config.session.max_turns);
        let system = prompts::qa_system_prompt(&context);
        let user = prompts::qa_user_prompt(&prompts::render_history(&history), question);
        (system, user)
    }

    /// Best-effort translation of an English answer into the session
    /// language.
    async fn localize(&self, english: &str, language: &str) -> String {
        if is_english(language) {
            return english.to_string();
        }
        self.translator.translate(english, "en", language).await.text
    }

    fn fallback_result(&self, session_id: &str, language: &str, retrieved: usize) -> AnswerResult {
        AnswerResult {
            answer: prompts::FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            confidence: "low".to_string(),
            retrieved_docs: retrieved,
            session_id: session_id.to_string(),
            language: language.to_string(),
        }
    }
}

fn is_english(language: &str) -> bool {
    matches!(language, "en" | "english" | "auto" | "")
}

/// Confidence from the top similarity: `>= 0.8` high, `>= 0.6` medium,
/// else low.
fn confidence_label(hits: &[Hit]) -> &'static str {
    let top = hits
        .iter()
        .map(|h| h.similarity)
        .fold(f32::NEG_INFINITY, f32::max);
    if top >= 0.8 {
        "high"
    } else if top >= 0.6 {
        "medium"
    } else {
        "low"
    }
}

/// Projects hits into the response source list. Articles are deduplicated
/// by id; every entry corresponds to a hit that was placed in the prompt.
fn project_sources(hits: &[Hit]) -> Vec<SourceRef> {
    let mut seen_articles = std::collections::HashSet::new();
    let mut sources = Vec::new();

    for hit in hits {
        let similarity = round3(hit.similarity);
        if hit.metadata.kind == "article" {
            if let Some(ref article_id) = hit.metadata.article_id {
                if !seen_articles.insert(article_id.clone()) {
                    continue;
                }
            }
            sources.push(SourceRef {
                kind: "article".to_string(),
                article_id: hit.metadata.article_id.clone(),
                title: hit.metadata.title.clone(),
                app: hit.metadata.app_name.clone(),
                file: None,
                similarity,
            });
        } else {
            sources.push(SourceRef {
                kind: hit.metadata.kind.clone(),
                article_id: None,
                title: None,
                app: None,
                file: hit.metadata.source_path.clone(),
                similarity,
            });
        }
    }

    sources
}

fn round3(value: f32) -> f64 {
    (value as f64 * 1000.0).round() / 1000.0
}

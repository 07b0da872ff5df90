//! # Cora
//!
//! **A multilingual RAG question-answering and ticket-classification
//! service for telecom customer support.**
//!
//! Cora ingests a heterogeneous knowledge base (structured multilingual
//! articles and long PDF documents), indexes it into a semantic vector
//! store, and exposes two HTTP operations: answer a customer question
//! conversationally with source attribution, and classify a support
//! ticket into a routing decision with recommended articles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │  data tree   │──▶│   Indexer     │──▶│ Vector store  │
//! │ JSON + PDF   │   │ parse+chunk   │   │ SQLite + ANN  │
//! └──────────────┘   └───────────────┘   └──────┬────────┘
//!                                               │
//!                    ┌──────────────────────────┤
//!                    ▼                          ▼
//!              ┌──────────┐              ┌────────────┐
//!              │Classifier│              │ Q&A engine │──▶ sessions
//!              └────┬─────┘              └─────┬──────┘    translator
//!                   │            LLM backend   │
//!                   └──────────────┬───────────┘
//!                                  ▼
//!                            HTTP (Axum)
//! ```
//!
//! ## Request Flow
//!
//! 1. The **indexer** ([`indexer`]) walks the data tree, parses articles
//!    and PDFs, chunks long text ([`chunker`]), and upserts
//!    [`models::IndexedRecord`]s idempotently into the **store**
//!    ([`store`]), embedding payloads via the **embedding provider**
//!    ([`embedding`]).
//! 2. The **retriever** ([`retriever`]) turns a question into ranked,
//!    filtered hits with normalized similarity.
//! 3. The **Q&A engine** ([`engine`]) orchestrates detection
//!    ([`translator`]), retrieval, prompt assembly ([`prompts`]),
//!    session history ([`session`]), streaming generation ([`llm`]), and
//!    source attribution.
//! 4. The **classifier** ([`classifier`]) produces a validated routing
//!    decision in strict-JSON mode.
//! 5. Everything is served by the **HTTP boundary** ([`server`]) and the
//!    `cora` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! cora index --reset          # build the knowledge base from ./data
//! cora index --stats          # inspect the collection
//! cora serve                  # start the HTTP service on :8001
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration and validation |
//! | [`error`] | Failure taxonomy with per-kind propagation policy |
//! | [`models`] | Core data types: `Article`, `IndexedRecord`, `Hit`, results |
//! | [`store`] | Vector collection: idempotent upsert, filtered ANN query |
//! | [`embedding`] | Embedding provider trait and backends |
//! | [`chunker`] | Deterministic character-window chunker with page spans |
//! | [`indexer`] | Data-tree walk, article/PDF parsing, batch upsert |
//! | [`retriever`] | Ranked, threshold-gated semantic retrieval |
//! | [`translator`] | Best-effort language detection and translation |
//! | [`session`] | TTL-bounded in-memory dialogue state |
//! | [`prompts`] | Q&A and classification prompt assembly, safety rules |
//! | [`llm`] | Generation backend contract: strict JSON and token streaming |
//! | [`engine`] | Q&A orchestration with timeouts and degradation |
//! | [`classifier`] | Ticket classification with fail-closed validation |
//! | [`server`] | Axum HTTP boundary with NDJSON streaming |

pub mod chunker;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod retriever;
pub mod server;
pub mod session;
pub mod store;
pub mod translator;

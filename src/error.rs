//! Error taxonomy for the Cora pipeline.
//!
//! Each variant corresponds to one failure class with its own propagation
//! policy (see the server module for the HTTP mapping):
//!
//! | Variant | Recovery |
//! |---------|----------|
//! | `Storage` / `Embedding` | retrieval degrades to the empty-context path |
//! | `Translator` | absorbed locally; translation is best-effort |
//! | `Llm` | HTTP 500 with an opaque message |
//! | `Validation` | HTTP 500 with an opaque message |
//! | `Timeout` | 504 for classification; safe fallback answer for Q&A |

/// Failure classes surfaced by the Cora subsystems.
#[derive(Debug, Clone)]
pub enum CoraError {
    /// Vector store unreachable or rejected a call.
    Storage(String),
    /// Embedding backend failure.
    Embedding(String),
    /// Translator unreachable or returned junk. Always recovered locally.
    Translator(String),
    /// Generation failed, including JSON-parse failure after one retry.
    Llm(String),
    /// Classifier output missing required schema keys.
    Validation(String),
    /// A per-subsystem ceiling was breached; carries the subsystem name.
    Timeout(&'static str),
}

impl std::fmt::Display for CoraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoraError::Storage(e) => write!(f, "vector store error: {}", e),
            CoraError::Embedding(e) => write!(f, "embedding error: {}", e),
            CoraError::Translator(e) => write!(f, "translator error: {}", e),
            CoraError::Llm(e) => write!(f, "LLM error: {}", e),
            CoraError::Validation(e) => write!(f, "validation error: {}", e),
            CoraError::Timeout(subsystem) => write!(f, "{} timed out", subsystem),
        }
    }
}

impl std::error::Error for CoraError {}

impl From<sqlx::Error> for CoraError {
    fn from(e: sqlx::Error) -> Self {
        CoraError::Storage(e.to_string())
    }
}

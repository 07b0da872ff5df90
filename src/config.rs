use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub qa: QaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory owned by the vector store engine.
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cora_store"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8001
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of the Ollama-compatible backend.
    #[serde(default = "default_llm_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            host: default_llm_host(),
            model: default_model(),
        }
    }
}

fn default_llm_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslatorConfig {
    #[serde(default = "default_translator_url")]
    pub url: String,
    #[serde(default = "default_translator_timeout")]
    pub timeout_secs: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            url: default_translator_url(),
            timeout_secs: default_translator_timeout(),
        }
    }
}

fn default_translator_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_translator_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"ollama"` (HTTP backend) or `"hash"` (offline, deterministic).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "paraphrase-multilingual".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            threshold: default_threshold(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_threshold() -> f32 {
    0.3
}
fn default_retrieval_timeout() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_session_ttl() -> u64 {
    1800
}
fn default_max_turns() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct QaConfig {
    /// Total wall-clock ceiling for one Q&A request.
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_secs: u64,
    /// Ceiling on token inactivity while streaming.
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            answer_timeout_secs: default_answer_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

fn default_answer_timeout() -> u64 {
    60
}
fn default_stream_idle_timeout() -> u64 {
    30
}

/// Loads configuration from a TOML file, then applies environment
/// overrides and validates.
///
/// A missing file is not an error: every setting has a default, so the
/// service can be configured purely through the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    if config.indexing.chunk_size == 0 {
        anyhow::bail!("indexing.chunk_size must be > 0");
    }
    if config.indexing.chunk_overlap >= config.indexing.chunk_size {
        anyhow::bail!("indexing.chunk_overlap must be < indexing.chunk_size");
    }
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be ollama or hash.",
            other
        ),
    }
    if config.session.max_turns == 0 {
        anyhow::bail!("session.max_turns must be >= 1");
    }

    Ok(config)
}

/// Environment variables override the file; each maps to one setting.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        config.llm.host = host;
    }
    if let Ok(model) = std::env::var("MODEL_NAME") {
        config.llm.model = model;
    }
    if let Ok(url) = std::env::var("TRANSLATOR_API_URL") {
        config.translator.url = url;
    }
    if let Ok(secs) = parse_env("TRANSLATOR_TIMEOUT") {
        config.translator.timeout_secs = secs;
    }
    if let Ok(dir) = std::env::var("CORA_STORE_DIR") {
        config.store.dir = PathBuf::from(dir);
    }
    if let Ok(ttl) = parse_env("SESSION_TTL_SECONDS") {
        config.session.ttl_secs = ttl;
    }
    if let Ok(turns) = parse_env("MAX_TURNS") {
        config.session.max_turns = turns;
    }
    if let Ok(port) = parse_env("CORA_PORT") {
        config.server.port = port;
    }
    if let Ok(provider) = std::env::var("CORA_EMBEDDING_PROVIDER") {
        config.embedding.provider = provider;
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<T, ()> {
    std::env::var(name)
        .map_err(|_| ())
        .and_then(|v| v.parse::<T>().map_err(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.indexing.chunk_size, 1000);
        assert_eq!(config.indexing.chunk_overlap, 150);
        assert_eq!(config.retrieval.k, 3);
        assert!((config.retrieval.threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.session.ttl_secs, 1800);
        assert_eq!(config.session.max_turns, 20);
        assert_eq!(config.translator.timeout_secs, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/cora.toml")).unwrap();
        assert_eq!(config.server.port, 8001);
    }

    #[test]
    fn test_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cora.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9321

[retrieval]
threshold = 0.5
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9321);
        assert!((config.retrieval.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.k, 3);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cora.toml");
        std::fs::write(
            &path,
            r#"
[indexing]
chunk_size = 100
chunk_overlap = 100
"#,
        )
        .unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_embedding_provider_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cora.toml");
        std::fs::write(&path, "[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}

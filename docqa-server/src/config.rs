//! Server configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docqa_rag::nvidia::{DEFAULT_RERANK_MODEL, DEFAULT_RERANK_URL};
use docqa_rag::openai::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
use docqa_rag::{DEFAULT_SYSTEM_INSTRUCTION, RagConfig, RagError, Result, RetryPolicy};

use crate::telemetry::LogFormat;

/// Everything the server binary needs to start.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory uploaded files are written to.
    pub docs_dir: PathBuf,
    /// Where the index snapshot lives; `None` disables snapshotting.
    pub snapshot_path: Option<PathBuf>,
    /// Restore the snapshot at startup when it exists.
    pub load_snapshot: bool,
    pub cors_origin: String,
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
    pub rag: RagConfig,
    pub retry: RetryPolicy,
    pub services: ServiceConfig,
    pub system_instruction: String,
}

/// Endpoints and models of the external services.
#[derive(Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_batch_size: usize,
    pub chat_base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub rerank_url: String,
    pub rerank_model: String,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &"<redacted>")
            .field("embedding_base_url", &self.embedding_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .field("chat_base_url", &self.chat_base_url)
            .field("chat_model", &self.chat_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("rerank_url", &self.rerank_url)
            .field("rerank_model", &self.rerank_model)
            .finish()
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `NVIDIA_API_KEY` is missing, a
    /// numeric variable does not parse, or the retrieval parameters are
    /// inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env
            .string("NVIDIA_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RagError::ConfigError("NVIDIA_API_KEY must be set".to_string()))?;

        let defaults = RagConfig::default();
        let rag = RagConfig::builder()
            .chunk_size(env.parse("DOCQA_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size))
            .chunk_overlap(env.parse("DOCQA_CHUNK_OVERLAP")?.unwrap_or(defaults.chunk_overlap))
            .candidate_count(env.parse("DOCQA_CANDIDATES")?.unwrap_or(defaults.candidate_count))
            .context_size(env.parse("DOCQA_CONTEXT_SIZE")?.unwrap_or(defaults.context_size));
        let rag = match env.parse::<f32>("DOCQA_MIN_SIMILARITY")? {
            Some(threshold) => rag.min_similarity(threshold),
            None => rag,
        }
        .build()?;

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env.parse("DOCQA_RETRY_ATTEMPTS")?.unwrap_or(default_retry.max_attempts),
            base_delay: env
                .parse("DOCQA_RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_retry.base_delay),
            max_delay: env
                .parse("DOCQA_RETRY_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_retry.max_delay),
            request_timeout: env
                .parse("DOCQA_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(default_retry.request_timeout),
        };
        if retry.max_attempts == 0 {
            return Err(RagError::ConfigError("DOCQA_RETRY_ATTEMPTS must be at least 1".into()));
        }

        let base_url = env.string("DOCQA_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let services = ServiceConfig {
            api_key,
            embedding_base_url: env.string("DOCQA_EMBEDDING_BASE_URL").unwrap_or_else(|| base_url.clone()),
            embedding_model: env
                .string("DOCQA_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.into()),
            embedding_dimensions: env
                .parse("DOCQA_EMBEDDING_DIMENSIONS")?
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            embedding_batch_size: env.parse("DOCQA_EMBEDDING_BATCH_SIZE")?.unwrap_or(32),
            chat_base_url: env.string("DOCQA_CHAT_BASE_URL").unwrap_or(base_url),
            chat_model: env.string("DOCQA_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.into()),
            temperature: env.parse("DOCQA_TEMPERATURE")?.unwrap_or(0.5),
            max_tokens: env.parse("DOCQA_MAX_TOKENS")?,
            rerank_url: env.string("DOCQA_RERANK_URL").unwrap_or_else(|| DEFAULT_RERANK_URL.into()),
            rerank_model: env
                .string("DOCQA_RERANK_MODEL")
                .unwrap_or_else(|| DEFAULT_RERANK_MODEL.into()),
        };
        if services.embedding_batch_size == 0 {
            return Err(RagError::ConfigError(
                "DOCQA_EMBEDDING_BATCH_SIZE must be at least 1".into(),
            ));
        }

        let system_instruction = match env.string("DOCQA_SYSTEM_PROMPT_FILE") {
            Some(path) => std::fs::read_to_string(&path).map_err(|e| {
                RagError::ConfigError(format!("cannot read DOCQA_SYSTEM_PROMPT_FILE {path}: {e}"))
            })?,
            None => env
                .string("DOCQA_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
        };

        let snapshot_path = match env.string("DOCQA_SNAPSHOT_PATH") {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from("data/index.json")),
        };

        Ok(Self {
            host: env.string("DOCQA_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env.parse("DOCQA_PORT")?.unwrap_or(8000),
            docs_dir: env.string("DOCQA_DOCS_DIR").map_or_else(|| PathBuf::from("docs"), PathBuf::from),
            snapshot_path,
            load_snapshot: env.parse("DOCQA_LOAD_SNAPSHOT")?.unwrap_or(true),
            cors_origin: env
                .string("DOCQA_CORS_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            max_upload_bytes: env.parse("DOCQA_MAX_UPLOAD_BYTES")?.unwrap_or(64 * 1024 * 1024),
            log_format: env.parse("LOG_FORMAT")?.unwrap_or_default(),
            rag,
            retry,
            services,
            system_instruction,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
                RagError::ConfigError(format!("{key}={raw:?} is not valid: {e}"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn api_key_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("NVIDIA_API_KEY")));
    }

    #[test]
    fn defaults_follow_hosted_endpoints() {
        let config = config_from(&[("NVIDIA_API_KEY", "nvapi-test")]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.rag, RagConfig::default());
        assert_eq!(config.services.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.services.embedding_dimensions, 4096);
        assert_eq!(config.services.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.services.rerank_model, DEFAULT_RERANK_MODEL);
        assert!((config.services.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.cors_origin, "http://localhost:5173");
        assert_eq!(config.snapshot_path, Some(PathBuf::from("data/index.json")));
        assert!(config.load_snapshot);
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("NVIDIA_API_KEY", "nvapi-test"),
            ("DOCQA_PORT", "9000"),
            ("DOCQA_CHUNK_SIZE", "800"),
            ("DOCQA_CHUNK_OVERLAP", "100"),
            ("DOCQA_CANDIDATES", "30"),
            ("DOCQA_CONTEXT_SIZE", "5"),
            ("DOCQA_SNAPSHOT_PATH", ""),
            ("DOCQA_SYSTEM_PROMPT", "Answer briefly."),
            ("DOCQA_RETRY_ATTEMPTS", "5"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.rag.chunk_size, 800);
        assert_eq!(config.rag.chunk_overlap, 100);
        assert_eq!(config.rag.candidate_count, 30);
        assert_eq!(config.rag.context_size, 5);
        assert_eq!(config.snapshot_path, None);
        assert_eq!(config.system_instruction, "Answer briefly.");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn unparseable_numbers_are_errors() {
        let err =
            config_from(&[("NVIDIA_API_KEY", "k"), ("DOCQA_CHUNK_SIZE", "large")]).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("DOCQA_CHUNK_SIZE")));
    }

    #[test]
    fn inconsistent_retrieval_parameters_are_rejected() {
        let err = config_from(&[
            ("NVIDIA_API_KEY", "k"),
            ("DOCQA_CHUNK_SIZE", "100"),
            ("DOCQA_CHUNK_OVERLAP", "100"),
        ])
        .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn system_prompt_file_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "Only answer about widgets.").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let config = config_from(&[
            ("NVIDIA_API_KEY", "k"),
            ("DOCQA_SYSTEM_PROMPT", "ignored"),
            ("DOCQA_SYSTEM_PROMPT_FILE", &path),
        ])
        .unwrap();
        assert_eq!(config.system_instruction, "Only answer about widgets.");
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let config = config_from(&[("NVIDIA_API_KEY", "nvapi-secret")]).unwrap();
        assert!(!format!("{config:?}").contains("nvapi-secret"));
    }
}

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};

use crate::matching::ScoringWeights;
use crate::pipeline::PipelineSettings;
use crate::retry::RetryPolicy;

/// Leases renew at a third of their TTL, so anything shorter leaves no
/// room for a slow renewal.
const MIN_LOCK_TTL_SECS: u64 = 3;

/// Which vector store backs similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreKind {
    Qdrant,
    Memory,
}

impl FromStr for VectorStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(VectorStoreKind::Qdrant),
            "memory" => Ok(VectorStoreKind::Memory),
            other => bail!("unknown vector store '{other}' (expected 'qdrant' or 'memory')"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub port: u16,
    pub rust_log: String,

    pub ollama_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub embedding_dim: Option<usize>,

    pub vector_store: VectorStoreKind,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub vector_collection_prefix: String,

    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub capability_timeout_secs: u64,

    pub lock_ttl_secs: u64,
    pub lock_wait_secs: u64,
    pub max_prompt_chars: usize,
    pub max_upload_bytes: usize,

    pub weights: ScoringWeights,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup: &lookup };
        let defaults = ScoringWeights::default();

        let weights = ScoringWeights {
            skills: env.or("WEIGHT_SKILLS", defaults.skills)?,
            experience: env.or("WEIGHT_EXPERIENCE", defaults.experience)?,
            semantic: env.or("WEIGHT_SEMANTIC", defaults.semantic)?,
            required_share: env.or("WEIGHT_REQUIRED_SKILLS", defaults.required_share)?,
            preferred_share: env.or("WEIGHT_PREFERRED_SKILLS", defaults.preferred_share)?,
        };
        if let Err(reason) = weights.validate() {
            bail!("invalid scoring weights: {reason}");
        }

        let config = Config {
            database_url: env.require("DATABASE_URL")?,
            redis_url: env.require("REDIS_URL")?,
            s3_bucket: env.require("S3_BUCKET")?,
            s3_endpoint: env.require("S3_ENDPOINT")?,
            aws_access_key_id: env.require("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: env.require("AWS_SECRET_ACCESS_KEY")?,
            port: env.or("PORT", 8080)?,
            rust_log: env.string_or("RUST_LOG", "info"),

            ollama_url: env.string_or("OLLAMA_URL", "http://localhost:11434"),
            llm_model: env.string_or("LLM_MODEL", "llama3.2:1b"),
            embedding_model: env.string_or("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dim: env.optional("EMBEDDING_DIM")?,

            vector_store: env.or("VECTOR_STORE", VectorStoreKind::Qdrant)?,
            qdrant_url: env.string_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: env.non_empty("QDRANT_API_KEY"),
            vector_collection_prefix: env.string_or("VECTOR_COLLECTION_PREFIX", "hireflow"),

            retry_max_attempts: env.or("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: env.or("RETRY_BASE_DELAY_MS", 500)?,
            retry_max_delay_ms: env.or("RETRY_MAX_DELAY_MS", 8000)?,
            capability_timeout_secs: env.or("CAPABILITY_TIMEOUT_SECS", 60)?,

            lock_ttl_secs: env.or("LOCK_TTL_SECS", 300)?,
            lock_wait_secs: env.or("LOCK_WAIT_SECS", 10)?,
            max_prompt_chars: env.or("MAX_PROMPT_CHARS", 12_000)?,
            max_upload_bytes: env.or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,

            weights,
        };

        ensure!(
            config.retry_max_attempts >= 1,
            "RETRY_MAX_ATTEMPTS must be at least 1"
        );
        ensure!(
            config.retry_base_delay_ms <= config.retry_max_delay_ms,
            "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS"
        );
        ensure!(
            config.capability_timeout_secs > 0,
            "CAPABILITY_TIMEOUT_SECS must be positive"
        );
        ensure!(
            config.embedding_dim != Some(0),
            "EMBEDDING_DIM must be positive when set"
        );
        ensure!(config.max_prompt_chars > 0, "MAX_PROMPT_CHARS must be positive");
        ensure!(
            config.lock_ttl_secs >= MIN_LOCK_TTL_SECS,
            "LOCK_TTL_SECS must be at least {MIN_LOCK_TTL_SECS}"
        );

        Ok(config)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            attempt_timeout: self.capability_timeout(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            retry: self.retry_policy(),
            weights: self.weights,
            max_prompt_chars: self.max_prompt_chars,
            collection_prefix: self.vector_collection_prefix.clone(),
            embedding_dim: self.embedding_dim,
        }
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn require(&self, key: &str) -> Result<String> {
        (self.lookup)(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.non_empty(key).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
            None => Ok(None),
        }
    }

    fn or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }
}

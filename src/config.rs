// src/config.rs
//! Pipeline configuration: chunking bounds, completion-client pacing, worker
//! batch size, background-routing thresholds. Loaded from TOML with env-var
//! path override and built-in defaults, so the pipeline runs unconfigured.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "IMPORT_PIPELINE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on words per extraction chunk.
    pub chunk_max_words: usize,
    /// Lower bound below which a final chunk borrows from its predecessor.
    pub chunk_min_words: usize,
    /// How many trailing facts are threaded into the next chunk call.
    pub rolling_context_facts: usize,
    /// Minimum spacing between completion calls, in milliseconds.
    pub completion_min_interval_ms: u64,
    /// Base delay for rate-limit backoff, in milliseconds.
    pub completion_retry_base_ms: u64,
    /// Rate-limit retries before giving up on a call.
    pub completion_max_retries: usize,
    /// Jobs claimed per worker poll.
    pub worker_batch_size: usize,
    /// Background routing: more sources than this forces background.
    pub background_max_sources: usize,
    /// Background routing: more total words than this forces background.
    pub background_max_words: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_max_words: 900,
            chunk_min_words: 120,
            rolling_context_facts: 20,
            completion_min_interval_ms: 2_000,
            completion_retry_base_ms: 2_000,
            completion_max_retries: 3,
            worker_batch_size: 3,
            background_max_sources: 2,
            background_max_words: 2_500,
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $IMPORT_PIPELINE_CONFIG
    /// 2) config/import_pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Self {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                match Self::load_from(&pb) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        tracing::warn!(error = ?e, "pipeline config from env failed; using defaults")
                    }
                }
            }
        }
        let default_path = PathBuf::from("config/import_pipeline.toml");
        if default_path.exists() {
            if let Ok(cfg) = Self::load_from(&default_path) {
                return cfg;
            }
        }
        Self::default()
    }
}

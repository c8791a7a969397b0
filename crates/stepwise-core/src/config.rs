//! Persisted config (`config.toml`) in the app data directory, or at an
//! explicit path. Every section has defaults, so a partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app_data;
use crate::chunks::{ChunkLabels, ChunkerOptions, DEFAULT_JUNK_MARKERS, DEFAULT_MAX_WORDS};
use crate::embed::DEFAULT_BATCH_SIZE;
use crate::index::{ArtifactPaths, DEFAULT_ARTIFACT_NAME};
use crate::ollama::{OllamaClient, OllamaError, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL};
use crate::retriever::{DomainSignals, RetrieverOptions, DEFAULT_CANDIDATE_POOL, DEFAULT_DOMAIN_SIGNALS, DEFAULT_TOP_K};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama server URL.
    pub base_url: String,
    /// Must be the same model for indexing and querying.
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_words: usize,
    pub class: String,
    pub subject: String,
    pub chapter: String,
    pub junk_markers: Vec<String>,
    pub detect_chapters: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let labels = ChunkLabels::default();
        Self {
            max_words: DEFAULT_MAX_WORDS,
            class: labels.class,
            subject: labels.subject,
            chapter: labels.chapter,
            junk_markers: DEFAULT_JUNK_MARKERS.iter().map(|m| m.to_string()).collect(),
            detect_chapters: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub candidate_pool: usize,
    pub top_k: usize,
    /// Keywords that mark a chunk as on-topic for this corpus.
    pub domain_signals: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: DEFAULT_CANDIDATE_POOL,
            top_k: DEFAULT_TOP_K,
            domain_signals: DEFAULT_DOMAIN_SIGNALS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Directory holding the index pair. Defaults to `<app data>/vectorstore`.
    pub dir: Option<String>,
    pub name: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            name: DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn chunker_options(&self) -> ChunkerOptions {
        let c = &self.chunking;
        let mut opts = ChunkerOptions::default().with_junk_markers(&c.junk_markers);
        opts.max_words = c.max_words;
        opts.labels = ChunkLabels {
            class: c.class.clone(),
            subject: c.subject.clone(),
            chapter: c.chapter.clone(),
        };
        opts.detect_chapters = c.detect_chapters;
        opts
    }

    pub fn retriever_options(&self) -> RetrieverOptions {
        if self.retrieval.candidate_pool == 0 {
            warn!("retrieval.candidate_pool = 0; searching 1 neighbour instead");
        }
        RetrieverOptions {
            candidate_pool: self.retrieval.candidate_pool,
            signals: DomainSignals::new(&self.retrieval.domain_signals),
        }
    }

    pub fn ollama_client(&self) -> Result<OllamaClient, OllamaError> {
        Ok(OllamaClient::from_url(&self.embedding.base_url)?.with_embed_model(&self.embedding.model))
    }

    /// Resolves the artifact pair, falling back to the app data vectorstore dir.
    pub fn artifact_paths(&self) -> Result<ArtifactPaths, ConfigError> {
        let dir = match self.artifacts.dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => app_data::default_vectorstore_dir().ok_or(ConfigError::NoDataDir)?,
        };
        Ok(ArtifactPaths::in_dir(&dir, &self.artifacts.name))
    }
}

/// Path of `config.toml` in the app data directory.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    if !path.is_file() {
        return Config::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("ignoring config: {e}");
            Config::default()
        }
    }
}

/// Load config from an explicit path. Unlike [load_config], errors are reported.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&s).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    save_config_to(&path, config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

//! Configuration for micacheck

use crate::acquire::CrawlOptions;
use crate::analysis::{AnalysisMode, AnalysisSettings};
use crate::chunk::{Chunker, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::ingest::DEFAULT_MIN_DOCUMENT_CHARS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the database and config under the working home
pub const DATA_DIR: &str = ".micacheck";

/// Config file name
pub const CONFIG_FILE: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,

    #[serde(default)]
    pub crawl: CrawlSection,

    #[serde(default)]
    pub chunking: ChunkingSection,

    #[serde(default)]
    pub analysis: AnalysisSection,
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// API endpoint URL (e.g. http://localhost:11434 for Ollama)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key (if required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Retries after the first failed request
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Website crawl limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Pages with less content are skipped as boilerplate
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Documents with less extracted text are rejected
    #[serde(default = "default_min_document_chars")]
    pub min_document_chars: usize,
}

/// Analysis run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// Chunks included in the shared context
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,

    /// LLM calls per minute in normal mode; 0 disables throttling
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Wall-clock ceiling for one analysis run
    #[serde(default = "default_time_ceiling")]
    pub time_ceiling_secs: u64,

    #[serde(default)]
    pub default_mode: AnalysisMode,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_retries() -> usize {
    2
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_pages() -> usize {
    10
}

fn default_max_depth() -> usize {
    2
}

fn default_min_content_chars() -> usize {
    200
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("micacheck/{}", env!("CARGO_PKG_VERSION"))
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

fn default_min_document_chars() -> usize {
    DEFAULT_MIN_DOCUMENT_CHARS
}

fn default_max_context_chunks() -> usize {
    40
}

fn default_requests_per_minute() -> u32 {
    15
}

fn default_time_ceiling() -> u64 {
    280
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            min_content_chars: default_min_content_chars(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_document_chars: default_min_document_chars(),
        }
    }
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            max_context_chunks: default_max_context_chunks(),
            requests_per_minute: default_requests_per_minute(),
            time_ceiling_secs: default_time_ceiling(),
            default_mode: AnalysisMode::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load the first config found, or return defaults.
    ///
    /// An explicit path must exist; otherwise `<home>/.micacheck/config.toml`
    /// and then the platform config directory are tried.
    pub fn load_or_default(explicit: Option<&Path>, home: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        for candidate in Self::candidates(home) {
            if candidate.exists() {
                tracing::debug!(path = ?candidate, "Loading configuration");
                return Self::load(&candidate);
            }
        }

        Ok(Self::default())
    }

    fn candidates(home: &Path) -> Vec<PathBuf> {
        let mut paths = vec![home.join(DATA_DIR).join(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("micacheck").join(CONFIG_FILE));
        }
        paths
    }

    /// Save configuration under `<home>/.micacheck/config.toml`
    pub fn save(&self, home: &Path) -> Result<PathBuf> {
        let data_dir = home.join(DATA_DIR);
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(config_path)
    }

    pub fn llm_config(&self) -> crate::llm::LlmConfig {
        crate::llm::LlmConfig {
            endpoint: self.llm.endpoint.clone(),
            model: self.llm.model.clone(),
            api_key: self.llm.api_key.clone(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            max_retries: self.llm.max_retries,
            timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            max_pages: self.crawl.max_pages,
            max_depth: self.crawl.max_depth,
            min_content_chars: self.crawl.min_content_chars,
            request_delay: Duration::from_millis(self.crawl.request_delay_ms),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl.timeout_secs)
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.chunking.chunk_size, self.chunking.overlap)
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            max_context_chunks: self.analysis.max_context_chunks,
            requests_per_minute: self.analysis.requests_per_minute,
            time_ceiling: Duration::from_secs(self.analysis.time_ceiling_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.endpoint, "http://localhost:11434");
        assert_eq!(config.crawl.max_pages, 10);
        assert_eq!(config.chunking.chunk_size, 1600);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.analysis.max_context_chunks, 40);
        assert_eq!(config.analysis.default_mode, AnalysisMode::Normal);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[llm]\nmodel = \"gpt-4o-mini\"\nendpoint = \"https://api.openai.com\"\n\n[analysis]\ndefault_mode = \"fast\"\n",
        )
        .unwrap();

        let config = AppConfig::load_or_default(Some(&path), dir.path()).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.analysis.default_mode, AnalysisMode::Fast);
        assert_eq!(config.crawl.max_depth, 2);
    }

    #[test]
    fn test_save_then_load_from_home() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.crawl.max_pages = 3;
        config.analysis.requests_per_minute = 0;

        let path = config.save(dir.path()).unwrap();
        assert!(path.ends_with(".micacheck/config.toml"));

        let loaded = AppConfig::load_or_default(None, dir.path()).unwrap();
        assert_eq!(loaded.crawl.max_pages, 3);
        assert_eq!(loaded.analysis.requests_per_minute, 0);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load_or_default(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_conversions() {
        let mut config = AppConfig::default();
        config.chunking.chunk_size = 800;
        config.chunking.overlap = 100;
        config.crawl.request_delay_ms = 0;
        config.analysis.time_ceiling_secs = 60;

        assert_eq!(config.chunker().chunk_size(), 800);
        assert!(config.crawl_options().request_delay.is_zero());
        assert_eq!(config.analysis_settings().time_ceiling, Duration::from_secs(60));
        assert_eq!(config.llm_config().timeout, Duration::from_secs(120));
    }
}

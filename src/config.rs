use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "docusearch.toml";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub documents: DocumentsConfig,
    pub index: IndexConfig,
    pub openai: OpenAIConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub folder: PathBuf,
    pub chunk_size: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("data"),
            chunk_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Save the index to `persist_dir` and reuse it on later runs.
    pub persist: bool,
    pub persist_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist: false,
            persist_dir: PathBuf::from("persist"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    /// Upper bound on answer length; the API default applies when unset.
    pub max_tokens: Option<u32>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Pass earlier question/answer pairs to the chain on every turn.
    pub carry_history: bool,
    pub typing_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            carry_history: true,
            typing_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    OpenAI,
    Local,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProvider,
}

#[derive(Debug, Deserialize)]
struct Secrets {
    #[serde(rename = "APIKEY")]
    api_key: Option<String>,
}

impl Config {
    /// Loads settings from `path`, or from `docusearch.toml` in the working
    /// directory when no path is given. A missing default file yields the
    /// defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)
                } else {
                    tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&text)
            .map_err(|e| Error::config(format!("invalid config file {}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be at least 1"));
        }
        if self.documents.chunk_size == 0 {
            return Err(Error::config("documents.chunk_size must be at least 1"));
        }
        if self.openai.max_tokens == Some(0) {
            return Err(Error::config("openai.max_tokens must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(Error::config(format!(
                "openai.temperature must be between 0 and 2, got {}",
                self.openai.temperature
            )));
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "no API key found: set {} or APIKEY in a secrets.toml file",
                    API_KEY_ENV
                ))
            })
    }
}

/// Secrets files searched when no explicit one is given, in order.
pub fn default_secrets_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(".streamlit").join("secrets.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("docusearch").join("secrets.toml"));
    }
    paths
}

/// Resolves the API key from the environment, falling back to secrets files.
pub fn resolve_api_key(secrets: Option<&Path>) -> Result<Option<String>> {
    let candidates = match secrets {
        Some(path) => vec![path.to_path_buf()],
        None => default_secrets_paths(),
    };
    api_key_from(env::var(API_KEY_ENV).ok(), &candidates)
}

fn api_key_from(env_value: Option<String>, candidates: &[PathBuf]) -> Result<Option<String>> {
    if let Some(key) = env_value.filter(|k| !k.trim().is_empty()) {
        return Ok(Some(key));
    }

    for path in candidates.iter().filter(|p| p.is_file()) {
        let text = fs::read_to_string(path)?;
        let secrets: Secrets = toml::from_str(&text).map_err(|e| {
            Error::config(format!("invalid secrets file {}: {}", path.display(), e))
        })?;
        if let Some(key) = secrets.api_key.filter(|k| !k.trim().is_empty()) {
            tracing::debug!("API key loaded from {}", path.display());
            return Ok(Some(key));
        }
    }

    Ok(None)
}

//! Configuration for meetscribe paths and pipeline settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEETSCRIBE_HOME, MEETSCRIBE_MEDIA)
//! 2. Config file (.meetscribe/config.yaml)
//! 3. Defaults (~/.meetscribe, ~/.meetscribe/media)
//!
//! Config file discovery:
//! - Searches current directory and parents for .meetscribe/config.yaml
//! - Paths in the config file are relative to the directory containing
//!   `.meetscribe/`

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::queue::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Pipeline state directory (relative to config file)
    pub home: Option<String>,
    /// Media directory audio references resolve against
    pub media: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// "whisper-bin" (default) or "whisper-api"
    pub kind: Option<String>,
    pub whisper_path: Option<String>,
    pub model: Option<String>,
    pub api_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

/// Which transcription engine to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    WhisperBinary,
    WhisperApi,
}

impl EngineKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "whisper-bin" => Ok(Self::WhisperBinary),
            "whisper-api" => Ok(Self::WhisperApi),
            other => anyhow::bail!("Unknown engine kind: {}", other),
        }
    }
}

/// Resolved engine settings with defaults applied
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub kind: EngineKind,
    pub whisper_path: String,
    pub model: String,
    pub api_url: String,
    pub api_key_env: String,
    pub language: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineKind::WhisperBinary,
            whisper_path: "whisper".to_string(),
            model: "base".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to meetscribe home (db, queue journal)
    pub home: PathBuf,
    /// Absolute path to the media directory
    pub media_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Engine settings
    pub engine: EngineSettings,
    /// Queue retry policy
    pub retry: RetryPolicy,
}

impl ResolvedConfig {
    pub fn db_path(&self) -> PathBuf {
        self.home.join("meetscribe.db")
    }

    pub fn queue_journal(&self) -> PathBuf {
        self.home.join("jobs.jsonl")
    }
}

/// Get the resolved configuration, loading it on first use.
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| resolve().map_err(|e| format!("{:#}", e)));
    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("Configuration error: {}", e),
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".meetscribe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn default_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".meetscribe"))
        .context("Could not determine home directory")
}

fn resolve() -> Result<ResolvedConfig> {
    let config_file_path = find_config_file();
    let file = match &config_file_path {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let file_base = config_file_path
        .as_ref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf());

    // Home: env > file > default
    let home = if let Ok(env_home) = std::env::var("MEETSCRIBE_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(base), Some(home)) = (
        file_base.as_deref(),
        file.as_ref().and_then(|f| f.paths.home.as_deref()),
    ) {
        resolve_path(base, home)
    } else {
        default_home()?
    };

    // Media dir: env > file > home/media
    let media_dir = if let Ok(env_media) = std::env::var("MEETSCRIBE_MEDIA") {
        PathBuf::from(env_media)
    } else if let (Some(base), Some(media)) = (
        file_base.as_deref(),
        file.as_ref().and_then(|f| f.paths.media.as_deref()),
    ) {
        resolve_path(base, media)
    } else {
        home.join("media")
    };

    let engine = resolve_engine(file.as_ref().and_then(|f| f.engine.clone()))?;
    let retry = resolve_retry(file.as_ref().and_then(|f| f.queue.clone()));

    Ok(ResolvedConfig {
        home,
        media_dir,
        config_file: config_file_path,
        engine,
        retry,
    })
}

fn resolve_engine(file: Option<EngineConfig>) -> Result<EngineSettings> {
    let mut settings = EngineSettings::default();
    let Some(file) = file else {
        return Ok(settings);
    };

    if let Some(kind) = file.kind.as_deref() {
        settings.kind = EngineKind::parse(kind)?;
    }
    if let Some(whisper_path) = file.whisper_path {
        settings.whisper_path = whisper_path;
    }
    if let Some(model) = file.model {
        settings.model = model;
    }
    if let Some(api_url) = file.api_url {
        settings.api_url = api_url;
    }
    if let Some(api_key_env) = file.api_key_env {
        settings.api_key_env = api_key_env;
    }
    if let Some(language) = file.language {
        settings.language = language;
    }

    Ok(settings)
}

fn resolve_retry(file: Option<QueueConfig>) -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    let Some(file) = file else {
        return policy;
    };

    if let Some(max_attempts) = file.max_attempts {
        policy.max_attempts = max_attempts;
    }
    if let Some(initial_delay_ms) = file.initial_delay_ms {
        policy.initial_delay_ms = initial_delay_ms;
    }
    if let Some(max_delay_ms) = file.max_delay_ms {
        policy.max_delay_ms = max_delay_ms;
    }
    if let Some(backoff_multiplier) = file.backoff_multiplier {
        policy.backoff_multiplier = backoff_multiplier;
    }

    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
version: "1"
paths:
  home: state
  media: recordings
engine:
  kind: whisper-api
  model: whisper-1
  language: de
queue:
  max_attempts: 5
  initial_delay_ms: 100
"#;

    #[test]
    fn test_parse_config_file() {
        let file = parse_config(SAMPLE_CONFIG).unwrap();

        assert_eq!(file.version, "1");
        assert_eq!(file.paths.home.as_deref(), Some("state"));
        assert_eq!(file.paths.media.as_deref(), Some("recordings"));

        let engine = resolve_engine(file.engine).unwrap();
        assert_eq!(engine.kind, EngineKind::WhisperApi);
        assert_eq!(engine.model, "whisper-1");
        assert_eq!(engine.language, "de");
        // Untouched fields keep defaults
        assert_eq!(engine.api_key_env, "OPENAI_API_KEY");

        let retry = resolve_retry(file.queue);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay_ms, 100);
        assert_eq!(retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_minimal_config() {
        let file = parse_config("version: \"1\"\n").unwrap();
        assert!(file.paths.home.is_none());
        assert!(file.engine.is_none());

        let retry = resolve_retry(file.queue);
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay_ms, 5000);
    }

    #[test]
    fn test_unknown_engine_kind_rejected() {
        let result = resolve_engine(Some(EngineConfig {
            kind: Some("carrier-pigeon".to_string()),
            ..Default::default()
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/project");
        assert_eq!(
            resolve_path(base, "state"),
            PathBuf::from("/project/state")
        );
        assert_eq!(resolve_path(base, "/abs/state"), PathBuf::from("/abs/state"));
    }
}

use std::path::{Path, PathBuf};

use {directories::ProjectDirs, secrecy::Secret, tracing::debug};

use crate::schema::{EmbeddingsProvider, MnemoConfig};

pub const CONFIG_FILE_NAME: &str = "mnemo.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "mnemo", "mnemo")
}

/// Platform config directory (`~/.config/mnemo` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Platform data directory, falling back to `./.mnemo`.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mnemo"))
}

/// Locate `mnemo.toml`: working directory first, then the config directory.
pub fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

/// Load `explicit` if given, otherwise the discovered file (or defaults),
/// then apply environment overrides and validate.
pub fn load(explicit: Option<&Path>) -> Result<MnemoConfig, ConfigError> {
    let path = explicit.map(Path::to_path_buf).or_else(discover);
    let mut config = match path {
        Some(path) => load_from(&path)?,
        None => {
            debug!("no {CONFIG_FILE_NAME} found, using defaults");
            MnemoConfig::default()
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Parse a config file without consulting the environment.
pub fn load_from(path: &Path) -> Result<MnemoConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: MnemoConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// `OPENAI_API_KEY` fills a missing key; `MNEMO_WORKSPACE` and `MNEMO_DB`
/// override the file.
pub(crate) fn apply_env_overrides(
    config: &mut MnemoConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if config.embeddings.api_key.is_none()
        && let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty())
    {
        config.embeddings.api_key = Some(Secret::new(key));
    }
    if let Some(dir) = lookup("MNEMO_WORKSPACE") {
        config.memory.workspace_dir = PathBuf::from(dir);
    }
    if let Some(db) = lookup("MNEMO_DB") {
        config.memory.db_path = Some(PathBuf::from(db));
    }
}

fn validate(config: &MnemoConfig) -> Result<(), ConfigError> {
    let memory = &config.memory;
    if memory.chunk_tokens == 0 || memory.chars_per_token == 0 {
        return Err(ConfigError::Invalid(
            "memory.chunk_tokens and memory.chars_per_token must be positive".into(),
        ));
    }
    if memory.chunk_overlap_tokens >= memory.chunk_tokens {
        return Err(ConfigError::Invalid(format!(
            "memory.chunk_overlap_tokens ({}) must be smaller than memory.chunk_tokens ({})",
            memory.chunk_overlap_tokens, memory.chunk_tokens
        )));
    }
    if memory.candidate_multiplier == 0 {
        return Err(ConfigError::Invalid(
            "memory.candidate_multiplier must be at least 1".into(),
        ));
    }
    if config.embeddings.provider == EmbeddingsProvider::OpenAi
        && config.embeddings.batch_size == 0
    {
        return Err(ConfigError::Invalid(
            "embeddings.batch_size must be at least 1".into(),
        ));
    }
    Ok(())
}

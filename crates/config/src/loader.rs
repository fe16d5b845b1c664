use std::path::{Path, PathBuf};

use {directories::ProjectDirs, tracing::debug, url::Url};

use crate::schema::{FlowConfig, MAX_EXPIRY_SKEW_SECS, MIN_POLL_INTERVAL_SECS};

const CONFIG_FILE_STEM: &str = "config";
const CONFIG_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];
const TOKEN_FILE_NAME: &str = "tokens.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not determine a home directory for config and token files")]
    NoProjectDirs,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ebike-flow")
}

/// Directory searched for `config.{toml,yaml,yml,json}`.
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

/// First existing config file in `dir`, in extension priority order.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{CONFIG_FILE_STEM}.{ext}")))
        .find(|p| p.is_file())
}

/// Load and validate the configuration.
///
/// An explicit `path` must exist. Without one the user config directory is
/// searched and defaults are used when it holds no config file.
pub fn load(path: Option<&Path>) -> Result<FlowConfig, ConfigError> {
    let config = match path {
        Some(path) => load_from_file(path)?,
        None => match config_dir().as_deref().and_then(find_config_file) {
            Some(found) => load_from_file(&found)?,
            None => {
                debug!("no config file found, using defaults");
                FlowConfig::default()
            },
        },
    };
    config.validate()?;
    Ok(config)
}

/// Parse a config file, picking the format from its extension.
pub fn load_from_file(path: &Path) -> Result<FlowConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        },
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.trim().is_empty() {
            return Err(ConfigError::Invalid("account must not be empty".into()));
        }
        if self.poll.interval_secs < MIN_POLL_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "poll.interval_secs must be at least {MIN_POLL_INTERVAL_SECS}, got {}",
                self.poll.interval_secs
            )));
        }
        if self.oauth.expiry_skew_secs > MAX_EXPIRY_SKEW_SECS {
            return Err(ConfigError::Invalid(format!(
                "oauth.expiry_skew_secs must be at most {MAX_EXPIRY_SKEW_SECS}, got {}",
                self.oauth.expiry_skew_secs
            )));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "api.request_timeout_secs must be positive".into(),
            ));
        }
        for (name, value) in [
            ("oauth.auth_url", &self.oauth.auth_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("oauth.redirect_uri", &self.oauth.redirect_uri),
            ("api.profile_base_url", &self.api.profile_base_url),
            ("api.activity_base_url", &self.api.activity_base_url),
        ] {
            Url::parse(value).map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    /// Where tokens are persisted.
    pub fn token_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.token_file {
            Some(path) => Ok(path.clone()),
            None => data_dir()
                .map(|dir| dir.join(TOKEN_FILE_NAME))
                .ok_or(ConfigError::NoProjectDirs),
        }
    }
}

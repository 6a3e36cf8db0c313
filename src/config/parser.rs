//! Manifest parser and credential lookup.
//!
//! This module loads the manifest from YAML, applies environment overrides
//! and resolves the Fly API token.

use crate::error::{ConfigError, FlyrecError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Manifest;

/// Environment variable holding the Fly API token.
pub const TOKEN_ENV_VAR: &str = "FLY_API_TOKEN";

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(FlyrecError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FlyrecError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            FlyrecError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            apps = manifest.apps.len(),
            machines = manifest.machines.len(),
            ips = manifest.ips.len(),
            "Parsed manifest"
        );
        Ok(manifest)
    }

    /// Loads a manifest and applies `FLYREC_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        apply_overrides(&mut manifest, |key| std::env::var(key).ok());
        Ok(manifest)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FlyrecError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Resolves the Fly API token.
    ///
    /// `FLY_API_TOKEN` wins; otherwise the `access_token` written by flyctl
    /// to `~/.fly/config.yml` is used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if neither source has a token.
    pub fn resolve_token() -> Result<String> {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
            && !token.trim().is_empty()
        {
            return Ok(token);
        }

        dirs::home_dir()
            .map(|home| home.join(".fly").join("config.yml"))
            .and_then(|path| token_from_fly_config(&path))
            .ok_or_else(|| {
                FlyrecError::Config(ConfigError::MissingToken {
                    env_var: String::from(TOKEN_ENV_VAR),
                })
            })
    }
}

/// Applies `FLYREC_*` overrides using the given variable lookup.
pub fn apply_overrides(manifest: &mut Manifest, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = lookup("FLYREC_GRAPHQL_ENDPOINT") {
        debug!("Overriding provider.graphql_endpoint from environment");
        manifest.provider.graphql_endpoint = Some(endpoint);
    }

    if let Some(endpoint) = lookup("FLYREC_MACHINES_ENDPOINT") {
        debug!("Overriding provider.machines_endpoint from environment");
        manifest.provider.machines_endpoint = Some(endpoint);
    }

    if let Some(path) = lookup("FLYREC_STATE_PATH") {
        debug!("Overriding state.path from environment");
        manifest.state.path = Some(path);
    }
}

/// Reads `access_token` from a flyctl config file.
#[must_use]
pub fn token_from_fly_config(path: &Path) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct FlyctlConfig {
        access_token: Option<String>,
    }

    let content = std::fs::read_to_string(path).ok()?;
    let config: FlyctlConfig = serde_yaml::from_str(&content).ok()?;
    config.access_token.filter(|t| !t.trim().is_empty())
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["flyrec.yaml", "flyrec.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(FlyrecError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

//! Renderer configuration.
//!
//! Values come from an optional TOML file, then environment overrides, then
//! command-line flags. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration.

use crate::error::ConfigError;
use crate::texture::UploaderConfig;
use anyhow::Context;
use ash::vk;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Forces the staging upload path when set to a non-zero integer.
pub const FORCE_STAGE_ENV: &str = "SGTEXTURE_FORCE_STAGE_TEX";
/// Selects the sRGB texture format when set to a non-zero integer.
pub const SRGB_ENV: &str = "SGTEXTURE_SRGB";
/// Command-line flag selecting the sRGB texture format.
pub const SRGB_FLAG: &str = "--srgb";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RendererConfig {
    #[serde(default)]
    pub force_staging: bool,
    #[serde(default)]
    pub srgb: bool,
    /// PNG shown by the image variant.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            force_staging: false,
            srgb: false,
            image_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        debug!(path = %path.display(), ?config, "configuration loaded");
        Ok(config)
    }

    /// Loads `path` when given, else starts from defaults, then applies the
    /// environment and command-line overrides.
    pub fn resolve(
        path: Option<&Path>,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)
                .with_context(|| format!("loading renderer configuration from {}", path.display()))?,
            None => {
                let mut config = Self::default();
                config.apply_env();
                config
            }
        };
        config.apply_args(args);
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Applies overrides read through `lookup`. Both variables are integers;
    /// anything non-zero enables the option, unparsable values count as zero.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |name: &str| {
            lookup(name).map(|value| match value.trim().parse::<i64>() {
                Ok(n) => n != 0,
                Err(_) => {
                    warn!(variable = name, value = %value, "ignoring non-integer environment flag");
                    false
                }
            })
        };
        if let Some(force) = flag(FORCE_STAGE_ENV) {
            self.force_staging = force;
        }
        if let Some(srgb) = flag(SRGB_ENV) {
            self.srgb = srgb;
        }
    }

    pub fn apply_args(&mut self, args: impl IntoIterator<Item = impl AsRef<str>>) {
        if args.into_iter().any(|arg| arg.as_ref() == SRGB_FLAG) {
            self.srgb = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        let format = self.logging.format.to_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown log format '{}'",
                self.logging.format
            )));
        }
        if let Some(path) = &self.image_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation("image_path is empty".into()));
            }
        }
        Ok(())
    }

    /// Pixel format of the sampled texture.
    pub fn texture_format(&self) -> vk::Format {
        if self.srgb {
            vk::Format::R8G8B8A8_SRGB
        } else {
            vk::Format::R8G8B8A8_UNORM
        }
    }

    pub fn uploader(&self) -> UploaderConfig {
        UploaderConfig {
            force_staging: self.force_staging,
        }
    }
}

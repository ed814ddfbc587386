//! Layered configuration loading.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. [`AppConfig::default`]
//! 2. the profile variant of the config file (`onebot.production.toml`)
//! 3. the config file itself (`onebot.toml`)
//! 4. `ONEBOT_*` environment variables, with `__` between nested keys
//!    (`ONEBOT_LOGGING__LEVEL=debug`)
//! 5. values given to [`ConfigLoader::merge`] and [`ConfigLoader::set`]
//!
//! TOML files need the `toml-config` feature and YAML files the
//! `yaml-config` feature. With both enabled, one file of each format may be
//! loaded; the YAML one is merged last.
//!
//! ```rust,ignore
//! use onebot11_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/onebot.toml")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::AppConfig;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ONEBOT_";

/// File names probed in every search path, grouped by format.
#[allow(unused_mut)]
fn file_groups() -> Vec<&'static [&'static str]> {
    let mut groups: Vec<&'static [&'static str]> = Vec::new();
    #[cfg(feature = "toml-config")]
    groups.push(&["onebot.toml", "config.toml"]);
    #[cfg(feature = "yaml-config")]
    groups.push(&["onebot.yaml", "onebot.yml", "config.yaml", "config.yml"]);
    groups
}

/// Named set of overrides, selected with `ONEBOT_PROFILE` or
/// [`ConfigLoader::profile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the name used in profile file names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `dev` and `prod` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `ONEBOT_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("ONEBOT_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds an [`AppConfig`] from files, environment and code.
pub struct ConfigLoader {
    /// Merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Skips the search when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader using `ONEBOT_PROFILE` and environment overrides.
    ///
    /// Without any search path, the current directory and the user config
    /// directory are searched.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Selects the profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Searches `path` for config files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Searches the current directory.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Searches `<user config dir>/onebot11`.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("onebot11")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reads `ONEBOT_*` variables (the default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Ignores `ONEBOT_*` variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a whole configuration over everything else.
    pub fn merge(mut self, config: AppConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Sets a single value by dotted key, e.g. `("logging.level", "debug")`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Merges every source and extracts the configuration.
    ///
    /// The result is not validated; see
    /// [`validate_config`](super::validate_config).
    pub fn load(self) -> ConfigResult<AppConfig> {
        let profile = self.profile.clone();
        let config: AppConfig = self.into_figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            bots = config.bots.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn into_figment(self) -> ConfigResult<Figment> {
        let files = match &self.config_file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) => vec![path.clone()],
            None => {
                let files = self.discover();
                if files.is_empty() {
                    warn!(paths = ?self.effective_search_paths(), "No configuration file found, using defaults");
                }
                files
            }
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        for path in &files {
            info!(path = %path.display(), "Loading configuration file");
            figment = merge_file(figment, path)?;
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn effective_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let defaults = Self::new().with_current_dir().with_user_config_dir();
        defaults.search_paths
    }

    /// Lists the files to merge, lowest priority first.
    ///
    /// For each format, the first base file found wins; its profile variant
    /// next to it is merged just before it.
    fn discover(&self) -> Vec<PathBuf> {
        let search_paths = self.effective_search_paths();
        let mut files = Vec::new();

        for names in file_groups() {
            let base = search_paths
                .iter()
                .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
                .find(|path| path.exists());
            let Some(base) = base else {
                continue;
            };
            if let Some(variant) = self.profile_variant(&base).filter(|p| p.exists()) {
                files.push(variant);
            }
            files.push(base);
        }
        files
    }

    /// `onebot.toml` becomes `onebot.<profile>.toml`.
    fn profile_variant(&self, base: &Path) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let ext = base.extension()?.to_str()?;
        Some(base.with_file_name(format!("{stem}.{}.{ext}", self.profile)))
    }
}

/// Merges one file, picking the provider from its extension.
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        ext => {
            let _ = figment;
            Err(ConfigError::ParseError(format!(
                "unsupported or disabled configuration file format: .{ext}"
            )))
        }
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<AppConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<AppConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BotEntry, LogLevel};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("onebot11-loader-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::new()
            .search_path(scratch_dir("empty"))
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.bots.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/onebot.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_programmatic_overrides_win() {
        let config = ConfigLoader::new()
            .search_path(scratch_dir("overrides"))
            .without_env()
            .merge(AppConfig {
                bots: vec![BotEntry::websocket("main", "ws://127.0.0.1:3001")],
                ..Default::default()
            })
            .set("logging.level", "debug")
            .load()
            .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.bots.len(), 1);
        assert_eq!(config.bots[0].id, "main");
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("DEV"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_and_base_file() {
        let dir = scratch_dir("toml");
        std::fs::write(
            dir.join("onebot.toml"),
            r#"
[logging]
level = "warn"

[[bots]]
id = "main"
event_url = "ws://127.0.0.1:3001"
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("onebot.production.toml"),
            "[logging]\nlevel = \"error\"\nformat = \"full\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .profile("production")
            .search_path(&dir)
            .without_env()
            .load()
            .unwrap();

        // The base file is merged after the profile file.
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, crate::config::LogFormat::Full);
        assert_eq!(config.bots[0].event_url.as_deref(), Some("ws://127.0.0.1:3001"));
    }

    #[cfg(feature = "yaml-config")]
    #[test]
    fn test_explicit_yaml_file() {
        let dir = scratch_dir("yaml");
        let path = dir.join("bots.yaml");
        std::fs::write(
            &path,
            "bots:\n  - id: http-bot\n    api_url: http://127.0.0.1:3000\n    api_timeout_ms: 1000\n",
        )
        .unwrap();

        let config = ConfigLoader::new().file(&path).without_env().load().unwrap();
        assert_eq!(config.bots[0].id, "http-bot");
        assert_eq!(config.bots[0].api_timeout_ms, 1000);
    }
}

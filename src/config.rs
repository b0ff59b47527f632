//! Application configuration.
//!
//! Configuration is stored in TOML format. Every field is optional in the file;
//! missing fields take their default, so a partial file merges over the
//! defaults:
//!
//! ```toml
//! source_dir = "/home/me/Downloads/new_mods"
//! sims_root = "/home/me/Documents/Electronic Arts/The Sims 4"
//! mods_dir = "/home/me/Documents/Electronic Arts/The Sims 4/Mods"
//! tray_dir = "/home/me/Documents/Electronic Arts/The Sims 4/Tray"
//! saves_dir = "/home/me/Documents/Electronic Arts/The Sims 4/Saves"
//! temp_dir = "/tmp/modsort"
//! watcher_enabled = false
//! nested_archive_mode = "all"
//! seven_zip_path = "7z"
//! zip_backend = "seven-zip"
//! decision_timeout_secs = 120
//! ```
//!
//! [`ConfigStore`] keeps the single in-memory copy and writes it back to disk on
//! every change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ModsortError, Result};

const APP_DIR: &str = "modsort";
const CONFIG_FILE: &str = "config.toml";

/// How archives found inside archives are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedArchiveMode {
    /// Unpack every level.
    #[default]
    All,
    /// Unpack only the first nested archive.
    First,
    /// Do not unpack; move the archive into the mods folder as is.
    Skip,
    /// Ask which nested archives to unpack.
    Prompt,
}

impl fmt::Display for NestedArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NestedArchiveMode::All => "all",
            NestedArchiveMode::First => "first",
            NestedArchiveMode::Skip => "skip",
            NestedArchiveMode::Prompt => "prompt",
        })
    }
}

impl FromStr for NestedArchiveMode {
    type Err = ModsortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(NestedArchiveMode::All),
            "first" => Ok(NestedArchiveMode::First),
            "skip" => Ok(NestedArchiveMode::Skip),
            "prompt" => Ok(NestedArchiveMode::Prompt),
            other => Err(ModsortError::ConfigInvalid(format!(
                "unknown nested archive mode '{}': expected all, first, skip or prompt",
                other
            ))),
        }
    }
}

/// Which unpacker handles `.zip` files. `.rar` and `.7z` always use 7-Zip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZipBackend {
    #[default]
    SevenZip,
    /// In-process zip reader.
    Builtin,
}

impl FromStr for ZipBackend {
    type Err = ModsortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "seven-zip" | "7z" => Ok(ZipBackend::SevenZip),
            "builtin" => Ok(ZipBackend::Builtin),
            other => Err(ModsortError::ConfigInvalid(format!(
                "unknown zip backend '{}': expected seven-zip or builtin",
                other
            ))),
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder that receives downloads.
    pub source_dir: PathBuf,
    /// Game user-data folder; the three destinations live under it by default.
    pub sims_root: PathBuf,
    pub mods_dir: PathBuf,
    pub tray_dir: PathBuf,
    pub saves_dir: PathBuf,
    /// Scratch space for extraction.
    pub temp_dir: PathBuf,
    pub watcher_enabled: bool,
    pub nested_archive_mode: NestedArchiveMode,
    /// 7-Zip command line executable.
    pub seven_zip_path: PathBuf,
    pub zip_backend: ZipBackend,
    /// How long a nested-archive question waits before keeping everything.
    pub decision_timeout_secs: u64,
}

impl Config {
    /// Builds defaults relative to `home`.
    pub fn defaults_for_home(home: &Path) -> Self {
        let sims_root = home
            .join("Documents")
            .join("Electronic Arts")
            .join("The Sims 4");
        Self {
            source_dir: home.join("Downloads").join("new_mods"),
            mods_dir: sims_root.join("Mods"),
            tray_dir: sims_root.join("Tray"),
            saves_dir: sims_root.join("Saves"),
            sims_root,
            temp_dir: std::env::temp_dir().join(APP_DIR),
            watcher_enabled: false,
            nested_archive_mode: NestedArchiveMode::All,
            seven_zip_path: PathBuf::from("7z"),
            zip_backend: ZipBackend::SevenZip,
            decision_timeout_secs: 120,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ModsortError::ConfigInvalid(e.to_string()))
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    /// Points the game root somewhere else and re-derives the three destinations.
    pub fn set_sims_root(&mut self, root: PathBuf) {
        self.mods_dir = root.join("Mods");
        self.tray_dir = root.join("Tray");
        self.saves_dir = root.join("Saves");
        self.sims_root = root;
    }

    /// Sets a field from its TOML key and a string value.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "source_dir" => self.source_dir = PathBuf::from(value),
            "sims_root" => self.set_sims_root(PathBuf::from(value)),
            "mods_dir" => self.mods_dir = PathBuf::from(value),
            "tray_dir" => self.tray_dir = PathBuf::from(value),
            "saves_dir" => self.saves_dir = PathBuf::from(value),
            "temp_dir" => self.temp_dir = PathBuf::from(value),
            "seven_zip_path" => self.seven_zip_path = PathBuf::from(value),
            "watcher_enabled" => {
                self.watcher_enabled = value.trim().parse().map_err(|_| {
                    ModsortError::ConfigInvalid(format!("expected true or false, got '{}'", value))
                })?
            }
            "nested_archive_mode" => self.nested_archive_mode = value.parse()?,
            "zip_backend" => self.zip_backend = value.parse()?,
            "decision_timeout_secs" => {
                self.decision_timeout_secs = value.trim().parse().map_err(|_| {
                    ModsortError::ConfigInvalid(format!("expected seconds, got '{}'", value))
                })?
            }
            other => {
                return Err(ModsortError::ConfigInvalid(format!(
                    "unknown setting '{}'",
                    other
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::defaults_for_home(&home)
    }
}

/// Returns the default location of the configuration file.
///
/// Uses the platform configuration directory, e.g. `~/.config/modsort/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

/// Owns the in-memory configuration and its file on disk.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    /// Loads configuration from `path`, or from [`default_config_path`].
    ///
    /// - A missing file is created with defaults.
    /// - An unreadable or invalid file falls back to defaults, keeping any fields
    ///   that still parse.
    ///
    /// # Errors
    ///
    /// Returns an error only if the defaults cannot be written for a missing file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

        if !path.exists() {
            let store = Self {
                path,
                config: Config::default(),
            };
            store.save()?;
            return Ok(store);
        }

        let config = match fs::read_to_string(&path) {
            Ok(content) => parse_lenient(&content),
            Err(e) => {
                tracing::warn!("Could not read {}: {}; using defaults", path.display(), e);
                Config::default()
            }
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    /// Writes the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ModsortError::ConfigWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = self.config.to_toml()?;
        fs::write(&self.path, content).map_err(|e| ModsortError::ConfigWrite {
            path: self.path.clone(),
            source: e,
        })
    }

    /// The only way to change configuration; the result is persisted immediately.
    pub fn update<F>(&mut self, mutate: F) -> Result<&Config>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let mut next = self.config.clone();
        mutate(&mut next)?;
        self.config = next;
        self.save()?;
        Ok(&self.config)
    }
}

/// Parses TOML, salvaging valid fields when the whole document does not fit.
fn parse_lenient(content: &str) -> Config {
    if let Ok(config) = toml::from_str::<Config>(content) {
        return config;
    }

    let table = match toml::from_str::<toml::Table>(content) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("Invalid configuration, using defaults: {}", e);
            return Config::default();
        }
    };

    let mut config = Config::default();
    for (key, value) in table {
        let text = match value {
            toml::Value::String(s) => s,
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Integer(i) => i.to_string(),
            other => other.to_string(),
        };
        // Explicit destination dirs in the file win over ones derived from the root.
        if key == "sims_root" {
            config.sims_root = PathBuf::from(text);
            continue;
        }
        if let Err(e) = config.set_value(&key, &text) {
            tracing::warn!("Ignoring setting '{}': {}", key, e);
        }
    }
    config
}

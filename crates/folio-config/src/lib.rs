//! Runtime settings for a folio database process.
//!
//! Settings are layered: built-in defaults, then `folio.yaml` or
//! `folio.toml` in the data directory, then `FOLIO_*` environment
//! variables. A missing file simply contributes nothing. These settings
//! cover the ambient knobs of the engine (where data lives, flush
//! debounce, default format, id length); collections themselves are
//! declared in code.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A settings source could not be read or parsed.
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A loaded value was out of range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// The offending key.
        key: String,
        /// Why the value is unusable.
        reason: String,
    },
}

/// A specialized `Result` for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Engine-level runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Directory collection files resolve against.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Extension used when a collection declares no file name.
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Debounce, in milliseconds, before dirty files flush.
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,

    /// Length of generated entity ids.
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_format() -> String {
    "json".to_owned()
}

fn default_flush_debounce_ms() -> u64 {
    50
}

fn default_id_length() -> usize {
    12
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_format: default_format(),
            flush_debounce_ms: default_flush_debounce_ms(),
            id_length: default_id_length(),
        }
    }
}

impl EngineSettings {
    /// The flush debounce as a [`std::time::Duration`].
    pub fn flush_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_debounce_ms)
    }

    /// Resolves a collection file name against the data directory.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}

/// Loads settings from `dir/folio.yaml`, `dir/folio.toml`, and `FOLIO_*`
/// environment variables, in increasing precedence.
pub fn load_settings(dir: &Path) -> Result<EngineSettings> {
    let settings: EngineSettings = Figment::from(Serialized::defaults(EngineSettings::default()))
        .merge(Yaml::file(dir.join("folio.yaml")))
        .merge(Toml::file(dir.join("folio.toml")))
        .merge(Env::prefixed("FOLIO_"))
        .extract()
        .map_err(Box::new)?;

    if settings.id_length < 4 {
        return Err(SettingsError::Invalid {
            key: "id_length".into(),
            reason: format!("{} is below the minimum of 4", settings.id_length),
        });
    }

    Ok(settings)
}

//! Recorder configuration
//!
//! Loaded once from TOML and handed to calls as an immutable snapshot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::mix::ChannelLayout;
use crate::constants::{DEFAULT_CONTROL_ADDRESS, DEFAULT_REPLY_TIMEOUT_MS};
use crate::error::ConfigError;

/// Whether a call should be recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordPolicy {
    Deny,
    #[default]
    Ask,
    Allow,
}

/// Output file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// RIFF/WAVE container
    #[default]
    Wav,
    /// Headerless interleaved s16le
    Raw,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Raw => "raw",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub control: ControlConfig,
    pub policy: PolicyConfig,
    pub output: OutputConfig,
    pub debug: DebugConfig,
}

/// Connection to the call-control host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub address: String,
    pub reply_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTROL_ADDRESS.to_string(),
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
        }
    }
}

/// Per-contact record policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy for contacts on none of the lists
    pub default: RecordPolicy,
    /// Contacts whose calls are always recorded
    pub always: Vec<String>,
    /// Contacts for whom the user is asked
    pub ask: Vec<String>,
    /// Contacts whose calls are never recorded
    pub never: Vec<String>,
    pub suppress_legal_notice: bool,
}

/// Output file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub format: OutputFormat,
    pub stereo: bool,
    /// 0 keeps local left and remote right, 100 swaps them, anything between crossfades
    pub stereo_pan: u8,
    pub write_tags: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            format: OutputFormat::default(),
            stereo: true,
            stereo_pan: 0,
            write_tags: true,
        }
    }
}

/// Diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Write `<output>.sync` with one line per drain attempt
    pub write_sync_file: bool,
}

fn default_output_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|d| d.audio_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl RecorderConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "callrecorder", "call-recorder")
            .map(|p| p.config_dir().join("config.toml"))
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.stereo_pan > 100 {
            return Err(ConfigError::Invalid(format!(
                "stereo_pan must be between 0 and 100, got {}",
                self.output.stereo_pan
            )));
        }
        Ok(())
    }

    /// Resolve the record policy for a contact: always-list, ask-list,
    /// never-list, then the default.
    pub fn policy_for(&self, handle: &str) -> RecordPolicy {
        let listed = |list: &[String]| list.iter().any(|h| h == handle);

        if listed(&self.policy.always) {
            RecordPolicy::Allow
        } else if listed(&self.policy.ask) {
            RecordPolicy::Ask
        } else if listed(&self.policy.never) {
            RecordPolicy::Deny
        } else {
            self.policy.default
        }
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        if self.output.stereo {
            ChannelLayout::Stereo {
                pan: self.output.stereo_pan.min(100),
            }
        } else {
            ChannelLayout::Mono
        }
    }
}

//! Configuration for one device loop.
//!
//! Loaded from a JSON file at startup. Any problem is a `ConfigError` and the
//! loop never starts; there are no silent defaults for broken files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::dedup::DedupPolicy;
use super::sink::SinkConfig;
use crate::capture::{Region, RetryPolicy};
use crate::detection::library::validate_threshold;
use crate::detection::{Cascade, GroupSpec, TemplateLibrary, TemplateSpec};
use crate::error::ConfigError;
use crate::ocr::{OcrOptions, Preprocess, CHAT_WHITELIST};
use crate::parse::EventParser;
use crate::paths::get_resources_dir;

/// Where the chat box is and how to read it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chat box in screen pixels
    pub region: Region,
    #[serde(default = "Preprocess::chat")]
    pub preprocess: Preprocess,
    /// Characters tesseract may emit; `null` disables the whitelist
    #[serde(default = "default_whitelist")]
    pub whitelist: Option<String>,
    /// The bot's own kingdom. Requests from any other kingdom are "lost".
    pub home_kingdom: String,
}

fn default_whitelist() -> Option<String> {
    Some(CHAT_WHITELIST.to_string())
}

impl ChatConfig {
    pub fn ocr_options(&self) -> OcrOptions {
        OcrOptions {
            whitelist: self.whitelist.clone(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub policy: DedupPolicy,
}

/// Loop cadence and which paths run each cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Delay between cycles (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Random extra delay, uniform in [0, jitter_ms]
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_true")]
    pub classify: bool,
    #[serde(default = "default_true")]
    pub read_chat: bool,
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            jitter_ms: default_jitter_ms(),
            classify: true,
            read_chat: true,
        }
    }
}

/// Complete configuration for one device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// adb serial, e.g. `emulator-5554` or `127.0.0.1:5555`
    pub device_id: String,
    /// adb binary; defaults to `adb` on PATH
    #[serde(default)]
    pub adb_path: Option<PathBuf>,
    /// Template images directory; defaults to `resources/` next to the executable
    #[serde(default)]
    pub resources_dir: Option<PathBuf>,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    /// Ordered, highest priority first
    #[serde(default)]
    pub cascade: Vec<GroupSpec>,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub capture_retry: RetryPolicy,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Directory for highlighted match images; off when absent
    #[serde(default)]
    pub debug_annotations: Option<PathBuf>,
}

impl AppConfig {
    /// Reads, parses and validates a config file.
    ///
    /// A relative `resources_dir` is resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let (Some(dir), Some(base)) = (&config.resources_dir, path.parent()) {
            if dir.is_relative() {
                config.resources_dir = Some(base.join(dir));
            }
        }

        config.validate()?;
        info!(path = %path.display(), device = %config.device_id, "config loaded");
        Ok(config)
    }

    /// Checks everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("device_id is empty".into()));
        }

        let mut names = HashSet::new();
        for spec in &self.templates {
            validate_threshold(&spec.name, spec.threshold)?;
            if spec.region.is_some_and(|r| r.is_empty()) {
                return Err(ConfigError::InvalidRegion {
                    name: spec.name.clone(),
                    reason: "region has zero width or height".into(),
                });
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateTemplate(spec.name.clone()));
            }
        }

        for group in &self.cascade {
            if group.templates.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "cascade group '{}' has no templates",
                    group.name
                )));
            }
            if let Some(missing) = group.templates.iter().find(|t| !names.contains(t.as_str())) {
                return Err(ConfigError::UnknownTemplate {
                    group: group.name.clone(),
                    template: missing.clone(),
                });
            }
        }

        if self.cycle.classify && self.cascade.is_empty() {
            return Err(ConfigError::Invalid("classification is enabled but the cascade is empty".into()));
        }

        match &self.chat {
            Some(chat) => {
                if chat.region.is_empty() {
                    return Err(ConfigError::InvalidRegion {
                        name: "chat".into(),
                        reason: "region has zero width or height".into(),
                    });
                }
                EventParser::new(&chat.home_kingdom)?;
            }
            None if self.cycle.read_chat => {
                return Err(ConfigError::Invalid("read_chat is enabled but no chat section is configured".into()));
            }
            None => {}
        }

        if self.dedup.policy == DedupPolicy::Window(0) {
            return Err(ConfigError::Invalid("dedup window must hold at least one event".into()));
        }

        if self.capture_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("capture_retry.max_attempts must be at least 1".into()));
        }

        if let SinkConfig::Webhook { url, .. } = &self.sink {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("webhook url '{}' is not http(s)", url)));
            }
        }

        Ok(())
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.resources_dir.clone().unwrap_or_else(get_resources_dir)
    }

    /// Loads every template image. Missing or unreadable files are fatal.
    pub fn load_library(&self) -> Result<Arc<TemplateLibrary>, ConfigError> {
        TemplateLibrary::load(&self.resources_dir(), &self.templates).map(Arc::new)
    }

    pub fn build_cascade(&self, library: Arc<TemplateLibrary>) -> Result<Cascade, ConfigError> {
        Cascade::from_config(&self.cascade, library)
    }

    /// Parser for the chat path, if one is configured.
    pub fn event_parser(&self) -> Result<Option<EventParser>, ConfigError> {
        self.chat.as_ref().map(|c| EventParser::new(&c.home_kingdom)).transpose()
    }
}

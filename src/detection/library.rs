//! Named reference images loaded once at startup.
//!
//! Each entry carries its own threshold, an optional search region and the
//! action to take when it wins a classification. The library is read-only
//! after loading and can be shared between device loops behind an `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capture::Region;
use crate::error::{ConfigError, MatchError};

/// What to do when a template wins classification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionTag {
    /// Informational state, nothing is tapped
    #[default]
    Report,
    /// Tap the matched box: its center, or a random point inside it
    TapMatch {
        #[serde(default)]
        jitter: bool,
    },
    /// Tap a random point inside a fixed screen rectangle
    TapRegion { region: Region },
    /// Tap a fixed screen point
    TapPoint { x: u32, y: u32 },
}

impl ActionTag {
    pub fn is_report(&self) -> bool {
        matches!(self, ActionTag::Report)
    }
}

/// Declarative description of a template, as written in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    /// Image path, relative to the resources directory unless absolute
    pub file: PathBuf,
    pub threshold: f32,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub action: ActionTag,
    /// Search a downscaled frame first. Faster on large frames, but may
    /// miss fine-detailed elements.
    #[serde(default)]
    pub coarse_search: bool,
}

/// A loaded reference image.
#[derive(Clone, Debug)]
pub struct TemplateEntry {
    pub name: String,
    pub image: GrayImage,
    pub threshold: f32,
    pub region: Option<Region>,
    pub action: ActionTag,
    pub coarse_search: bool,
}

impl TemplateEntry {
    /// Builds an entry from an in-memory image, validating threshold and region.
    pub fn new(
        name: impl Into<String>,
        image: GrayImage,
        threshold: f32,
        region: Option<Region>,
        action: ActionTag,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_threshold(&name, threshold)?;
        if let Some(region) = &region {
            if region.is_empty() {
                return Err(ConfigError::InvalidRegion {
                    name,
                    reason: "region has zero width or height".to_string(),
                });
            }
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(ConfigError::TemplateDecode {
                name,
                path: PathBuf::new(),
                reason: "template image is empty".to_string(),
            });
        }
        Ok(Self {
            name,
            image,
            threshold,
            region,
            action,
            coarse_search: false,
        })
    }

    /// Opts into the approximate coarse-to-fine search.
    pub fn with_coarse_search(mut self, enabled: bool) -> Self {
        self.coarse_search = enabled;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub(crate) fn validate_threshold(name: &str, threshold: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::InvalidThreshold {
            name: name.to_string(),
            value: threshold,
        });
    }
    Ok(())
}

/// Loads an image file as grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, MatchError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|e| MatchError::ImageLoad(format!("{}: {}", path.display(), e)))
}

/// Ordered, name-indexed set of templates.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    entries: Vec<TemplateEntry>,
    index: HashMap<String, usize>,
}

impl TemplateLibrary {
    /// Loads every spec from `resources_dir`.
    ///
    /// A missing or undecodable file is a configuration error: the library
    /// is only built at startup, before any capture happens.
    pub fn load(resources_dir: &Path, specs: &[TemplateSpec]) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(specs.len());

        for spec in specs {
            validate_threshold(&spec.name, spec.threshold)?;
            let path = crate::paths::resolve_template(resources_dir, &spec.file);
            if !path.exists() {
                return Err(ConfigError::MissingTemplateFile {
                    name: spec.name.clone(),
                    path,
                });
            }
            let image = load_gray(&path).map_err(|e| ConfigError::TemplateDecode {
                name: spec.name.clone(),
                path: path.clone(),
                reason: e.to_string(),
            })?;
            debug!(
                template = %spec.name,
                path = %path.display(),
                width = image.width(),
                height = image.height(),
                "loaded template"
            );
            entries.push(TemplateEntry::new(
                spec.name.clone(),
                image,
                spec.threshold,
                spec.region,
                spec.action.clone(),
            )?
            .with_coarse_search(spec.coarse_search));
        }

        let library = Self::from_entries(entries)?;
        info!(count = library.len(), dir = %resources_dir.display(), "template library ready");
        Ok(library)
    }

    /// Builds a library from already-decoded entries.
    pub fn from_entries(entries: Vec<TemplateEntry>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateTemplate(entry.name.clone()));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn get(&self, name: &str) -> Result<&TemplateEntry, MatchError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| MatchError::TemplateMissing(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateEntry> {
        self.entries.iter()
    }
}

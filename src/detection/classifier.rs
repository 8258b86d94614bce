//! Priority cascade over template groups.
//!
//! Groups are evaluated in order and the first group with a match wins; the
//! remaining groups are never scored. Classification is deterministic: the
//! tap jitter attached to an action is resolved later by the dispatcher.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::library::{ActionTag, TemplateEntry, TemplateLibrary};
use super::matcher::{match_templates, MatchResult};
use crate::capture::Frame;
use crate::error::{ConfigError, MatchError};

/// State name reported when no group matches.
pub const UNKNOWN_STATE: &str = "unknown";

/// Config form of a cascade group: a state name and template names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub templates: Vec<String>,
}

/// One named state and the templates that detect it.
#[derive(Clone, Debug)]
pub struct TemplateGroup {
    pub name: String,
    pub templates: Vec<String>,
}

/// Ordered groups, highest priority first, bound to a template library.
#[derive(Clone, Debug)]
pub struct Cascade {
    library: Arc<TemplateLibrary>,
    groups: Vec<TemplateGroup>,
}

impl Cascade {
    /// Builds a cascade, checking every template name against the library.
    pub fn from_config(specs: &[GroupSpec], library: Arc<TemplateLibrary>) -> Result<Self, ConfigError> {
        let mut groups = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.templates.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "cascade group '{}' has no templates",
                    spec.name
                )));
            }
            for template in &spec.templates {
                if !library.contains(template) {
                    return Err(ConfigError::UnknownTemplate {
                        group: spec.name.clone(),
                        template: template.clone(),
                    });
                }
            }
            groups.push(TemplateGroup {
                name: spec.name.clone(),
                templates: spec.templates.clone(),
            });
        }
        Ok(Self { library, groups })
    }

    /// Builds a cascade without validation. Unknown names surface as
    /// `TemplateMissing` from `classify`.
    pub fn new(library: Arc<TemplateLibrary>, groups: Vec<TemplateGroup>) -> Self {
        Self { library, groups }
    }

    pub fn groups(&self) -> &[TemplateGroup] {
        &self.groups
    }

    fn entries(&self, group: &TemplateGroup) -> Result<Vec<&TemplateEntry>, MatchError> {
        group
            .templates
            .iter()
            .map(|name| self.library.get(name))
            .collect()
    }
}

/// Result of one classification pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassifiedState {
    pub state: String,
    #[serde(rename = "match")]
    pub matched: Option<MatchResult>,
    pub action: Option<ActionTag>,
}

impl ClassifiedState {
    pub fn unknown() -> Self {
        Self {
            state: UNKNOWN_STATE.to_string(),
            matched: None,
            action: None,
        }
    }
}

/// Classifies `frame` against the cascade.
///
/// Returns `unknown` when nothing matches; that is a normal outcome.
pub fn classify(frame: &Frame, cascade: &Cascade) -> Result<ClassifiedState, MatchError> {
    for group in &cascade.groups {
        let entries = cascade.entries(group)?;
        let Some(result) = match_templates(frame, &entries)? else {
            debug!(group = %group.name, "no match");
            continue;
        };

        let entry = cascade.library.get(&result.template)?;
        let action = (!entry.action.is_report()).then(|| entry.action.clone());
        debug!(
            group = %group.name,
            template = %result.template,
            confidence = result.confidence,
            x = result.x,
            y = result.y,
            "state matched"
        );
        return Ok(ClassifiedState {
            state: group.name.clone(),
            matched: Some(result),
            action,
        });
    }

    Ok(ClassifiedState::unknown())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::Region;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    pub(crate) fn texture(x: u32, y: u32) -> u8 {
        let mut h = x.wrapping_mul(2_246_822_519) ^ y.wrapping_mul(3_266_489_917);
        h = (h ^ (h >> 15)).wrapping_mul(668_265_263);
        (h >> 24) as u8
    }

    /// Frame of textured background with an optional stamped patch.
    pub(crate) fn frame_with(w: u32, h: u32, stamp: Option<(&GrayImage, u32, u32)>) -> Frame {
        let mut img = RgbaImage::from_fn(w, h, |x, y| {
            let v = texture(x, y) / 4;
            Rgba([v, v, v, 255])
        });
        if let Some((patch, px, py)) = stamp {
            for (x, y, p) in patch.enumerate_pixels() {
                let v = p.0[0];
                img.put_pixel(px + x, py + y, Rgba([v, v, v, 255]));
            }
        }
        Frame::from_rgba(img)
    }

    pub(crate) fn icon(seed: u32) -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| {
            Luma([texture(x * 13 + seed * 101, y * 17 + seed * 37) / 2 + 128])
        })
    }

    fn library() -> Arc<TemplateLibrary> {
        let entries = vec![
            TemplateEntry::new("exit", icon(1), 0.85, None, ActionTag::TapMatch { jitter: false })
                .unwrap(),
            TemplateEntry::new(
                "map_button",
                icon(2),
                0.9,
                None,
                ActionTag::TapRegion {
                    region: Region::new(40, 10, 20, 20),
                },
            )
            .unwrap(),
            TemplateEntry::new("bot_stuck", icon(3), 0.9, None, ActionTag::Report).unwrap(),
        ];
        Arc::new(TemplateLibrary::from_entries(entries).unwrap())
    }

    fn cascade(library: Arc<TemplateLibrary>) -> Cascade {
        let specs = vec![
            GroupSpec {
                name: "captcha".into(),
                templates: vec!["exit".into()],
            },
            GroupSpec {
                name: "home".into(),
                templates: vec!["map_button".into()],
            },
            GroupSpec {
                name: "stuck".into(),
                templates: vec!["bot_stuck".into()],
            },
        ];
        Cascade::from_config(&specs, library).unwrap()
    }

    #[test]
    fn test_first_matching_group_wins() {
        let lib = library();
        let frame = frame_with(80, 60, Some((&icon(2), 30, 20)));

        let state = classify(&frame, &cascade(lib)).unwrap();

        assert_eq!(state.state, "home");
        let matched = state.matched.unwrap();
        assert_eq!((matched.x, matched.y), (30, 20));
        assert!(matches!(state.action, Some(ActionTag::TapRegion { .. })));
    }

    #[test]
    fn test_short_circuits_later_groups() {
        let lib = library();
        // Both the captcha and home icons are on screen
        let mut img = frame_with(100, 60, Some((&icon(1), 5, 5))).rgba().clone();
        for (x, y, p) in icon(2).enumerate_pixels() {
            img.put_pixel(60 + x, 30 + y, Rgba([p.0[0], p.0[0], p.0[0], 255]));
        }
        let frame = Frame::from_rgba(img);

        // Second group names a template that does not exist; reaching it would fail
        let cascade = Cascade::new(
            lib,
            vec![
                TemplateGroup {
                    name: "captcha".into(),
                    templates: vec!["exit".into()],
                },
                TemplateGroup {
                    name: "never".into(),
                    templates: vec!["missing".into()],
                },
            ],
        );

        let state = classify(&frame, &cascade).unwrap();
        assert_eq!(state.state, "captcha");
    }

    #[test]
    fn test_reaching_missing_template_fails() {
        let cascade = Cascade::new(
            library(),
            vec![TemplateGroup {
                name: "never".into(),
                templates: vec!["missing".into()],
            }],
        );
        let frame = frame_with(40, 40, None);
        assert!(matches!(
            classify(&frame, &cascade),
            Err(MatchError::TemplateMissing(_))
        ));
    }

    #[test]
    fn test_report_only_state_has_no_action() {
        let frame = frame_with(60, 60, Some((&icon(3), 10, 40)));
        let state = classify(&frame, &cascade(library())).unwrap();
        assert_eq!(state.state, "stuck");
        assert!(state.matched.is_some());
        assert!(state.action.is_none());
    }

    #[test]
    fn test_no_match_is_unknown() {
        let frame = frame_with(60, 60, None);
        let state = classify(&frame, &cascade(library())).unwrap();
        assert_eq!(state, ClassifiedState::unknown());
        assert_eq!(state.state, UNKNOWN_STATE);
    }

    #[test]
    fn test_classification_is_repeatable() {
        let frame = frame_with(80, 60, Some((&icon(1), 40, 30)));
        let cascade = cascade(library());
        let first = classify(&frame, &cascade).unwrap();
        let second = classify(&frame, &cascade).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_template_in_config() {
        let specs = vec![GroupSpec {
            name: "captcha".into(),
            templates: vec!["nope".into()],
        }];
        assert!(matches!(
            Cascade::from_config(&specs, library()),
            Err(ConfigError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn test_state_json_shape() {
        let json = serde_json::to_value(ClassifiedState::unknown()).unwrap();
        assert_eq!(json["state"], "unknown");
        assert!(json["match"].is_null());
        assert!(json["action"].is_null());
    }
}

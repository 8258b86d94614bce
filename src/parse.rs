//! Title requests parsed from chat text.
//!
//! A request looks like `Duke (#C12483 X:191 Y:262)`. OCR noise is expected:
//! `;` for `:`, stray underscores, `.` as the axis separator, `O` for `0`.

use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Title token, optional text up to the parenthesis, then kingdom and both axes.
/// No boundary before the title: dropping underscores can glue it to the name.
const REQUEST_PATTERN: &str = r"(?i)(duke|duk|justice|jus|scientist|sci|architect|arch)\b[^()]*?\(\s*#?\s*([a-z0-9]+)\s*x\s*[:.]?\s*([0-9oli|]+)\s*y\s*[:.]?\s*([0-9oli|]+)\s*\)";

/// The four titles that can be requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Title {
    Duke,
    Justice,
    Scientist,
    Architect,
}

impl Title {
    /// Canonical title for a (case-insensitive) full name or chat abbreviation.
    pub fn from_token(token: &str) -> Option<Title> {
        match token.to_ascii_lowercase().as_str() {
            "duke" | "duk" => Some(Title::Duke),
            "justice" | "jus" => Some(Title::Justice),
            "scientist" | "sci" => Some(Title::Scientist),
            "architect" | "arch" => Some(Title::Architect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Title::Duke => "Duke",
            Title::Justice => "Justice",
            Title::Scientist => "Scientist",
            Title::Architect => "Architect",
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed title request.
///
/// Identity is (kingdom, title, x, y). `is_lost_kingdom` is derived from the
/// parser's home kingdom and does not take part in equality or hashing.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub title: Title,
    pub kingdom: String,
    pub x: u32,
    pub y: u32,
    pub is_lost_kingdom: bool,
}

impl CandidateEvent {
    /// Canonical dedup key.
    pub fn key(&self) -> String {
        format!("{}|{}|{}|{}", self.kingdom, self.title, self.x, self.y)
    }
}

impl PartialEq for CandidateEvent {
    fn eq(&self, other: &Self) -> bool {
        self.kingdom == other.kingdom && self.title == other.title && self.x == other.x && self.y == other.y
    }
}

impl Eq for CandidateEvent {}

impl Hash for CandidateEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kingdom.hash(state);
        self.title.hash(state);
        self.x.hash(state);
        self.y.hash(state);
    }
}

/// Extracts title requests from OCR text. Pure: no I/O, no dedup.
#[derive(Clone, Debug)]
pub struct EventParser {
    pattern: Regex,
    home_digits: String,
}

impl EventParser {
    /// `home_kingdom` may carry a letter prefix (`C3299`); only its digits are
    /// compared.
    pub fn new(home_kingdom: &str) -> Result<Self, ConfigError> {
        let home_digits = digits(home_kingdom);
        if home_digits.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "home kingdom '{}' contains no digits",
                home_kingdom
            )));
        }
        let pattern = Regex::new(REQUEST_PATTERN)
            .map_err(|e| ConfigError::Invalid(format!("request pattern: {}", e)))?;
        Ok(Self { pattern, home_digits })
    }

    pub fn home_kingdom_digits(&self) -> &str {
        &self.home_digits
    }

    /// Returns every complete request in `text`, in order of appearance.
    pub fn parse(&self, text: &str) -> Vec<CandidateEvent> {
        let normalized = normalize(text);
        let mut events = Vec::new();

        for caps in self.pattern.captures_iter(&normalized) {
            let Some(title) = Title::from_token(&caps[1]) else {
                continue;
            };
            let (Some(x), Some(y)) = (coordinate(&caps[3]), coordinate(&caps[4])) else {
                debug!(text = %&caps[0], "coordinate out of range");
                continue;
            };
            let kingdom = caps[2].to_ascii_uppercase();
            let is_lost_kingdom = digits(&kingdom) != self.home_digits;

            events.push(CandidateEvent {
                title,
                kingdom,
                x,
                y,
                is_lost_kingdom,
            });
        }

        debug!(count = events.len(), "chat parsed");
        events
    }
}

/// `;` → `:`, drop `_`, line breaks → spaces.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '_')
        .map(|c| match c {
            ';' => ':',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Reads an OCR'd coordinate, mapping look-alike letters to digits first.
fn coordinate(raw: &str) -> Option<u32> {
    let fixed: String = raw
        .chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'l' | 'I' | 'i' | 'L' | '|' => '1',
            other => other,
        })
        .collect();
    digits(&fixed).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> EventParser {
        EventParser::new("C3299").unwrap()
    }

    #[test]
    fn test_parse_clean_request() {
        let events = parser().parse("Duke (#C12483 X:191 Y:262)");

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.title, Title::Duke);
        assert_eq!(e.kingdom, "C12483");
        assert_eq!((e.x, e.y), (191, 262));
        assert!(e.is_lost_kingdom);
    }

    #[test]
    fn test_home_kingdom_is_not_lost() {
        let events = EventParser::new("12483").unwrap().parse("Duke (#C12483 X:191 Y:262)");
        assert!(!events[0].is_lost_kingdom);
    }

    #[test]
    fn test_noisy_separators_and_case() {
        let clean = parser().parse("Duke (#C12483 X:191 Y:262)");
        let noisy = parser().parse("duke (#C12483 X.191 Y.262)");

        assert_eq!(noisy, clean);
        assert_eq!(noisy[0].title.as_str(), "Duke");
        assert_eq!(noisy[0].is_lost_kingdom, clean[0].is_lost_kingdom);
    }

    #[test]
    fn test_semicolon_underscore_and_newline() {
        let events = parser().parse("[ABC]player_one: pls\nScientist_ (#C3299 X;12\nY;845)");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, Title::Scientist);
        assert_eq!((events[0].x, events[0].y), (12, 845));
        assert!(!events[0].is_lost_kingdom);
    }

    #[test]
    fn test_letter_confusions_in_coordinates() {
        let events = parser().parse("Architect (#C3299 X:1O5 Y:l2)");
        assert_eq!((events[0].x, events[0].y), (105, 12));
    }

    #[test]
    fn test_abbreviations() {
        let events = parser().parse("jus (#C1 X:1 Y:2) arch (#C1 X:3 Y:4) sci (#C1 X:5 Y:6) duk (#C1 X:7 Y:8)");
        let titles: Vec<Title> = events.iter().map(|e| e.title).collect();
        assert_eq!(
            titles,
            vec![Title::Justice, Title::Architect, Title::Scientist, Title::Duke]
        );
    }

    #[test]
    fn test_no_title_no_events() {
        assert!(parser().parse("Baron (#C12483 X:191 Y:262)").is_empty());
        assert!(parser().parse("hello everyone, see you at X:10 Y:20").is_empty());
        assert!(parser().parse("").is_empty());
    }

    #[test]
    fn test_missing_field_yields_nothing() {
        assert!(parser().parse("Duke (#C12483 X:191)").is_empty());
        assert!(parser().parse("Duke (X:191 Y:262)").is_empty());
        assert!(parser().parse("Duke please").is_empty());
    }

    #[test]
    fn test_multiple_requests_in_order() {
        let text = "Duke (#C1 X:10 Y:20) then Justice (#C2 X:30 Y:40)";
        let events = parser().parse(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].title, Title::Duke);
        assert_eq!(events[1].title, Title::Justice);
        assert_eq!(events[1].kingdom, "C2");
    }

    #[test]
    fn test_title_glued_to_player_name() {
        let events = parser().parse("[ABC]bob_Duke (#C12483 X:191 Y:262)");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, Title::Duke);
        assert_eq!(events[0].kingdom, "C12483");
        assert_eq!((events[0].x, events[0].y), (191, 262));
    }

    #[test]
    fn test_title_needs_trailing_boundary() {
        // "science" is not an abbreviation of scientist
        assert!(parser().parse("science (#C1 X:1 Y:2)").is_empty());
    }

    #[test]
    fn test_equality_ignores_lost_flag() {
        let a = EventParser::new("1").unwrap().parse("Duke (#C1 X:1 Y:2)");
        let b = EventParser::new("2").unwrap().parse("Duke (#C1 X:1 Y:2)");
        assert_ne!(a[0].is_lost_kingdom, b[0].is_lost_kingdom);
        assert_eq!(a[0], b[0]);
        assert_eq!(a[0].key(), b[0].key());
    }

    #[test]
    fn test_home_kingdom_requires_digits() {
        assert!(matches!(EventParser::new("home"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_event_json_shape() {
        let events = parser().parse("Duke (#C12483 X:191 Y:262)");
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Duke",
                "kingdom": "C12483",
                "x": 191,
                "y": 262,
                "isLostKingdom": true
            })
        );
    }
}

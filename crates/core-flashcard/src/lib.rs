//! Flashcard values: per-card scheduling state, two-sided and cloze card
//! groups, and the rendering of a card together with its state.
//!
//! State entries serialize as `!YYYY-MM-DD,<interval>,<ease>`; a group of
//! them lives inside a single `<!--SR:…-->` comment. Rendering consults the
//! run [`Config`] for separators and an explicit [`RenderPolicy`] for the
//! pad-missing-state behavior.

use chrono::NaiveDate;
use core_config::Config;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Ease assigned to states synthesized for uninitialized cards.
pub const FLASHCARD_EASE_DEFAULT: u32 = 250;

pub const FLASHCARD_STATES_OPEN: &str = "<!--SR:";
pub const FLASHCARD_STATES_CLOSE: &str = "-->";

static STATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!(\d{4}-\d{2}-\d{2}),(\d+),(\d+)").unwrap());
static STATE_GROUP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--SR:(.*?)-->").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlashcardError {
    #[error("no matches: {0}")]
    NoMatch(String),
    #[error("too many matches: {0}")]
    AmbiguousMatch(String),
    #[error("invalid date \"{0}\"")]
    InvalidDate(String),
    #[error("number out of range \"{0}\"")]
    NumberOutOfRange(String),
    #[error("invalid cloze token pattern: {0}")]
    InvalidClozeToken(String),
}

/// One spaced-repetition state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashcardState {
    pub date: NaiveDate,
    pub interval: u32,
    pub ease: u32,
}

impl fmt::Display for FlashcardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!{},{},{}",
            self.date.format("%Y-%m-%d"),
            self.interval,
            self.ease
        )
    }
}

impl FlashcardState {
    /// Every state entry found in `text`, in order.
    pub fn compile_many(text: &str) -> Result<Vec<Self>, FlashcardError> {
        let mut states = Vec::new();
        for caps in STATE_REGEX.captures_iter(text) {
            let date_str = &caps[1];
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map_err(|_| FlashcardError::InvalidDate(date_str.to_owned()))?;
            let interval = caps[2]
                .parse()
                .map_err(|_| FlashcardError::NumberOutOfRange(caps[2].to_owned()))?;
            let ease = caps[3]
                .parse()
                .map_err(|_| FlashcardError::NumberOutOfRange(caps[3].to_owned()))?;
            states.push(Self {
                date,
                interval,
                ease,
            });
        }
        Ok(states)
    }

    /// Exactly one state entry in `text`, or `NoMatch` / `AmbiguousMatch`.
    pub fn compile(text: &str) -> Result<Self, FlashcardError> {
        let states = Self::compile_many(text)?;
        match states.as_slice() {
            [] => Err(FlashcardError::NoMatch(text.to_owned())),
            [one] => Ok(*one),
            _ => Err(FlashcardError::AmbiguousMatch(text.to_owned())),
        }
    }
}

/// Ordered states serialized inside one `<!--SR:…-->` marker. An empty group
/// serializes to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashcardStateGroup(pub Vec<FlashcardState>);

impl fmt::Display for FlashcardStateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str(FLASHCARD_STATES_OPEN)?;
        for state in &self.0 {
            write!(f, "{state}")?;
        }
        f.write_str(FLASHCARD_STATES_CLOSE)
    }
}

impl FlashcardStateGroup {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every `<!--SR:…-->` span in `text`, each parsed into a group.
    pub fn compile_many(text: &str) -> Result<Vec<Self>, FlashcardError> {
        let mut groups = Vec::new();
        for found in STATE_GROUP_REGEX.find_iter(text) {
            groups.push(Self(FlashcardState::compile_many(found.as_str())?));
        }
        Ok(groups)
    }

    /// Exactly one group in `text`, or `NoMatch` / `AmbiguousMatch`.
    pub fn compile(text: &str) -> Result<Self, FlashcardError> {
        let mut groups = Self::compile_many(text)?;
        match groups.len() {
            0 => Err(FlashcardError::NoMatch(text.to_owned())),
            1 => Ok(groups.remove(0)),
            _ => Err(FlashcardError::AmbiguousMatch(text.to_owned())),
        }
    }
}

/// A question/answer card. Rendering joins the sides with the separator the
/// config assigns to this `(reversible, multiline)` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoSidedFlashcard {
    pub left: String,
    pub right: String,
    pub reversible: bool,
}

impl TwoSidedFlashcard {
    pub fn sides(&self) -> usize {
        if self.reversible {
            2
        } else {
            1
        }
    }

    pub fn render(&self, config: &Config) -> String {
        let multiline = self.left.contains('\n') || self.right.contains('\n');
        let separator = config.separator(self.reversible, multiline);
        format!("{}{}{}", self.left, separator, self.right)
    }
}

static CLOZE_PATTERNS: Lazy<Mutex<HashMap<(String, String), Regex>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Context text with embedded cloze deletions delimited by a token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClozeFlashcardGroup {
    context: String,
    token: (String, String),
    clozes: Vec<String>,
}

impl ClozeFlashcardGroup {
    pub fn new(
        context: impl Into<String>,
        token: (String, String),
    ) -> Result<Self, FlashcardError> {
        let context = context.into();
        let pattern = {
            let mut cache = CLOZE_PATTERNS.lock().unwrap_or_else(|e| e.into_inner());
            match cache.get(&token) {
                Some(regex) => regex.clone(),
                None => {
                    let source = format!(
                        "{}(.+?){}",
                        regex::escape(&token.0),
                        regex::escape(&token.1)
                    );
                    let regex = Regex::new(&source)
                        .map_err(|err| FlashcardError::InvalidClozeToken(err.to_string()))?;
                    cache.insert(token.clone(), regex.clone());
                    regex
                }
            }
        };
        let clozes = pattern
            .captures_iter(&context)
            .map(|caps| caps[1].to_owned())
            .collect();
        Ok(Self {
            context,
            token,
            clozes,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn clozes(&self) -> &[String] {
        &self.clozes
    }

    pub fn sides(&self) -> usize {
        self.clozes.len()
    }
}

impl fmt::Display for ClozeFlashcardGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context)
    }
}

/// A renderable card: two-sided or cloze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashcardGroup {
    TwoSided(TwoSidedFlashcard),
    Cloze(ClozeFlashcardGroup),
}

impl FlashcardGroup {
    /// Number of reviewable sides: 2 for a reversible two-sided card, 1 for
    /// a one-way card, the cloze count for a cloze group.
    pub fn sides(&self) -> usize {
        match self {
            Self::TwoSided(card) => card.sides(),
            Self::Cloze(group) => group.sides(),
        }
    }

    pub fn render(&self, config: &Config) -> String {
        match self {
            Self::TwoSided(card) => card.render(config),
            Self::Cloze(group) => group.context().to_owned(),
        }
    }
}

/// Rendering knobs carried by the execution environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderPolicy {
    /// Pad a card's state group up to its side count with fresh
    /// `(today, 1, 250)` entries before rendering.
    pub pad_missing_flashcard_state: bool,
}

/// A card paired with its serialized scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatefulFlashcardGroup {
    pub flashcard: FlashcardGroup,
    pub state: FlashcardStateGroup,
}

impl StatefulFlashcardGroup {
    pub fn render(&self, config: &Config, policy: &RenderPolicy) -> String {
        let mut state = self.state.clone();
        if policy.pad_missing_flashcard_state {
            let missing = self.flashcard.sides().saturating_sub(state.len());
            if missing > 0 {
                let filler = FlashcardState {
                    date: chrono::Local::now().date_naive(),
                    interval: 1,
                    ease: FLASHCARD_EASE_DEFAULT,
                };
                state.0.extend(std::iter::repeat(filler).take(missing));
            }
        }
        format!("{} {}", self.flashcard.render(config), state)
    }
}

/// Pair cards with states, topping up with empty groups when there are more
/// cards than states.
pub fn attach_flashcard_states(
    flashcards: impl IntoIterator<Item = FlashcardGroup>,
    states: impl IntoIterator<Item = FlashcardStateGroup>,
) -> Vec<StatefulFlashcardGroup> {
    let mut states = states.into_iter();
    flashcards
        .into_iter()
        .map(|flashcard| StatefulFlashcardGroup {
            flashcard,
            state: states.next().unwrap_or_default(),
        })
        .collect()
}

/// Render cards as a Markdown list, numbered when `ordered`.
pub fn listify_flashcards(
    flashcards: &[StatefulFlashcardGroup],
    ordered: bool,
    config: &Config,
    policy: &RenderPolicy,
) -> String {
    let mut out = String::new();
    for (index, card) in flashcards.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        if ordered {
            out.push_str(&format!("{}. ", index + 1));
        } else {
            out.push_str("- ");
        }
        out.push_str(&card.render(config, policy));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn state_round_trip() {
        let state = FlashcardState {
            date: date(2024, 1, 2),
            interval: 3,
            ease: 250,
        };
        assert_eq!(state.to_string(), "!2024-01-02,3,250");
        assert_eq!(FlashcardState::compile("!2024-01-02,3,250").unwrap(), state);
    }

    #[test]
    fn state_compile_strictness() {
        assert!(matches!(
            FlashcardState::compile("nothing here"),
            Err(FlashcardError::NoMatch(_))
        ));
        assert!(matches!(
            FlashcardState::compile("!2024-01-02,3,250 !2024-01-03,1,250"),
            Err(FlashcardError::AmbiguousMatch(_))
        ));
        assert!(matches!(
            FlashcardState::compile("!2024-13-40,3,250"),
            Err(FlashcardError::InvalidDate(_))
        ));
    }

    #[test]
    fn state_group_round_trip() {
        let group = FlashcardStateGroup(vec![
            FlashcardState {
                date: date(2024, 1, 2),
                interval: 3,
                ease: 250,
            },
            FlashcardState {
                date: date(2024, 2, 3),
                interval: 1,
                ease: 230,
            },
        ]);
        let serialized = group.to_string();
        assert_eq!(serialized, "<!--SR:!2024-01-02,3,250!2024-02-03,1,230-->");
        assert_eq!(FlashcardStateGroup::compile(&serialized).unwrap(), group);
    }

    #[test]
    fn empty_state_group_serializes_to_nothing() {
        assert_eq!(FlashcardStateGroup::default().to_string(), "");
    }

    #[test]
    fn state_group_scan_only_reads_inside_markers() {
        let text = "!1999-01-01,9,9 <!--SR:!2024-01-02,3,250--> tail";
        let groups = FlashcardStateGroup::compile_many(text).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0].0[0].date, date(2024, 1, 2));
    }

    #[test]
    fn two_sided_rendering_uses_separator_table() {
        let config = Config::default();
        let card = TwoSidedFlashcard {
            left: "q".into(),
            right: "a".into(),
            reversible: true,
        };
        assert_eq!(card.render(&config), "q:::a");
        assert_eq!(card.sides(), 2);

        let oneway = TwoSidedFlashcard {
            left: "q".into(),
            right: "a".into(),
            reversible: false,
        };
        assert_eq!(oneway.render(&config), "q::a");
        assert_eq!(oneway.sides(), 1);

        let multiline = TwoSidedFlashcard {
            left: "q\nmore".into(),
            right: "a".into(),
            reversible: true,
        };
        assert_eq!(multiline.render(&config), "q\nmore\n???\na");
    }

    #[test]
    fn cloze_extraction_counts_sides() {
        let group = ClozeFlashcardGroup::new(
            "the {{quick}} brown {{fox}}",
            ("{{".to_owned(), "}}".to_owned()),
        )
        .unwrap();
        assert_eq!(group.sides(), 2);
        assert_eq!(group.clozes(), ["quick", "fox"]);
        assert_eq!(group.to_string(), "the {{quick}} brown {{fox}}");
    }

    #[test]
    fn stateful_rendering_appends_state() {
        let config = Config::default();
        let card = StatefulFlashcardGroup {
            flashcard: FlashcardGroup::TwoSided(TwoSidedFlashcard {
                left: "q".into(),
                right: "a".into(),
                reversible: false,
            }),
            state: FlashcardStateGroup(vec![FlashcardState {
                date: date(2024, 1, 2),
                interval: 3,
                ease: 250,
            }]),
        };
        assert_eq!(
            card.render(&config, &RenderPolicy::default()),
            "q::a <!--SR:!2024-01-02,3,250-->"
        );
    }

    #[test]
    fn policy_pads_missing_states_up_to_side_count() {
        let config = Config::default();
        let card = StatefulFlashcardGroup {
            flashcard: FlashcardGroup::TwoSided(TwoSidedFlashcard {
                left: "q".into(),
                right: "a".into(),
                reversible: true,
            }),
            state: FlashcardStateGroup::default(),
        };
        let policy = RenderPolicy {
            pad_missing_flashcard_state: true,
        };
        let rendered = card.render(&config, &policy);
        let group = FlashcardStateGroup::compile(&rendered).unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.0.iter().all(|s| s.interval == 1 && s.ease == 250));
        // the default policy leaves the state group untouched
        let plain = card.render(&config, &RenderPolicy::default());
        assert_eq!(plain, "q:::a ");
    }

    #[test]
    fn attach_states_fills_with_empty_groups() {
        let cards = vec![
            FlashcardGroup::TwoSided(TwoSidedFlashcard {
                left: "1".into(),
                right: "one".into(),
                reversible: false,
            }),
            FlashcardGroup::TwoSided(TwoSidedFlashcard {
                left: "2".into(),
                right: "two".into(),
                reversible: false,
            }),
        ];
        let states = vec![FlashcardStateGroup(vec![FlashcardState {
            date: date(2024, 1, 2),
            interval: 3,
            ease: 250,
        }])];
        let attached = attach_flashcard_states(cards, states);
        assert_eq!(attached.len(), 2);
        assert_eq!(attached[0].state.len(), 1);
        assert!(attached[1].state.is_empty());
    }

    #[test]
    fn listify_renders_ordered_and_unordered() {
        let config = Config::default();
        let policy = RenderPolicy::default();
        let cards = attach_flashcard_states(
            vec![
                FlashcardGroup::TwoSided(TwoSidedFlashcard {
                    left: "a".into(),
                    right: "1".into(),
                    reversible: false,
                }),
                FlashcardGroup::TwoSided(TwoSidedFlashcard {
                    left: "b".into(),
                    right: "2".into(),
                    reversible: false,
                }),
            ],
            Vec::new(),
        );
        assert_eq!(
            listify_flashcards(&cards, false, &config, &policy),
            "- a::1 \n- b::2 "
        );
        assert_eq!(
            listify_flashcards(&cards, true, &config, &policy),
            "1. a::1 \n2. b::2 "
        );
    }
}

//! Run configuration: the cloze token pair and the flashcard separator
//! table, loadable from `textgen.toml`.
//!
//! The configuration is a plain value handed to whoever needs it at
//! construction time. `Config::dirty` reports whether a value still matches
//! the built-in defaults; derived state (such as rendered separators cached
//! by a reader) must not be reused across runs whose configs disagree.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::{fmt, fs};
use thiserror::Error;
use tracing::warn;

/// Key of the flashcard separator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeparatorKind {
    pub reversible: bool,
    pub multiline: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeparatorOptionsError {
    #[error("invalid option '{0}' in \"{1}\"")]
    InvalidOption(char, String),
    #[error("incomplete options: \"{0}\"")]
    Incomplete(String),
}

impl SeparatorKind {
    pub const fn new(reversible: bool, multiline: bool) -> Self {
        Self {
            reversible,
            multiline,
        }
    }

    /// Parse a compact option string: `r` sets reversible, `m` multiline,
    /// and a leading `-` negates the option that follows (`"r-m"`).
    pub fn parse(options: &str) -> Result<Self, SeparatorOptionsError> {
        let mut kind = Self::new(false, false);
        let mut value = true;
        for ch in options.chars() {
            match ch {
                '-' => {
                    if !value {
                        return Err(SeparatorOptionsError::InvalidOption(
                            ch,
                            options.to_owned(),
                        ));
                    }
                    value = false;
                    continue;
                }
                'r' => kind.reversible = value,
                'm' => kind.multiline = value,
                other => {
                    return Err(SeparatorOptionsError::InvalidOption(
                        other,
                        options.to_owned(),
                    ));
                }
            }
            value = true;
        }
        if !value {
            return Err(SeparatorOptionsError::Incomplete(options.to_owned()));
        }
        Ok(kind)
    }
}

impl fmt::Display for SeparatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reversible {
            f.write_str("r")?;
        }
        if self.multiline {
            f.write_str("m")?;
        }
        Ok(())
    }
}

/// Per-run configuration for flashcard rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cloze_token: (String, String),
    pub flashcard_separators: BTreeMap<SeparatorKind, String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut separators = BTreeMap::new();
        separators.insert(SeparatorKind::new(false, false), "::".to_owned());
        separators.insert(SeparatorKind::new(true, false), ":::".to_owned());
        separators.insert(SeparatorKind::new(false, true), "\n??\n".to_owned());
        separators.insert(SeparatorKind::new(true, true), "\n???\n".to_owned());
        Self {
            cloze_token: ("{{".to_owned(), "}}".to_owned()),
            flashcard_separators: separators,
        }
    }
}

impl Config {
    /// Separator for the given card shape.
    pub fn separator(&self, reversible: bool, multiline: bool) -> &str {
        self.flashcard_separators
            .get(&SeparatorKind::new(reversible, multiline))
            .map(String::as_str)
            .unwrap_or("::")
    }

    /// Whether this config differs from the built-in defaults.
    pub fn dirty(&self) -> bool {
        *self != Self::default()
    }
}

#[derive(Debug, Deserialize, Default)]
struct ClozeFile {
    open: Option<String>,
    close: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SeparatorsFile {
    plain: Option<String>,
    reversible: Option<String>,
    multiline: Option<String>,
    #[serde(rename = "reversible-multiline")]
    reversible_multiline: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    cloze: ClozeFile,
    #[serde(default)]
    separators: SeparatorsFile,
}

impl ConfigFile {
    fn apply(self, config: &mut Config) {
        if let Some(open) = self.cloze.open {
            config.cloze_token.0 = open;
        }
        if let Some(close) = self.cloze.close {
            config.cloze_token.1 = close;
        }
        let overrides = [
            (SeparatorKind::new(false, false), self.separators.plain),
            (SeparatorKind::new(true, false), self.separators.reversible),
            (SeparatorKind::new(false, true), self.separators.multiline),
            (
                SeparatorKind::new(true, true),
                self.separators.reversible_multiline,
            ),
        ];
        for (kind, value) in overrides {
            if let Some(value) = value {
                config.flashcard_separators.insert(kind, value);
            }
        }
    }
}

/// Best-effort config path: a local `textgen.toml` wins over the platform
/// config directory.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("textgen.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("textgen").join("textgen.toml");
    }
    PathBuf::from("textgen.toml")
}

/// Load configuration from `path` (or the discovered location). A missing or
/// unparsable file falls back to the defaults.
pub fn load_from(path: Option<PathBuf>) -> Config {
    let path = path.unwrap_or_else(discover);
    let mut config = Config::default();
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => file.apply(&mut config),
            Err(err) => {
                warn!(target: "config", path = %path.display(), %err, "config_parse_failed");
            }
        }
    }
    config
}

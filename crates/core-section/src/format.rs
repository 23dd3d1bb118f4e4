//! Per-extension section marker formats.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;

/// Fixed identifier embedded in every section sentinel.
pub const MARKER_ID: &str = "8548b7e1-40ca-4a97-b2a9-16b84f691f29";

/// How sections are delimited in a given file format.
pub struct SectionFormat {
    pub start_regex: Regex,
    pub end_regex: Regex,
    extract: fn(&Captures<'_>) -> String,
    start_open: String,
    start_close: &'static str,
    pub stop: String,
}

impl SectionFormat {
    /// Opening sentinel for a section name.
    pub fn start(&self, section: &str) -> String {
        format!("{}{}{}", self.start_open, section, self.start_close)
    }

    /// Section name captured by a `start_regex` match.
    pub fn section_name(&self, caps: &Captures<'_>) -> String {
        (self.extract)(caps)
    }
}

static PLAIN_FORMAT: Lazy<SectionFormat> = Lazy::new(|| SectionFormat {
    start_regex: Regex::new(&format!(
        r"\[{},generate,([^,\]]*?)\]",
        regex::escape(MARKER_ID)
    ))
    .unwrap(),
    end_regex: Regex::new(&format!(r"\[{},end\]", regex::escape(MARKER_ID))).unwrap(),
    extract: |caps| caps[1].to_owned(),
    start_open: format!("[{MARKER_ID},generate,"),
    start_close: "]",
    stop: format!("[{MARKER_ID},end]"),
});

static MARKDOWN_FORMAT: Lazy<SectionFormat> = Lazy::new(|| SectionFormat {
    // single- or double-quoted name; quotes may enclose anything, lazily
    start_regex: Regex::new(&format!(
        r#"<!--{} generate section=(?:'((?s:.*?))'|"((?s:.*?))")-->"#,
        regex::escape(MARKER_ID)
    ))
    .unwrap(),
    end_regex: Regex::new(&format!(r"<!--/{}-->", regex::escape(MARKER_ID))).unwrap(),
    extract: |caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default()
    },
    start_open: format!("<!--{MARKER_ID} generate section=\""),
    start_close: "\"-->",
    stop: format!("<!--/{MARKER_ID}-->"),
});

/// Format for a path, selected by extension (`""` is the plain fallback for
/// extensionless files).
pub fn for_path(path: &Path) -> Option<&'static SectionFormat> {
    match path.extension().and_then(|ext| ext.to_str()) {
        None => Some(&PLAIN_FORMAT),
        Some("md") => Some(&MARKDOWN_FORMAT),
        Some(_) => None,
    }
}

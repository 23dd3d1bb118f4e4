//! The TextCode mini-language.
//!
//! TextCode is a flat sequence of blocks. A *special* block is written
//! `{tag:body}`; everything else is *common* text. The four characters
//! `\ { } :` are escapable in every context by prefixing a backslash, which
//! is why the compiler is an explicit pushdown machine rather than a couple
//! of regexes.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Characters that must be backslash-escaped inside serialized text.
pub const ESCAPES: [char; 4] = ['\\', '{', '}', ':'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextCodeError {
    #[error("unexpected character at offset {offset}: {fragment}")]
    UnexpectedChar { offset: usize, fragment: String },
}

impl TextCodeError {
    fn at(code: &str, offset: usize) -> Self {
        let fragment: String = code.chars().skip(offset).take(24).collect();
        Self::UnexpectedChar { offset, fragment }
    }

    /// Char offset the error was raised at.
    pub fn offset(&self) -> usize {
        match self {
            Self::UnexpectedChar { offset, .. } => *offset,
        }
    }
}

/// One unit of a [`TextCode`]: tagged (special) or untagged (common) text.
///
/// `char` is the char offset of the block's body in the source the code was
/// compiled from: the start of the common run, or the first body character
/// of a special block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub char: usize,
    pub tag: String,
}

impl Block {
    pub fn new(text: impl Into<String>, char: usize, tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            char,
            tag: tag.into(),
        }
    }

    pub fn special(&self) -> bool {
        !self.tag.is_empty()
    }

    pub fn common(&self) -> bool {
        !self.special()
    }

    /// Char offset of the block's first source character (`{` for special
    /// blocks). This is where [`separate_code_by_tag`] cuts.
    fn source_start(&self) -> usize {
        if self.special() {
            // body start minus "{", the tag, and ":"
            self.char - self.tag.chars().count() - 2
        } else {
            self.char
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.special() {
            write!(f, "{{{}:{}}}", self.tag, escape(&self.text))
        } else if self.text.is_empty() {
            f.write_str("{:}")
        } else {
            f.write_str(&escape(&self.text))
        }
    }
}

/// Compiled form of the mini-language: the block sequence plus a by-tag
/// index. Built once by [`TextCode::compile`]; immutable thereafter.
#[derive(Debug, Clone)]
pub struct TextCode {
    blocks: Vec<Block>,
    by_tag: HashMap<String, Vec<usize>>,
}

impl PartialEq for TextCode {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl Eq for TextCode {}

impl fmt::Display for TextCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

enum State {
    Normal {
        text: String,
        start: Option<usize>,
    },
    Tag {
        text: String,
    },
    Body {
        tag: String,
        text: String,
        body_start: usize,
    },
    /// An escape in flight, carrying the state it interrupted.
    Escape(Box<State>),
}

impl TextCode {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks carrying exactly `tag`, with their positions in the sequence.
    pub fn blocks_with_tag<'a>(
        &'a self,
        tag: &str,
    ) -> impl Iterator<Item = (usize, &'a Block)> + 'a {
        self.by_tag
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&idx| (idx, &self.blocks[idx]))
    }

    fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, block) in blocks.iter().enumerate() {
            by_tag.entry(block.tag.clone()).or_default().push(idx);
        }
        Self { blocks, by_tag }
    }

    /// Compile source text into a block sequence.
    ///
    /// A trailing `{}` is appended when the source does not already end in a
    /// closing brace, so that a terminal common run is flushed.
    pub fn compile(code: &str) -> Result<Self, TextCodeError> {
        let needs_pad =
            !code.ends_with('}') || code.ends_with("\\}") || code.ends_with("{}");
        let padded: String = if needs_pad {
            let mut p = code.to_owned();
            p.push_str("{}");
            p
        } else {
            code.to_owned()
        };

        let mut blocks = Vec::new();
        let mut stack = vec![State::Normal {
            text: String::new(),
            start: None,
        }];

        for (index, ch) in padded.chars().enumerate() {
            let state = match stack.pop() {
                Some(state) => state,
                None => return Err(TextCodeError::at(&padded, index)),
            };
            match state {
                State::Normal { mut text, mut start } => match ch {
                    '\\' => {
                        stack.push(State::Escape(Box::new(State::Normal { text, start })));
                    }
                    '{' => {
                        if !text.is_empty() {
                            blocks.push(Block::new(text, start.unwrap_or(index), ""));
                        }
                        stack.push(State::Normal {
                            text: String::new(),
                            start: None,
                        });
                        stack.push(State::Tag {
                            text: String::new(),
                        });
                    }
                    '}' => return Err(TextCodeError::at(&padded, index)),
                    other => {
                        if text.is_empty() {
                            start = Some(index);
                        }
                        text.push(other);
                        stack.push(State::Normal { text, start });
                    }
                },
                State::Tag { mut text } => match ch {
                    '\\' => stack.push(State::Escape(Box::new(State::Tag { text }))),
                    '{' => return Err(TextCodeError::at(&padded, index)),
                    ':' => stack.push(State::Body {
                        tag: text,
                        text: String::new(),
                        body_start: index + 1,
                    }),
                    '}' => {
                        // only the empty "{}" form may close from the tag state
                        if !text.is_empty() {
                            return Err(TextCodeError::at(&padded, index));
                        }
                    }
                    other => {
                        text.push(other);
                        stack.push(State::Tag { text });
                    }
                },
                State::Body {
                    tag,
                    mut text,
                    body_start,
                } => match ch {
                    '\\' => stack.push(State::Escape(Box::new(State::Body {
                        tag,
                        text,
                        body_start,
                    }))),
                    '{' | ':' => return Err(TextCodeError::at(&padded, index)),
                    '}' => blocks.push(Block::new(text, body_start, tag)),
                    other => {
                        text.push(other);
                        stack.push(State::Body {
                            tag,
                            text,
                            body_start,
                        });
                    }
                },
                State::Escape(prev) => {
                    let resumed = match *prev {
                        State::Normal { mut text, mut start } => {
                            if text.is_empty() {
                                start = Some(index - 1);
                            }
                            text.push(ch);
                            State::Normal { text, start }
                        }
                        State::Tag { mut text } => {
                            text.push(ch);
                            State::Tag { text }
                        }
                        State::Body {
                            tag,
                            mut text,
                            body_start,
                        } => {
                            text.push(ch);
                            State::Body {
                                tag,
                                text,
                                body_start,
                            }
                        }
                        State::Escape(_) => return Err(TextCodeError::at(&padded, index)),
                    };
                    stack.push(resumed);
                }
            }
        }
        Ok(Self::from_blocks(blocks))
    }
}

/// Backslash-escape every occurrence of `\ { } :`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ESCAPES.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escape `text` and wrap it as an empty-tag special block, so that any
/// payload (including the empty string) survives a round trip.
pub fn escape_block(text: &str) -> String {
    format!("{{:{}}}", escape(text))
}

/// Texts of every common block and every block tagged `tag`, in order.
pub fn code_to_strs<'a>(
    code: &'a TextCode,
    tag: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    code.blocks()
        .iter()
        .filter(move |block| block.common() || block.tag == tag)
        .map(|block| block.text.as_str())
}

/// Concatenation of [`code_to_strs`].
pub fn code_to_str(code: &TextCode, tag: &str) -> String {
    code_to_strs(code, tag).collect()
}

/// Recompile with `prefix` and `suffix` spliced around the serialized form.
pub fn affix_code(
    code: &TextCode,
    prefix: &str,
    suffix: &str,
) -> Result<TextCode, TextCodeError> {
    TextCode::compile(&format!("{prefix}{code}{suffix}"))
}

/// Split the serialized form at the source start of every block tagged
/// `tag`. Each boundary block begins a piece; the first piece holds whatever
/// precedes the first boundary and may be empty.
pub fn separate_code_by_tag(
    code: &TextCode,
    tag: &str,
) -> Result<Vec<TextCode>, TextCodeError> {
    let source = code.to_string();
    let mut pieces = Vec::new();
    let mut cur = 0;
    for (_, block) in code.blocks_with_tag(tag) {
        let index = block.source_start();
        pieces.push(TextCode::compile(char_slice(&source, cur, Some(index)))?);
        cur = index;
    }
    pieces.push(TextCode::compile(char_slice(&source, cur, None))?);
    Ok(pieces)
}

/// Slice `s` by char offsets.
fn char_slice(s: &str, start: usize, end: Option<usize>) -> &str {
    let byte_at = |n: usize| {
        s.char_indices()
            .nth(n)
            .map(|(byte, _)| byte)
            .unwrap_or(s.len())
    };
    let begin = byte_at(start);
    let finish = end.map(byte_at).unwrap_or(s.len()).max(begin);
    &s[begin..finish]
}

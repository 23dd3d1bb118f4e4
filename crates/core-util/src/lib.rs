//! Small shared helpers: a memoized lazy sequence, punctuation-aware text
//! splitting, and per-line affix/strip utilities.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Mutex;

/// A lazily-forced, memoized view over an iterator.
///
/// Elements are pulled from the underlying iterator on demand and cached, so
/// repeated indexing never re-drives the iterator. `len` forces the whole
/// sequence.
pub struct LazySequence<T> {
    inner: Mutex<LazyInner<T>>,
}

struct LazyInner<T> {
    iter: Box<dyn Iterator<Item = T> + Send>,
    cache: Vec<T>,
    done: bool,
}

impl<T: Clone> LazySequence<T> {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Self {
            inner: Mutex::new(LazyInner {
                iter: Box::new(iter),
                cache: Vec::new(),
                done: false,
            }),
        }
    }

    /// Pull elements until `len` items are cached or the iterator ends.
    /// Returns the number of cached items.
    fn force_to(&self, len: Option<usize>) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match len {
            None => {
                if !inner.done {
                    while let Some(item) = inner.iter.next() {
                        inner.cache.push(item);
                    }
                    inner.done = true;
                }
            }
            Some(len) => {
                while !inner.done && inner.cache.len() < len {
                    match inner.iter.next() {
                        Some(item) => inner.cache.push(item),
                        None => inner.done = true,
                    }
                }
            }
        }
        inner.cache.len()
    }

    /// Element at `index`, or `None` past the end of the underlying iterator.
    pub fn get(&self, index: usize) -> Option<T> {
        let available = self.force_to(Some(index + 1));
        if index >= available {
            return None;
        }
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Some(inner.cache[index].clone())
    }

    /// Total length. Forces the entire sequence.
    pub fn len(&self) -> usize {
        self.force_to(None)
    }

    pub fn is_empty(&self) -> bool {
        self.force_to(Some(1)) == 0
    }
}

static PUNCTUATION_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\p{P}+").unwrap());

/// Split `text` after every punctuation run, keeping the punctuation with the
/// preceding piece. A run touching the start of the string does not open a
/// split, and nothing is split at the very end.
pub fn split_by_punctuations(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for run in PUNCTUATION_RUN.find_iter(text) {
        if run.start() == start || run.end() == text.len() {
            continue;
        }
        pieces.push(&text[start..run.end()]);
        start = run.end();
    }
    pieces.push(&text[start..]);
    pieces
}

/// Prefix and suffix every line of `text`. A trailing newline does not
/// produce an empty final line.
pub fn affix_lines(text: &str, prefix: &str, suffix: &str) -> String {
    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
        out.push_str(suffix);
    }
    out
}

/// Trim surrounding whitespace from every line of `text`.
pub fn strip_lines(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n")
}

//! Named file sections and the locations generated text can land in.
//!
//! A section is the region between an opening sentinel
//! `[<id>,generate,<name>]` / `<!--<id> generate section="<name>"-->` and its
//! closing sentinel. The [`SectionRegistry`] caches each file's parsed
//! section map, invalidated by mtime, and serializes all access to a file
//! behind a per-path async lock. Edits go through scoped handles that splice
//! the changed region back and never touch bytes outside it.

pub mod format;

use dashmap::DashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub use format::{for_path, SectionFormat, MARKER_ID};

#[derive(Debug, Error)]
pub enum SectionError {
    #[error("unknown extension: {0}")]
    UnknownExtension(PathBuf),
    #[error("overlapping section at char {offset}: {path}")]
    Overlap { offset: usize, path: PathBuf },
    #[error("duplicated section \"{name}\": {path}")]
    Duplicate { name: String, path: PathBuf },
    #[error("unenclosure from char {offset}: {path}")]
    Unenclosed { offset: usize, path: PathBuf },
    #[error("too many closings at char {offset}: {path}")]
    TooManyClosings { offset: usize, path: PathBuf },
    #[error("unknown section \"{name}\": {path}")]
    UnknownSection { name: String, path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Somewhere a generated result can be written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// In-memory sink; writes are discarded.
    Null,
    /// A whole file.
    Path(PathBuf),
    /// A named section of a file.
    Section { path: PathBuf, section: String },
}

impl Location {
    pub fn section(path: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self::Section {
            path: path.into(),
            section: section.into(),
        }
    }

    /// Backing file, if any.
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::Null => None,
            Self::Path(path) => Some(path),
            Self::Section { path, .. } => Some(path),
        }
    }

    /// Open this location for editing. The handle buffers the current
    /// content; nothing is persisted until [`LocationHandle::commit`].
    pub async fn open(&self, registry: &SectionRegistry) -> Result<LocationHandle, SectionError> {
        match self {
            Self::Null => Ok(LocationHandle {
                inner: HandleInner::Null,
                buffer: String::new(),
                original: String::new(),
            }),
            Self::Path(path) => {
                let (resolved, guard) = registry.lock_path(path).await?;
                let original = tokio::fs::read_to_string(&resolved).await?;
                Ok(LocationHandle {
                    inner: HandleInner::Path {
                        path: resolved,
                        _guard: guard,
                    },
                    buffer: original.clone(),
                    original,
                })
            }
            Self::Section { path, section } => {
                registry.open_section(path, section).await
            }
        }
    }
}

/// One `(location, text)` pair produced by an executed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenResult {
    pub location: Location,
    pub text: String,
}

impl GenResult {
    pub fn new(location: Location, text: impl Into<String>) -> Self {
        Self {
            location,
            text: text.into(),
        }
    }
}

/// Byte range and original content of one parsed section.
#[derive(Debug, Clone)]
struct SectionSpan {
    range: Range<usize>,
    original: String,
}

/// Cached parse of one file, valid while its mtime is unchanged.
#[derive(Debug, Default)]
struct SectionCacheData {
    mod_time_ns: Option<u128>,
    /// Sections in document order.
    sections: Vec<(String, SectionSpan)>,
}

impl SectionCacheData {
    fn get(&self, name: &str) -> Option<&SectionSpan> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, span)| span)
    }
}

/// Process-wide map from resolved path to that file's parse cache and lock.
#[derive(Default)]
pub struct SectionRegistry {
    entries: DashMap<PathBuf, Arc<Mutex<SectionCacheData>>>,
}

fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

fn mod_time_ns(meta: &std::fs::Metadata) -> u128 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos())
        .unwrap_or(0)
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(
        &self,
        path: &Path,
    ) -> Result<(PathBuf, Arc<Mutex<SectionCacheData>>), SectionError> {
        let resolved = tokio::fs::canonicalize(path).await?;
        let slot = self
            .entries
            .entry(resolved.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SectionCacheData::default())))
            .clone();
        Ok((resolved, slot))
    }

    /// Acquire the per-path lock without touching the section cache. Used by
    /// whole-file locations so section and path edits to one file serialize.
    async fn lock_path(
        &self,
        path: &Path,
    ) -> Result<(PathBuf, OwnedMutexGuard<SectionCacheData>), SectionError> {
        let (resolved, slot) = self.entry(path).await?;
        Ok((resolved, slot.lock_owned().await))
    }

    /// Names of the sections in `path`, in document order.
    pub async fn section_names(&self, path: &Path) -> Result<Vec<String>, SectionError> {
        let (resolved, slot) = self.entry(path).await?;
        let mut guard = slot.lock_owned().await;
        Self::ensure_fresh(&resolved, &mut guard).await?;
        Ok(guard
            .sections
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Open section `name` of `path` for editing. Holds the per-path lock
    /// for the life of the returned handle.
    pub async fn open_section(
        &self,
        path: &Path,
        name: &str,
    ) -> Result<LocationHandle, SectionError> {
        let (resolved, slot) = self.entry(path).await?;
        let mut guard = slot.lock_owned().await;
        Self::ensure_fresh(&resolved, &mut guard).await?;
        let span = guard
            .get(name)
            .ok_or_else(|| SectionError::UnknownSection {
                name: name.to_owned(),
                path: resolved.clone(),
            })?
            .clone();
        let file_text = tokio::fs::read_to_string(&resolved).await?;
        Ok(LocationHandle {
            buffer: span.original.clone(),
            original: span.original.clone(),
            inner: HandleInner::Section {
                path: resolved,
                range: span.range,
                file_text,
                _guard: guard,
            },
        })
    }

    /// Revalidate the cached parse against the file's mtime, re-parsing when
    /// stale. Caller holds the per-path lock.
    async fn ensure_fresh(
        path: &Path,
        data: &mut SectionCacheData,
    ) -> Result<(), SectionError> {
        let format = format::for_path(path)
            .ok_or_else(|| SectionError::UnknownExtension(path.to_owned()))?;
        let meta = tokio::fs::metadata(path).await?;
        let mod_time = mod_time_ns(&meta);
        if data.mod_time_ns == Some(mod_time) {
            return Ok(());
        }
        let text = tokio::fs::read_to_string(path).await?;
        data.sections = Self::parse(path, &text, format)?;
        data.mod_time_ns = Some(mod_time);
        debug!(
            target: "section.cache",
            path = %path.display(),
            sections = data.sections.len(),
            "section_cache_refreshed"
        );
        Ok(())
    }

    fn parse(
        path: &Path,
        text: &str,
        format: &SectionFormat,
    ) -> Result<Vec<(String, SectionSpan)>, SectionError> {
        let mut sections: Vec<(String, SectionSpan)> = Vec::new();
        let mut read_to = 0;
        for caps in format.start_regex.captures_iter(text) {
            let Some(start) = caps.get(0) else { continue };
            if start.start() < read_to {
                return Err(SectionError::Overlap {
                    offset: char_offset(text, start.start()),
                    path: path.to_owned(),
                });
            }
            let name = format.section_name(&caps);
            if sections.iter().any(|(section, _)| *section == name) {
                return Err(SectionError::Duplicate {
                    name,
                    path: path.to_owned(),
                });
            }
            let close_start = match text[start.end()..].find(&format.stop) {
                Some(found) => start.end() + found,
                None => {
                    return Err(SectionError::Unenclosed {
                        offset: char_offset(text, start.start()),
                        path: path.to_owned(),
                    });
                }
            };
            let range = start.end()..close_start;
            sections.push((
                name,
                SectionSpan {
                    range: range.clone(),
                    original: text[range].to_owned(),
                },
            ));
            read_to = close_start + format.stop.len();
        }
        if let Some(extra) = format.end_regex.find_iter(text).nth(sections.len()) {
            return Err(SectionError::TooManyClosings {
                offset: char_offset(text, extra.start()),
                path: path.to_owned(),
            });
        }
        Ok(sections)
    }
}

#[derive(Debug)]
enum HandleInner {
    Null,
    Path {
        path: PathBuf,
        _guard: OwnedMutexGuard<SectionCacheData>,
    },
    Section {
        path: PathBuf,
        range: Range<usize>,
        file_text: String,
        _guard: OwnedMutexGuard<SectionCacheData>,
    },
}

/// Scoped editing handle over a [`Location`]. Holds the location's per-path
/// lock (when it has one) until dropped; dropping without
/// [`commit`](Self::commit) never writes.
#[derive(Debug)]
pub struct LocationHandle {
    inner: HandleInner,
    original: String,
    buffer: String,
}

impl LocationHandle {
    /// Current buffer content.
    pub fn content(&self) -> &str {
        &self.buffer
    }

    /// Content as opened.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn replace(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Persist the buffer. Writes nothing when the buffer matches what was
    /// opened; section handles splice only their own byte range.
    pub async fn commit(self) -> Result<(), SectionError> {
        if self.buffer == self.original {
            return Ok(());
        }
        match self.inner {
            HandleInner::Null => Ok(()),
            HandleInner::Path { path, _guard } => {
                tokio::fs::write(&path, self.buffer.as_bytes()).await?;
                Ok(())
            }
            HandleInner::Section {
                path,
                range,
                file_text,
                _guard,
            } => {
                let mut spliced = String::with_capacity(
                    file_text.len() - range.len() + self.buffer.len(),
                );
                spliced.push_str(&file_text[..range.start]);
                spliced.push_str(&self.buffer);
                spliced.push_str(&file_text[range.end..]);
                tokio::fs::write(&path, spliced.as_bytes()).await?;
                Ok(())
            }
        }
    }
}

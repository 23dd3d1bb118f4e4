//! Persistent, content-keyed cache of compiled programs.
//!
//! The cache folder holds one serialized program per entry plus a
//! `metadata.json` index. Opening loads every entry concurrently; closing
//! evicts entries idle for a day, persists new ones, and rewrites the index.
//! Every per-entry failure is non-fatal: the entry is dropped, the orphan
//! file removed, and a warning logged.

use crate::{CompileOptions, Executor, Program, ScriptError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

const METADATA_FILENAME: &str = "metadata.json";
const CACHE_FILE_EXTENSION: &str = "tgc";
/// Entries not touched for this long are evicted on close.
const CACHE_TIMEOUT_SECS: u64 = 86_400;

/// Identity of a compiled program: the source, the compile options, and the
/// executor's instruction-format version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: String,
    pub filename: String,
    pub magic_number: u64,
    pub mode: String,
    pub flags: u32,
    pub dont_inherit: bool,
    pub optimize: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataValue {
    pub cache_name: String,
    pub access_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataEntry {
    key: CacheKey,
    value: MetadataValue,
}

struct CacheEntry {
    value: MetadataValue,
    code: Arc<Program>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    names: HashSet<String>,
}

/// Compile-once cache scoped to one generate run.
pub struct CompileCache {
    folder: Option<PathBuf>,
    executor: Arc<dyn Executor>,
    state: Mutex<CacheState>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

async fn remove_orphan(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(target: "script.cache", path = %path.display(), %err, "orphan_removal_failed");
        }
    }
}

impl CompileCache {
    /// Open the cache. `folder: None` disables persistence entirely; every
    /// `compile` call then compiles directly.
    pub async fn open(
        folder: Option<PathBuf>,
        executor: Arc<dyn Executor>,
    ) -> std::io::Result<Self> {
        let cache = Self {
            folder,
            executor,
            state: Mutex::new(CacheState::default()),
        };
        let Some(folder) = cache.folder.clone() else {
            return Ok(cache);
        };
        tokio::fs::create_dir_all(&folder).await?;

        let metadata_path = folder.join(METADATA_FILENAME);
        let metadata: Vec<MetadataEntry> = match tokio::fs::read(&metadata_path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(target: "script.cache", %err, "metadata_corrupt");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&metadata_path, b"[]").await?;
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let loads = metadata.into_iter().map(|entry| {
            let folder = folder.clone();
            async move {
                let path = folder.join(&entry.value.cache_name);
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(target: "script.cache", path = %path.display(), %err, "entry_unreadable");
                        remove_orphan(&path).await;
                        return None;
                    }
                };
                match serde_json::from_slice::<Program>(&bytes) {
                    Ok(code) => Some((entry.key, entry.value, Arc::new(code))),
                    Err(err) => {
                        warn!(target: "script.cache", path = %path.display(), %err, "entry_corrupt");
                        remove_orphan(&path).await;
                        None
                    }
                }
            }
        });
        let loaded = join_all(loads).await;

        let mut state = cache.state.lock().await;
        for (key, value, code) in loaded.into_iter().flatten() {
            state.names.insert(value.cache_name.clone());
            state.entries.insert(key, CacheEntry { value, code });
        }
        drop(state);
        Ok(cache)
    }

    /// Compile `source`, reusing a cached program when the key matches. A
    /// hit refreshes the entry's access time and returns the same program
    /// handle.
    pub async fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Arc<Program>, ScriptError> {
        if self.folder.is_none() {
            return Ok(Arc::new(self.executor.compile(source, options)?));
        }
        let key = CacheKey {
            source: source.to_owned(),
            filename: options.filename.clone(),
            magic_number: self.executor.magic_number(),
            mode: options.mode.clone(),
            flags: options.flags,
            dont_inherit: options.dont_inherit,
            optimize: options.optimize,
        };
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value.access_time = unix_now();
            return Ok(entry.code.clone());
        }
        let code = Arc::new(self.executor.compile(source, options)?);
        let mut cache_name = format!("{}.{CACHE_FILE_EXTENSION}", Uuid::new_v4());
        while state.names.contains(&cache_name) {
            cache_name = format!("{}.{CACHE_FILE_EXTENSION}", Uuid::new_v4());
        }
        state.names.insert(cache_name.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value: MetadataValue {
                    cache_name,
                    access_time: unix_now(),
                },
                code: code.clone(),
            },
        );
        Ok(code)
    }

    /// Flush the cache: evict idle entries, persist fresh ones, rewrite the
    /// metadata index.
    pub async fn close(&self) -> std::io::Result<()> {
        let Some(folder) = self.folder.clone() else {
            return Ok(());
        };
        let now = unix_now();
        let state = self.state.lock().await;

        let saves = state.entries.iter().map(|(key, entry)| {
            let folder = folder.clone();
            let key = key.clone();
            let value = entry.value.clone();
            let code = entry.code.clone();
            async move {
                let path = folder.join(&value.cache_name);
                if now.saturating_sub(value.access_time) >= CACHE_TIMEOUT_SECS {
                    remove_orphan(&path).await;
                    return None;
                }
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    let bytes = match serde_json::to_vec(code.as_ref()) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(target: "script.cache", ?key, %err, "entry_unserializable");
                            return None;
                        }
                    };
                    if let Err(err) = tokio::fs::write(&path, bytes).await {
                        warn!(target: "script.cache", path = %path.display(), %err, "entry_save_failed");
                        remove_orphan(&path).await;
                        return None;
                    }
                }
                Some(MetadataEntry { key, value })
            }
        });
        let mut surviving: Vec<MetadataEntry> =
            join_all(saves).await.into_iter().flatten().collect();
        surviving.sort_by(|a, b| a.value.cache_name.cmp(&b.value.cache_name));

        let json = serde_json::to_vec_pretty(&surviving)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        tokio::fs::write(folder.join(METADATA_FILENAME), json).await
    }
}

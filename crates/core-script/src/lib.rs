//! The program substrate behind generation.
//!
//! Embedded programs are opaque compiled units to the rest of the engine:
//! an [`Executor`] compiles source text into a [`Program`] and later runs it
//! against a [`Namespace`], returning a [`Value`]. The shipped executor is
//! the line-directive `text-script` language in [`script`]; the persistent
//! compile cache lives in [`cache`].

pub mod cache;
pub mod script;

use async_trait::async_trait;
use core_config::Config;
use core_flashcard::RenderPolicy;
use core_section::{GenResult, Location};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use cache::CompileCache;
pub use script::ScriptExecutor;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("syntax error at line {line} of {filename}: {message}")]
    Syntax {
        line: usize,
        filename: String,
        message: String,
    },
    #[error("undefined variable \"{0}\"")]
    UndefinedVariable(String),
    #[error(transparent)]
    Flashcard(#[from] core_flashcard::FlashcardError),
    #[error(transparent)]
    TextCode(#[from] core_textcode::TextCodeError),
}

/// Options a program was compiled under; part of the compile-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    pub filename: String,
    pub mode: String,
    pub flags: u32,
    pub dont_inherit: bool,
    pub optimize: i32,
}

impl CompileOptions {
    /// The options every embedded document block is compiled under.
    pub fn exec(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mode: "exec".to_owned(),
            flags: 0,
            dont_inherit: true,
            optimize: 0,
        }
    }
}

/// A compiled program. The instruction encoding belongs to the executor that
/// produced it; everyone else treats programs as opaque, dedupable units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Stable identity derived from the source and compile options; used to
    /// deduplicate init lists and to key equality.
    pub fingerprint: u64,
    pub ops: Vec<script::Op>,
}

/// Mutable variable bindings shared by a program and its init programs.
#[derive(Debug, Default, Clone)]
pub struct Namespace {
    bindings: BTreeMap<String, String>,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Merge an init program's export map into the bindings.
    pub fn merge(&mut self, exports: BTreeMap<String, String>) {
        self.bindings.extend(exports);
    }
}

/// What a program evaluated to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unit,
    /// Name bindings exported by a library block.
    Map(BTreeMap<String, String>),
    Result(GenResult),
    Results(Vec<GenResult>),
}

/// The slice of the execution environment an executor may observe: the
/// current file, its directory, and the rendering knobs.
pub struct ExecContext<'a> {
    pub cwf: &'a Path,
    pub cwd: &'a Path,
    pub config: &'a Config,
    pub policy: &'a RenderPolicy,
}

impl ExecContext<'_> {
    /// Section of the current file as a writable location; `None` is the
    /// null sink.
    pub fn cwf_sect(&self, section: Option<&str>) -> Location {
        match section {
            Some(section) => Location::section(self.cwf, section),
            None => Location::Null,
        }
    }

    /// Several sections of the current file at once.
    pub fn cwf_sects<'s>(
        &self,
        sections: impl IntoIterator<Item = Option<&'s str>>,
    ) -> Vec<Location> {
        sections
            .into_iter()
            .map(|section| self.cwf_sect(section))
            .collect()
    }

    /// Path relative to the current file's directory.
    pub fn relative(&self, path: &str) -> PathBuf {
        self.cwd.join(path)
    }
}

/// A pluggable program substrate.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Fence language tag identifying this executor's programs in documents.
    fn language_tag(&self) -> &'static str;

    /// Version tag of the compiled instruction encoding. A cache entry whose
    /// magic number differs is stale.
    fn magic_number(&self) -> u64;

    fn compile(&self, source: &str, options: &CompileOptions) -> Result<Program, ScriptError>;

    async fn run(
        &self,
        ctx: &ExecContext<'_>,
        program: &Program,
        namespace: &mut Namespace,
    ) -> Result<Value, ScriptError>;
}

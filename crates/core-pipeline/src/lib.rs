//! The generation pipeline: readers that extract embedded programs from
//! documents, the environment that executes them, and writers that splice
//! results back into files or clear previously generated content.

pub mod env;
pub mod read;
pub mod write;

use core_config::Config;
use core_script::{CompileCache, Executor, ScriptError};
use core_section::{SectionError, SectionRegistry};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use env::Environment;
pub use read::{CodeLibrary, MarkdownReader, ReaderRegistry};
pub use write::{ClearWriter, GenerateWriter, Writer};

/// Marker word identifying this tool's fenced program blocks.
pub const NAME: &str = "textgen";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unenclosed program block at char {offset}: {path}")]
    UnenclosedBlock { offset: usize, path: PathBuf },
    #[error("unsupported reader extension: {0}")]
    UnknownReaderExtension(PathBuf),
    #[error("import cycle through {0}")]
    ImportCycle(PathBuf),
    #[error("program returned a non-result value")]
    NotAResult,
    #[error("init program exported a non-mapping value")]
    BadInitExport,
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What kinds of data `clear` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearType {
    Content,
    FlashcardState,
}

#[derive(Debug, Clone)]
pub struct ClearOpts {
    pub types: HashSet<ClearType>,
}

/// Generation options shared by every reader and writer of a run.
#[derive(Debug, Clone)]
pub struct GenOpts {
    /// Write or refresh the generated-at header.
    pub timestamp: bool,
    /// Pad flashcard state groups up to each card's side count.
    pub init_flashcards: bool,
}

/// Everything a generate run shares: options, config, the program executor
/// and its compile cache, and the section registry.
#[derive(Clone)]
pub struct RunContext {
    pub options: GenOpts,
    pub config: Config,
    pub executor: Arc<dyn Executor>,
    pub cache: Arc<CompileCache>,
    pub sections: Arc<SectionRegistry>,
}

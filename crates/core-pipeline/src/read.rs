//! Document readers: extraction of embedded programs and their imports.

use crate::{GenerateWriter, PipelineError, RunContext, NAME};
use core_flashcard::RenderPolicy;
use core_script::{CompileOptions, Program};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::env::Environment;

/// A reader that exposes compiled program libraries other documents can
/// pull in with `# import`.
pub trait CodeLibrary {
    /// Library code sequences, one per `module` block (its imports followed
    /// by its own program).
    fn codes(&self) -> &[Vec<Arc<Program>>];
}

/// Parsed view of one Markdown document: its `module` libraries and its
/// `data` blocks with their materialized import lists.
#[derive(Debug)]
pub struct MarkdownReader {
    path: PathBuf,
    codes: Vec<Vec<Arc<Program>>>,
    data: Vec<(Arc<Program>, Vec<Arc<Program>>)>,
}

impl CodeLibrary for MarkdownReader {
    fn codes(&self) -> &[Vec<Arc<Program>>] {
        &self.codes
    }
}

impl MarkdownReader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One writer per data block, each wired to an environment bound to
    /// this document.
    pub fn pipe(&self, ctx: &RunContext) -> Vec<GenerateWriter> {
        self.data
            .iter()
            .map(|(program, imports)| {
                let mut seen = HashSet::new();
                let init: Vec<Arc<Program>> = imports
                    .iter()
                    .chain(self.codes.iter().flatten())
                    .filter(|program| seen.insert(program.fingerprint))
                    .cloned()
                    .collect();
                let env = Environment::new(
                    self.path.clone(),
                    ctx.config.clone(),
                    RenderPolicy {
                        pad_missing_flashcard_state: ctx.options.init_flashcards,
                    },
                    ctx.executor.clone(),
                );
                GenerateWriter::new(
                    program.clone(),
                    init,
                    env,
                    ctx.options.clone(),
                    ctx.sections.clone(),
                )
            })
            .collect()
    }
}

/// Process-wide reader cache keyed by resolved path. A document is parsed at
/// most once per run; imports resolve through the same cache, and a path
/// that re-enters its own import chain is a cycle.
pub struct ReaderRegistry {
    ctx: RunContext,
    start_regex: Regex,
    stop_regex: Regex,
    import_regex: Regex,
    slots: DashMap<PathBuf, Arc<Mutex<Option<Arc<MarkdownReader>>>>>,
}

impl ReaderRegistry {
    pub fn new(ctx: RunContext) -> Self {
        let language = regex::escape(ctx.executor.language_tag());
        let start_regex = Regex::new(&format!(
            "```{language}\n# {NAME} generate (data|module)"
        ))
        .unwrap();
        let stop_regex = Regex::new("```").unwrap();
        let import_regex = Regex::new(r"(?m)^# import (.+)$").unwrap();
        Self {
            ctx,
            start_regex,
            stop_regex,
            import_regex,
            slots: DashMap::new(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Shared reader for `path`, parsing the document on first use.
    pub async fn cached(&self, path: &Path) -> Result<Arc<MarkdownReader>, PipelineError> {
        self.cached_chain(path, &[]).await
    }

    fn cached_chain<'a>(
        &'a self,
        path: &'a Path,
        chain: &'a [PathBuf],
    ) -> BoxFuture<'a, Result<Arc<MarkdownReader>, PipelineError>> {
        async move {
            let resolved = tokio::fs::canonicalize(path).await?;
            if resolved.extension().and_then(|ext| ext.to_str()) != Some("md") {
                return Err(PipelineError::UnknownReaderExtension(resolved));
            }
            if chain.contains(&resolved) {
                return Err(PipelineError::ImportCycle(resolved));
            }
            let slot = self
                .slots
                .entry(resolved.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone();
            let mut guard = slot.lock().await;
            if let Some(reader) = guard.as_ref() {
                return Ok(reader.clone());
            }
            let text = tokio::fs::read_to_string(&resolved).await?;
            let mut chain = chain.to_vec();
            chain.push(resolved.clone());
            let reader = Arc::new(self.read(resolved, &text, &chain).await?);
            *guard = Some(reader.clone());
            Ok(reader)
        }
        .boxed()
    }

    /// Parse `text`, compiling every fenced program block and resolving its
    /// imports.
    async fn read(
        &self,
        path: PathBuf,
        text: &str,
        chain: &[PathBuf],
    ) -> Result<MarkdownReader, PipelineError> {
        let mut reader = MarkdownReader {
            path,
            codes: Vec::new(),
            data: Vec::new(),
        };
        let parent = reader
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let options = CompileOptions::exec(reader.path.display().to_string());

        let mut pos = 0;
        while let Some(caps) = self.start_regex.captures_at(text, pos) {
            let opener = match caps.get(0) {
                Some(opener) => opener,
                None => break,
            };
            let stop = match self.stop_regex.find_at(text, opener.end()) {
                Some(stop) => stop,
                None => {
                    return Err(PipelineError::UnenclosedBlock {
                        offset: text[..opener.start()].chars().count(),
                        path: reader.path.clone(),
                    });
                }
            };
            let code = &text[opener.end()..stop.start()];

            // keep compile-error line numbers aligned with the document
            let blank_prefix = "\n".repeat(text[..opener.end()].matches('\n').count());
            let source = format!("{blank_prefix}{code}");
            let program = self.ctx.cache.compile(&source, &options).await?;

            let mut imports: Vec<Arc<Program>> = Vec::new();
            for import in self.import_regex.captures_iter(code) {
                let import_path = parent.join(import[1].trim());
                let imported = self.cached_chain(&import_path, chain).await?;
                imports.extend(imported.codes().iter().flatten().cloned());
            }

            match &caps[1] {
                "module" => {
                    let mut library = imports;
                    library.push(program);
                    reader.codes.push(library);
                }
                _ => reader.data.push((program, imports)),
            }
            pos = stop.end();
        }
        debug!(
            target: "pipeline.read",
            path = %reader.path.display(),
            data_blocks = reader.data.len(),
            module_blocks = reader.codes.len(),
            "document_read"
        );
        Ok(reader)
    }
}

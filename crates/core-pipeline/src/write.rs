//! Writers: persist generated results or clear previously generated state.

use crate::{ClearOpts, ClearType, Environment, GenOpts, PipelineError};
use async_trait::async_trait;
use core_script::{Program, Value};
use core_section::{GenResult, Location, SectionRegistry};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Header stamped ahead of generated content when timestamps are on.
pub fn generate_comment(now: &str) -> String {
    format!(
        "<!-- The following content is generated at {now}. Any edits will be overridden! -->"
    )
}

/// Matches a generate header at the start of a section body.
pub static GENERATE_COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<!-- The following content is generated at \d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{6}[+-]\d{2}:\d{2}\. Any edits will be overridden! -->",
    )
    .unwrap()
});

/// Flashcard state markers, with the optional space that precedes them.
static CLEAR_STATES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" ?<!--SR:(.*?)-->").unwrap());

/// A two-phase write: `prepare` executes and validates, `commit` persists.
/// The split is what lets the CLI tell validation failures from write
/// failures.
#[async_trait]
pub trait Writer: Send {
    async fn prepare(&mut self) -> Result<(), PipelineError>;
    async fn commit(&mut self) -> Result<(), PipelineError>;
}

/// Executes one data-block program and splices its results.
pub struct GenerateWriter {
    program: Arc<Program>,
    init_programs: Vec<Arc<Program>>,
    env: Environment,
    options: GenOpts,
    sections: Arc<SectionRegistry>,
    results: Option<Vec<GenResult>>,
}

impl GenerateWriter {
    pub fn new(
        program: Arc<Program>,
        init_programs: Vec<Arc<Program>>,
        env: Environment,
        options: GenOpts,
        sections: Arc<SectionRegistry>,
    ) -> Self {
        Self {
            program,
            init_programs,
            env,
            options,
            sections,
            results: None,
        }
    }

    /// Init programs this writer will run ahead of its data block, already
    /// deduplicated by first occurrence.
    pub fn init_programs(&self) -> &[Arc<Program>] {
        &self.init_programs
    }

    /// Write one location's concatenated results, honoring the header
    /// discipline: empty output never touches the file, identical payloads
    /// are left alone (keeping any prior header), and a changed payload gets
    /// a fresh header only when timestamps are on.
    async fn write_group(
        sections: &SectionRegistry,
        options: &GenOpts,
        location: Location,
        group: Vec<GenResult>,
    ) -> Result<(), PipelineError> {
        let combined: String = group
            .iter()
            .map(|result| result.text.as_str())
            .filter(|text| !text.is_empty())
            .collect();
        if combined.is_empty() {
            return Ok(());
        }
        let mut handle = location.open(sections).await?;
        let current = handle.content();
        let header = GENERATE_COMMENT_REGEX
            .find(current)
            .map(|found| found.as_str().to_owned());
        let compare = match &header {
            Some(header) => current[header.len()..].to_owned(),
            None => current.to_owned(),
        };
        if combined == compare {
            return Ok(());
        }
        let prefix = if options.timestamp {
            let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z");
            generate_comment(&now.to_string())
        } else {
            header.unwrap_or_default()
        };
        handle.replace(format!("{prefix}{combined}"));
        handle.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Writer for GenerateWriter {
    /// Execute the program and validate its value down to a result list.
    async fn prepare(&mut self) -> Result<(), PipelineError> {
        let value = self.env.exec(&self.program, &self.init_programs).await?;
        let results = match value {
            Value::Result(result) => vec![result],
            Value::Results(results) => results,
            Value::Unit | Value::Map(_) => return Err(PipelineError::NotAResult),
        };
        debug!(
            target: "pipeline.write",
            path = %self.env.cwf.display(),
            results = results.len(),
            "program_executed"
        );
        self.results = Some(results);
        Ok(())
    }

    /// Group results by location, preserving arrival order, and perform one
    /// splice per location.
    async fn commit(&mut self) -> Result<(), PipelineError> {
        let results = self.results.take().unwrap_or_default();
        let mut groups: Vec<(Location, Vec<GenResult>)> = Vec::new();
        for result in results {
            match groups
                .iter_mut()
                .find(|(location, _)| *location == result.location)
            {
                Some((_, group)) => group.push(result),
                None => {
                    let location = result.location.clone();
                    groups.push((location, vec![result]));
                }
            }
        }
        let writes = groups.into_iter().map(|(location, group)| {
            Self::write_group(&self.sections, &self.options, location, group)
        });
        for outcome in join_all(writes).await {
            outcome?;
        }
        Ok(())
    }
}

/// Truncates generated sections or strips flashcard state from them.
pub struct ClearWriter {
    path: PathBuf,
    options: ClearOpts,
    sections: Arc<SectionRegistry>,
}

impl ClearWriter {
    pub fn new(path: PathBuf, options: ClearOpts, sections: Arc<SectionRegistry>) -> Self {
        Self {
            path,
            options,
            sections,
        }
    }
}

#[async_trait]
impl Writer for ClearWriter {
    async fn prepare(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), PipelineError> {
        for name in self.sections.section_names(&self.path).await? {
            let mut handle = self.sections.open_section(&self.path, &name).await?;
            if self.options.types.contains(&ClearType::Content) {
                handle.clear();
            } else if self.options.types.contains(&ClearType::FlashcardState) {
                let stripped = CLEAR_STATES_REGEX.replace_all(handle.content(), "");
                if stripped != handle.content() {
                    let stripped = stripped.into_owned();
                    handle.replace(stripped);
                }
            }
            handle.commit().await?;
        }
        Ok(())
    }
}

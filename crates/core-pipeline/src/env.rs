//! Isolated execution substrate for embedded programs.

use crate::PipelineError;
use core_config::Config;
use core_flashcard::RenderPolicy;
use core_script::{ExecContext, Executor, Namespace, Program, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Execution environment bound to one document.
///
/// Carries the current file and directory the program may address, the run
/// config, and the rendering policy. Every [`exec`](Self::exec) call starts
/// from a fresh namespace; init programs run first, in order, and their
/// exported maps become visible to the program proper.
pub struct Environment {
    pub cwf: PathBuf,
    pub cwd: PathBuf,
    pub config: Config,
    pub policy: RenderPolicy,
    executor: Arc<dyn Executor>,
}

impl Environment {
    pub fn new(
        cwf: PathBuf,
        config: Config,
        policy: RenderPolicy,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let cwd = cwf
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            cwf,
            cwd,
            config,
            policy,
            executor,
        }
    }

    /// Run `program` after its init programs, returning the program's value.
    ///
    /// An init program may evaluate to a map (merged into the namespace) or
    /// to unit (skipped); any other value is a validation error.
    pub async fn exec(
        &self,
        program: &Program,
        init_programs: &[Arc<Program>],
    ) -> Result<Value, PipelineError> {
        let mut namespace = Namespace::default();
        let ctx = ExecContext {
            cwf: &self.cwf,
            cwd: &self.cwd,
            config: &self.config,
            policy: &self.policy,
        };
        for init in init_programs {
            match self.executor.run(&ctx, init, &mut namespace).await? {
                Value::Map(exports) => namespace.merge(exports),
                Value::Unit => {}
                Value::Result(_) | Value::Results(_) => {
                    return Err(PipelineError::BadInitExport);
                }
            }
        }
        Ok(self.executor.run(&ctx, program, &mut namespace).await?)
    }
}

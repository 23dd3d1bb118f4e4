//! textgen entrypoint.

use clap::{Parser, Subcommand, ValueEnum};
use core_pipeline::{
    ClearOpts, ClearType, ClearWriter, GenOpts, ReaderRegistry, RunContext, Writer,
};
use core_script::{CompileCache, ScriptExecutor};
use core_section::SectionRegistry;
use futures::future::join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

mod exit;

use exit::{ClearExit, GenerateExit};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "textgen", version, about = "tools for notes")]
struct Args {
    /// Optional configuration file path (overrides discovery of `textgen.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClearTypeArg {
    /// Remove generated content blocks.
    Content,
    /// Remove flashcard state metadata.
    #[value(name = "fc_state")]
    FcState,
}

impl From<ClearTypeArg> for ClearType {
    fn from(arg: ClearTypeArg) -> Self {
        match arg {
            ClearTypeArg::Content => ClearType::Content,
            ClearTypeArg::FcState => ClearType::FlashcardState,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clear generated text in inputs.
    Clear {
        /// Type(s) of data to clear.
        #[arg(
            short = 't',
            long = "type",
            value_enum,
            num_args = 1..,
            default_value = "content"
        )]
        types: Vec<ClearTypeArg>,
        /// Input file(s) to process.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Generate text from inputs.
    Generate {
        /// Update or write the generation timestamp (default).
        #[arg(short = 't', long = "timestamp", conflicts_with = "no_timestamp")]
        timestamp: bool,
        /// Do not update or write the generation timestamp.
        #[arg(short = 'T', long = "no-timestamp")]
        no_timestamp: bool,
        /// Initialize flashcards missing state entries.
        #[arg(long = "init-flashcards", conflicts_with = "no_init_flashcards")]
        init_flashcards: bool,
        /// Do not initialize flashcards (default).
        #[arg(long = "no-init-flashcards")]
        no_init_flashcards: bool,
        /// Compiled-program cache folder.
        #[arg(
            long = "code-cache",
            default_value = "./.textgen-cache",
            conflicts_with = "no_code_cache"
        )]
        code_cache: PathBuf,
        /// Disable the compiled-program cache.
        #[arg(long = "no-code-cache")]
        no_code_cache: bool,
        /// Input file(s) to process.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn configure_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_clear(types: Vec<ClearTypeArg>, inputs: Vec<PathBuf>) -> u8 {
    let options = ClearOpts {
        types: types.into_iter().map(ClearType::from).collect::<HashSet<_>>(),
    };
    let sections = Arc::new(SectionRegistry::new());

    let tasks = inputs.into_iter().map(|input| {
        let options = options.clone();
        let sections = sections.clone();
        async move {
            let mut writer = ClearWriter::new(input.clone(), options, sections);
            if let Err(err) = writer.prepare().await {
                error!(path = %input.display(), %err, "clear_failed");
                return ClearExit::ERROR;
            }
            if let Err(err) = writer.commit().await {
                error!(path = %input.display(), %err, "clear_failed");
                return ClearExit::ERROR;
            }
            ClearExit::OK
        }
    });
    join_all(tasks)
        .await
        .into_iter()
        .fold(ClearExit::OK, |left, right| left | right)
        .bits()
}

async fn run_generate(
    config_path: Option<PathBuf>,
    timestamp: bool,
    init_flashcards: bool,
    code_cache: Option<PathBuf>,
    inputs: Vec<PathBuf>,
) -> u8 {
    let config = core_config::load_from(config_path);
    let executor = Arc::new(ScriptExecutor);
    let cache = match CompileCache::open(code_cache, executor.clone()).await {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            error!(%err, "code_cache_open_failed");
            return GenerateExit::READ_ERROR.bits();
        }
    };

    let ctx = RunContext {
        options: GenOpts {
            timestamp,
            init_flashcards,
        },
        config,
        executor,
        cache: cache.clone(),
        sections: Arc::new(SectionRegistry::new()),
    };
    let registry = Arc::new(ReaderRegistry::new(ctx));

    // read phase: parse every input, collecting writers from the successes
    let reads = inputs.iter().map(|input| {
        let registry = registry.clone();
        async move { (input, registry.cached(input).await) }
    });
    let mut exit = GenerateExit::OK;
    let mut writers = Vec::new();
    for (input, outcome) in join_all(reads).await {
        match outcome {
            Ok(reader) => writers.extend(reader.pipe(registry.context())),
            Err(err) => {
                error!(path = %input.display(), %err, "read_failed");
                exit |= GenerateExit::READ_ERROR;
            }
        }
    }

    // write phase: execute and splice concurrently across writers
    let writes = writers.into_iter().map(|mut writer| async move {
        if let Err(err) = writer.prepare().await {
            error!(%err, "validation_failed");
            return GenerateExit::VALIDATE_ERROR;
        }
        if let Err(err) = writer.commit().await {
            error!(%err, "write_failed");
            return GenerateExit::WRITE_ERROR;
        }
        GenerateExit::OK
    });
    exit = join_all(writes).await.into_iter().fold(exit, |l, r| l | r);

    if let Err(err) = cache.close().await {
        error!(%err, "code_cache_close_failed");
        exit |= GenerateExit::WRITE_ERROR;
    }
    exit.bits()
}

#[tokio::main]
async fn main() -> ExitCode {
    configure_logging();
    let args = Args::parse();
    let code = match args.command {
        Command::Clear { types, inputs } => run_clear(types, inputs).await,
        Command::Generate {
            timestamp: _,
            no_timestamp,
            init_flashcards,
            no_init_flashcards: _,
            code_cache,
            no_code_cache,
            inputs,
        } => {
            run_generate(
                args.config,
                !no_timestamp,
                init_flashcards,
                if no_code_cache { None } else { Some(code_cache) },
                inputs,
            )
            .await
        }
    };
    ExitCode::from(code)
}

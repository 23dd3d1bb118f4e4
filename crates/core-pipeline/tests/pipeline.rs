//! End-to-end pipeline tests: read documents, execute their programs, and
//! verify the spliced files.

use core_config::Config;
use core_pipeline::write::GENERATE_COMMENT_REGEX;
use core_pipeline::{
    ClearOpts, ClearType, ClearWriter, GenOpts, PipelineError, ReaderRegistry,
    RunContext, Writer,
};
use core_script::{CompileCache, ScriptExecutor};
use core_section::{SectionRegistry, MARKER_ID};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn section(name: &str, body: &str) -> String {
    format!("<!--{MARKER_ID} generate section=\"{name}\"-->{body}<!--/{MARKER_ID}-->")
}

fn program_block(kind: &str, body: &str) -> String {
    format!("```text-script\n# textgen generate {kind}\n{body}```\n")
}

async fn run_context(options: GenOpts) -> RunContext {
    let executor = Arc::new(ScriptExecutor);
    let cache = Arc::new(
        CompileCache::open(None, executor.clone())
            .await
            .expect("cache open"),
    );
    RunContext {
        options,
        config: Config::default(),
        executor,
        cache,
        sections: Arc::new(SectionRegistry::new()),
    }
}

async fn generate(registry: &ReaderRegistry, path: &Path) -> Result<(), PipelineError> {
    let reader = registry.cached(path).await?;
    for mut writer in reader.pipe(registry.context()) {
        writer.prepare().await?;
        writer.commit().await?;
    }
    Ok(())
}

#[tokio::test]
async fn generate_splices_into_a_named_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "# Title\n\n{}\n\n{}",
        program_block("data", "emit :x fresh\n"),
        section("x", "old")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    let result = std::fs::read_to_string(&path).unwrap();
    assert!(result.contains(&section("x", "fresh")));
    assert!(!result.contains("old"));
    // everything outside the section is untouched
    assert!(result.starts_with("# Title\n"));
    assert!(result.contains("# textgen generate data"));
}

#[tokio::test]
async fn generate_without_timestamp_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "{}{}",
        program_block("data", "emit :x stable\n"),
        section("x", "")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    // fresh run context: the reader cache is per-run, the file is re-read
    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();
    let second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn timestamp_header_is_written_and_then_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "{}{}",
        program_block("data", "emit :x payload\n"),
        section("x", "")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: true,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    let first = std::fs::read_to_string(&path).unwrap();
    let open = format!("<!--{MARKER_ID} generate section=\"x\"-->");
    let body_start = first.find(&open).unwrap() + open.len();
    let header = GENERATE_COMMENT_REGEX.find(&first[body_start..]).unwrap();
    assert!(first[body_start + header.end()..].starts_with("payload"));

    // unchanged payload: the old header (and its timestamp) survives
    let ctx = run_context(GenOpts {
        timestamp: true,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
}

#[tokio::test]
async fn no_timestamp_preserves_an_existing_header_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let header = "<!-- The following content is generated at 2024-01-02T03:04:05.000000+00:00. Any edits will be overridden! -->";
    let doc = format!(
        "{}{}",
        program_block("data", "emit :x new\n"),
        section("x", &format!("{header}old"))
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    let result = std::fs::read_to_string(&path).unwrap();
    assert!(result.contains(&section("x", &format!("{header}new"))));
}

#[tokio::test]
async fn empty_output_leaves_the_file_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "{}{}",
        program_block("data", "emit :x \n"),
        section("x", "preserve-me")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: true,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), doc);
}

#[tokio::test]
async fn imports_expose_library_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.md");
    std::fs::write(
        &lib,
        program_block("module", "let answer = 42\nexport answer\n"),
    )
    .unwrap();

    let main = dir.path().join("main.md");
    let doc = format!(
        "{}{}",
        program_block("data", "# import lib.md\nemit :x answer=${answer}\n"),
        section("x", "")
    );
    std::fs::write(&main, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &main).await.unwrap();

    let result = std::fs::read_to_string(&main).unwrap();
    assert!(result.contains(&section("x", "answer=42")));
}

#[tokio::test]
async fn own_module_blocks_feed_data_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "{}{}{}",
        program_block("module", "let local = here\nexport local\n"),
        program_block("data", "emit :x ${local}\n"),
        section("x", "")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    let result = std::fs::read_to_string(&path).unwrap();
    assert!(result.contains(&section("x", "here")));
}

#[tokio::test]
async fn duplicate_imports_are_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.md");
    std::fs::write(
        &lib,
        program_block("module", "let v = once\nexport v\n"),
    )
    .unwrap();

    let main = dir.path().join("main.md");
    let doc = format!(
        "{}{}",
        program_block(
            "data",
            "# import lib.md\n# import lib.md\nemit :x ${v}\n"
        ),
        section("x", "")
    );
    std::fs::write(&main, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let reader = registry.cached(&main).await.unwrap();
    let writers = reader.pipe(registry.context());
    assert_eq!(writers.len(), 1);
    assert_eq!(writers[0].init_programs().len(), 1);
}

#[tokio::test]
async fn import_cycles_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.md");
    let b = dir.path().join("b.md");
    std::fs::write(&a, program_block("module", "# import b.md\n")).unwrap();
    std::fs::write(&b, program_block("module", "# import a.md\n")).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let err = registry.cached(&a).await.unwrap_err();
    assert!(matches!(err, PipelineError::ImportCycle(_)));
}

#[tokio::test]
async fn non_markdown_imports_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let other = dir.path().join("other.txt");
    std::fs::write(&other, "not code").unwrap();

    let main = dir.path().join("main.md");
    std::fs::write(
        &main,
        program_block("data", "# import other.txt\nemit :x y\n"),
    )
    .unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let err = registry.cached(&main).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownReaderExtension(_)));
}

#[tokio::test]
async fn unenclosed_program_blocks_fail_the_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.md");
    std::fs::write(
        &path,
        "```text-script\n# textgen generate data\nemit :x y\n",
    )
    .unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let err = registry.cached(&path).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnenclosedBlock { .. }));
}

#[tokio::test]
async fn script_errors_report_document_line_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.md");
    // three document lines precede the bogus directive
    std::fs::write(
        &path,
        "intro\n\n```text-script\n# textgen generate data\nbogus\n```\n",
    )
    .unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let err = registry.cached(&path).await.unwrap_err();
    match err {
        PipelineError::Script(core_script::ScriptError::Syntax { line, .. }) => {
            assert_eq!(line, 5, "bogus sits on document line 5");
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }

    // with no preceding document lines the numbering starts at the fence
    let bare = dir.path().join("bare.md");
    std::fs::write(&bare, "```text-script\n# textgen generate data\nbogus\n```\n")
        .unwrap();
    let err = registry.cached(&bare).await.unwrap_err();
    match err {
        PipelineError::Script(core_script::ScriptError::Syntax { line, .. }) => {
            assert_eq!(line, 3);
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[tokio::test]
async fn init_flashcards_pads_emitted_cards() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = format!(
        "{}{}",
        program_block("data", "card :x -r q :: a\n"),
        section("x", "")
    );
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: true,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    let result = std::fs::read_to_string(&path).unwrap();
    assert!(result.contains("q:::a <!--SR:"));

    // without the option the state group stays empty
    std::fs::write(&path, &doc).unwrap();
    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();
    let plain = std::fs::read_to_string(&path).unwrap();
    assert!(plain.contains(&section("x", "q:::a ")));
}

#[tokio::test]
async fn clear_content_removes_payload_and_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let body = "<!-- The following content is generated at 2024-01-02T03:04:05.000000+00:00. Any edits will be overridden! -->payload";
    std::fs::write(&path, section("s", body)).unwrap();

    let sections = Arc::new(SectionRegistry::new());
    let mut writer = ClearWriter::new(
        PathBuf::from(&path),
        ClearOpts {
            types: HashSet::from([ClearType::Content]),
        },
        sections.clone(),
    );
    writer.prepare().await.unwrap();
    writer.commit().await.unwrap();

    let cleared = std::fs::read_to_string(&path).unwrap();
    assert_eq!(cleared, section("s", ""));
    assert!(!cleared.contains("generated at"));

    // clearing again is a no-op
    let mut writer = ClearWriter::new(
        PathBuf::from(&path),
        ClearOpts {
            types: HashSet::from([ClearType::Content]),
        },
        sections,
    );
    writer.prepare().await.unwrap();
    writer.commit().await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), cleared);
}

#[tokio::test]
async fn clear_flashcard_state_strips_markers_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let body = "q::a <!--SR:!2024-01-02,3,250-->\nplain line";
    std::fs::write(&path, section("s", body)).unwrap();

    let sections = Arc::new(SectionRegistry::new());
    let mut writer = ClearWriter::new(
        PathBuf::from(&path),
        ClearOpts {
            types: HashSet::from([ClearType::FlashcardState]),
        },
        sections,
    );
    writer.prepare().await.unwrap();
    writer.commit().await.unwrap();

    let cleared = std::fs::read_to_string(&path).unwrap();
    assert_eq!(cleared, section("s", "q::a\nplain line"));
}

#[tokio::test]
async fn clear_on_a_sectionless_file_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    std::fs::write(&path, "no sections here").unwrap();

    let sections = Arc::new(SectionRegistry::new());
    let mut writer = ClearWriter::new(
        PathBuf::from(&path),
        ClearOpts {
            types: HashSet::from([ClearType::Content]),
        },
        sections,
    );
    writer.prepare().await.unwrap();
    writer.commit().await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "no sections here");
}

#[tokio::test]
async fn results_can_target_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    std::fs::write(&out, "").unwrap();

    let path = dir.path().join("note.md");
    std::fs::write(
        &path,
        program_block("data", "emit @out.txt first\nemit @out.txt second\n"),
    )
    .unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();

    // results for one location concatenate in emission order
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "firstsecond");
}

#[tokio::test]
async fn null_targets_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    let doc = program_block("data", "emit - discarded\n");
    std::fs::write(&path, &doc).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: true,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    generate(&registry, &path).await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), doc);
}

#[tokio::test]
async fn data_blocks_returning_no_results_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.md");
    std::fs::write(&path, program_block("data", "let unused = x\n")).unwrap();

    let ctx = run_context(GenOpts {
        timestamp: false,
        init_flashcards: false,
    })
    .await;
    let registry = ReaderRegistry::new(ctx);
    let reader = registry.cached(&path).await.unwrap();
    let mut writers = reader.pipe(registry.context());
    let err = writers[0].prepare().await.unwrap_err();
    assert!(matches!(err, PipelineError::NotAResult));
}

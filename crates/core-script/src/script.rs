//! The `text-script` executor: a line-oriented directive language.
//!
//! One directive per line; blank lines and `#` comments are skipped (which
//! is what keeps `# import …` reader directives out of execution). Templates
//! interpolate `${name}` from the namespace and understand `\n`, `\t`, `\\`
//! and `\$` escapes.
//!
//! ```text
//! let greeting = hello
//! emit :out ${greeting} world\n
//! text :out {title:ignored}common text
//! quote :out cited line
//! card :cards -r question :: answer
//! export greeting
//! ```

use crate::{
    CompileOptions, ExecContext, Executor, Namespace, Program, ScriptError, Value,
};
use async_trait::async_trait;
use core_flashcard::{
    FlashcardGroup, FlashcardStateGroup, StatefulFlashcardGroup, TwoSidedFlashcard,
};
use core_section::{GenResult, Location};
use core_textcode::{code_to_str, TextCode};
use core_util::affix_lines;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// One segment of an interpolated template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seg {
    Lit(String),
    Var(String),
}

pub type Template = Vec<Seg>;

/// Where an emission is aimed, before the environment resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSpec {
    /// `:name` — a section of the current file.
    Section(String),
    /// `-` — the null sink.
    Null,
    /// `@rel/path` — a file relative to the current directory.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Let {
        name: String,
        template: Template,
    },
    Export {
        names: Vec<String>,
    },
    Emit {
        target: TargetSpec,
        template: Template,
    },
    Card {
        target: TargetSpec,
        reversible: bool,
        left: Template,
        right: Template,
    },
    /// Compile the rendered template as TextCode and emit its common text.
    Text {
        target: TargetSpec,
        template: Template,
    },
    /// Emit the rendered template quoted line-by-line.
    Quote {
        target: TargetSpec,
        template: Template,
    },
}

/// Instruction-encoding version; bump when [`Op`] changes shape.
pub const SCRIPT_MAGIC: u64 = 1;

/// The shipped native executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptExecutor;

impl ScriptExecutor {
    fn syntax(options: &CompileOptions, line: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line,
            filename: options.filename.clone(),
            message: message.into(),
        }
    }

    fn parse_template(
        text: &str,
        options: &CompileOptions,
        line: usize,
    ) -> Result<Template, ScriptError> {
        let mut segs = Vec::new();
        let mut lit = String::new();
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some('n') => lit.push('\n'),
                    Some('t') => lit.push('\t'),
                    Some('\\') => lit.push('\\'),
                    Some('$') => lit.push('$'),
                    Some(other) => {
                        return Err(Self::syntax(
                            options,
                            line,
                            format!("unknown escape \"\\{other}\""),
                        ));
                    }
                    None => {
                        return Err(Self::syntax(options, line, "dangling escape"));
                    }
                },
                '$' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        let mut name = String::new();
                        loop {
                            match chars.next() {
                                Some('}') => break,
                                Some(ch) => name.push(ch),
                                None => {
                                    return Err(Self::syntax(
                                        options,
                                        line,
                                        "unterminated interpolation",
                                    ));
                                }
                            }
                        }
                        if !lit.is_empty() {
                            segs.push(Seg::Lit(std::mem::take(&mut lit)));
                        }
                        segs.push(Seg::Var(name));
                    } else {
                        lit.push('$');
                    }
                }
                other => lit.push(other),
            }
        }
        if !lit.is_empty() {
            segs.push(Seg::Lit(lit));
        }
        Ok(segs)
    }

    fn parse_target(
        word: &str,
        options: &CompileOptions,
        line: usize,
    ) -> Result<TargetSpec, ScriptError> {
        if word == "-" {
            Ok(TargetSpec::Null)
        } else if let Some(section) = word.strip_prefix(':') {
            Ok(TargetSpec::Section(section.to_owned()))
        } else if let Some(path) = word.strip_prefix('@') {
            Ok(TargetSpec::Path(path.to_owned()))
        } else {
            Err(Self::syntax(
                options,
                line,
                format!("expected a target (\":section\", \"@path\" or \"-\"), got \"{word}\""),
            ))
        }
    }

    fn render(template: &Template, namespace: &Namespace) -> Result<String, ScriptError> {
        let mut out = String::new();
        for seg in template {
            match seg {
                Seg::Lit(text) => out.push_str(text),
                Seg::Var(name) => {
                    let value = namespace
                        .get(name)
                        .ok_or_else(|| ScriptError::UndefinedVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    fn resolve(ctx: &ExecContext<'_>, target: &TargetSpec) -> Location {
        match target {
            TargetSpec::Section(name) => ctx.cwf_sect(Some(name)),
            TargetSpec::Null => Location::Null,
            TargetSpec::Path(rel) => Location::Path(ctx.relative(rel)),
        }
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    fn language_tag(&self) -> &'static str {
        "text-script"
    }

    fn magic_number(&self) -> u64 {
        SCRIPT_MAGIC
    }

    fn compile(&self, source: &str, options: &CompileOptions) -> Result<Program, ScriptError> {
        let mut ops = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (directive, rest) = match trimmed.split_once(char::is_whitespace) {
                Some((directive, rest)) => (directive, rest.trim_start()),
                None => (trimmed, ""),
            };
            match directive {
                "let" => {
                    let (name, value) = rest.split_once('=').ok_or_else(|| {
                        Self::syntax(options, line, "expected \"let NAME = TEMPLATE\"")
                    })?;
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(Self::syntax(options, line, "empty binding name"));
                    }
                    ops.push(Op::Let {
                        name: name.to_owned(),
                        template: Self::parse_template(value.trim_start(), options, line)?,
                    });
                }
                "export" => {
                    let names: Vec<String> =
                        rest.split_whitespace().map(str::to_owned).collect();
                    if names.is_empty() {
                        return Err(Self::syntax(options, line, "export needs at least one name"));
                    }
                    ops.push(Op::Export { names });
                }
                "emit" | "text" | "quote" => {
                    let (word, template) = match rest.split_once(char::is_whitespace) {
                        Some((word, template)) => (word, template.trim_start()),
                        None => (rest, ""),
                    };
                    let target = Self::parse_target(word, options, line)?;
                    let template = Self::parse_template(template, options, line)?;
                    ops.push(match directive {
                        "text" => Op::Text { target, template },
                        "quote" => Op::Quote { target, template },
                        _ => Op::Emit { target, template },
                    });
                }
                "card" => {
                    let (word, rest) = rest
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| Self::syntax(options, line, "card needs a target"))?;
                    let target = Self::parse_target(word, options, line)?;
                    let rest = rest.trim_start();
                    let (reversible, rest) = match rest.strip_prefix("-r") {
                        Some(stripped)
                            if stripped.is_empty()
                                || stripped.starts_with(char::is_whitespace) =>
                        {
                            (true, stripped.trim_start())
                        }
                        _ => (false, rest),
                    };
                    let (left, right) = rest.split_once("::").ok_or_else(|| {
                        Self::syntax(options, line, "expected \"LEFT :: RIGHT\"")
                    })?;
                    ops.push(Op::Card {
                        target,
                        reversible,
                        left: Self::parse_template(left.trim_end(), options, line)?,
                        right: Self::parse_template(right.trim_start(), options, line)?,
                    });
                }
                other => {
                    return Err(Self::syntax(
                        options,
                        line,
                        format!("unknown directive \"{other}\""),
                    ));
                }
            }
        }
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        options.hash(&mut hasher);
        SCRIPT_MAGIC.hash(&mut hasher);
        Ok(Program {
            fingerprint: hasher.finish(),
            ops,
        })
    }

    async fn run(
        &self,
        ctx: &ExecContext<'_>,
        program: &Program,
        namespace: &mut Namespace,
    ) -> Result<Value, ScriptError> {
        let mut results = Vec::new();
        let mut exports = BTreeMap::new();
        for op in &program.ops {
            match op {
                Op::Let { name, template } => {
                    let value = Self::render(template, namespace)?;
                    namespace.set(name.clone(), value);
                }
                Op::Export { names } => {
                    for name in names {
                        let value = namespace
                            .get(name)
                            .ok_or_else(|| ScriptError::UndefinedVariable(name.clone()))?;
                        exports.insert(name.clone(), value.to_owned());
                    }
                }
                Op::Emit { target, template } => {
                    results.push(GenResult::new(
                        Self::resolve(ctx, target),
                        Self::render(template, namespace)?,
                    ));
                }
                Op::Text { target, template } => {
                    let code = TextCode::compile(&Self::render(template, namespace)?)?;
                    results.push(GenResult::new(
                        Self::resolve(ctx, target),
                        code_to_str(&code, ""),
                    ));
                }
                Op::Quote { target, template } => {
                    let rendered = Self::render(template, namespace)?;
                    results.push(GenResult::new(
                        Self::resolve(ctx, target),
                        affix_lines(&rendered, "> ", ""),
                    ));
                }
                Op::Card {
                    target,
                    reversible,
                    left,
                    right,
                } => {
                    let card = StatefulFlashcardGroup {
                        flashcard: FlashcardGroup::TwoSided(TwoSidedFlashcard {
                            left: Self::render(left, namespace)?,
                            right: Self::render(right, namespace)?,
                            reversible: *reversible,
                        }),
                        state: FlashcardStateGroup::default(),
                    };
                    results.push(GenResult::new(
                        Self::resolve(ctx, target),
                        card.render(ctx.config, ctx.policy),
                    ));
                }
            }
        }
        Ok(if !results.is_empty() {
            Value::Results(results)
        } else if !exports.is_empty() {
            Value::Map(exports)
        } else {
            Value::Unit
        })
    }
}

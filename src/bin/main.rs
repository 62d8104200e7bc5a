use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use jweave::classfile::descriptor::parse_method_descriptor;
use jweave::classfile::flag::access_flags::ACC_PUBLIC;
use jweave::classfile::parse_class_file;
use jweave::definition::{AdviceKind, IntroducedMethod, SystemDefinition};
use jweave::expr::{ExpressionContext, ExpressionInfo, ReflectiveInfo};
use jweave::reflect::info::normalize_class_name;
use jweave::reflect::{ClassInfo, MethodInfo};
use jweave::weave::session::WeavingSession;

#[derive(Parser)]
#[command(name = "jweave")]
#[command(about = "Bytecode-level aspect weaver for JVM class files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave .class files against a definition file
    Weave {
        /// Definition file (include/exclude/pointcut/advice directives)
        #[arg(short, long, value_name = "FILE")]
        definition: PathBuf,

        /// Input .class files or directories
        #[arg(value_name = "PATH", required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for woven classes
        #[arg(short, long, value_name = "DIR", default_value = "woven")]
        output: PathBuf,
    },

    /// Parse a pointcut expression and dump its predicate tree
    Parse {
        /// Pointcut expression text
        #[arg(value_name = "EXPRESSION")]
        expression: String,
    },

    /// Match an expression against a described method
    Check {
        /// Pointcut expression text
        #[arg(value_name = "EXPRESSION")]
        expression: String,

        /// Declaring class of the probe method
        #[arg(long, value_name = "CLASS")]
        declaring: String,

        /// Name of the probe method
        #[arg(long, value_name = "NAME")]
        method: String,

        /// JVM descriptor of the probe method
        #[arg(long, value_name = "DESCRIPTOR", default_value = "()V")]
        descriptor: String,

        /// Probe as a call join point instead of an execution one
        #[arg(long)]
        call: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Weave { definition, inputs, output } => weave(&definition, &inputs, &output),
        Commands::Parse { expression } => parse(&expression),
        Commands::Check { expression, declaring, method, descriptor, call } => {
            check(&expression, &declaring, &method, &descriptor, call)
        }
    }
}

fn weave(definition: &Path, inputs: &[PathBuf], output: &Path) -> Result<()> {
    let session = WeavingSession::new();
    apply_definition_file(&session, definition)?;

    let mut class_files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input) {
                let entry = entry.with_context(|| format!("walking {}", input.display()))?;
                if entry.file_type().is_file()
                    && entry.path().extension().and_then(|e| e.to_str()) == Some("class")
                {
                    class_files.push(entry.into_path());
                }
            }
        } else {
            class_files.push(input.clone());
        }
    }
    class_files.sort();
    class_files.dedup();

    let mut advised_count = 0usize;
    for path in &class_files {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let class_name = match parse_class_file(&bytes) {
            Ok(class_file) => normalize_class_name(class_file.internal_name()?),
            Err(e) => {
                log::warn!("{}: not a readable class file, copying through: {e}", path.display());
                write_class(output, path.file_name().and_then(|n| n.to_str()), &bytes)?;
                continue;
            }
        };
        let outcome = session
            .weave_class(&class_name, &bytes)
            .with_context(|| format!("weaving {class_name}"))?;
        if outcome.advised {
            advised_count += 1;
            println!("woven     {class_name}");
        } else {
            println!("unchanged {class_name}");
        }
        let relative = format!("{}.class", class_name.replace('.', "/"));
        write_class(output, Some(relative.as_str()), &outcome.bytes)?;
    }
    println!("{advised_count}/{} classes advised", class_files.len());
    Ok(())
}

fn write_class(output: &Path, relative: Option<&str>, bytes: &[u8]) -> Result<()> {
    let Some(relative) = relative else {
        bail!("class file has no usable output name");
    };
    let target = output.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
    Ok(())
}

fn parse(expression: &str) -> Result<()> {
    let info = ExpressionInfo::parse("cli", expression)?;
    println!("{:#?}", info.root());
    println!();
    println!("advised-class filter: {:#?}", info.advised_class_tree());
    match info.cflow_tree() {
        Some(tree) => println!("cflow sub-expression: {tree:#?}"),
        None => println!("cflow sub-expression: none"),
    }
    Ok(())
}

fn check(
    expression: &str,
    declaring: &str,
    method: &str,
    descriptor: &str,
    call: bool,
) -> Result<()> {
    let session = WeavingSession::new();
    let info = ExpressionInfo::parse("cli", expression)?;
    info.validate(session.namespaces())?;

    let (parameters, return_type) = parse_method_descriptor(descriptor)?;
    let declaring = normalize_class_name(declaring);
    let probe = Arc::new(MethodInfo {
        name: method.to_string(),
        modifiers: ACC_PUBLIC,
        parameters,
        return_type,
        exceptions: Vec::new(),
        declaring_class: declaring.clone(),
        annotations: Vec::new(),
    });
    let within = ReflectiveInfo::Class(Arc::new(ClassInfo::named(declaring.clone())));
    let context = if call {
        ExpressionContext::call(probe, Some(within))
    } else {
        ExpressionContext::execution(probe, Some(within))
    };
    let matched = info.matches(&context, session.namespaces())?;
    println!(
        "{} {declaring}.{method}{descriptor} [{}]",
        if matched { "MATCH   " } else { "NO MATCH" },
        if call { "call" } else { "execution" },
    );
    Ok(())
}

/// Minimal line-based definition format standing in for the out-of-scope
/// deployment-descriptor front-end:
///
/// ```text
/// namespace myAspect
/// include  pkg
/// exclude  pkg.internal
/// pointcut txPoints = execution(* pkg..*.save(..))
/// advice   around logCalls : txPoints && !within(pkg.logging..*)
/// introduce tagMixin pkg.Tagged : within(pkg..*)
/// ```
fn apply_definition_file(session: &WeavingSession, path: &Path) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let uuid = path.file_stem().and_then(|s| s.to_str()).unwrap_or("cli").to_string();
    let mut definition = SystemDefinition::new(uuid);
    let mut namespace = "default".to_string();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (directive, rest) = line
            .split_once(char::is_whitespace)
            .with_context(|| format!("{}:{}: missing directive body", path.display(), number + 1))?;
        let rest = rest.trim();
        match directive {
            "namespace" => namespace = rest.to_string(),
            "include" => definition.add_include_prefix(rest),
            "exclude" => definition.add_exclude_prefix(rest),
            "pointcut" => {
                let (signature, expression) = rest.split_once('=').with_context(|| {
                    format!("{}:{}: pointcut needs 'signature = expression'", path.display(), number + 1)
                })?;
                session.register_pointcut(&namespace, signature.trim(), expression.trim())?;
            }
            "advice" => {
                let (head, expression) = rest.split_once(':').with_context(|| {
                    format!("{}:{}: advice needs 'kind name : expression'", path.display(), number + 1)
                })?;
                let mut parts = head.split_whitespace();
                let (Some(kind), Some(name), None) = (parts.next(), parts.next(), parts.next())
                else {
                    bail!("{}:{}: advice needs 'kind name : expression'", path.display(), number + 1);
                };
                let kind = match kind {
                    "before" => AdviceKind::Before,
                    "after" => AdviceKind::After,
                    "around" => AdviceKind::Around,
                    other => bail!(
                        "{}:{}: unknown advice kind '{other}'",
                        path.display(),
                        number + 1
                    ),
                };
                let expression = ExpressionInfo::parse(&namespace, expression.trim())?;
                definition.add_advice_binding(name, &namespace, kind, expression, session.namespaces())?;
            }
            "introduce" => {
                let (head, expression) = rest.split_once(':').with_context(|| {
                    format!(
                        "{}:{}: introduce needs 'name interface : expression'",
                        path.display(),
                        number + 1
                    )
                })?;
                let mut parts = head.split_whitespace();
                let (Some(name), Some(interface), None) = (parts.next(), parts.next(), parts.next())
                else {
                    bail!(
                        "{}:{}: introduce needs 'name interface : expression'",
                        path.display(),
                        number + 1
                    );
                };
                let expression = ExpressionInfo::parse(&namespace, expression.trim())?;
                definition.add_introduction_binding(
                    name,
                    interface,
                    Vec::<IntroducedMethod>::new(),
                    expression,
                    session.namespaces(),
                )?;
            }
            other => bail!("{}:{}: unknown directive '{other}'", path.display(), number + 1),
        }
    }
    session.register_definition(definition)?;
    Ok(())
}

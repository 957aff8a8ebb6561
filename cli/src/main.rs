use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once};

use anyhow::Context;
use clap::{Parser, Subcommand};

use bvm_core::config::VmConfig;
use bvm_core::val::{BType, BValue};
use bvm_core::vm::{ConstValue, Vm, VmError};

mod manifest;
mod script;

use manifest::Manifest;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "bvm::vm=debug,bvm::rt=debug,bvm_core=info,bvm_cli=info";

/// Exit status for errors handed back to the caller.
const EXIT_ERROR: i32 = 1;
/// Exit status when a package failed to initialize.
const EXIT_FATAL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "bvm", author, version, about = "Run callable units from a program manifest", long_about = None)]
struct CliArgs {
    /// Scheduler configuration (TOML); BVM_SCHEDULER / BVM_WORKER_THREADS override it
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Invoke PACKAGE:FUNCTION with the given arguments and print its results.
    Run {
        #[arg(value_name = "MANIFEST", value_parser = parse_sanitized_path)]
        manifest: PathBuf,
        package: String,
        function: String,
        /// Arguments, parsed according to the function's parameter types
        #[arg(value_name = "ARGS", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Print resolved constant attributes after the call
        #[arg(long)]
        constants: bool,
    },
    /// List the packages, globals and callable units of a manifest.
    Inspect {
        #[arg(value_name = "MANIFEST", value_parser = parse_sanitized_path)]
        manifest: PathBuf,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("BVM_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VmConfig> {
    let mut config = match path {
        Some(path) => VmConfig::from_path(path)?,
        None => VmConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

/// Parse command-line text into a value of the declared parameter type.
pub(crate) fn parse_arg(ty: &BType, raw: &str) -> anyhow::Result<BValue> {
    let value = match ty {
        BType::Int => BValue::Int(raw.parse().with_context(|| format!("'{}' is not an int", raw))?),
        BType::Float => BValue::Float(raw.parse().with_context(|| format!("'{}' is not a float", raw))?),
        BType::Boolean => BValue::Bool(raw.parse().with_context(|| format!("'{}' is not a boolean", raw))?),
        BType::String => BValue::from(raw),
        BType::Blob => BValue::from(raw.as_bytes().to_vec()),
        other => anyhow::bail!("parameters of type '{}' cannot be passed from the command line", other),
    };
    Ok(value)
}

fn format_const(value: &ConstValue) -> String {
    match value {
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(i) => i.to_string(),
        ConstValue::Float(f) => f.to_string(),
        ConstValue::Str(s) => s.to_string(),
    }
}

enum RunFailure {
    Vm(VmError),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for RunFailure {
    fn from(err: anyhow::Error) -> Self {
        RunFailure::Other(err)
    }
}

fn run(
    config: VmConfig,
    manifest: &Path,
    package: &str,
    function: &str,
    raw_args: &[String],
    show_constants: bool,
) -> Result<(), RunFailure> {
    let loaded = Manifest::from_path(manifest)?.load()?;
    let unit = loaded
        .program
        .package(package)
        .and_then(|pkg| pkg.function(function))
        .cloned();
    // Unknown names fall through to the VM, which reports them.
    let args = match &unit {
        Some(unit) if unit.params().len() == raw_args.len() => unit
            .params()
            .types()
            .iter()
            .zip(raw_args)
            .map(|(ty, raw)| parse_arg(ty, raw))
            .collect::<anyhow::Result<Vec<_>>>()?,
        _ => raw_args.iter().map(|raw| BValue::from(raw.as_str())).collect(),
    };

    let constants = loaded.constants;
    let vm = Vm::builder(Arc::new(loaded.program), Arc::new(loaded.interpreter))
        .config(config)
        .build()
        .map_err(RunFailure::Vm)?;
    let results = vm.invoke_by_name(package, function, &args).map_err(RunFailure::Vm)?;
    for value in results {
        println!("{}", value);
    }
    if show_constants {
        for attr in &constants {
            match attr.value() {
                Some(value) => println!("{}:{} = {}", attr.package(), attr.name(), format_const(value)),
                None => println!("{}:{} = <unresolved>", attr.package(), attr.name()),
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();
    let args = CliArgs::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Inspect { manifest } => {
            let loaded = Manifest::from_path(&manifest)?.load()?;
            print!("{}", loaded.describe());
        }
        Commands::Run {
            manifest,
            package,
            function,
            args,
            constants,
        } => match run(config, &manifest, &package, &function, &args, constants) {
            Ok(()) => {}
            Err(RunFailure::Vm(err)) if err.is_fatal() => {
                eprintln!("{}", err);
                std::process::exit(EXIT_FATAL);
            }
            Err(RunFailure::Vm(err)) => {
                eprintln!("Error: {}", err);
                std::process::exit(EXIT_ERROR);
            }
            Err(RunFailure::Other(err)) => {
                eprintln!("Error: {:#}", err);
                std::process::exit(EXIT_ERROR);
            }
        },
    }
    Ok(())
}

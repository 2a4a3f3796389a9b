//! Kiln CLI, the command-line front end of the incremental build orchestrator.
//!
//! Provides `kiln make` for incremental builds, `kiln compile` for forced
//! recompilation of a scope, `kiln rebuild` for a from-scratch build, and
//! `kiln status` for a dry-run up-to-date check.

#![warn(missing_docs)]

mod build;
mod pipeline;
mod resources;
mod status;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Kiln, an incremental multi-module build orchestrator.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build orchestrator")]
pub struct Cli {
    /// Only print errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// When to color diagnostics and log lines.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Use this `kiln.toml` (or project directory) instead of searching upward.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// The build commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build whatever changed since the last build.
    Make(BuildArgs),
    /// Recompile everything in scope, changed or not.
    Compile(BuildArgs),
    /// Discard all caches and build from scratch.
    Rebuild(BuildArgs),
    /// Report whether a build would do any work.
    Status(BuildArgs),
}

/// Arguments shared by the build commands.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Restrict the build to these modules.
    #[arg(short, long = "module")]
    pub modules: Vec<String>,

    /// Restrict the build to these files, relative to the project root.
    #[arg(short, long = "file")]
    pub files: Vec<String>,

    /// Output format for diagnostics.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// The `--color` setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Color when `TERM` is set.
    Auto,
    /// Always color.
    Always,
    /// Never color.
    Never,
}

/// How build messages are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// rustc-style text on stderr.
    Text,
    /// One JSON object per line on stdout, then a summary object.
    Json,
}

/// Flags every command sees, with `--color` resolved.
pub struct GlobalArgs {
    /// Only print errors.
    pub quiet: bool,
    /// Debug logging requested.
    pub verbose: bool,
    /// Resolved color choice.
    pub color: bool,
    /// The `--config` path, if given.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::env::var("TERM").is_ok(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        config: cli.config,
    };

    init_logging(&global);

    let result = match cli.command {
        Command::Make(ref args) => build::run(build::Mode::Make, args, &global),
        Command::Compile(ref args) => build::run(build::Mode::Compile, args, &global),
        Command::Rebuild(ref args) => build::run(build::Mode::Rebuild, args, &global),
        Command::Status(ref args) => status::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// The default log level for the given flags; `RUST_LOG` overrides it.
fn default_log_level(global: &GlobalArgs) -> &'static str {
    if global.verbose {
        "debug"
    } else if global.quiet {
        "error"
    } else {
        "warn"
    }
}

fn init_logging(global: &GlobalArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(global)));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(global.verbose)
                .with_ansi(global.color),
        )
        .with(filter)
        .init();
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// modcompat - keep compiled plugin modules loadable after the host changes
#[derive(Debug, Parser)]
#[command(name = "modcompat", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// What the plugins are checked and rewritten against.
#[derive(Debug, Args)]
pub struct SessionOptions {
    /// Trusted host module; may be repeated.
    #[arg(long = "host", value_name = "FILE")]
    pub hosts: Vec<PathBuf>,

    /// Module providing facade types; may be repeated.
    #[arg(long = "facade-module", value_name = "FILE")]
    pub facade_modules: Vec<PathBuf>,

    /// Map a method, e.g. `Game.Chat::Log(System.String)=Game.Chat::Broadcast`.
    #[arg(long = "map-method", value_name = "OLD=OWNER::NAME")]
    pub map_methods: Vec<String>,

    /// Map a field, e.g. `Game.Player::hp=Game.Player::health`.
    #[arg(long = "map-field", value_name = "OLD=OWNER::NAME")]
    pub map_fields: Vec<String>,

    /// Serve a retired type from a facade type, e.g. `Game.Legacy=Compat.LegacyFacade`.
    #[arg(long = "map-type", value_name = "OLD=FACADE")]
    pub map_types: Vec<String>,

    /// Also apply the mappings to references into this module; may be repeated. Loaded host and
    /// facade modules are always covered.
    #[arg(long = "map-source", value_name = "NAME")]
    pub map_sources: Vec<String>,

    /// Retired platform module whose references move to a target; may be repeated.
    #[arg(long = "strip", value_name = "NAME")]
    pub strip: Vec<String>,

    /// Platform target module; may be repeated.
    #[arg(long = "target", value_name = "FILE")]
    pub targets: Vec<PathBuf>,

    /// Platform to remap for: windows, linux, or macos. Defaults to the current one.
    #[arg(long)]
    pub platform: Option<String>,

    /// Also flag console, filesystem, and process access.
    #[arg(long)]
    pub paranoid: bool,

    /// Paranoid mode where references to missing symbols are fatal.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the external references of a module and how they resolve.
    Inspect {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Trusted host module to resolve against; may be repeated.
        #[arg(long = "host", value_name = "FILE")]
        hosts: Vec<PathBuf>,

        /// Show only references into this module.
        #[arg(long, value_name = "NAME")]
        module: Option<String>,
    },

    /// Report what a rewrite would change without writing anything.
    Check {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[command(flatten)]
        session: SessionOptions,
    },

    /// Rewrite a module and write the result.
    Rewrite {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Output file (default: input name with the suffix appended).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Suffix appended to the file stem when no output is given.
        #[arg(long, default_value = "_compat")]
        suffix: String,

        /// Write the JSON report to this file.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        #[command(flatten)]
        session: SessionOptions,
    },

    /// Rewrite every module in a directory in parallel.
    Batch {
        /// Directory containing module files.
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Directory for the rewritten modules.
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,

        /// Check only; nothing is written.
        #[arg(long)]
        detect_only: bool,

        #[command(flatten)]
        session: SessionOptions,
    },
}

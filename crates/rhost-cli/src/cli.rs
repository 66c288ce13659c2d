//! CLI argument definitions for rhost.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rhost_directive::GroupPolicy;

/// rhost -- a sandboxed WebAssembly function host.
#[derive(Parser)]
#[command(
    name = "rhost",
    version,
    about = "rhost -- sandboxed WebAssembly function host",
    long_about = "Hosts untrusted WebAssembly runnables behind a narrow capability API \
                  and composes them into request pipelines described by a directive."
)]
pub struct Cli {
    /// Host configuration file (TOML).  Defaults to config/default.toml.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dispatch one request through a bundle's directive.
    Run {
        /// Bundle archive (.tar.gz).
        #[arg(long, short)]
        bundle: PathBuf,

        /// Request method.
        #[arg(long, short, default_value = "GET")]
        method: String,

        /// Request path, e.g. /api/v1/user/42.
        path: String,

        /// Request body.  `@file` reads it from a file.
        #[arg(long, short = 'd')]
        body: Option<String>,

        /// Request header as `key:value`.  May be repeated.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Correlation id for the request.
        #[arg(long)]
        id: Option<String>,

        /// Print the whole request after the pipeline (JSON) instead of the
        /// response body.
        #[arg(long)]
        json: bool,

        /// Override the configured group policy.
        #[arg(long)]
        policy: Option<GroupPolicy>,
    },

    /// Execute a single function once.
    Exec {
        /// Function to run.
        function: String,

        /// Bundle holding the function's module.
        #[arg(long, short, conflicts_with = "module", required_unless_present = "module")]
        bundle: Option<PathBuf>,

        /// A standalone `.wasm` module to run instead of a bundle entry.
        #[arg(long)]
        module: Option<PathBuf>,

        /// Input passed to the function.  `@file` reads it from a file.
        #[arg(long, short, default_value = "")]
        input: String,
    },

    /// Validate a directive file.
    Validate {
        /// Directive file (YAML, or JSON with a .json extension).
        directive: PathBuf,

        /// Override the configured group policy.
        #[arg(long)]
        policy: Option<GroupPolicy>,
    },

    /// Print the fully qualified name of a declared function.
    Fqfn {
        /// Directive file.
        directive: PathBuf,

        /// Function reference: `name` or `namespace#name`.
        reference: String,
    },

    /// Package existing modules and a directive into a bundle.
    Bundle {
        /// Output archive path.
        #[arg(long, short, default_value = "runnables.wasm.tar.gz")]
        output: PathBuf,

        /// Directive to embed.  Validated before packaging.
        #[arg(long, short)]
        directive: Option<PathBuf>,

        /// `.wasm` files; each becomes the function named after its file stem.
        #[arg(required = true)]
        modules: Vec<PathBuf>,
    },
}

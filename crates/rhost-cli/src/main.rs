//! CLI entry point for rhost.
//!
//! This binary provides the `rhost` command with subcommands for dispatching
//! requests through a bundle, running single functions, inspecting
//! directives, and packaging bundles.

mod cli;
mod config;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rhost_directive::{Directive, GroupPolicy};
use rhost_kernel::{Dispatcher, KernelError, RunnerRegistry, run_blocking};
use rhost_sandbox::{Bundle, BundleEntry, CoordinatedRequest, ModuleSource, Runtime, read_bundle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::HostConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = HostConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Run {
            bundle,
            method,
            path,
            body,
            headers,
            id,
            json,
            policy,
        } => {
            let request = build_request(method, path, body, &headers, id)?;
            cmd_run(&config, &bundle, request, json, policy).await
        }
        Commands::Exec {
            function,
            bundle,
            module,
            input,
        } => cmd_exec(&config, &function, bundle.as_deref(), module, &input).await,
        Commands::Validate { directive, policy } => cmd_validate(&config, &directive, policy),
        Commands::Fqfn {
            directive,
            reference,
        } => cmd_fqfn(&directive, &reference),
        Commands::Bundle {
            output,
            directive,
            modules,
        } => cmd_bundle(&config, &output, directive.as_deref(), &modules),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &HostConfig,
    bundle_path: &Path,
    request: CoordinatedRequest,
    json: bool,
    policy: Option<GroupPolicy>,
) -> Result<()> {
    let bundle = read_bundle(bundle_path)
        .with_context(|| format!("failed to read bundle {}", bundle_path.display()))?;

    let registry = registry(config)?;
    let directive = registry
        .load_bundle(&bundle, policy.unwrap_or(config.group_policy))
        .context("failed to load bundle")?
        .ok_or(KernelError::NoDirective)?;
    info!(
        identifier = %directive.identifier,
        version = %directive.version,
        runnables = registry.len(),
        "bundle ready"
    );

    let dispatcher = Dispatcher::new(directive, registry)?;
    let done = dispatcher.dispatch(request).await?;

    if json {
        write_stdout(&done.request.to_json()?)
    } else {
        write_stdout(&done.output)
    }
}

// ---------------------------------------------------------------------------
// Subcommand: exec
// ---------------------------------------------------------------------------

async fn cmd_exec(
    config: &HostConfig,
    function: &str,
    bundle_path: Option<&Path>,
    module: Option<PathBuf>,
    input: &str,
) -> Result<()> {
    let source = match (bundle_path, module) {
        (_, Some(path)) => ModuleSource::Path(path),
        (Some(bundle_path), None) => {
            let bundle = read_bundle(bundle_path)
                .with_context(|| format!("failed to read bundle {}", bundle_path.display()))?;
            let entry = bundle
                .runnable(function)
                .with_context(|| format!("bundle has no module for `{function}`"))?;
            ModuleSource::Bytes(entry.raw.as_slice().into())
        }
        (None, None) => bail!("either --bundle or --module is required"),
    };

    let registry = RunnerRegistry::new(runtime(config)?, 1);
    let runner = registry.register(function, source)?;
    let output = run_blocking(runner, read_arg(input)?).await?;
    write_stdout(&output)
}

// ---------------------------------------------------------------------------
// Subcommands: validate, fqfn
// ---------------------------------------------------------------------------

fn cmd_validate(config: &HostConfig, path: &Path, policy: Option<GroupPolicy>) -> Result<()> {
    let policy = policy.unwrap_or(config.group_policy);
    let directive = Directive::load(path)
        .with_context(|| format!("failed to load directive {}", path.display()))?
        .validate(policy)?;

    println!(
        "{} {}: valid ({} functions, {} handlers, groups {policy})",
        directive.identifier,
        directive.version,
        directive.functions.len(),
        directive.handlers.len(),
    );
    Ok(())
}

fn cmd_fqfn(path: &Path, reference: &str) -> Result<()> {
    let directive =
        Directive::load(path).with_context(|| format!("failed to load directive {}", path.display()))?;
    println!("{}", directive.fqfn(reference)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: bundle
// ---------------------------------------------------------------------------

fn cmd_bundle(config: &HostConfig, output: &Path, directive: Option<&Path>, modules: &[PathBuf]) -> Result<()> {
    let mut bundle = Bundle::new();

    for path in modules {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("cannot derive a function name from {}", path.display()))?;
        let raw = std::fs::read(path).with_context(|| format!("failed to read module {}", path.display()))?;
        bundle.runnables.push(BundleEntry::new(name, raw));
    }

    if let Some(path) = directive {
        let parsed = Directive::load(path)
            .with_context(|| format!("failed to load directive {}", path.display()))?
            .validate(config.group_policy)?;
        if let Some(missing) = parsed.functions.iter().find(|f| bundle.runnable(&f.name).is_none()) {
            bail!("directive declares `{}` but no module was given for it", missing.name);
        }
        bundle.directive = Some(parsed.to_yaml()?.into_bytes());
    }

    bundle
        .write(output)
        .with_context(|| format!("failed to write bundle {}", output.display()))?;
    println!("wrote {} ({} modules)", output.display(), bundle.runnables.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn runtime(config: &HostConfig) -> Result<Runtime> {
    Runtime::new(config.sandbox.clone()).context("failed to initialize sandbox runtime")
}

fn registry(config: &HostConfig) -> Result<RunnerRegistry> {
    Ok(RunnerRegistry::new(runtime(config)?, config.workers))
}

fn build_request(
    method: String,
    path: String,
    body: Option<String>,
    headers: &[String],
    id: Option<String>,
) -> Result<CoordinatedRequest> {
    let mut request = CoordinatedRequest::new(method, path);
    if let Some(id) = id {
        request = request.with_id(id);
    }
    if let Some(body) = body {
        request = request.with_body(read_arg(&body)?);
    }
    for header in headers {
        let Some((key, value)) = header.split_once(':') else {
            bail!("header `{header}` is not in key:value form");
        };
        request = request.with_header(key.trim(), value.trim());
    }
    Ok(request)
}

/// `@path` reads the file, anything else is taken literally.
fn read_arg(arg: &str) -> Result<Vec<u8>> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read(path).with_context(|| format!("failed to read {path}")),
        None => Ok(arg.as_bytes().to_vec()),
    }
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    if !bytes.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

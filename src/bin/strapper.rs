// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use strapper::{
    config::STARTER_MANIFEST,
    path::{default_log_path, default_manifest_path},
    ActionRegistry, Logger, Manifest, Plan, Runner,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::write, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status when the run finished, but some steps failed.
const EXIT_STEPS_FAILED: i32 = 2;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "strapper [options] <strapper-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        match self.command {
            Command::Apply(opts) => run_apply(opts),
            Command::Status(opts) => run_status(opts),
            Command::Init(opts) => run_init(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Converge machine towards manifest.
    #[command(override_usage = "strapper apply [options]")]
    Apply(ApplyOptions),

    /// Show which steps would act without changing anything.
    #[command(override_usage = "strapper status [options]")]
    Status(StatusOptions),

    /// Write starter manifest.
    #[command(override_usage = "strapper init [options]")]
    Init(InitOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyOptions {
    /// Path to manifest file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Profile to layer on top of base declarations.
    #[arg(short, long, value_name = "name")]
    pub profile: Option<String>,

    /// Exit with zero status even if some steps failed.
    #[arg(long)]
    pub allow_failures: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Path to manifest file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Profile to layer on top of base declarations.
    #[arg(short, long, value_name = "name")]
    pub profile: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Path to write manifest file to.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Overwrite existing manifest.
    #[arg(short, long)]
    pub force: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match Cli::parse().run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn load_manifest(path: Option<PathBuf>) -> Result<Manifest> {
    let path = match path {
        Some(path) => path,
        None => default_manifest_path()?,
    };

    Manifest::load(&path).with_context(|| format!("cannot load manifest {:?}", path.display()))
}

fn run_apply(opts: ApplyOptions) -> Result<i32> {
    let manifest = load_manifest(opts.config)?;
    let declarations = manifest.resolve(opts.profile.as_deref())?;
    let plan = Plan::build(&manifest.settings, &declarations);

    let log_path = match &manifest.settings.log_file {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };
    let logger = Logger::open(&log_path);
    if let Some(path) = logger.path() {
        info!("appending run log to {:?}", path.display());
    }

    let registry = ActionRegistry::system(&manifest.settings);
    let report = Runner::new(&registry, logger).run(plan);

    if report.is_clean() || opts.allow_failures {
        Ok(0)
    } else {
        Ok(EXIT_STEPS_FAILED)
    }
}

fn run_status(opts: StatusOptions) -> Result<i32> {
    let manifest = load_manifest(opts.config)?;
    let declarations = manifest.resolve(opts.profile.as_deref())?;
    let plan = Plan::build(&manifest.settings, &declarations);

    let registry = ActionRegistry::system(&manifest.settings);
    Runner::new(&registry, Logger::console()).survey(&plan);

    Ok(0)
}

fn run_init(opts: InitOptions) -> Result<i32> {
    let path = match opts.config {
        Some(path) => path,
        None => default_manifest_path()?,
    };

    if path.exists() && !opts.force {
        bail!(
            "manifest {:?} already exists, use --force to overwrite it",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent)
            .with_context(|| format!("cannot create directory {:?}", parent.display()))?;
    }
    write(&path, STARTER_MANIFEST)
        .with_context(|| format!("cannot write manifest {:?}", path.display()))?;
    info!("wrote starter manifest to {:?}", path.display());

    Ok(0)
}

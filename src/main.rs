// SPDX-FileCopyrightText: 2026 Dokkup Contributors
// SPDX-License-Identifier: MIT

use dokkup::{
    config::ConfigDocument,
    context::RunContext,
    deploy::{
        backup,
        drift::{self, DriftStatus, SyncCache},
        plan::{DeploymentOutcome, Pipeline},
        select::{self, Selection},
        ResolvedDeployment,
    },
    path::expand_path,
    remote::{DokkuHost, DokkuSsh},
    vcs::GitLocal,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use inquire::Confirm;
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dokkup [options] <dokkup-command> <config_file>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Deploy(opts) => run_deploy(opts),
            Command::Sync(opts) => run_sync(opts),
            Command::Import(opts) => run_import(opts),
            Command::Backup(opts) => run_backup(opts),
            Command::Restore(opts) => run_restore(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Converge selected deployments onto the server.
    #[command(override_usage = "dokkup deploy [options] <config_file> [<domain>]...")]
    Deploy(DeployOptions),

    /// Compare local configuration against live server state.
    #[command(override_usage = "dokkup sync [options] <config_file> [<domain>]...")]
    Sync(SyncOptions),

    /// Introspect the server and print its state as a config document.
    #[command(override_usage = "dokkup import [options] <config_file>")]
    Import(ImportOptions),

    /// Capture database dumps and storage archives for selected deployments.
    #[command(override_usage = "dokkup backup [options] <config_file> [<domain>]...")]
    Backup(BackupOptions),

    /// Restore previously captured artifacts to the server.
    #[command(override_usage = "dokkup restore [options] <config_file> [<domain>]...")]
    Restore(RestoreOptions),
}

/// Working-set selection flags shared by every subcommand.
#[derive(Args, Clone, Debug)]
struct SelectArgs {
    /// Path to the config document.
    #[arg(required = true, value_name = "config_file")]
    pub config_file: String,

    /// Only deployments whose domain matches exactly.
    #[arg(value_name = "domain")]
    pub domains: Vec<String>,

    /// Only deployments carrying at least one matching tag.
    #[arg(short, long, value_name = "tag")]
    pub tag: Vec<String>,

    /// Drop deployments tagged production.
    #[arg(long)]
    pub no_prod: bool,
}

impl SelectArgs {
    fn selection(&self) -> Selection {
        Selection::new(self.domains.clone(), self.tag.clone(), self.no_prod)
    }
}

#[derive(Args, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Log every would-be mutation instead of performing it.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Deploy even when local and remote commits match.
    #[arg(short, long)]
    pub force: bool,

    /// Refresh configuration without pushing code.
    #[arg(long)]
    pub config_only: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Compare against the cached snapshot instead of the live server.
    #[arg(long)]
    pub cached: bool,
}

#[derive(Args, Clone, Debug)]
#[command(author, about, long_about)]
struct ImportOptions {
    /// Path to the config document naming the server to introspect.
    #[arg(required = true, value_name = "config_file")]
    pub config_file: String,

    /// Write the imported document here instead of standard output.
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
#[command(author, about, long_about)]
struct BackupOptions {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Skip storage mounts whose host path uses more than this.
    #[arg(long, value_name = "mb", default_value_t = backup::DEFAULT_SIZE_CEILING_MB)]
    pub size_ceiling_mb: u64,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

/// Parse the document and derive the run context from its location.
fn load(config_file: &str) -> Result<(ConfigDocument, RunContext)> {
    let path = expand_path(config_file)?;
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let document: ConfigDocument = contents.parse()?;
    let ctx = RunContext::new(&document, &path)?;
    Ok((document, ctx))
}

fn working_set(document: &ConfigDocument, select: &SelectArgs) -> Vec<ResolvedDeployment> {
    select::filter(ResolvedDeployment::resolve_all(document), &select.selection())
}

fn confirm(prompt: String, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new(&prompt).with_default(false).prompt()?)
}

fn run_deploy(opts: DeployOptions) -> Result<()> {
    let (document, mut ctx) = load(&opts.select.config_file)?;
    ctx.dry_run = opts.dry_run;
    ctx.force = opts.force;
    ctx.config_only = opts.config_only;
    ctx.assume_yes = opts.yes;

    let deployments = working_set(&document, &opts.select);
    if deployments.is_empty() {
        info!("nothing selected, nothing to do");
        return Ok(());
    }

    if !ctx.dry_run
        && !confirm(
            format!(
                "Deploy {} deployment(s) to {}?",
                deployments.len(),
                ctx.ssh_host
            ),
            ctx.assume_yes,
        )?
    {
        info!("aborted");
        return Ok(());
    }

    let remote = DokkuSsh::new(ctx.ssh_alias.clone());
    remote.check_connectivity()?;
    let vcs = GitLocal;
    let pipeline = Pipeline::new(&remote, &vcs, &ctx);

    let mut skipped = 0;
    let mut deployed = 0;
    let mut failed = 0;
    for deployment in &deployments {
        match pipeline.run(deployment) {
            DeploymentOutcome::Skipped => skipped += 1,
            DeploymentOutcome::Deployed => {
                info!("{} done", deployment.domain);
                deployed += 1;
            }
            DeploymentOutcome::Failed { step, reason } => {
                error!("{} failed at {step}: {reason}", deployment.domain);
                failed += 1;
            }
        }
    }

    info!("{deployed} deployed, {skipped} up to date, {failed} failed");
    if failed > 0 {
        bail!("{failed} deployment(s) failed");
    }
    Ok(())
}

fn run_sync(opts: SyncOptions) -> Result<()> {
    let (document, ctx) = load(&opts.select.config_file)?;
    let locals = working_set(&document, &opts.select);
    let cache = SyncCache::new(ctx.cache_dir.clone());

    let snapshot_document = if opts.cached {
        match cache.load()? {
            Some(snapshot) => snapshot,
            None => bail!("no cached snapshot, run import or drop --cached"),
        }
    } else {
        let remote = DokkuSsh::new(ctx.ssh_alias.clone());
        remote.check_connectivity()?;
        let snapshot = drift::import_snapshot(&remote, &ctx.ssh_host, &ctx.ssh_alias)?;
        cache.store(&snapshot)?;
        snapshot
    };

    let snapshot = ResolvedDeployment::resolve_all(&snapshot_document);
    let report = drift::compare_all(&locals, &snapshot);

    for (domain, status) in &report.entries {
        match status {
            DriftStatus::InSync => info!("{domain}: in sync"),
            DriftStatus::Missing => warn!("{domain}: missing from server"),
            DriftStatus::Drift(drifts) => {
                for drift in drifts {
                    warn!(
                        "{domain}: {} differs (local: {}, server: {})",
                        drift.field, drift.local, drift.remote
                    );
                }
            }
        }
    }
    for app in &report.unmanaged {
        info!("{app}: on server but not in configuration");
    }

    if !report.in_sync() {
        bail!("configuration and server state differ");
    }
    Ok(())
}

fn run_import(opts: ImportOptions) -> Result<()> {
    let (_, ctx) = load(&opts.config_file)?;
    let remote = DokkuSsh::new(ctx.ssh_alias.clone());
    remote.check_connectivity()?;

    let snapshot = drift::import_snapshot(&remote, &ctx.ssh_host, &ctx.ssh_alias)?;
    SyncCache::new(ctx.cache_dir.clone()).store(&snapshot)?;

    match opts.output {
        Some(path) => {
            std::fs::write(&path, snapshot.to_string())
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!("imported document written to {}", path.display());
        }
        None => println!("{snapshot}"),
    }
    Ok(())
}

fn run_backup(opts: BackupOptions) -> Result<()> {
    let (document, ctx) = load(&opts.select.config_file)?;
    let deployments = working_set(&document, &opts.select);

    if !confirm(
        format!(
            "Back up {} deployment(s) from {} into {}?",
            deployments.len(),
            ctx.ssh_host,
            ctx.backup_dir.display()
        ),
        opts.yes,
    )? {
        info!("aborted");
        return Ok(());
    }

    let remote = DokkuSsh::new(ctx.ssh_alias.clone());
    remote.check_connectivity()?;

    let mut written = 0;
    for deployment in &deployments {
        let artifacts = backup::backup_deployment(
            deployment,
            &remote,
            &ctx.backup_dir,
            opts.size_ceiling_mb,
        )?;
        written += artifacts.len();
    }
    written += backup::backup_mysql_services(&remote, &ctx.backup_dir)?.len();

    info!("{written} artifact(s) written to {}", ctx.backup_dir.display());
    Ok(())
}

fn run_restore(opts: RestoreOptions) -> Result<()> {
    let (document, ctx) = load(&opts.select.config_file)?;
    let deployments = working_set(&document, &opts.select);

    if !confirm(
        format!(
            "Restore {} deployment(s) on {} from {}? This overwrites server data.",
            deployments.len(),
            ctx.ssh_host,
            ctx.backup_dir.display()
        ),
        opts.yes,
    )? {
        info!("aborted");
        return Ok(());
    }

    let remote = DokkuSsh::new(ctx.ssh_alias.clone());
    remote.check_connectivity()?;

    let mut missing = 0;
    for deployment in &deployments {
        let outcome = backup::restore_deployment(deployment, &remote, &ctx.backup_dir)?;
        for path in &outcome.missing {
            warn!("{}: no artifact for {path}", deployment.domain);
        }
        missing += outcome.missing.len();
    }
    let services = backup::restore_mysql_services(&remote, &ctx.backup_dir)?;
    if !services.is_empty() {
        info!("restored database service(s): {}", services.join(" "));
    }

    if missing > 0 {
        bail!("{missing} artifact(s) had no matching backup");
    }
    Ok(())
}

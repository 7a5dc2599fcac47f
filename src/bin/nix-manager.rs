// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotsync::{
    config::Settings,
    flake::{edit::FlakeFile, PackageKind},
    inventory::Inventory,
    path::default_settings_path,
    probe::{PackageProbe, SystemProbe},
    reconcile::SortMode,
    report::Report,
    watch::{ConfigWatcher, WatchTarget},
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often the watched flake is checked for changes.
const SCAN_INTERVAL: Duration = Duration::from_millis(50);

/// Compare Homebrew and Nix packages declared in a nix-darwin flake against
/// what is installed.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  nix-manager [options] [<command>]\n  nix-manager [-l | -d] [options]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// List all packages with status.
    #[arg(short, long, group = "report")]
    pub list: bool,

    /// Show only extra and missing packages.
    #[arg(short, long, group = "report")]
    pub diff: bool,

    /// Sort order: name, status-asc, or status-desc.
    #[arg(long, global = true, value_name = "mode")]
    pub sort: Option<SortMode>,

    /// Path to nix-darwin flake.
    #[arg(long, global = true, value_name = "path")]
    pub flake: Option<PathBuf>,

    /// Path to settings file.
    #[arg(long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn is_report(&self) -> bool {
        matches!(
            self.command,
            None | Some(Command::List) | Some(Command::Diff) | Some(Command::Info(_))
        )
    }

    async fn run(self) -> Result<()> {
        let mut settings = match &self.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_settings_path()?)?,
        };
        if let Some(flake) = self.flake {
            settings.paths.flake = flake;
        }
        if let Some(sort) = self.sort {
            settings.packages.sort = sort;
        }

        let command = match self.command {
            Some(command) => command,
            None if self.diff => Command::Diff,
            None => Command::List,
        };

        match command {
            Command::List => run_list(&settings).await,
            Command::Diff => run_diff(&settings).await,
            Command::Add(opts) => run_add(&settings, opts),
            Command::Remove(opts) => run_remove(&settings, opts),
            Command::Info(opts) => run_info(opts).await,
            Command::Watch => run_watch(&settings).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List all packages with status.
    #[command(override_usage = "nix-manager list [options]")]
    List,

    /// Show only extra and missing packages.
    #[command(override_usage = "nix-manager diff [options]")]
    Diff,

    /// Add package to flake.
    #[command(override_usage = "nix-manager add [options] <name> [<id>]")]
    Add(AddOptions),

    /// Remove package from flake.
    #[command(override_usage = "nix-manager remove [options] <name>")]
    Remove(RemoveOptions),

    /// Show details of a Homebrew formula or cask.
    #[command(override_usage = "nix-manager info <name>")]
    Info(InfoOptions),

    /// Print differences again whenever the flake changes.
    #[command(override_usage = "nix-manager watch [options]")]
    Watch,
}

#[derive(Args, Clone, Debug)]
struct KindOptions {
    /// Target Homebrew casks.
    #[arg(long, group = "kind")]
    pub cask: bool,

    /// Target Mac App Store apps.
    #[arg(long, group = "kind")]
    pub mas: bool,

    /// Target nixpkgs.
    #[arg(long, group = "kind")]
    pub nix: bool,
}

impl KindOptions {
    fn kind(&self) -> PackageKind {
        if self.cask {
            PackageKind::Cask
        } else if self.mas {
            PackageKind::MasApp
        } else if self.nix {
            PackageKind::Nix
        } else {
            PackageKind::Brew
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Package name, tap-qualified formula, or app name.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Mac App Store app id.
    #[arg(value_name = "id")]
    pub id: Option<u64>,

    #[command(flatten)]
    pub kind: KindOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Package name, tap-qualified formula, or app name.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    #[command(flatten)]
    pub kind: KindOptions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InfoOptions {
    /// Formula or cask name.
    #[arg(required = true, value_name = "name")]
    pub name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // INVARIANT: Usage errors exit with 1 like any other failure, only help
    //   and version output exit cleanly.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            exit(if error.exit_code() == 0 { 0 } else { 1 });
        }
    };

    let level = if cli.is_report() { "warn" } else { "info" };
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn collect(settings: &Settings) -> Result<Inventory> {
    let flake = FlakeFile::new(&settings.paths.flake);
    Ok(Inventory::collect(&flake, &SystemProbe, settings.packages.sort).await?)
}

async fn run_list(settings: &Settings) -> Result<()> {
    let inventory = collect(settings).await?;
    print!("{}", Report::for_stdout().package_list(&inventory));

    Ok(())
}

async fn run_diff(settings: &Settings) -> Result<()> {
    let inventory = collect(settings).await?;
    print!("{}", Report::for_stdout().package_diff(&inventory));

    Ok(())
}

fn run_add(settings: &Settings, opts: AddOptions) -> Result<()> {
    let kind = opts.kind.kind();
    let flake = FlakeFile::new(&settings.paths.flake);
    if !flake.add(kind, &opts.name, opts.id)? {
        info!("{:?} already declared in {kind}", opts.name);
    }

    Ok(())
}

fn run_remove(settings: &Settings, opts: RemoveOptions) -> Result<()> {
    let kind = opts.kind.kind();
    let flake = FlakeFile::new(&settings.paths.flake);
    if !flake.remove(kind, &opts.name)? {
        info!("{:?} not declared in {kind}", opts.name);
    }

    Ok(())
}

async fn run_info(opts: InfoOptions) -> Result<()> {
    let info = SystemProbe
        .package_info(&opts.name)
        .await
        .ok_or_else(|| anyhow!("no formula or cask named {:?}", opts.name))?;
    print!("{}", Report::for_stdout().package_info(&info));

    Ok(())
}

async fn run_watch(settings: &Settings) -> Result<()> {
    let watcher = ConfigWatcher::spawn(
        WatchTarget::File(settings.paths.flake.clone()),
        settings.services.debounce(),
        SCAN_INTERVAL,
    );
    let mut changes = watcher.subscribe();
    let report = Report::for_stdout();

    print!("{}", report.package_diff(&collect(settings).await?));
    info!("watching {:?}, press ctrl-c to stop", settings.paths.flake.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                match collect(settings).await {
                    Ok(inventory) => print!("{}", report.package_diff(&inventory)),
                    Err(err) => error!("{err:?}"),
                }
            }
        }
    }

    Ok(())
}

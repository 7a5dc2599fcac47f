// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotsync::{
    config::Settings,
    path::{default_settings_path, expand_home, home_dir},
    report::Report,
    service::{
        launchd::{tail_log, Launchctl, RuntimeStatus, ServiceControl},
        reconcile_services,
        sync::{Orchestrator, StartPolicy},
        ServiceConfig, ServiceConfigDir,
    },
    watch::{ConfigWatcher, StatusPoller, WatchTarget},
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{collections::HashSet, path::PathBuf, process::exit, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often the watched descriptor directory is checked for changes.
const SCAN_INTERVAL: Duration = Duration::from_millis(50);

/// Keep macOS LaunchAgents in line with declarative service descriptors.
#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "service-manager [options] [<command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Directory of service descriptors.
    #[arg(long, global = true, value_name = "path")]
    pub config_dir: Option<PathBuf>,

    /// Directory of installed LaunchAgents.
    #[arg(long, global = true, value_name = "path")]
    pub agents_dir: Option<PathBuf>,

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
            None | Some(Command::List) | Some(Command::Diff) | Some(Command::Logs { .. })
        )
    }

    async fn run(self) -> Result<()> {
        let mut settings = match &self.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_settings_path()?)?,
        };
        if let Some(dir) = self.config_dir {
            settings.paths.service_configs = dir;
        }
        if let Some(dir) = self.agents_dir {
            settings.paths.launch_agents = dir;
        }

        let manager = Manager::new(settings)?;
        match self.command.unwrap_or(Command::List) {
            Command::List => manager.list().await,
            Command::Diff => manager.diff(),
            Command::Sync => manager.sync().await,
            Command::Start { label } => manager.start(&label).await,
            Command::Stop { label } => manager.stop(&label).await,
            Command::Restart { label } => manager.restart(&label).await,
            Command::Enable { label } => manager.toggle(&label, true).await,
            Command::Disable { label } => manager.toggle(&label, false).await,
            Command::Logs { label, lines } => manager.logs(&label, lines),
            Command::Watch => manager.watch().await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List services with runtime status.
    #[command(override_usage = "service-manager list [options]")]
    List,

    /// Show services whose enabled flag disagrees with installed units.
    #[command(override_usage = "service-manager diff [options]")]
    Diff,

    /// Install, reinstall, or uninstall every service to match descriptors.
    #[command(override_usage = "service-manager sync [options]")]
    Sync,

    /// Start installed service.
    #[command(override_usage = "service-manager start [options] <label>")]
    Start {
        #[arg(required = true, value_name = "label")]
        label: String,
    },

    /// Stop service.
    #[command(override_usage = "service-manager stop [options] <label>")]
    Stop {
        #[arg(required = true, value_name = "label")]
        label: String,
    },

    /// Stop then start service.
    #[command(override_usage = "service-manager restart [options] <label>")]
    Restart {
        #[arg(required = true, value_name = "label")]
        label: String,
    },

    /// Enable service in its descriptor, then install and start it.
    #[command(override_usage = "service-manager enable [options] <label>")]
    Enable {
        #[arg(required = true, value_name = "label")]
        label: String,
    },

    /// Disable service in its descriptor, then uninstall it.
    #[command(override_usage = "service-manager disable [options] <label>")]
    Disable {
        #[arg(required = true, value_name = "label")]
        label: String,
    },

    /// Show last lines of service stdout log.
    #[command(override_usage = "service-manager logs [options] <label>")]
    Logs {
        #[arg(required = true, value_name = "label")]
        label: String,

        /// Number of lines to show.
        #[arg(short = 'n', long, default_value_t = 50, value_name = "count")]
        lines: usize,
    },

    /// Print service status again whenever descriptors or status change.
    #[command(override_usage = "service-manager watch [options]")]
    Watch,
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

struct Manager {
    settings: Settings,
    configs: ServiceConfigDir,
    home: PathBuf,
    orchestrator: Orchestrator<Launchctl>,
    report: Report,
}

impl Manager {
    fn new(settings: Settings) -> Result<Self> {
        let home = home_dir()?;
        let control = Launchctl::new(&settings.paths.launch_agents, &home);
        let orchestrator = Orchestrator::new(control, StartPolicy::from(&settings.services));

        Ok(Self {
            configs: ServiceConfigDir::new(&settings.paths.service_configs),
            settings,
            home,
            orchestrator,
            report: Report::for_stdout(),
        })
    }

    fn control(&self) -> &Launchctl {
        self.orchestrator.control()
    }

    async fn statuses(&self, configs: Vec<ServiceConfig>) -> Vec<(ServiceConfig, RuntimeStatus)> {
        let mut services = Vec::with_capacity(configs.len());
        for config in configs {
            let status = match config.descriptor() {
                Some(descriptor) => self.control().status(&descriptor.label).await,
                None => RuntimeStatus::NOT_INSTALLED,
            };
            services.push((config, status));
        }
        services
    }

    async fn list(&self) -> Result<()> {
        let services = self.statuses(self.configs.load_all()?).await;
        print!("{}", self.report.service_list(&services));

        Ok(())
    }

    fn diff(&self) -> Result<()> {
        let descriptors = self
            .configs
            .load_all()?
            .into_iter()
            .filter_map(|config| match config.parsed {
                Ok(descriptor) => Some(descriptor),
                Err(err) => {
                    warn!("{err}");
                    None
                }
            })
            .collect::<Vec<_>>();
        let installed = descriptors
            .iter()
            .filter(|descriptor| self.control().is_installed(&descriptor.label))
            .map(|descriptor| descriptor.label.clone())
            .collect::<HashSet<_>>();

        let items = reconcile_services(&descriptors, &installed, self.settings.packages.sort);
        print!("{}", self.report.service_diff(&items));

        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let configs = self.configs.load_all()?;

        let bar = ProgressBar::new(configs.len() as u64);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        let results = self.orchestrator.sync_all(&configs, &bar).await;
        bar.finish_and_clear();

        print!("{}", self.report.sync_results(&results));

        let failed = results.iter().filter(|result| result.is_error()).count();
        if failed > 0 {
            return Err(anyhow!("{failed} of {} services failed to sync", results.len()));
        }

        Ok(())
    }

    async fn start(&self, label: &str) -> Result<()> {
        self.orchestrator.start(label).await?;
        info!("started {label}");

        Ok(())
    }

    async fn stop(&self, label: &str) -> Result<()> {
        self.orchestrator.stop(label).await?;
        info!("stopped {label}");

        Ok(())
    }

    async fn restart(&self, label: &str) -> Result<()> {
        self.orchestrator.restart(label).await?;
        info!("restarted {label}");

        Ok(())
    }

    async fn toggle(&self, label: &str, enabled: bool) -> Result<()> {
        let (path, descriptor) = self.configs.find(label)?;
        let result = if enabled {
            self.orchestrator.enable(&path, &descriptor).await?
        } else {
            self.orchestrator.disable(&path, &descriptor).await?
        };

        match result.error {
            Some(error) => Err(anyhow!("{label}: {error}")),
            None => {
                info!("{label} {}", result.action);
                Ok(())
            }
        }
    }

    fn logs(&self, label: &str, lines: usize) -> Result<()> {
        let (_, descriptor) = self.configs.find(label)?;
        let stdout = descriptor
            .stdout_path
            .as_deref()
            .ok_or_else(|| anyhow!("{label} has no stdout log configured"))?;
        let path = PathBuf::from(expand_home(stdout, &self.home).as_ref());

        let tail = tail_log(&path, lines)?;
        print!("{}", self.report.log_tail(label, &tail));

        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        let watcher = ConfigWatcher::spawn(
            WatchTarget::TomlDir(self.configs.path().to_path_buf()),
            self.settings.services.debounce(),
            SCAN_INTERVAL,
        );
        let mut changes = watcher.subscribe();

        let mut labels = self.labels()?;
        let mut poller = StatusPoller::spawn(
            Arc::new(self.control().clone()),
            labels.clone(),
            self.settings.services.poll_interval(),
        );
        let mut statuses = poller.subscribe();

        self.list().await?;
        info!("watching {:?}, press ctrl-c to stop", self.configs.path().display());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let fresh = self.labels()?;
                    if fresh != labels {
                        labels = fresh;
                        poller = StatusPoller::spawn(
                            Arc::new(self.control().clone()),
                            labels.clone(),
                            self.settings.services.poll_interval(),
                        );
                        statuses = poller.subscribe();
                    }
                    self.list().await?;
                }
                changed = statuses.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.list().await?;
                }
            }
        }

        Ok(())
    }

    fn labels(&self) -> Result<Vec<String>> {
        Ok(self
            .configs
            .load_all()?
            .iter()
            .filter_map(ServiceConfig::descriptor)
            .map(|descriptor| descriptor.label.clone())
            .collect())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-user launchd control.
//!
//! Installed units live in the LaunchAgents directory as `<label>.plist`.
//! Loading and unloading happens in the GUI domain of the current user
//! through `launchctl bootstrap` and `launchctl bootout`.

use crate::{
    probe::{capture, execute},
    service::{plist, ServiceDescriptor},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{remove_file, write},
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Pause between booting out a stale instance and bootstrapping again.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Exit code of `launchctl bootout` for a service that was not loaded.
const NOT_LOADED: i32 = 3;

/// Runtime state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Running,
    Stopped,
    NotInstalled,
}

impl Display for ServiceState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::NotInstalled => "not installed",
        })
    }
}

/// Runtime status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeStatus {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

impl RuntimeStatus {
    pub const NOT_INSTALLED: Self = Self {
        state: ServiceState::NotInstalled,
        pid: None,
        exit_code: None,
    };

    pub fn running(pid: u32, exit_code: Option<i32>) -> Self {
        Self {
            state: ServiceState::Running,
            pid: Some(pid),
            exit_code,
        }
    }

    pub fn stopped(exit_code: Option<i32>) -> Self {
        Self {
            state: ServiceState::Stopped,
            pid: None,
            exit_code,
        }
    }
}

/// Control over installed units and their runtime.
///
/// Start requests are fire-and-forget. Deciding whether a start actually
/// succeeded is left to the caller, who polls [`ServiceControl::status`].
pub trait ServiceControl {
    /// Runtime status of service with target label.
    fn status(&self, label: &str) -> impl Future<Output = RuntimeStatus> + Send;

    /// Whether an installed unit exists for target label.
    fn is_installed(&self, label: &str) -> bool;

    /// Generate and write installed unit of descriptor.
    fn install(&self, descriptor: &ServiceDescriptor) -> impl Future<Output = Result<()>> + Send;

    /// Stop service, then delete its installed unit.
    fn uninstall(&self, label: &str) -> impl Future<Output = Result<()>> + Send;

    /// Ask launchd to load and start installed unit.
    fn request_start(&self, label: &str) -> impl Future<Output = Result<()>> + Send;

    /// Ask launchd to stop and unload service.
    fn stop(&self, label: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Service control backed by `launchctl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launchctl {
    agents_dir: PathBuf,
    home: PathBuf,
}

impl Launchctl {
    pub fn new(agents_dir: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            home: home.into(),
        }
    }

    /// Path of installed unit for target label.
    pub fn unit_path(&self, label: &str) -> PathBuf {
        self.agents_dir.join(format!("{label}.plist"))
    }

    async fn gui_domain(&self) -> Result<String> {
        let uid = capture("id", &["-u"]).await.map_err(Error::Domain)?;
        Ok(format!("gui/{}", uid.trim()))
    }

    async fn bootout(&self, label: &str) -> Result<()> {
        let domain = self.gui_domain().await?;
        let target = format!("{domain}/{label}");
        let output = execute("launchctl", &["bootout", &target])
            .await
            .map_err(|err| Error::Stop {
                label: label.to_string(),
                reason: err.to_string(),
            })?;

        match output.status.code() {
            Some(0) | Some(NOT_LOADED) => Ok(()),
            code => Err(Error::Stop {
                label: label.to_string(),
                reason: format!(
                    "launchctl bootout exited with {code:?}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }
}

impl ServiceControl for Launchctl {
    async fn status(&self, label: &str) -> RuntimeStatus {
        if !self.is_installed(label) {
            return RuntimeStatus::NOT_INSTALLED;
        }

        match capture("launchctl", &["list"]).await {
            Ok(stdout) => parse_launchctl_list(&stdout, label),
            Err(err) => {
                warn!("cannot query launchd for {label:?}: {err}");
                RuntimeStatus::NOT_INSTALLED
            }
        }
    }

    fn is_installed(&self, label: &str) -> bool {
        self.unit_path(label).is_file()
    }

    #[instrument(skip(self, descriptor), fields(label = %descriptor.label), level = "debug")]
    async fn install(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let label = descriptor.label.as_str();
        let unit_path = self.unit_path(label);
        let fail = |reason: String| Error::Install {
            label: label.to_string(),
            reason,
        };

        mkdirp::mkdirp(&self.agents_dir)
            .map_err(|err| fail(format!("cannot create {:?}: {err}", self.agents_dir.display())))?;

        // INVARIANT: Log directories must exist before launchd opens the logs.
        for log in [&descriptor.stdout_path, &descriptor.stderr_path]
            .into_iter()
            .flatten()
        {
            let log = PathBuf::from(crate::path::expand_home(log, &self.home).as_ref());
            if let Some(parent) = log.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                mkdirp::mkdirp(parent)
                    .map_err(|err| fail(format!("cannot create {:?}: {err}", parent.display())))?;
            }
        }

        write(&unit_path, plist::generate(descriptor, &self.home))
            .map_err(|err| fail(format!("cannot write {:?}: {err}", unit_path.display())))?;
        info!("installed {label} at {:?}", unit_path.display());

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn uninstall(&self, label: &str) -> Result<()> {
        if let Err(err) = self.bootout(label).await {
            debug!("ignore stop failure during uninstall: {err}");
        }
        sleep(SETTLE_DELAY).await;

        let unit_path = self.unit_path(label);
        if unit_path.exists() {
            remove_file(&unit_path).map_err(|err| Error::Uninstall {
                label: label.to_string(),
                reason: format!("cannot remove {:?}: {err}", unit_path.display()),
            })?;
        }
        info!("uninstalled {label}");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn request_start(&self, label: &str) -> Result<()> {
        let unit_path = self.unit_path(label);
        if !unit_path.is_file() {
            return Err(Error::NotInstalled(label.to_string()));
        }

        // INVARIANT: Clear out any stale instance before bootstrapping.
        let domain = self.gui_domain().await?;
        let target = format!("{domain}/{label}");
        let _ = execute("launchctl", &["bootout", &target]).await;
        sleep(SETTLE_DELAY).await;

        let unit = unit_path.to_string_lossy();
        let output = execute("launchctl", &["bootstrap", &domain, unit.as_ref()])
            .await
            .map_err(|err| Error::Start {
                label: label.to_string(),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            // INVARIANT: Bootstrap may complain about a service that still
            //   came up, status polling has the final say.
            debug!(
                "launchctl bootstrap {label} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop(&self, label: &str) -> Result<()> {
        self.bootout(label).await
    }
}

/// Parse output of `launchctl list` for target label.
///
/// Each line reads `PID\tStatus\tLabel`, where a PID of `-` means the
/// service is loaded but not running. A label missing from the listing is
/// installed but not loaded, which counts as stopped.
pub fn parse_launchctl_list(stdout: &str, label: &str) -> RuntimeStatus {
    for line in stdout.lines() {
        let mut fields = line.split('\t');
        let (Some(pid), Some(status), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if name.trim() != label {
            continue;
        }

        let exit_code = status.trim().parse::<i32>().ok();
        return match pid.trim().parse::<u32>() {
            Ok(pid) => RuntimeStatus::running(pid, exit_code),
            Err(_) => RuntimeStatus::stopped(exit_code),
        };
    }

    RuntimeStatus::stopped(None)
}

/// Return last `count` non-empty lines of a log file.
///
/// A missing log has no lines.
///
/// # Errors
///
/// - Return [`Error::Log`] if existing log cannot be read.
pub fn tail_log(path: &Path, count: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|err| Error::Log {
        source: err,
        path: path.to_path_buf(),
    })?;
    let lines = content
        .lines()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    let start = lines.len().saturating_sub(count);

    Ok(lines[start..].iter().map(ToString::to_string).collect())
}

/// Service lifecycle error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// GUI domain of current user cannot be determined.
    #[error("cannot determine launchd domain of current user")]
    Domain(#[source] crate::probe::ProbeError),

    /// Installed unit cannot be written.
    #[error("{label}: {reason}")]
    Install { label: String, reason: String },

    /// Installed unit cannot be removed.
    #[error("{label}: {reason}")]
    Uninstall { label: String, reason: String },

    /// Service cannot be started.
    #[error("{label}: {reason}")]
    Start { label: String, reason: String },

    /// Service cannot be stopped.
    #[error("{label}: {reason}")]
    Stop { label: String, reason: String },

    /// Service has no installed unit.
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Service log cannot be read.
    #[error("failed to read log at {:?}", path.display())]
    Log {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

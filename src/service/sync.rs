// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service sync orchestration.
//!
//! Drive each declared service toward what its descriptor says, given what
//! is actually installed:
//!
//! | enabled | installed | steps                                 | action      |
//! |---------|-----------|---------------------------------------|-------------|
//! | yes     | yes       | uninstall, settle, install, start     | Reinstalled |
//! | yes     | no        | install, start                        | Installed   |
//! | no      | yes       | uninstall                             | Uninstalled |
//! | no      | no        | nothing                               | Unchanged   |
//!
//! All steps run sequentially. One failing service never stops the rest of
//! a batch from syncing. There is no cancellation once a sync has begun.

use crate::{
    config::ServiceSettings,
    service::{
        launchd::{Error, Result, ServiceControl, ServiceState},
        set_enabled, ServiceConfig, ServiceDescriptor, ServiceError,
    },
};

use indicatif::ProgressBar;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// How long to wait for a requested start to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPolicy {
    /// Times status is polled after the start request.
    pub max_attempts: u32,

    /// Delay between polls. Never slept after the last poll.
    pub delay: Duration,

    /// Pause between uninstalling and reinstalling a service.
    pub settle: Duration,

    /// Pause between stopping and starting a restarted service.
    pub restart_delay: Duration,
}

impl StartPolicy {
    /// Policy without any waiting, still polling `max_attempts` times.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            settle: Duration::ZERO,
            restart_delay: Duration::ZERO,
        }
    }
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_millis(300),
            settle: Duration::from_millis(200),
            restart_delay: Duration::from_millis(500),
        }
    }
}

impl From<&ServiceSettings> for StartPolicy {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            max_attempts: settings.start_attempts,
            delay: settings.start_delay(),
            ..Default::default()
        }
    }
}

/// Outcome category of syncing one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Installed,
    Reinstalled,
    Uninstalled,
    Unchanged,
    Error,
}

impl Display for SyncAction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Installed => "installed",
            Self::Reinstalled => "reinstalled",
            Self::Uninstalled => "uninstalled",
            Self::Unchanged => "unchanged",
            Self::Error => "error",
        })
    }
}

/// Outcome of syncing one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// Service label, or descriptor file name if it never parsed.
    pub label: String,
    pub action: SyncAction,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new(label: impl Into<String>, action: SyncAction) -> Self {
        Self {
            label: label.into(),
            action,
            error: None,
        }
    }

    pub fn error(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: SyncAction::Error,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.action == SyncAction::Error
    }
}

/// Drive services through their lifecycle.
#[derive(Debug, Clone)]
pub struct Orchestrator<C>
where
    C: ServiceControl,
{
    control: C,
    policy: StartPolicy,
}

impl<C> Orchestrator<C>
where
    C: ServiceControl,
{
    pub fn new(control: C, policy: StartPolicy) -> Self {
        Self { control, policy }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Start installed service and wait until it is up.
    ///
    /// A service that is running counts as started, as does one that already
    /// exited cleanly, since one-shot jobs do exactly that. A non-zero exit
    /// fails right away without waiting out the remaining attempts.
    ///
    /// # Errors
    ///
    /// - Return [`Error::NotInstalled`] if service has no installed unit.
    /// - Return [`Error::Start`] if service crashed or never came up.
    #[instrument(skip(self), level = "debug")]
    pub async fn start(&self, label: &str) -> Result<()> {
        if !self.control.is_installed(label) {
            return Err(Error::NotInstalled(label.to_string()));
        }

        self.control.request_start(label).await?;

        for attempt in 1..=self.policy.max_attempts {
            let status = self.control.status(label).await;
            debug!("start poll {attempt}: {status:?}");

            match (status.state, status.exit_code) {
                (ServiceState::Running, _) => return Ok(()),
                (ServiceState::Stopped, Some(0)) => return Ok(()),
                (ServiceState::Stopped, Some(code)) => {
                    return Err(Error::Start {
                        label: label.to_string(),
                        reason: format!("exited with code {code}"),
                    })
                }
                _ => {}
            }

            if attempt < self.policy.max_attempts {
                sleep(self.policy.delay).await;
            }
        }

        Err(Error::Start {
            label: label.to_string(),
            reason: format!("not running after {} checks", self.policy.max_attempts),
        })
    }

    /// Stop service.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Stop`] if launchd refuses to stop service.
    pub async fn stop(&self, label: &str) -> Result<()> {
        self.control.stop(label).await
    }

    /// Stop, pause, then start service again.
    ///
    /// A failed stop does not prevent the start.
    ///
    /// # Errors
    ///
    /// - Return any error [`Orchestrator::start`] can produce.
    pub async fn restart(&self, label: &str) -> Result<()> {
        if let Err(err) = self.control.stop(label).await {
            warn!("{err}");
        }
        sleep(self.policy.restart_delay).await;
        self.start(label).await
    }

    /// Sync one service toward its descriptor.
    #[instrument(skip(self, descriptor), fields(label = %descriptor.label), level = "debug")]
    pub async fn sync_one(&self, descriptor: &ServiceDescriptor) -> SyncResult {
        let label = descriptor.label.as_str();
        let installed = self.control.is_installed(label);

        if !descriptor.enabled {
            if !installed {
                return SyncResult::new(label, SyncAction::Unchanged);
            }

            return match self.control.uninstall(label).await {
                Ok(()) => SyncResult::new(label, SyncAction::Uninstalled),
                Err(err) => SyncResult::error(label, format!("failed to uninstall: {err}")),
            };
        }

        if installed {
            if let Err(err) = self.control.uninstall(label).await {
                return SyncResult::error(label, format!("failed to uninstall: {err}"));
            }
            sleep(self.policy.settle).await;
        }

        if let Err(err) = self.control.install(descriptor).await {
            return SyncResult::error(label, format!("failed to install: {err}"));
        }

        if let Err(err) = self.start(label).await {
            return SyncResult::error(label, format!("installed but failed to start: {err}"));
        }

        let action = if installed {
            SyncAction::Reinstalled
        } else {
            SyncAction::Installed
        };
        info!("{label} {action}");
        SyncResult::new(label, action)
    }

    /// Sync every service in order.
    ///
    /// Descriptors that failed to parse become error results labeled with
    /// their file name.
    pub async fn sync_all(&self, configs: &[ServiceConfig], bar: &ProgressBar) -> Vec<SyncResult> {
        let mut results = Vec::with_capacity(configs.len());

        for config in configs {
            let result = match &config.parsed {
                Ok(descriptor) => {
                    bar.set_message(descriptor.label.clone());
                    self.sync_one(descriptor).await
                }
                Err(err) => SyncResult::error(&err.file, err.to_string()),
            };
            bar.inc(1);
            results.push(result);
        }

        results
    }

    /// Mark descriptor enabled, then install and start its service.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError`] if descriptor cannot be updated.
    pub async fn enable(
        &self,
        path: &Path,
        descriptor: &ServiceDescriptor,
    ) -> std::result::Result<SyncResult, ServiceError> {
        self.toggle(path, descriptor, true).await
    }

    /// Mark descriptor disabled, then uninstall its service.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError`] if descriptor cannot be updated.
    pub async fn disable(
        &self,
        path: &Path,
        descriptor: &ServiceDescriptor,
    ) -> std::result::Result<SyncResult, ServiceError> {
        self.toggle(path, descriptor, false).await
    }

    async fn toggle(
        &self,
        path: &Path,
        descriptor: &ServiceDescriptor,
        enabled: bool,
    ) -> std::result::Result<SyncResult, ServiceError> {
        set_enabled(path, enabled)?;
        let descriptor = ServiceDescriptor {
            enabled,
            ..descriptor.clone()
        };
        Ok(self.sync_one(&descriptor).await)
    }
}

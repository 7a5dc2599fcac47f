// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of dotsync's own settings file to simplify the process
//! of serialization and deserialization. Every path the extractors, mutators,
//! and probes touch comes from here, so callers (and tests) can point the
//! whole toolkit at a different directory tree.

use crate::{
    path::{
        default_flake_path, default_launch_agents_dir, default_service_config_dir, NoWayHome,
    },
    reconcile::SortMode,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::debug;

/// Settings layout.
///
/// # General Layout
///
/// Settings are split into three tables: `paths` says where the declared
/// configuration and installed units live, `packages` tunes package listing,
/// and `services` tunes service lifecycle timing. Every field is optional in
/// the file itself, missing fields take their defaults.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Location of declared configuration and installed units.
    pub paths: PathSettings,

    /// Package listing settings.
    pub packages: PackageSettings,

    /// Service lifecycle settings.
    pub services: ServiceSettings,
}

impl Settings {
    /// Construct settings from default locations.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if home directory cannot be found.
    pub fn try_default() -> Result<Self> {
        Ok(Self {
            paths: PathSettings::try_default()?,
            packages: PackageSettings::default(),
            services: ServiceSettings::default(),
        })
    }

    /// Load settings file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if existing settings file is unreadable.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no settings at {:?}, using defaults", path.display());
            return Self::try_default();
        }

        debug!("load settings from {:?}", path.display());
        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        // INVARIANT: Fill in path defaults before deserializing so that a
        //   settings file may override just one of them.
        let defaults = Self::try_default()?;
        let partial: PartialSettings = toml::de::from_str(data)?;

        let mut settings = Self {
            paths: PathSettings {
                flake: partial.paths.flake.unwrap_or(defaults.paths.flake),
                service_configs: partial
                    .paths
                    .service_configs
                    .unwrap_or(defaults.paths.service_configs),
                launch_agents: partial
                    .paths
                    .launch_agents
                    .unwrap_or(defaults.paths.launch_agents),
            },
            packages: partial.packages,
            services: partial.services,
        };

        // INVARIANT: Perform shell expansion on every path field.
        settings.paths.flake = shell_expand(&settings.paths.flake)?;
        settings.paths.service_configs = shell_expand(&settings.paths.service_configs)?;
        settings.paths.launch_agents = shell_expand(&settings.paths.launch_agents)?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Paths to declared configuration and installed units.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PathSettings {
    /// The nix-darwin flake declaring packages.
    pub flake: PathBuf,

    /// Directory holding one TOML descriptor per service.
    pub service_configs: PathBuf,

    /// Directory launchd reads installed units from.
    pub launch_agents: PathBuf,
}

impl PathSettings {
    /// Construct path settings from default locations.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if home directory cannot be found.
    pub fn try_default() -> Result<Self> {
        Ok(Self {
            flake: default_flake_path()?,
            service_configs: default_service_config_dir()?,
            launch_agents: default_launch_agents_dir()?,
        })
    }
}

/// Package listing settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Sort mode used when none is given on the command line.
    pub sort: SortMode,
}

/// Service lifecycle settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Times status is polled after a start request.
    pub start_attempts: u32,

    /// Delay between start status polls, in milliseconds.
    pub start_delay_ms: u64,

    /// Quiet period collapsing bursts of config changes, in milliseconds.
    pub debounce_ms: u64,

    /// Runtime status polling interval, in milliseconds.
    pub poll_interval_ms: u64,
}

impl ServiceSettings {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            start_attempts: 15,
            start_delay_ms: 300,
            debounce_ms: 100,
            poll_interval_ms: 3000,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialSettings {
    paths: PartialPathSettings,
    packages: PackageSettings,
    services: ServiceSettings,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct PartialPathSettings {
    flake: Option<PathBuf>,
    service_configs: Option<PathBuf>,
    launch_agents: Option<PathBuf>,
}

fn shell_expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())?.into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file exists but cannot be read.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default paths cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declared LaunchAgent services.
//!
//! Each service is declared by its own TOML descriptor inside of the service
//! configuration directory:
//!
//! ```toml
//! enabled = true
//!
//! [service]
//! label = "com.example.sync"
//! program = ["~/bin/sync", "--watch"]
//! run_at_load = true
//! keep_alive = false
//! working_directory = "~/src"
//!
//! [service.environment]
//! RUST_LOG = "info"
//!
//! [logs]
//! stdout = "~/Library/Logs/sync.log"
//! stderr = "~/Library/Logs/sync.err"
//! ```
//!
//! Descriptors are validated strictly. A descriptor is either fully valid or
//! rejected with a message naming the offending field, never patched up with
//! defaults for required fields.

pub mod launchd;
pub mod plist;
pub mod sync;

use crate::reconcile::{reconcile, Item, Record, SortMode};

use std::{
    collections::{BTreeMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use toml::{Table, Value};
use tracing::{debug, info, instrument, warn};

/// Validated service descriptor.
///
/// Path-like values are kept raw. Home expansion happens when the installed
/// unit is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub label: String,
    pub program: Vec<String>,
    pub enabled: bool,
    pub run_at_load: bool,
    pub keep_alive: bool,
    pub working_directory: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub environment: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// Parse and validate descriptor content.
    ///
    /// # Errors
    ///
    /// - Return [`ParseError`] naming `filename` and the first invalid field.
    pub fn parse(content: &str, filename: &str) -> Result<Self, ParseError> {
        let fail = |message: &str| ParseError::new(filename, message);

        let data = content
            .parse::<Table>()
            .map_err(|err| fail(err.message()))?;

        let enabled = data
            .get("enabled")
            .and_then(Value::as_bool)
            .ok_or_else(|| fail("missing or invalid 'enabled' field (must be true/false)"))?;

        let service = match data.get("service") {
            Some(Value::Table(service)) => service,
            Some(_) => return Err(fail("'service' must be a table")),
            None => return Err(fail("missing [service] section")),
        };

        let label = service
            .get("label")
            .and_then(Value::as_str)
            .filter(|label| !label.is_empty())
            .ok_or_else(|| fail("missing or invalid 'service.label'"))?
            .to_string();

        let program = service
            .get("program")
            .and_then(Value::as_array)
            .ok_or_else(|| fail("'service.program' must be an array"))?;
        if program.is_empty() {
            return Err(fail("'service.program' cannot be empty"));
        }
        let program = program
            .iter()
            .map(|arg| arg.as_str().map(ToString::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| fail("all 'service.program' elements must be strings"))?;

        let run_at_load = optional_bool(service, "run_at_load")
            .map_err(|_| fail("'service.run_at_load' must be true/false"))?;
        let keep_alive = optional_bool(service, "keep_alive")
            .map_err(|_| fail("'service.keep_alive' must be true/false"))?;
        let working_directory = optional_string(service, "working_directory")
            .map_err(|_| fail("'service.working_directory' must be a string"))?;

        let environment = match service.get("environment") {
            None => BTreeMap::new(),
            Some(Value::Table(environment)) => environment
                .iter()
                .map(|(key, value)| value.as_str().map(|value| (key.clone(), value.to_string())))
                .collect::<Option<BTreeMap<_, _>>>()
                .ok_or_else(|| fail("all 'service.environment' values must be strings"))?,
            Some(_) => return Err(fail("'service.environment' must be a table")),
        };

        let (stdout_path, stderr_path) = match data.get("logs") {
            None => (None, None),
            Some(Value::Table(logs)) => (
                optional_string(logs, "stdout").map_err(|_| fail("'logs.stdout' must be a string"))?,
                optional_string(logs, "stderr").map_err(|_| fail("'logs.stderr' must be a string"))?,
            ),
            Some(_) => return Err(fail("'logs' must be a table")),
        };

        Ok(Self {
            label,
            program,
            enabled,
            run_at_load,
            keep_alive,
            working_directory,
            stdout_path,
            stderr_path,
            environment,
        })
    }

    /// Read and validate descriptor file.
    ///
    /// # Errors
    ///
    /// - Return [`ParseError`] if file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let filename = file_name(path);
        let content =
            read_to_string(path).map_err(|err| ParseError::new(&filename, &err.to_string()))?;
        Self::parse(&content, &filename)
    }

    /// File name of installed unit.
    pub fn unit_file_name(&self) -> String {
        format!("{}.plist", self.label)
    }
}

fn optional_bool(table: &Table, key: &str) -> Result<bool, ()> {
    match table.get(key) {
        None => Ok(false),
        Some(value) => value.as_bool().ok_or(()),
    }
}

fn optional_string(table: &Table, key: &str) -> Result<Option<String>, ()> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value.as_str().map(|value| Some(value.to_string())).ok_or(()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Service descriptor failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{file}: {message}")]
pub struct ParseError {
    pub file: String,
    pub message: String,
}

impl ParseError {
    pub fn new(file: &str, message: &str) -> Self {
        Self {
            file: file.to_string(),
            message: message.to_string(),
        }
    }
}

/// Descriptor file along with its validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub path: PathBuf,
    pub parsed: Result<ServiceDescriptor, ParseError>,
}

impl ServiceConfig {
    pub fn descriptor(&self) -> Option<&ServiceDescriptor> {
        self.parsed.as_ref().ok()
    }
}

/// Directory of service descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfigDir {
    path: PathBuf,
}

impl ServiceConfigDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// List every `*.toml` descriptor, sorted by path.
    ///
    /// A missing directory simply has no descriptors.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Pattern`] if directory path cannot form a
    ///   glob pattern.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.path.is_dir() {
            debug!("no service directory at {:?}", self.path.display());
            return Ok(Vec::new());
        }

        // INVARIANT: Directory part must match literally.
        let pattern = format!(
            "{}/*.toml",
            glob::Pattern::escape(self.path.to_string_lossy().as_ref())
        );

        let mut paths = glob::glob(&pattern)?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!("skip unreadable service descriptor: {err}");
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        paths.sort();

        Ok(paths)
    }

    /// Load every descriptor independently of the others.
    ///
    /// # Errors
    ///
    /// - Return any error [`ServiceConfigDir::list`] can produce.
    #[instrument(skip(self), level = "debug")]
    pub fn load_all(&self) -> Result<Vec<ServiceConfig>> {
        let configs = self
            .list()?
            .into_iter()
            .map(|path| {
                let parsed = ServiceDescriptor::load(&path);
                if let Err(err) = &parsed {
                    warn!("{err}");
                }
                ServiceConfig { path, parsed }
            })
            .collect();

        Ok(configs)
    }

    /// Find valid descriptor by label.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::UnknownLabel`] if no valid descriptor has
    ///   target label.
    /// - Return any error [`ServiceConfigDir::list`] can produce.
    pub fn find(&self, label: &str) -> Result<(PathBuf, ServiceDescriptor)> {
        self.load_all()?
            .into_iter()
            .find_map(|config| match config.parsed {
                Ok(descriptor) if descriptor.label == label => Some((config.path, descriptor)),
                _ => None,
            })
            .ok_or_else(|| ServiceError::UnknownLabel(label.to_string()))
    }
}

/// Flip the top-level `enabled` flag of a descriptor file.
///
/// Only the value itself is rewritten. Comments, ordering, and formatting of
/// everything else in the file stay as they were.
///
/// # Errors
///
/// - Return [`ServiceError::Read`] or [`ServiceError::Write`] on I/O failure.
/// - Return [`ServiceError::Edit`] if file is not valid TOML.
/// - Return [`ServiceError::EnabledField`] if `enabled` is missing or is not
///   a boolean.
#[instrument(level = "debug")]
pub fn set_enabled(path: &Path, enabled: bool) -> Result<()> {
    let content = read_to_string(path).map_err(|err| ServiceError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;
    let mut document = content.parse::<toml_edit::DocumentMut>()?;

    let value = document
        .get_mut("enabled")
        .and_then(toml_edit::Item::as_value_mut)
        .filter(|value| value.is_bool())
        .ok_or_else(|| ServiceError::EnabledField(path.to_path_buf()))?;

    let decor = value.decor().clone();
    *value = toml_edit::Value::from(enabled);
    *value.decor_mut() = decor;

    write(path, document.to_string()).map_err(|err| ServiceError::Write {
        source: err,
        path: path.to_path_buf(),
    })?;
    info!("set enabled = {enabled} in {:?}", path.display());

    Ok(())
}

/// Reconcile declared services against installed units.
///
/// Enabled services form the declared set, installed units of known
/// services form the installed set. Extra means installed but disabled,
/// missing means enabled but not installed.
pub fn reconcile_services(
    descriptors: &[ServiceDescriptor],
    installed: &HashSet<String>,
    mode: SortMode,
) -> Vec<Item> {
    let declared = descriptors
        .iter()
        .filter(|descriptor| descriptor.enabled)
        .map(|descriptor| Record::named(&descriptor.label))
        .collect::<Vec<_>>();
    let installed = descriptors
        .iter()
        .filter(|descriptor| installed.contains(&descriptor.label))
        .map(|descriptor| Record::named(&descriptor.label))
        .collect::<Vec<_>>();

    reconcile(&declared, &installed, mode)
}

impl Display for ServiceDescriptor {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({})", self.label, self.program.join(" "))
    }
}

/// Service configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service directory cannot be turned into a glob pattern.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// No valid descriptor declares target label.
    #[error("no service labeled {0:?}")]
    UnknownLabel(String),

    /// Descriptor cannot be read.
    #[error("failed to read service descriptor at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Descriptor cannot be written.
    #[error("failed to write service descriptor at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Descriptor is not valid TOML.
    #[error(transparent)]
    Edit(#[from] toml_edit::TomlError),

    /// Descriptor lacks a boolean `enabled` field.
    #[error("missing or invalid 'enabled' field in {:?}", .0.display())]
    EnabledField(PathBuf),
}

/// Friendly result alias :3
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

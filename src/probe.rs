// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installed package probes.
//!
//! Ask the package managers of the live system what is currently installed.
//! Probing is read-only and never fatal: a tool that is missing, fails, or
//! hangs past [`COMMAND_TIMEOUT`] is logged and treated as having nothing
//! installed.

use regex::Regex;
use serde::Deserialize;
use std::{future::Future, process::Output, sync::LazyLock, time::Duration};
use tokio::{process::Command, time::timeout};
use tracing::{debug, instrument, warn};

/// Upper bound on how long any external tool may run.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Query installed packages.
pub trait PackageProbe {
    /// Names of installed Homebrew formulae.
    fn installed_formulae(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Tokens of installed Homebrew casks.
    fn installed_casks(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Installed Mac App Store apps as `(id, name)` pairs.
    fn installed_mas_apps(&self) -> impl Future<Output = Vec<(u64, String)>> + Send;

    /// Details of a formula or cask, if Homebrew knows it.
    fn package_info(&self, name: &str) -> impl Future<Output = Option<PackageInfo>> + Send;
}

/// Probe backed by the `brew` and `mas` command-line tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl PackageProbe for SystemProbe {
    async fn installed_formulae(&self) -> Vec<String> {
        capture_or_empty("brew", &["list", "--formula", "-1"])
            .await
            .map(|stdout| parse_name_list(&stdout))
            .unwrap_or_default()
    }

    async fn installed_casks(&self) -> Vec<String> {
        capture_or_empty("brew", &["list", "--cask", "-1"])
            .await
            .map(|stdout| parse_name_list(&stdout))
            .unwrap_or_default()
    }

    async fn installed_mas_apps(&self) -> Vec<(u64, String)> {
        capture_or_empty("mas", &["list"])
            .await
            .map(|stdout| parse_mas_list(&stdout))
            .unwrap_or_default()
    }

    async fn package_info(&self, name: &str) -> Option<PackageInfo> {
        let stdout = capture_or_empty("brew", &["info", "--json=v2", name]).await?;
        match PackageInfo::from_brew_json(&stdout) {
            Ok(info) => info,
            Err(err) => {
                warn!("cannot parse brew info for {name:?}: {err}");
                None
            }
        }
    }
}

/// Details of a Homebrew formula or cask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
}

impl PackageInfo {
    /// Parse output of `brew info --json=v2`.
    ///
    /// Formulae take precedence over casks. Returns `None` if the output
    /// lists neither.
    ///
    /// # Errors
    ///
    /// - Return [`serde_json::Error`] if output is not valid brew JSON.
    pub fn from_brew_json(json: &str) -> Result<Option<Self>, serde_json::Error> {
        let info: BrewInfo = serde_json::from_str(json)?;

        if let Some(formula) = info.formulae.into_iter().next() {
            return Ok(Some(Self {
                name: formula.name,
                version: formula.versions.stable,
                description: formula.desc,
                homepage: formula.homepage,
            }));
        }

        Ok(info.casks.into_iter().next().map(|cask| Self {
            name: cask.token,
            version: cask.version,
            description: cask.desc,
            homepage: cask.homepage,
        }))
    }
}

#[derive(Deserialize)]
struct BrewInfo {
    #[serde(default)]
    formulae: Vec<BrewFormula>,
    #[serde(default)]
    casks: Vec<BrewCask>,
}

#[derive(Deserialize)]
struct BrewFormula {
    name: String,
    desc: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    versions: BrewVersions,
}

#[derive(Default, Deserialize)]
struct BrewVersions {
    stable: Option<String>,
}

#[derive(Deserialize)]
struct BrewCask {
    token: String,
    desc: Option<String>,
    homepage: Option<String>,
    version: Option<String>,
}

/// Parse one-name-per-line tool output, ignoring blank lines.
pub fn parse_name_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse output of `mas list`.
///
/// Each line reads `<id>  <name>  (<version>)`. Lines that do not fit are
/// skipped.
pub fn parse_mas_list(stdout: &str) -> Vec<(u64, String)> {
    static MAS_LINE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(.+?)\s+\([^()]*\)\s*$").unwrap());

    stdout
        .lines()
        .filter_map(|line| {
            let captures = MAS_LINE.captures(line)?;
            let id = captures[1].parse().ok()?;
            Some((id, captures[2].to_string()))
        })
        .collect()
}

/// Run external command to completion, bounded by [`COMMAND_TIMEOUT`].
///
/// Non-zero exit is not an error here, callers that care about exit codes
/// inspect the returned output.
///
/// # Errors
///
/// - Return [`ProbeError::Spawn`] if command cannot be started.
/// - Return [`ProbeError::TimedOut`] if command runs too long.
#[instrument(level = "debug")]
pub async fn execute(program: &str, args: &[&str]) -> Result<Output> {
    let command = render_command(program, args);
    let output = timeout(
        COMMAND_TIMEOUT,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await
    .map_err(|_| ProbeError::TimedOut(command.clone()))?
    .map_err(|err| ProbeError::Spawn {
        source: err,
        command: command.clone(),
    })?;

    debug!("{command:?} exited with {}", output.status);
    Ok(output)
}

/// Run external command and capture its standard output.
///
/// # Errors
///
/// - Return [`ProbeError::Status`] if command exits unsuccessfully.
/// - Return any error [`execute`] can produce.
pub async fn capture(program: &str, args: &[&str]) -> Result<String> {
    let output = execute(program, args).await?;
    if !output.status.success() {
        return Err(ProbeError::Status {
            command: render_command(program, args),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn capture_or_empty(program: &str, args: &[&str]) -> Option<String> {
    match capture(program, args).await {
        Ok(stdout) => Some(stdout),
        Err(err) => {
            warn!("{err}");
            None
        }
    }
}

fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Command could not be started.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Command exited unsuccessfully.
    #[error("{command:?} exited with code {code:?}: {stderr}")]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Command did not finish in time.
    #[error("{0:?} timed out")]
    TimedOut(String),
}

/// Friendly result alias :3
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

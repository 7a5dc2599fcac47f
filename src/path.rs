// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations of the files dotsync reads and writes, and
//! expand home-relative paths found in service descriptors. Nothing in here
//! checks whether a path actually exists.

use std::{borrow::Cow, path::{Path, PathBuf}};

/// Determine absolute path to user's home directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the nix-darwin flake.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_flake_path() -> Result<PathBuf> {
    Ok(home_dir()?.join("dev/dotfiles/dot-config/nix-darwin/flake.nix"))
}

/// Determine default directory holding one TOML descriptor per service.
///
/// Uses `~/.config/service-manager` on every platform, since that is where
/// the dotfiles repository deploys descriptors to.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_service_config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".config/service-manager"))
}

/// Determine default directory launchd reads per-user agents from.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_launch_agents_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join("Library/LaunchAgents"))
}

/// Determine default path of dotsync's own settings file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/dotsync/settings.toml`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("dotsync").join("settings.toml"))
        .ok_or(NoWayHome)
}

/// Expand home-relative value against an explicit home directory.
///
/// Handles a leading `~` and the `$HOME` placeholder (also in its `${HOME}`
/// form). Any other variable reference is left untouched, so values
/// meant for a shell survive intact.
pub fn expand_home<'a>(value: &'a str, home: &Path) -> Cow<'a, str> {
    let home = home.to_string_lossy();
    shellexpand::full_with_context_no_errors(
        value,
        || Some(home.as_ref()),
        |var| (var == "HOME").then_some(home.as_ref()),
    )
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent edits to flake package declarations.
//!
//! Edits are plain text transformations scoped to a single section. Text
//! outside of the target section is never touched, and applying the same
//! edit twice yields the same content as applying it once.
//!
//! Adding an entry rewrites the whole section body from the sorted entry
//! list, one entry per line. Removing an entry only deletes that entry, so
//! layout and comments elsewhere in the section survive a removal.

use crate::{
    flake::{
        extract_brews, extract_casks, extract_mas_apps, extract_nix_packages, sort_mas_apps,
        sort_packages, DeclaredPackages, MasApp, PackageKind, Section,
    },
    reconcile::comparison_key,
};

use regex::Regex;
use std::{
    fs::{read_to_string, write},
    ops::Range,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::{debug, info, instrument};

static PLAIN_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

/// Escape user value so it only ever matches itself inside a pattern.
pub fn literal(value: &str) -> String {
    regex::escape(value)
}

/// Add package to flake content.
///
/// Returns content unchanged if the package is already declared. A Homebrew
/// formula counts as declared when one with the same comparison key is
/// present, tap-qualified or not. For [`PackageKind::MasApp`] an entry counts
/// as declared when either its name or its id is already present.
///
/// # Errors
///
/// - Return [`Error::InvalidName`] if name is empty or cannot be embedded in
///   a Nix string literal.
/// - Return [`Error::MissingAppId`] if adding a Mac App Store app without id.
/// - Return [`Error::SectionNotFound`] if section of target kind is missing.
pub fn add(content: &str, kind: PackageKind, name: &str, id: Option<u64>) -> Result<String> {
    validate_name(name)?;
    let section = Section::locate(content, kind).ok_or(Error::SectionNotFound(kind))?;

    let entries: Vec<String> = match kind {
        PackageKind::Brew => {
            let mut brews = extract_brews(content);
            if brews
                .iter()
                .any(|brew| comparison_key(brew) == comparison_key(name))
            {
                return Ok(content.to_string());
            }
            brews.push(name.to_string());
            sort_packages(&mut brews);
            brews.iter().map(|brew| format!("\"{brew}\"")).collect()
        }
        PackageKind::Cask => {
            let mut casks = extract_casks(content);
            if casks.iter().any(|cask| cask == name) {
                return Ok(content.to_string());
            }
            casks.push(name.to_string());
            casks.sort();
            casks.iter().map(|cask| format!("\"{cask}\"")).collect()
        }
        PackageKind::MasApp => {
            let id = id.ok_or_else(|| Error::MissingAppId(name.to_string()))?;
            let mut apps = extract_mas_apps(content);
            if apps.iter().any(|app| app.name == name || app.id == id) {
                return Ok(content.to_string());
            }
            apps.push(MasApp::new(name, id));
            sort_mas_apps(&mut apps);
            apps.iter()
                .map(|app| format!("\"{}\" = {};", app.name, app.id))
                .collect()
        }
        PackageKind::Nix => {
            let mut packages = extract_nix_packages(content);
            if packages.iter().any(|package| package == name) {
                return Ok(content.to_string());
            }
            packages.push(name.to_string());
            packages.sort();
            packages.iter().map(|package| nix_entry(package)).collect()
        }
    };

    Ok(rewrite_section(content, &section, &entries))
}

/// Remove package from flake content.
///
/// Every matching entry inside the section is deleted. An entry alone on its
/// line takes the line with it. A Homebrew formula declared through a tap as
/// `owner/repo/name` also matches plain `name`. Returns content unchanged if
/// nothing matched.
///
/// # Errors
///
/// - Return [`Error::SectionNotFound`] if section of target kind is missing.
pub fn remove(content: &str, kind: PackageKind, name: &str) -> Result<String> {
    let section = Section::locate(content, kind).ok_or(Error::SectionNotFound(kind))?;
    let body = &content[section.body.clone()];

    let matches = entry_matches(body, kind, name);
    if matches.is_empty() {
        return Ok(content.to_string());
    }

    let mut new_body = body.to_string();
    for range in matches.into_iter().rev() {
        remove_entry(&mut new_body, range);
    }

    let mut result = String::with_capacity(content.len());
    result.push_str(&content[..section.body.start]);
    result.push_str(&new_body);
    result.push_str(&content[section.body.end..]);
    Ok(result)
}

/// Flake file on disk.
///
/// Edits are whole-file read, transform, then write. The write is skipped
/// when an edit changes nothing.
///
/// Not crash-safe. A crash in the middle of a write can leave a truncated
/// flake behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeFile {
    path: PathBuf,
}

impl FlakeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Read full content of flake.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if flake cannot be read.
    pub fn read(&self) -> Result<String> {
        read_to_string(&self.path).map_err(|err| Error::Read {
            source: err,
            path: self.path.clone(),
        })
    }

    /// Extract declared packages from flake.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] if flake cannot be read.
    pub fn declared(&self) -> Result<DeclaredPackages> {
        self.read().map(|content| DeclaredPackages::from_flake(&content))
    }

    /// Add package to flake, returning whether the file changed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] or [`Error::Write`] on I/O failure.
    /// - Return any error [`add`] can produce.
    #[instrument(skip(self), level = "debug")]
    pub fn add(&self, kind: PackageKind, name: &str, id: Option<u64>) -> Result<bool> {
        self.apply(|content| add(content, kind, name, id))
            .inspect(|changed| {
                if *changed {
                    info!("added {name:?} to {kind}");
                }
            })
    }

    /// Remove package from flake, returning whether the file changed.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Read`] or [`Error::Write`] on I/O failure.
    /// - Return any error [`remove`] can produce.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&self, kind: PackageKind, name: &str) -> Result<bool> {
        self.apply(|content| remove(content, kind, name))
            .inspect(|changed| {
                if *changed {
                    info!("removed {name:?} from {kind}");
                }
            })
    }

    fn apply(&self, edit: impl FnOnce(&str) -> Result<String>) -> Result<bool> {
        let content = self.read()?;
        let edited = edit(&content)?;
        if edited == content {
            debug!("{:?} unchanged, skip write", self.path.display());
            return Ok(false);
        }

        write(&self.path, edited).map_err(|err| Error::Write {
            source: err,
            path: self.path.clone(),
        })?;

        Ok(true)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(['"', '\\', '\n', '\r']) {
        return Err(Error::InvalidName(name.to_string()));
    }

    Ok(())
}

fn nix_entry(name: &str) -> String {
    if PLAIN_IDENT.is_match(name) {
        format!("pkgs.{name}")
    } else {
        format!("pkgs.\"{name}\"")
    }
}

fn rewrite_section(content: &str, section: &Section, entries: &[String]) -> String {
    let body = &content[section.body.clone()];
    let indent = section.indentation(content);
    let entry_indent = body
        .split('\n')
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .map(|line| {
            let width = line.len() - line.trim_start_matches([' ', '\t']).len();
            line[..width].to_string()
        })
        .unwrap_or_else(|| format!("{indent}  "));

    let mut new_body = String::from("\n");
    for entry in entries {
        new_body.push_str(&entry_indent);
        new_body.push_str(entry);
        new_body.push('\n');
    }
    new_body.push_str(indent);

    let mut result = String::with_capacity(content.len() + new_body.len());
    result.push_str(&content[..section.body.start]);
    result.push_str(&new_body);
    result.push_str(&content[section.body.end..]);
    result
}

fn entry_matches(body: &str, kind: PackageKind, name: &str) -> Vec<Range<usize>> {
    let name = literal(name);
    let pattern = match kind {
        PackageKind::Brew => format!(r#""(?:[^"\s]+/)?{name}""#),
        PackageKind::Cask => format!(r#""{name}""#),
        PackageKind::MasApp => format!(r#""{name}"\s*=\s*\d+\s*;"#),
        PackageKind::Nix => format!(r#"pkgs\.(?:"{name}"|{name})"#),
    };

    // INVARIANT: Pattern is built from escaped input, so it always compiles.
    let Ok(regex) = Regex::new(&pattern) else {
        return Vec::new();
    };

    regex
        .find_iter(body)
        .filter(|found| {
            // INVARIANT: Nix reference must stand on its own, so that removing
            //   `fd` leaves `fd-find` and `mypkgs.fd` alone.
            kind != PackageKind::Nix
                || !(body[..found.start()].ends_with(is_attribute_char)
                    || body[found.end()..].starts_with(is_attribute_char))
        })
        .map(|found| found.range())
        .collect()
}

fn is_attribute_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

fn remove_entry(body: &mut String, range: Range<usize>) {
    let line_start = body[..range.start].rfind('\n').map_or(0, |idx| idx + 1);
    let line_end = body[range.end..].find('\n').map(|idx| range.end + idx);

    let before = &body[line_start..range.start];
    let after = &body[range.end..line_end.unwrap_or(body.len())];
    if let Some(line_end) = line_end {
        if before.trim().is_empty() && after.trim().is_empty() {
            body.replace_range(line_start..line_end + 1, "");
            return;
        }
    }

    // INVARIANT: Entry shares its line, so only the token and the spacing
    //   after it go. Fall back to spacing before it at the end of a line.
    let trailing = after.len() - after.trim_start_matches([' ', '\t']).len();
    if trailing > 0 {
        body.replace_range(range.start..range.end + trailing, "");
    } else {
        let leading = before.len() - before.trim_end_matches([' ', '\t']).len();
        body.replace_range(range.start - leading..range.end, "");
    }
}

/// Flake mutation error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Section of target kind cannot be located.
    #[error("cannot find {0} section in flake")]
    SectionNotFound(PackageKind),

    /// Mac App Store app added without an id.
    #[error("Mac App Store app {0:?} needs an app id")]
    MissingAppId(String),

    /// Package name cannot be embedded in a Nix string literal.
    #[error("invalid package name {0:?}")]
    InvalidName(String),

    /// Flake cannot be read.
    #[error("failed to read flake at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Flake cannot be written.
    #[error("failed to write flake at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

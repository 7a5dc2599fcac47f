// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declared package extraction from a nix-darwin flake.
//!
//! A nix-darwin flake declares what should be installed on a machine through
//! a handful of list and mapping literals:
//!
//! ```nix
//! homebrew.brews = [
//!   "git"
//!   "oven-sh/bun/bun"
//! ];
//! homebrew.casks = [ "ghostty" ];
//! homebrew.masApps = {
//!   "Things 3" = 904280696;
//! };
//! environment.systemPackages = [
//!   pkgs.ripgrep
//!   pkgs."nerd-fonts"
//! ];
//! ```
//!
//! Each literal is a __section__, found by its keyword and bracket pair. The
//! rest of the flake is opaque to us and must never be touched. A section that
//! cannot be found simply means nothing of that kind is declared.

pub mod edit;

use crate::reconcile::{comparison_key, Record};

use regex::Regex;
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    ops::Range,
    sync::LazyLock,
};

/// Kind of package a flake can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// Homebrew formula, possibly tap-qualified.
    Brew,

    /// Homebrew cask.
    Cask,

    /// Mac App Store app, identified by numeric id.
    MasApp,

    /// Package from nixpkgs.
    Nix,
}

impl PackageKind {
    pub const ALL: [PackageKind; 4] = [Self::Brew, Self::Cask, Self::MasApp, Self::Nix];

    /// Keyword the section literal is assigned to.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Brew => "homebrew.brews",
            Self::Cask => "homebrew.casks",
            Self::MasApp => "homebrew.masApps",
            Self::Nix => "environment.systemPackages",
        }
    }

    /// Human readable title.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Brew => "Homebrew Formulae",
            Self::Cask => "Homebrew Casks",
            Self::MasApp => "Mac App Store",
            Self::Nix => "Nix Packages",
        }
    }

    fn section_regex(&self) -> &'static Regex {
        static BREWS: LazyLock<Regex> = LazyLock::new(|| section_regex("homebrew.brews", '[', ']'));
        static CASKS: LazyLock<Regex> = LazyLock::new(|| section_regex("homebrew.casks", '[', ']'));
        static MAS_APPS: LazyLock<Regex> =
            LazyLock::new(|| section_regex("homebrew.masApps", '{', '}'));
        static NIX: LazyLock<Regex> =
            LazyLock::new(|| section_regex("environment.systemPackages", '[', ']'));

        match self {
            Self::Brew => &BREWS,
            Self::Cask => &CASKS,
            Self::MasApp => &MAS_APPS,
            Self::Nix => &NIX,
        }
    }
}

impl Display for PackageKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.keyword())
    }
}

// INVARIANT: Group 1 is everything up to and including the opening bracket,
//   group 2 is the body, group 3 is the closing bracket and semicolon. The
//   keyword must not continue some longer attribute path.
fn section_regex(keyword: &str, open: char, close: char) -> Regex {
    let pattern = format!(
        r"(?m)(?:^|[^\w.-])({}\s*=\s*{})([\s\S]*?)({};)",
        regex::escape(keyword),
        regex::escape(&open.to_string()),
        regex::escape(&close.to_string()),
    );
    Regex::new(&pattern).expect("section pattern is valid")
}

static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static MAS_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"\s*=\s*(\d+)\s*;"#).unwrap());
static NIX_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|[^\w.-])pkgs\.(?:"([^"]+)"|([A-Za-z0-9_-]+))"#).unwrap());

/// Location of one section inside flake content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Whole section, from keyword through closing `;`.
    pub span: Range<usize>,

    /// Keyword, assignment, and opening bracket.
    pub head: Range<usize>,

    /// Everything between the brackets.
    pub body: Range<usize>,
}

impl Section {
    /// Locate section of target kind.
    ///
    /// Only the first matching section counts. Sections on commented out
    /// lines are skipped.
    pub fn locate(content: &str, kind: PackageKind) -> Option<Self> {
        kind.section_regex()
            .captures_iter(content)
            .filter_map(|captures| {
                let head = captures.get(1)?.range();
                let body = captures.get(2)?.range();
                let close = captures.get(3)?.range();
                Some(Self {
                    span: head.start..close.end,
                    head,
                    body,
                })
            })
            .find(|section| !is_commented(content, section.head.start))
    }

    /// Indentation of the line the keyword sits on.
    pub fn indentation<'a>(&self, content: &'a str) -> &'a str {
        let line_start = content[..self.head.start].rfind('\n').map_or(0, |idx| idx + 1);
        let line = &content[line_start..self.head.start];
        let width = line.len() - line.trim_start_matches([' ', '\t']).len();
        &line[..width]
    }
}

fn is_commented(content: &str, at: usize) -> bool {
    let line_start = content[..at].rfind('\n').map_or(0, |idx| idx + 1);
    content[line_start..at].contains('#')
}

/// Mac App Store app entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasApp {
    pub name: String,
    pub id: u64,
}

impl MasApp {
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Everything a flake declares, one sorted and deduplicated list per kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeclaredPackages {
    pub brews: Vec<String>,
    pub casks: Vec<String>,
    pub mas_apps: Vec<MasApp>,
    pub nix: Vec<String>,
}

impl DeclaredPackages {
    /// Extract every declared list from flake content.
    pub fn from_flake(content: &str) -> Self {
        Self {
            brews: extract_brews(content),
            casks: extract_casks(content),
            mas_apps: extract_mas_apps(content),
            nix: extract_nix_packages(content),
        }
    }

    /// Declared records of target kind, ready for reconciliation.
    pub fn records(&self, kind: PackageKind) -> Vec<Record> {
        match kind {
            PackageKind::Brew => self.brews.iter().map(Record::package).collect(),
            PackageKind::Cask => self.casks.iter().map(Record::named).collect(),
            PackageKind::MasApp => self
                .mas_apps
                .iter()
                .map(|app| Record::identified(&app.name, app.id))
                .collect(),
            PackageKind::Nix => self.nix.iter().map(Record::named).collect(),
        }
    }
}

/// Extract declared Homebrew formulae.
///
/// Sorted by comparison key, so a tap-qualified formula lands where Homebrew
/// would list it.
pub fn extract_brews(content: &str) -> Vec<String> {
    let mut brews = extract_quoted(content, PackageKind::Brew);
    sort_packages(&mut brews);
    brews
}

/// Extract declared Homebrew casks.
pub fn extract_casks(content: &str) -> Vec<String> {
    let mut casks = extract_quoted(content, PackageKind::Cask);
    casks.sort();
    casks
}

/// Extract declared Mac App Store apps.
pub fn extract_mas_apps(content: &str) -> Vec<MasApp> {
    let Some(body) = section_body(content, PackageKind::MasApp) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut apps = MAS_ENTRY
        .captures_iter(body)
        .filter_map(|captures| {
            // INVARIANT: Skip ids too large to ever be a real store id.
            let id = captures[2].parse::<u64>().ok()?;
            Some(MasApp::new(&captures[1], id))
        })
        .filter(|app| seen.insert(app.clone()))
        .collect::<Vec<_>>();
    sort_mas_apps(&mut apps);
    apps
}

/// Extract declared nixpkgs, quoted or not.
pub fn extract_nix_packages(content: &str) -> Vec<String> {
    let Some(body) = section_body(content, PackageKind::Nix) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut packages = NIX_ENTRY
        .captures_iter(body)
        .filter_map(|captures| captures.get(1).or(captures.get(2)))
        .map(|name| name.as_str().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect::<Vec<_>>();
    packages.sort();
    packages
}

/// Sort package names by comparison key, then by full name.
pub fn sort_packages(packages: &mut [String]) {
    packages.sort_by(|a, b| {
        comparison_key(a)
            .cmp(comparison_key(b))
            .then_with(|| a.cmp(b))
    });
}

/// Sort Mac App Store apps by name, then by id.
pub fn sort_mas_apps(apps: &mut [MasApp]) {
    apps.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

fn section_body(content: &str, kind: PackageKind) -> Option<&str> {
    Section::locate(content, kind).map(|section| &content[section.body])
}

fn extract_quoted(content: &str, kind: PackageKind) -> Vec<String> {
    let Some(body) = section_body(content, kind) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    QUOTED
        .captures_iter(body)
        .map(|captures| captures[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

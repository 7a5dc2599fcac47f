// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Three-way reconciliation of declared and installed sets.
//!
//! Whatever the entity is (a Homebrew formula, a cask, a Mac App Store app, or
//! a launchd service) the question asked is the same: which entities does the
//! configuration declare, which ones does the system report as installed, and
//! how do the two sets line up? The answer is a single list where every entity
//! from either side shows up exactly once with one of three statuses:
//!
//! - __Synced__: declared and installed.
//! - __Extra__: installed, but not declared.
//! - __Missing__: declared, but not installed.
//!
//! # Identity
//!
//! Entities are matched by their __comparison key__. For most kinds this is the
//! display name, which for tap-qualified packages like `owner/repo/name` is
//! the last path segment, since that is how Homebrew reports installed
//! formulae. Mac App Store apps are matched by their numeric id instead, two
//! apps may share a display name but never an id.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Reconciliation status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Synced,
    Extra,
    Missing,
}

impl Status {
    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Extra => "extra",
            Self::Missing => "missing",
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.label())
    }
}

/// One declared or installed entity fed into [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Display name, doubles as comparison key when there is no external id.
    pub name: String,

    /// Canonical identifier, e.g., a tap-qualified package name.
    pub full_name: String,

    /// External numeric identity, e.g., a Mac App Store id.
    pub external_id: Option<u64>,
}

impl Record {
    /// Construct record keyed by name alone.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            external_id: None,
        }
    }

    /// Construct record for a possibly tap-qualified package.
    ///
    /// The comparison key is the last path segment of `full_name`.
    pub fn package(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        Self {
            name: comparison_key(&full_name).to_string(),
            full_name,
            external_id: None,
        }
    }

    /// Construct record identified by an external id.
    pub fn identified(name: impl Into<String>, id: u64) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            external_id: Some(id),
        }
    }

    /// Identity used to match declared against installed records.
    pub fn identity(&self) -> Identity {
        match self.external_id {
            Some(id) => Identity::External(id),
            None => Identity::Key(self.name.clone()),
        }
    }
}

/// Identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Matched by comparison key.
    Key(String),

    /// Matched by external numeric id.
    External(u64),
}

/// Reconciled entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub full_name: String,
    pub external_id: Option<u64>,
    pub status: Status,
}

impl Item {
    fn from_record(record: &Record, status: Status) -> Self {
        Self {
            name: record.name.clone(),
            full_name: record.full_name.clone(),
            external_id: record.external_id,
            status,
        }
    }

    pub fn identity(&self) -> Identity {
        match self.external_id {
            Some(id) => Identity::External(id),
            None => Identity::Key(self.name.clone()),
        }
    }
}

/// Ordering applied to reconciled output.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    /// Ordinal by name.
    #[default]
    Name,

    /// Synced, then extra, then missing; ties by name.
    StatusAscending,

    /// Missing, then extra, then synced; ties by name.
    StatusDescending,
}

impl SortMode {
    /// Cycle to next sort mode: name, status ascending, status descending.
    pub fn next(self) -> Self {
        match self {
            Self::Name => Self::StatusAscending,
            Self::StatusAscending => Self::StatusDescending,
            Self::StatusDescending => Self::Name,
        }
    }

    /// Group rank of status under this sort mode.
    pub fn rank(self, status: Status) -> u8 {
        match (self, status) {
            (Self::Name, _) => 0,
            (Self::StatusAscending, Status::Synced) => 0,
            (Self::StatusAscending, Status::Extra) => 1,
            (Self::StatusAscending, Status::Missing) => 2,
            (Self::StatusDescending, Status::Missing) => 0,
            (Self::StatusDescending, Status::Extra) => 1,
            (Self::StatusDescending, Status::Synced) => 2,
        }
    }

    /// Compare two items under this sort mode.
    pub fn compare(self, a: &Item, b: &Item) -> Ordering {
        self.rank(a.status)
            .cmp(&self.rank(b.status))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.external_id.cmp(&b.external_id))
    }

    /// Sort items in place.
    pub fn sort(self, items: &mut [Item]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

impl Display for SortMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Name => "name",
            Self::StatusAscending => "status-ascending",
            Self::StatusDescending => "status-descending",
        })
    }
}

impl FromStr for SortMode {
    type Err = UnknownSortMode;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "name" => Ok(Self::Name),
            "status-asc" | "status-ascending" => Ok(Self::StatusAscending),
            "status-desc" | "status-descending" => Ok(Self::StatusDescending),
            other => Err(UnknownSortMode(other.to_string())),
        }
    }
}

/// Sort mode string is not recognized.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown sort mode {0:?}, expected name, status-asc, or status-desc")]
pub struct UnknownSortMode(pub String);

/// Determine comparison key of a possibly tap-qualified name.
///
/// That is the last `/` separated segment, or the whole name if there are no
/// separators.
pub fn comparison_key(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}

/// Merge declared and installed records into one status-annotated list.
///
/// Installed derived items come first, followed by missing-only items, then
/// the whole list is ordered by `mode`. Duplicate identities on either side
/// collapse onto their first occurrence.
///
/// # Invariants
///
/// - The set of output identities equals the union of input identities.
/// - No identity appears more than once.
/// - Synced items keep the declared `full_name`, so that a tap-qualified
///   package can be found again when mutating the declaration.
pub fn reconcile(declared: &[Record], installed: &[Record], mode: SortMode) -> Vec<Item> {
    let declared_by_identity = first_by_identity(declared);
    let installed_identities = installed.iter().map(Record::identity).collect::<HashSet<_>>();

    let mut items = Vec::with_capacity(declared.len() + installed.len());
    let mut seen = HashSet::new();

    for record in installed {
        let identity = record.identity();
        if !seen.insert(identity.clone()) {
            continue;
        }

        let item = match declared_by_identity.get(&identity) {
            Some(declared) => Item {
                name: record.name.clone(),
                full_name: declared.full_name.clone(),
                external_id: record.external_id,
                status: Status::Synced,
            },
            None => Item::from_record(record, Status::Extra),
        };
        items.push(item);
    }

    for record in declared {
        let identity = record.identity();
        if installed_identities.contains(&identity) || !seen.insert(identity) {
            continue;
        }

        items.push(Item::from_record(record, Status::Missing));
    }

    mode.sort(&mut items);
    items
}

fn first_by_identity(records: &[Record]) -> HashMap<Identity, &Record> {
    let mut map = HashMap::with_capacity(records.len());
    for record in records {
        map.entry(record.identity()).or_insert(record);
    }
    map
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declarative dotfile state for macOS.
//!
//! Two halves share one reconciliation engine. Packages are declared in a
//! nix-darwin flake and compared against what Homebrew, the Mac App Store,
//! and Nix actually installed. Services are declared as TOML descriptors and
//! kept in line with the LaunchAgents installed for the user.
//!
//! Both halves classify every entry the same way, see [`reconcile::Status`]:
//! __synced__ when declared and installed, __extra__ when installed but not
//! declared, and __missing__ when declared but not installed.

pub mod config;
pub mod flake;
pub mod inventory;
pub mod path;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod service;
pub mod watch;

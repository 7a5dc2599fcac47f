// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Terminal reports.
//!
//! Render reconciled packages, services, and sync outcomes as text. Colors
//! follow the Catppuccin Mocha palette, and can be switched off when output
//! is not a terminal.

use crate::{
    flake::PackageKind,
    inventory::{Inventory, Summary},
    probe::PackageInfo,
    reconcile::{Item, Status},
    service::{
        launchd::{RuntimeStatus, ServiceState},
        sync::{SyncAction, SyncResult},
        ServiceConfig,
    },
};

use std::fmt::Write;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[38;2;166;227;161m";
const YELLOW: &str = "\x1b[38;2;249;226;175m";
const RED: &str = "\x1b[38;2;243;139;168m";
const BLUE: &str = "\x1b[38;2;137;180;250m";
const MAUVE: &str = "\x1b[38;2;203;166;247m";
const SUBTEXT: &str = "\x1b[38;2;166;173;200m";

const RULE_WIDTH: usize = 50;
const NAME_WIDTH: usize = 30;

/// Kinds shown by package reports, in display order.
const REPORTED_KINDS: [PackageKind; 4] = [
    PackageKind::Brew,
    PackageKind::Cask,
    PackageKind::MasApp,
    PackageKind::Nix,
];

/// Text renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    color: bool,
}

impl Report {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Renderer with colors only if standard output is a terminal.
    pub fn for_stdout() -> Self {
        use std::io::IsTerminal;
        Self::new(std::io::stdout().is_terminal())
    }

    fn paint(&self, style: &str, text: &str) -> String {
        if self.color {
            format!("{style}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, out: &mut String, style: &str, title: &str) {
        let style = format!("{style}{BOLD}");
        let _ = writeln!(out, "\n{}", self.paint(&style, title));
        let _ = writeln!(out, "{}", self.paint(SUBTEXT, &"─".repeat(RULE_WIDTH)));
    }

    fn status_line(&self, out: &mut String, status: Status, name: &str) {
        let (style, icon) = status_style(status);
        let line = if self.color {
            format!(
                "{style}  {icon} {name:<NAME_WIDTH$} {DIM}{}{RESET}",
                status.label()
            )
        } else {
            format!("  {icon} {name:<NAME_WIDTH$} {}", status.label())
        };
        let _ = writeln!(out, "{}", line.trim_end());
    }

    /// Every reconciled package, grouped by kind, followed by a summary.
    pub fn package_list(&self, inventory: &Inventory) -> String {
        let mut out = self.paint(&format!("{MAUVE}{BOLD}"), "Nix Package Manager");
        out.push('\n');

        for kind in REPORTED_KINDS {
            self.package_section(&mut out, kind, inventory.items(kind), false);
        }
        self.summary(&mut out, &inventory.summary());
        out
    }

    /// Only packages that are not synced, or a success line if there are
    /// none.
    pub fn package_diff(&self, inventory: &Inventory) -> String {
        let mut out = self.paint(&format!("{MAUVE}{BOLD}"), "Nix Package Manager - Differences");
        out.push('\n');

        let summary = inventory.summary();
        if summary.is_synced() {
            let _ = writeln!(out, "\n{}", self.paint(GREEN, "  ✓ All packages are synced!"));
            return out;
        }

        for kind in REPORTED_KINDS {
            self.package_section(&mut out, kind, inventory.items(kind), true);
        }
        self.summary(&mut out, &summary);
        out
    }

    fn package_section(&self, out: &mut String, kind: PackageKind, items: &[Item], diff_only: bool) {
        let shown = items
            .iter()
            .filter(|item| !diff_only || item.status != Status::Synced)
            .collect::<Vec<_>>();
        if shown.is_empty() && diff_only {
            return;
        }

        self.heading(out, MAUVE, kind.title());
        if shown.is_empty() {
            let _ = writeln!(out, "{}", self.paint(SUBTEXT, "  No packages"));
            return;
        }

        for item in shown {
            let name = match item.external_id {
                Some(id) => format!("{} ({id})", item.name),
                None => item.name.clone(),
            };
            self.status_line(out, item.status, &name);
        }
    }

    fn summary(&self, out: &mut String, summary: &Summary) {
        self.heading(out, BLUE, "Summary");

        if summary.is_synced() {
            let _ = writeln!(out, "{}", self.paint(GREEN, "  ✓ All packages synced!"));
        } else {
            if summary.extra > 0 {
                let line = format!(
                    "  + {} extra package(s) (installed but not in flake)",
                    summary.extra
                );
                let _ = writeln!(out, "{}", self.paint(YELLOW, &line));
            }
            if summary.missing > 0 {
                let line = format!(
                    "  ! {} missing package(s) (in flake but not installed)",
                    summary.missing
                );
                let _ = writeln!(out, "{}", self.paint(RED, &line));
            }
        }

        let counts = format!(
            "  Brews: {} | Casks: {} | App Store: {} | Nix: {}",
            summary.brews, summary.casks, summary.mas_apps, summary.nix
        );
        let _ = writeln!(out, "\n{}", self.paint(SUBTEXT, &counts));
    }

    /// Details of one package.
    pub fn package_info(&self, info: &PackageInfo) -> String {
        let mut out = String::new();
        self.heading(&mut out, MAUVE, &info.name);

        let rows = [
            ("Version", info.version.as_deref()),
            ("Description", info.description.as_deref()),
            ("Homepage", info.homepage.as_deref()),
        ];
        for (key, value) in rows {
            let key = format!("  {key:<12}");
            let _ = writeln!(
                out,
                "{}{}",
                self.paint(SUBTEXT, &key),
                value.unwrap_or("-")
            );
        }
        out
    }

    /// Declared services with their enabled flag and runtime status.
    pub fn service_list(&self, services: &[(ServiceConfig, RuntimeStatus)]) -> String {
        let mut out = self.paint(&format!("{MAUVE}{BOLD}"), "Service Manager");
        out.push('\n');
        self.heading(&mut out, MAUVE, "Services");

        if services.is_empty() {
            let _ = writeln!(out, "{}", self.paint(SUBTEXT, "  No services"));
            return out;
        }

        for (config, status) in services {
            match &config.parsed {
                Ok(descriptor) => {
                    let (style, icon) = match status.state {
                        ServiceState::Running => (GREEN, "●"),
                        ServiceState::Stopped => (YELLOW, "○"),
                        ServiceState::NotInstalled => (SUBTEXT, "-"),
                    };
                    let mut state = status.state.to_string();
                    if let Some(pid) = status.pid {
                        let _ = write!(state, " (pid {pid})");
                    } else if let Some(code) = status.exit_code.filter(|code| *code != 0) {
                        let _ = write!(state, " (exit {code})");
                    }
                    let enabled = if descriptor.enabled { "enabled" } else { "disabled" };
                    let line = format!(
                        "  {icon} {:<NAME_WIDTH$} {enabled:<9} {state}",
                        descriptor.label
                    );
                    let _ = writeln!(out, "{}", self.paint(style, &line));
                }
                Err(err) => {
                    let _ = writeln!(out, "{}", self.paint(RED, &format!("  ✗ {err}")));
                }
            }
        }
        out
    }

    /// Services whose enabled flag disagrees with what is installed.
    pub fn service_diff(&self, items: &[Item]) -> String {
        let mut out = self.paint(&format!("{MAUVE}{BOLD}"), "Service Manager - Differences");
        out.push('\n');

        let drifted = items
            .iter()
            .filter(|item| item.status != Status::Synced)
            .collect::<Vec<_>>();
        if drifted.is_empty() {
            let _ = writeln!(out, "\n{}", self.paint(GREEN, "  ✓ All services are synced!"));
            return out;
        }

        self.heading(&mut out, MAUVE, "Services");
        for item in drifted {
            self.status_line(&mut out, item.status, &item.name);
        }
        out
    }

    /// Outcome of a batch sync.
    pub fn sync_results(&self, results: &[SyncResult]) -> String {
        let mut out = String::new();
        self.heading(&mut out, BLUE, "Sync");

        if results.is_empty() {
            let _ = writeln!(out, "{}", self.paint(SUBTEXT, "  No services"));
            return out;
        }

        for result in results {
            let (style, icon) = match result.action {
                SyncAction::Installed | SyncAction::Reinstalled => (GREEN, "✓"),
                SyncAction::Uninstalled => (YELLOW, "-"),
                SyncAction::Unchanged => (SUBTEXT, "·"),
                SyncAction::Error => (RED, "✗"),
            };
            let mut line = format!("  {icon} {:<NAME_WIDTH$} {}", result.label, result.action);
            if let Some(error) = &result.error {
                let _ = write!(line, ": {error}");
            }
            let _ = writeln!(out, "{}", self.paint(style, &line));
        }

        let failed = results.iter().filter(|result| result.is_error()).count();
        let tally = format!("  {} synced, {failed} failed", results.len() - failed);
        let _ = writeln!(out, "\n{}", self.paint(SUBTEXT, &tally));
        out
    }

    /// Last lines of a service log.
    pub fn log_tail(&self, label: &str, lines: &[String]) -> String {
        let mut out = String::new();
        self.heading(&mut out, MAUVE, &format!("Logs: {label}"));
        if lines.is_empty() {
            let _ = writeln!(out, "{}", self.paint(SUBTEXT, "  No log output"));
        }
        for line in lines {
            let _ = writeln!(out, "{line}");
        }
        out
    }
}

fn status_style(status: Status) -> (&'static str, &'static str) {
    match status {
        Status::Synced => (GREEN, "✓"),
        Status::Extra => (YELLOW, "+"),
        Status::Missing => (RED, "!"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flake::DeclaredPackages,
        inventory::Installed,
        reconcile::SortMode,
        service::ParseError,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn inventory(flake: &str, installed: Installed) -> Inventory {
        Inventory::reconcile(&DeclaredPackages::from_flake(flake), &installed, SortMode::Name)
    }

    #[test]
    fn plain_package_list() {
        let inventory = inventory(
            r#"homebrew.brews = [ "git" "wget" ]; environment.systemPackages = [ pkgs.fd ];"#,
            Installed {
                formulae: vec!["git".into(), "htop".into()],
                ..Default::default()
            },
        );

        let result = Report::new(false).package_list(&inventory);
        let expect = indoc! {"
            Nix Package Manager

            Homebrew Formulae
            ──────────────────────────────────────────────────
              ✓ git                            synced
              + htop                           extra
              ! wget                           missing

            Homebrew Casks
            ──────────────────────────────────────────────────
              No packages

            Mac App Store
            ──────────────────────────────────────────────────
              No packages

            Nix Packages
            ──────────────────────────────────────────────────
              ✓ fd                             synced

            Summary
            ──────────────────────────────────────────────────
              + 1 extra package(s) (installed but not in flake)
              ! 1 missing package(s) (in flake but not installed)

              Brews: 3 | Casks: 0 | App Store: 0 | Nix: 1
        "};
        assert_eq!(result, expect);
    }

    #[test]
    fn summary_counts_app_store_apps() {
        let inventory = inventory(
            r#"homebrew.masApps = { "Things 3" = 904280696; };"#,
            Installed {
                mas_apps: vec![(904280696, "Things".into())],
                ..Default::default()
            },
        );

        let result = Report::new(false).package_list(&inventory);
        assert!(result.contains("Brews: 0 | Casks: 0 | App Store: 1 | Nix: 0"));
    }

    #[test]
    fn plain_package_diff_when_synced() {
        let inventory = inventory(
            r#"homebrew.casks = [ "zed" ];"#,
            Installed {
                casks: vec!["zed".into()],
                ..Default::default()
            },
        );

        let result = Report::new(false).package_diff(&inventory);
        assert_eq!(
            result,
            "Nix Package Manager - Differences\n\n  ✓ All packages are synced!\n"
        );
    }

    #[test]
    fn plain_package_diff_lists_only_drift() {
        let inventory = inventory(
            r#"homebrew.casks = [ "zed" "ghostty" ];"#,
            Installed {
                casks: vec!["zed".into()],
                ..Default::default()
            },
        );

        let result = Report::new(false).package_diff(&inventory);
        assert!(result.contains("  ! ghostty"));
        assert!(!result.contains("zed"));
        assert!(!result.contains("Homebrew Formulae"));
    }

    #[test]
    fn colored_status_line() {
        let mut out = String::new();
        Report::new(true).status_line(&mut out, Status::Extra, "htop");
        assert_eq!(
            out,
            format!("{YELLOW}  + {:<30} {DIM}extra{RESET}\n", "htop")
        );
    }

    #[test]
    fn plain_sync_results() {
        let results = vec![
            SyncResult::new("com.example.a", SyncAction::Installed),
            SyncResult::error("bad.toml", "bad.toml: missing [service] section"),
        ];

        let result = Report::new(false).sync_results(&results);
        assert!(result.contains("  ✓ com.example.a"));
        assert!(result.contains("error: bad.toml: missing [service] section"));
        assert!(result.ends_with("  1 synced, 1 failed\n"));
    }

    #[test]
    fn plain_service_list_shows_parse_errors() {
        let services = vec![(
            ServiceConfig {
                path: "bad.toml".into(),
                parsed: Err(ParseError::new("bad.toml", "missing [service] section")),
            },
            RuntimeStatus::NOT_INSTALLED,
        )];

        let result = Report::new(false).service_list(&services);
        assert!(result.contains("  ✗ bad.toml: missing [service] section"));
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{HomeFixture, FLAKE};

use anyhow::Result;
use dotsync::{
    flake::{edit::FlakeFile, DeclaredPackages, MasApp, PackageKind},
    inventory::{Installed, Inventory},
    reconcile::{SortMode, Status},
};
use pretty_assertions::assert_eq;

#[test]
fn flake_file_edits_survive_reread() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = FlakeFile::new(fixture.write_flake(FLAKE)?);

    assert!(flake.add(PackageKind::Brew, "wget", None)?);
    assert!(flake.add(PackageKind::MasApp, "Xcode", Some(497799835))?);
    assert!(flake.add(PackageKind::Nix, "fd", None)?);
    assert!(flake.remove(PackageKind::Cask, "ghostty")?);

    let declared = flake.declared()?;
    assert_eq!(declared.brews, vec!["oven-sh/bun/bun", "git", "wget"]);
    assert!(declared.casks.is_empty());
    assert_eq!(
        declared.mas_apps,
        vec![MasApp::new("Things 3", 904280696), MasApp::new("Xcode", 497799835)]
    );
    assert_eq!(declared.nix, vec!["fd", "jq", "ripgrep"]);

    let content = fixture.read_flake()?;
    assert!(content.contains("description = \"darwin system\";"));
    assert!(content.contains("homebrew.casks = [\n"));

    Ok(())
}

#[test]
fn repeated_edits_leave_flake_untouched() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = FlakeFile::new(fixture.write_flake(FLAKE)?);

    assert!(!flake.add(PackageKind::Brew, "git", None)?);
    assert!(!flake.add(PackageKind::MasApp, "Things 3", Some(904280696))?);
    assert!(!flake.remove(PackageKind::Cask, "zed")?);
    assert_eq!(fixture.read_flake()?, FLAKE);

    Ok(())
}

#[test]
fn inventory_classifies_declared_against_installed() {
    let declared = DeclaredPackages::from_flake(FLAKE);
    let installed = Installed {
        formulae: vec!["bun".into(), "htop".into()],
        casks: vec!["ghostty".into()],
        mas_apps: vec![(904280696, "Things".into())],
    };

    let inventory = Inventory::reconcile(&declared, &installed, SortMode::Name);
    let brews = inventory
        .brews
        .iter()
        .map(|item| (item.full_name.as_str(), item.status))
        .collect::<Vec<_>>();
    assert_eq!(
        brews,
        vec![
            ("oven-sh/bun/bun", Status::Synced),
            ("git", Status::Missing),
            ("htop", Status::Extra),
        ]
    );
    assert!(inventory
        .mas_apps
        .iter()
        .all(|item| item.status == Status::Synced));
    assert!(inventory.nix.iter().all(|item| item.status == Status::Synced));

    let summary = inventory.summary();
    assert_eq!((summary.extra, summary.missing), (1, 1));
    assert!(!summary.is_synced());
}

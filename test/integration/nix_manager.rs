// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{HomeFixture, FLAKE};

use anyhow::Result;
use dotsync::flake::{extract_brews, extract_casks, extract_mas_apps, MasApp};
use pretty_assertions::assert_eq;
use predicates::prelude::*;

#[test]
fn help_lists_commands() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture
        .command("nix-manager")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("remove"));

    Ok(())
}

#[test]
fn add_writes_package_into_flake() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["add", "--cask", "zed"])
        .assert()
        .success();
    assert_eq!(extract_casks(&fixture.read_flake()?), vec!["ghostty", "zed"]);

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["add", "--mas", "Xcode", "497799835"])
        .assert()
        .success();
    assert_eq!(
        extract_mas_apps(&fixture.read_flake()?),
        vec![MasApp::new("Things 3", 904280696), MasApp::new("Xcode", 497799835)]
    );

    Ok(())
}

#[test]
fn remove_drops_package_from_flake() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["remove", "git"])
        .assert()
        .success();
    assert_eq!(extract_brews(&fixture.read_flake()?), vec!["oven-sh/bun/bun"]);

    Ok(())
}

#[test]
fn add_app_store_app_without_id_fails() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["add", "--mas", "Xcode"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("needs an app id"));
    assert_eq!(fixture.read_flake()?, FLAKE);

    Ok(())
}

#[test]
fn add_into_flake_without_section_fails() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake("{ outputs = { self }: { }; }\n")?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["add", "wget"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("section in flake"));

    Ok(())
}

#[test]
fn missing_flake_fails() -> Result<()> {
    let fixture = HomeFixture::new()?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(fixture.flake_path())
        .arg("list")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to read flake"));

    Ok(())
}

#[test]
fn list_shows_declared_packages() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Homebrew Casks"))
        .stdout(predicate::str::contains("ghostty"))
        .stdout(predicate::str::contains("ripgrep"))
        .stdout(predicate::str::contains("Summary"));

    Ok(())
}

#[test]
fn unknown_sort_mode_is_rejected() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["--sort", "sideways", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown sort mode"));

    Ok(())
}

#[test]
fn add_without_name_exits_one() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .arg("add")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("<name>"));
    assert_eq!(fixture.read_flake()?, FLAKE);

    Ok(())
}

#[test]
fn add_app_store_app_with_non_numeric_id_exits_one() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let flake = fixture.write_flake(FLAKE)?;

    fixture
        .command("nix-manager")?
        .arg("--flake")
        .arg(&flake)
        .args(["add", "--mas", "Xcode", "abc"])
        .assert()
        .failure()
        .code(1);
    assert_eq!(fixture.read_flake()?, FLAKE);

    Ok(())
}

#[test]
fn version_exits_cleanly() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture
        .command("nix-manager")?
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));

    Ok(())
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{service_descriptor, HomeFixture};

use anyhow::Result;
use assert_cmd::Command;
use dotsync::service::ServiceDescriptor;
use indoc::formatdoc;
use predicates::prelude::*;
use std::fs::write;

fn service_manager(fixture: &HomeFixture) -> Result<Command> {
    let mut cmd = fixture.command("service-manager")?;
    cmd.arg("--config-dir")
        .arg(fixture.config_dir())
        .arg("--agents-dir")
        .arg(fixture.agents_dir());
    Ok(cmd)
}

#[test]
fn list_shows_services_and_parse_errors() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("clip.toml", &service_descriptor("com.example.clip", true))?;
    fixture.write_service("broken.toml", "enabled = \"yes\"\n")?;

    service_manager(&fixture)?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("com.example.clip"))
        .stdout(predicate::str::contains("not installed"))
        .stdout(predicate::str::contains(
            "broken.toml: missing or invalid 'enabled' field (must be true/false)",
        ));

    Ok(())
}

#[test]
fn list_without_config_dir_has_no_services() -> Result<()> {
    let fixture = HomeFixture::new()?;

    service_manager(&fixture)?
        .assert()
        .success()
        .stdout(predicate::str::contains("No services"));

    Ok(())
}

#[test]
fn diff_reports_drift() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("a.toml", &service_descriptor("com.example.a", true))?;
    fixture.write_service("b.toml", &service_descriptor("com.example.b", false))?;
    fixture.write_unit("com.example.b")?;

    service_manager(&fixture)?
        .arg("diff")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"com\.example\.a\s+missing")?)
        .stdout(predicate::str::is_match(r"com\.example\.b\s+extra")?);

    Ok(())
}

#[test]
fn diff_when_synced() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("a.toml", &service_descriptor("com.example.a", false))?;

    service_manager(&fixture)?
        .arg("diff")
        .assert()
        .success()
        .stdout(predicate::str::contains("All services are synced!"));

    Ok(())
}

#[test]
fn disable_uninstalled_service_only_flips_descriptor() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let path = fixture.write_service("a.toml", &service_descriptor("com.example.a", true))?;

    service_manager(&fixture)?
        .args(["disable", "com.example.a"])
        .assert()
        .success();
    assert!(!ServiceDescriptor::load(&path)?.enabled);

    Ok(())
}

#[test]
fn unknown_label_fails() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("a.toml", &service_descriptor("com.example.a", true))?;

    service_manager(&fixture)?
        .args(["enable", "com.example.nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no service labeled"));

    Ok(())
}

#[test]
fn logs_show_tail_of_stdout_log() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let descriptor = formatdoc! {r#"
        enabled = true

        [service]
        label = "com.example.chatty"
        program = ["/usr/bin/true"]

        [logs]
        stdout = "~/chatty.log"
    "#};
    fixture.write_service("chatty.toml", &descriptor)?;
    write(fixture.home().join("chatty.log"), "first\nsecond\nthird\n")?;

    service_manager(&fixture)?
        .args(["logs", "com.example.chatty", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("second\nthird"))
        .stdout(predicate::str::contains("first").not());

    Ok(())
}

#[test]
fn unknown_command_exits_one() -> Result<()> {
    let fixture = HomeFixture::new()?;

    service_manager(&fixture)?
        .arg("launch")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("launch"));

    Ok(())
}

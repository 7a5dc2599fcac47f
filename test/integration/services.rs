// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{service_descriptor, HomeFixture};

use anyhow::Result;
use dotsync::{
    reconcile::{SortMode, Status},
    service::{
        launchd::{Launchctl, ServiceControl},
        reconcile_services, set_enabled, ServiceConfigDir, ServiceDescriptor,
    },
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{collections::HashSet, fs::read_to_string, io::Cursor};

#[test]
fn descriptor_directory_keeps_invalid_files_as_errors() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("b.toml", &service_descriptor("com.example.b", true))?;
    fixture.write_service("a.toml", &service_descriptor("com.example.a", false))?;
    fixture.write_service("broken.toml", "enabled = true\n")?;
    fixture.write_service("notes.txt", "not a descriptor")?;

    let configs = ServiceConfigDir::new(fixture.config_dir()).load_all()?;
    let outcome = configs
        .iter()
        .map(|config| match &config.parsed {
            Ok(descriptor) => descriptor.label.clone(),
            Err(err) => err.to_string(),
        })
        .collect::<Vec<_>>();
    assert_eq!(
        outcome,
        vec![
            "com.example.a".to_string(),
            "com.example.b".to_string(),
            "broken.toml: missing [service] section".to_string(),
        ]
    );

    Ok(())
}

#[test]
fn toggling_enabled_keeps_rest_of_descriptor() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let content = indoc! {r#"
        # Local clipboard daemon.
        enabled = true # flip me

        [service]
        label = "com.example.clip"
        program = ["clipd", "--quiet"]
    "#};
    let path = fixture.write_service("clip.toml", content)?;

    set_enabled(&path, false)?;
    assert_eq!(read_to_string(&path)?, content.replace("enabled = true", "enabled = false"));
    assert!(!ServiceDescriptor::load(&path)?.enabled);

    Ok(())
}

#[tokio::test]
async fn installed_unit_is_valid_plist() -> Result<()> {
    let fixture = HomeFixture::new()?;
    let content = indoc! {r#"
        enabled = true

        [service]
        label = "com.example.sync"
        program = ["~/bin/sync", "--watch"]
        keep_alive = true

        [service.environment]
        PATH = "~/bin:/usr/bin:/bin"

        [logs]
        stdout = "~/Library/Logs/sync/out.log"
    "#};
    let descriptor = ServiceDescriptor::parse(content, "sync.toml")?;
    let control = Launchctl::new(fixture.agents_dir(), fixture.home());

    control.install(&descriptor).await?;
    assert!(control.is_installed("com.example.sync"));
    assert!(fixture.home().join("Library/Logs/sync").is_dir());

    let unit = read_to_string(control.unit_path("com.example.sync"))?;
    let plist = plist::Value::from_reader_xml(Cursor::new(unit.as_bytes()))?;
    let dict = plist
        .as_dictionary()
        .ok_or_else(|| anyhow::anyhow!("unit is not a dictionary"))?;

    assert_eq!(
        dict.get("Label").and_then(plist::Value::as_string),
        Some("com.example.sync")
    );
    assert_eq!(dict.get("KeepAlive").and_then(plist::Value::as_boolean), Some(true));
    assert_eq!(dict.get("RunAtLoad"), None);

    let home = fixture.home().display().to_string();
    let path = dict
        .get("EnvironmentVariables")
        .and_then(plist::Value::as_dictionary)
        .and_then(|env| env.get("PATH"))
        .and_then(plist::Value::as_string);
    assert_eq!(path, Some(format!("{home}/bin:/usr/bin:/bin").as_str()));

    let args = dict
        .get("ProgramArguments")
        .and_then(plist::Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("unit has no program arguments"))?;
    assert_eq!(args.len(), 3);
    let script = args[2].as_string().unwrap_or_default();
    assert!(script.contains(&format!("exec '{home}/bin/sync' '--watch'")));

    Ok(())
}

#[test]
fn services_reconcile_enabled_against_installed() -> Result<()> {
    let fixture = HomeFixture::new()?;
    fixture.write_service("a.toml", &service_descriptor("com.example.a", true))?;
    fixture.write_service("b.toml", &service_descriptor("com.example.b", false))?;
    fixture.write_service("c.toml", &service_descriptor("com.example.c", true))?;
    fixture.write_unit("com.example.b")?;
    fixture.write_unit("com.example.c")?;
    fixture.write_unit("com.example.stray")?;

    let control = Launchctl::new(fixture.agents_dir(), fixture.home());
    let descriptors = ServiceConfigDir::new(fixture.config_dir())
        .load_all()?
        .into_iter()
        .filter_map(|config| config.parsed.ok())
        .collect::<Vec<_>>();
    let installed = ["com.example.b", "com.example.c", "com.example.stray"]
        .into_iter()
        .filter(|label| control.is_installed(label))
        .map(ToString::to_string)
        .collect::<HashSet<_>>();

    let items = reconcile_services(&descriptors, &installed, SortMode::Name)
        .into_iter()
        .map(|item| (item.name, item.status))
        .collect::<Vec<_>>();
    assert_eq!(
        items,
        vec![
            ("com.example.a".to_string(), Status::Missing),
            ("com.example.b".to_string(), Status::Extra),
            ("com.example.c".to_string(), Status::Synced),
        ]
    );

    Ok(())
}

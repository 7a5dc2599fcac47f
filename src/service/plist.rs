// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installed unit generation.
//!
//! Turn a [`ServiceDescriptor`] into the property list launchd reads from the
//! LaunchAgents directory. Every home-relative value is expanded against an
//! injected home directory, since launchd itself never expands `~`.

use crate::{path::expand_home, service::ServiceDescriptor};

use std::{collections::BTreeMap, fmt::Write, path::Path};

/// Search path every generated unit starts out with.
pub const DEFAULT_PATH: &str = "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Escape text for use inside of XML character data or attributes.
///
/// Line breaks and tabs become numeric references so that they survive
/// whitespace normalization.
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\r' => escaped.push_str("&#13;"),
            '\n' => escaped.push_str("&#10;"),
            '\t' => escaped.push_str("&#9;"),
            ch => escaped.push(ch),
        }
    }
    escaped
}

/// Quote argument for POSIX shell as a single-quoted word.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Wrap program so each start stamps a header into a fresh stdout log.
///
/// Standard error is folded into standard output so both end up in the same
/// log. Without a stdout log the program runs as is.
pub fn startup_wrapper(program: &[String], stdout_path: Option<&str>) -> Vec<String> {
    let Some(stdout_path) = stdout_path else {
        return program.to_vec();
    };

    let program = program
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    let script = format!(
        "echo \"=== Service started at $(date '+%Y-%m-%d %H:%M:%S') ===\" > {} && exec {program} 2>&1",
        shell_quote(stdout_path),
    );

    vec!["/bin/sh".into(), "-c".into(), script]
}

/// Generate property list of installed unit.
pub fn generate(descriptor: &ServiceDescriptor, home: &Path) -> String {
    let expand = |value: &str| expand_home(value, home).into_owned();

    let program = descriptor
        .program
        .iter()
        .map(|arg| expand(arg))
        .collect::<Vec<_>>();
    let stdout_path = descriptor.stdout_path.as_deref().map(expand);
    let stderr_path = descriptor.stderr_path.as_deref().map(expand);
    let working_directory = descriptor.working_directory.as_deref().map(expand);

    let mut environment = BTreeMap::from([
        ("HOME".to_string(), home.to_string_lossy().into_owned()),
        ("PATH".to_string(), DEFAULT_PATH.to_string()),
    ]);
    environment.extend(
        descriptor
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), expand(value))),
    );

    let mut xml = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" ",
        "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
        "<plist version=\"1.0\">\n",
        "<dict>\n",
    ));

    push_string(&mut xml, "Label", &descriptor.label);

    push_key(&mut xml, "ProgramArguments");
    xml.push_str("    <array>\n");
    for arg in startup_wrapper(&program, stdout_path.as_deref()) {
        let _ = writeln!(xml, "        <string>{}</string>", escape_xml(&arg));
    }
    xml.push_str("    </array>\n");

    push_key(&mut xml, "EnvironmentVariables");
    xml.push_str("    <dict>\n");
    for (key, value) in &environment {
        let _ = writeln!(xml, "        <key>{}</key>", escape_xml(key));
        let _ = writeln!(xml, "        <string>{}</string>", escape_xml(value));
    }
    xml.push_str("    </dict>\n");

    if descriptor.run_at_load {
        push_true(&mut xml, "RunAtLoad");
    }

    if descriptor.keep_alive {
        push_true(&mut xml, "KeepAlive");
    }

    if let Some(stdout_path) = &stdout_path {
        push_string(&mut xml, "StandardOutPath", stdout_path);
    }

    if let Some(stderr_path) = &stderr_path {
        push_string(&mut xml, "StandardErrorPath", stderr_path);
    }

    if let Some(working_directory) = &working_directory {
        push_string(&mut xml, "WorkingDirectory", working_directory);
    }

    xml.push_str("</dict>\n</plist>\n");
    xml
}

fn push_key(xml: &mut String, key: &str) {
    let _ = writeln!(xml, "    <key>{key}</key>");
}

fn push_string(xml: &mut String, key: &str, value: &str) {
    push_key(xml, key);
    let _ = writeln!(xml, "    <string>{}</string>", escape_xml(value));
}

fn push_true(xml: &mut String, key: &str) {
    push_key(xml, key);
    xml.push_str("    <true/>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;
    use std::io::Cursor;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            label: "com.example.sync".into(),
            program: vec!["~/bin/sync".into(), "--name=it's <fine> & \"ok\"".into()],
            enabled: true,
            run_at_load: true,
            keep_alive: false,
            working_directory: Some("$HOME/src".into()),
            stdout_path: Some("~/Library/Logs/sync.log".into()),
            stderr_path: None,
            environment: BTreeMap::from([
                ("PATH".into(), "/custom/bin".into()),
                ("NOTE".into(), "line one\nline\ttwo\r".into()),
            ]),
        }
    }

    #[test_case("a & b", "a &amp; b"; "ampersand")]
    #[test_case("<tag>", "&lt;tag&gt;"; "angle brackets")]
    #[test_case("\"it's\"", "&quot;it&apos;s&quot;"; "quotes")]
    #[test_case("a\r\n\tb", "a&#13;&#10;&#9;b"; "control characters")]
    #[test_case("&amp;", "&amp;amp;"; "already escaped")]
    #[test]
    fn escape_xml_special_characters(value: &str, expect: &str) {
        pretty_assertions::assert_eq!(escape_xml(value), expect);
    }

    #[test]
    fn shell_quote_embedded_single_quote() {
        pretty_assertions::assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn startup_wrapper_without_log_runs_program_directly() {
        let program = vec!["/bin/echo".to_string(), "hi".to_string()];
        pretty_assertions::assert_eq!(startup_wrapper(&program, None), program);
    }

    #[test]
    fn startup_wrapper_with_log() {
        let program = vec!["/bin/echo".to_string(), "it's".to_string()];
        let result = startup_wrapper(&program, Some("/tmp/out.log"));
        let expect = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            concat!(
                "echo \"=== Service started at $(date '+%Y-%m-%d %H:%M:%S') ===\" ",
                "> '/tmp/out.log' && exec '/bin/echo' 'it'\\''s' 2>&1"
            )
            .to_string(),
        ];
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn generated_plist_reparses_strictly() -> anyhow::Result<()> {
        let xml = generate(&descriptor(), Path::new("/Users/blah"));
        let value = plist::Value::from_reader_xml(Cursor::new(xml.as_bytes()))?;
        let dict = value.as_dictionary().unwrap();

        pretty_assertions::assert_eq!(dict.get("Label").and_then(|v| v.as_string()), Some("com.example.sync"));
        pretty_assertions::assert_eq!(dict.get("RunAtLoad").and_then(|v| v.as_boolean()), Some(true));
        assert!(dict.get("KeepAlive").is_none());
        assert!(dict.get("StandardErrorPath").is_none());
        pretty_assertions::assert_eq!(
            dict.get("StandardOutPath").and_then(|v| v.as_string()),
            Some("/Users/blah/Library/Logs/sync.log")
        );
        pretty_assertions::assert_eq!(
            dict.get("WorkingDirectory").and_then(|v| v.as_string()),
            Some("/Users/blah/src")
        );

        let args = dict
            .get("ProgramArguments")
            .and_then(|v| v.as_array())
            .unwrap()
            .iter()
            .filter_map(|v| v.as_string())
            .collect::<Vec<_>>();
        pretty_assertions::assert_eq!(args[..2], ["/bin/sh", "-c"]);
        assert!(args[2].contains("exec '/Users/blah/bin/sync' '--name=it'\\''s <fine> & \"ok\"'"));

        let env = dict
            .get("EnvironmentVariables")
            .and_then(|v| v.as_dictionary())
            .unwrap();
        pretty_assertions::assert_eq!(env.get("HOME").and_then(|v| v.as_string()), Some("/Users/blah"));
        pretty_assertions::assert_eq!(env.get("PATH").and_then(|v| v.as_string()), Some("/custom/bin"));
        pretty_assertions::assert_eq!(
            env.get("NOTE").and_then(|v| v.as_string()),
            Some("line one\nline\ttwo\r")
        );

        Ok(())
    }

    #[test]
    fn generated_plist_without_logs_keeps_argv() -> anyhow::Result<()> {
        let mut descriptor = descriptor();
        descriptor.stdout_path = None;
        descriptor.run_at_load = false;
        descriptor.keep_alive = true;

        let xml = generate(&descriptor, Path::new("/Users/blah"));
        assert!(xml.contains("    <key>KeepAlive</key>\n    <true/>\n"));
        assert!(!xml.contains("RunAtLoad"));

        let value = plist::Value::from_reader_xml(Cursor::new(xml.as_bytes()))?;
        let args = value
            .as_dictionary()
            .and_then(|dict| dict.get("ProgramArguments"))
            .and_then(|v| v.as_array())
            .unwrap()
            .iter()
            .filter_map(|v| v.as_string().map(ToString::to_string))
            .collect::<Vec<_>>();
        pretty_assertions::assert_eq!(args, ["/Users/blah/bin/sync", "--name=it's <fine> & \"ok\""]);

        Ok(())
    }
}

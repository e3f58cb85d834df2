// src/cli/handlers/extension.rs

//! `clk extension`: lists, toggles and creates extension profiles.
//!
//! An extension is a directory under `extensions/` of a root profile. Whether it takes part
//! in the stack is read from the `extension` section of the root profiles, so enabling or
//! disabling one is a plain settings write.

use crate::cli::handlers::commons::{profile_param, report_written, target_profile, update_section};
use crate::constants::{EXTENSIONS_DIR, SETTINGS_FILENAME, VERSION_FILENAME};
use crate::core::command::{Command, Invocation};
use crate::core::migration;
use crate::core::profile::write_json_atomically;
use crate::core::session::Session;
use crate::models::{ParamSpec, ProfileKind};
use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use serde_json::{Map, Value};
use std::fs;

const SECTION: &str = "extension";

pub fn command(path: &str) -> Command {
    let mut group = Command::group(path)
        .with_help(t!("extension.help"))
        .with_child("enable", enable_command)
        .with_child("disable", disable_command)
        .with_child("show", show_command)
        .with_child("create", create_command);
    group.memory.enabled = false;
    group
}

fn toggle_command(path: &str, help: &str, enabled: bool) -> Command {
    let mut cmd = Command::new(path)
        .with_help(help)
        .with_param(profile_param())
        .with_param(
            ParamSpec::argument("names")
                .multiple()
                .required()
                .help(t!("extension.param.name")),
        )
        .with_callback(move |s: &mut Session, inv: &Invocation| toggle(s, inv, enabled));
    cmd.memory.enabled = false;
    cmd
}

fn enable_command(path: &str) -> Command {
    toggle_command(path, t!("extension.enable.help"), true)
}

fn disable_command(path: &str) -> Command {
    toggle_command(path, t!("extension.disable.help"), false)
}

fn show_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("extension.show.help"))
        .with_callback(show);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

fn create_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("extension.create.help"))
        .with_param(profile_param())
        .with_param(ParamSpec::argument("name").required().help(t!("extension.param.name")))
        .with_callback(create);
    cmd.memory.enabled = false;
    cmd
}

/// Short names of the extensions found in the stack, enabled or not.
fn known_extensions(session: &Session) -> Vec<String> {
    let mut names: Vec<String> = session
        .config()
        .stack()
        .iter()
        .filter_map(|e| {
            let profile = e.profile.borrow();
            (profile.kind == ProfileKind::Extension).then(|| profile.short_name().to_string())
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!(t!("extension.error.invalid_name"), name = name))
    }
}

fn toggle(session: &mut Session, invocation: &Invocation, enabled: bool) -> Result<()> {
    let names = invocation.get_many("names").to_vec();
    let known = known_extensions(session);
    for name in &names {
        if !known.contains(name) {
            return Err(anyhow!(
                t!("extension.error.unknown"),
                name = name,
                known = known.join(", ")
            ));
        }
    }

    let profile = target_profile(session, invocation)?;
    update_section(session, &profile, SECTION, |section| {
        for name in &names {
            let entry = section
                .entry(name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(state) = entry {
                state.insert("enabled".to_string(), Value::Bool(enabled));
            }
        }
        Ok(())
    })?;
    for name in &names {
        report_written(session, &format!("{}.{}.enabled", SECTION, name), &profile);
    }
    Ok(())
}

fn show(session: &mut Session, _invocation: &Invocation) -> Result<()> {
    let lines: Vec<String> = session
        .config()
        .stack()
        .iter()
        .filter(|e| e.profile.borrow().kind == ProfileKind::Extension)
        .map(|e| {
            let profile = e.profile.borrow();
            let state = if e.enabled {
                t!("extension.info.enabled").green()
            } else {
                t!("extension.info.disabled").red()
            };
            let location = profile
                .location
                .as_ref()
                .map(|l| l.display().to_string())
                .unwrap_or_default();
            format!(
                "{} {} {} {}",
                profile.short_name().cyan(),
                state,
                format!("[{}]", e.owner.clone().unwrap_or_default()).dimmed(),
                location.dimmed()
            )
        })
        .collect();
    if lines.is_empty() {
        session.emit(t!("extension.info.none"));
    }
    for line in lines {
        session.emit(&line);
    }
    Ok(())
}

fn create(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let name = invocation.get_one("name").unwrap_or_default().to_string();
    validate_name(&name)?;
    let profile = target_profile(session, invocation)?;
    let (root_name, root_location) = {
        let p = profile.borrow();
        p.check_writable()?;
        (p.name.clone(), p.location.clone())
    };
    let root_location =
        root_location.ok_or_else(|| anyhow!(t!("extension.error.no_location"), profile = root_name))?;

    let location = root_location.join(EXTENSIONS_DIR).join(&name);
    if location.exists() {
        return Err(anyhow!(
            t!("extension.error.exists"),
            name = name,
            path = location.display()
        ));
    }
    write_json_atomically(&location.join(SETTINGS_FILENAME), &Value::Object(Map::new()))?;
    let version_path = location.join(VERSION_FILENAME);
    fs::write(&version_path, migration::latest_version().to_string())
        .with_context(|| format!("Cannot write '{}'", version_path.display()))?;
    log::info!("Created extension '{}' at '{}'", name, location.display());

    session.settings_changed()?;
    let line = format!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(
            t!("extension.info.created"),
            name = name,
            path = location.display()
        )
    );
    session.emit(&line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::program;
    use crate::core::session::SessionOptions;
    use tempfile::{TempDir, tempdir};

    fn session() -> (TempDir, Session) {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global");
        let cwd = dir.path().join("work");
        fs::create_dir_all(&global).unwrap();
        fs::create_dir_all(&cwd).unwrap();
        let options = SessionOptions {
            global_dir: Some(global),
            cwd,
            capture_output: true,
            ..Default::default()
        };
        (dir, Session::new(options, program()).unwrap())
    }

    fn run(s: &mut Session, line: &str) -> Result<()> {
        s.execute(&shlex::split(line).unwrap())
    }

    fn extension_enabled(s: &Session, name: &str) -> Option<bool> {
        s.config()
            .stack()
            .iter()
            .find(|e| e.profile.borrow().name == name)
            .map(|e| e.enabled)
    }

    #[test]
    fn test_create_adds_an_enabled_extension() {
        let (dir, mut s) = session();
        run(&mut s, "extension create tools").unwrap();
        let location = dir.path().join("global/extensions/tools");
        assert!(location.join("settings.json").exists());
        assert_eq!(
            fs::read_to_string(location.join("version.txt")).unwrap(),
            migration::latest_version().to_string()
        );
        assert_eq!(extension_enabled(&s, "global/tools"), Some(true));
        assert!(run(&mut s, "extension create tools").is_err());
    }

    #[test]
    fn test_disable_then_enable() {
        let (_dir, mut s) = session();
        run(&mut s, "extension create tools").unwrap();
        run(&mut s, "extension disable tools").unwrap();
        assert_eq!(extension_enabled(&s, "global/tools"), Some(false));
        run(&mut s, "extension show").unwrap();
        assert!(s.captured().iter().any(|l| l.contains("tools")));
        run(&mut s, "extension enable tools").unwrap();
        assert_eq!(extension_enabled(&s, "global/tools"), Some(true));
    }

    #[test]
    fn test_disabled_extension_settings_are_ignored() {
        let (dir, mut s) = session();
        run(&mut s, "extension create tools").unwrap();
        fs::write(
            dir.path().join("global/extensions/tools/settings.json"),
            r#"{"parameters": {"echo": ["from-extension"]}}"#,
        )
        .unwrap();
        // The store keeps loaded profiles: drop the stale copy by restarting.
        let options = SessionOptions {
            global_dir: Some(dir.path().join("global")),
            cwd: dir.path().join("work"),
            capture_output: true,
            ..Default::default()
        };
        let mut s = Session::new(options, program()).unwrap();
        run(&mut s, "echo").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some("from-extension"));

        run(&mut s, "extension disable tools").unwrap();
        run(&mut s, "echo").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let (_dir, mut s) = session();
        assert!(run(&mut s, "extension enable ghost").is_err());
        assert!(run(&mut s, "extension create ../escape").is_err());
    }
}

// src/cli/handlers/commons.rs

// Shared helpers of the built-in commands.

use crate::core::command::{Command, Invocation, join_path};
use crate::core::profile::ProfileHandle;
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::{Result, anyhow};
use colored::Colorize;
use serde_json::{Map, Value};

/// The `--profile` option of commands that write settings.
pub fn profile_param() -> ParamSpec {
    ParamSpec::option("profile").help(t!("common.param.profile"))
}

/// The profile a write goes to: `--profile NAME`, else the local profile inside a
/// project, else the global one.
pub fn target_profile(session: &Session, invocation: &Invocation) -> Result<ProfileHandle> {
    let config = session.config();
    match invocation.get_one("profile") {
        Some(name) => config
            .writable_profiles()
            .into_iter()
            .find(|p| p.borrow().name == name)
            .ok_or_else(|| {
                let known: Vec<String> = config
                    .writable_profiles()
                    .iter()
                    .map(|p| p.borrow().name.clone())
                    .collect();
                anyhow!(t!("common.error.unknown_profile"), name = name, known = known.join(", "))
            }),
        None => config
            .default_write_profile()
            .ok_or_else(|| anyhow!(t!("common.error.no_default_profile"))),
    }
}

/// Applies `edit` to a section of `profile`, then writes the profile and reloads settings.
/// The shared profile is left as it was when the edit or the write fails.
pub fn update_section<F, R>(
    session: &mut Session,
    profile: &ProfileHandle,
    section: &str,
    edit: F,
) -> Result<R>
where
    F: FnOnce(&mut Map<String, Value>) -> Result<R>,
{
    let (previous, outcome) = {
        let mut p = profile.borrow_mut();
        p.check_writable()?;
        let previous = p.settings().clone();
        let outcome = p.edit_section(section, edit)?;
        (previous, outcome)
    };
    let written = profile.borrow().write();
    if let Err(e) = written {
        profile.borrow_mut().replace_settings(previous);
        return Err(e.into());
    }
    session.settings_changed()?;
    Ok(outcome)
}

/// Entries of a section in every enabled profile, lowest precedence first.
pub fn section_entries(session: &Session, section: &str) -> Vec<(String, String, Value)> {
    let mut entries = Vec::new();
    for entry in session.config().stack().iter().filter(|e| e.enabled) {
        let profile = entry.profile.borrow();
        let Some(content) = profile.section(section) else {
            continue;
        };
        for (key, value) in content {
            entries.push((profile.name.clone(), key.clone(), value.clone()));
        }
    }
    entries
}

/// Prints the success line of a write.
pub fn report_written(session: &mut Session, what: &str, profile: &ProfileHandle) {
    let line = format!(
        "{} {}",
        t!("common.success").green().bold(),
        format!(t!("common.info.written"), what = what, profile = profile.borrow().name)
    );
    session.emit(&line);
}

/// Parses a dotted path given on the command line into the canonical form of an
/// existing command. Unknown paths are kept as typed, with a warning.
pub fn command_path(session: &Session, raw: &str) -> String {
    let tokens: Vec<String> = raw
        .split(['.', ' '])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    match session.path_of_args(&tokens) {
        Ok((path, consumed)) if consumed == tokens.len() && consumed > 0 => path,
        _ => {
            log::warn!("'{}' does not name a known command", raw);
            tokens.join(".")
        }
    }
}

/// Lines of the command tree under `command`, broken commands flagged.
pub fn tree_lines(session: &Session, command: &Command, depth: usize, lines: &mut Vec<String>) {
    for name in session.child_names(command) {
        let child = session.resolve_or_broken(&join_path(&command.path, &name));
        if child.hidden {
            continue;
        }
        let indent = "  ".repeat(depth);
        let label = if child.broken.is_some() {
            format!("{}{} {}", indent, name.red(), t!("command.info.broken").red())
        } else if child.is_group {
            format!("{}{}", indent, name.bold())
        } else {
            format!("{}{}", indent, name)
        };
        lines.push(label);
        if child.is_group && child.broken.is_none() {
            tree_lines(session, &child, depth + 1, lines);
        }
    }
}

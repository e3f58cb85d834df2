//! # Handler for the `alias` command
//!
//! Aliases are commands stored in the `alias` section: a list of command lines replayed
//! in order, extra arguments going to the last one.
//!
//! - `set NAME COMMAND... [, COMMAND...]` stores an alias. A lone `,` separates commands.
//!   Overwriting an existing alias asks for confirmation on an interactive terminal.
//! - `unset NAME...` removes aliases from the target profile.
//! - `show [NAME...]` lists the effective aliases with the profile defining them.

use anyhow::{Result, anyhow};
use colored::*;
use dialoguer::{Confirm, console::measure_text_width, theme::ColorfulTheme};
use std::io::IsTerminal;

use crate::{
    cli::handlers::commons::{profile_param, report_written, section_entries, target_profile, update_section},
    core::{
        command::{Command, Invocation},
        resolvers::alias::{alias_value, expand_dotted_head},
        session::Session,
    },
    models::{AliasDefinition, ParamSpec},
};

const SECTION: &str = "alias";
const SEPARATOR: &str = ",";

pub fn command(path: &str) -> Command {
    let mut group = Command::group(path)
        .with_help(t!("alias.help"))
        .with_child("set", set_command)
        .with_child("unset", unset_command)
        .with_child("show", show_command);
    group.memory.enabled = false;
    group
}

fn set_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("alias.set.help"))
        .with_param(profile_param())
        .with_param(ParamSpec::option("documentation").short('d').help(t!("alias.param.documentation")))
        .with_param(ParamSpec::flag("force").short('f').help(t!("alias.param.force")))
        .with_param(ParamSpec::argument("name").required().help(t!("alias.param.name")))
        .with_param(
            ParamSpec::remainder("commands")
                .required()
                .help(t!("alias.param.commands")),
        )
        .with_callback(set);
    cmd.memory.enabled = false;
    cmd
}

fn unset_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("alias.unset.help"))
        .with_param(profile_param())
        .with_param(ParamSpec::argument("names").multiple().required().help(t!("alias.param.name")))
        .with_callback(unset);
    cmd.memory.enabled = false;
    cmd
}

fn show_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("alias.show.help"))
        .with_param(ParamSpec::argument("names").multiple().help(t!("alias.param.name")))
        .with_callback(show);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

// --- Helper Functions ---

/// Validates an alias name: dotted segments without whitespace, none starting with `_`.
fn validate_alias_name(raw_name: &str) -> Result<String> {
    let name = raw_name.trim();
    if name.is_empty() {
        return Err(anyhow!(t!("alias.error.empty_name")));
    }
    if name.contains(char::is_whitespace) || name.contains('/') || name.contains('\\') {
        return Err(anyhow!(t!("alias.error.invalid_chars"), name = name));
    }
    if name.split('.').any(|segment| segment.is_empty() || segment.starts_with('_')) {
        return Err(anyhow!(t!("alias.error.reserved_name"), name = name));
    }
    Ok(name.to_string())
}

/// Splits `echo a , echo b` into `[["echo", "a"], ["echo", "b"]]`.
pub fn split_commands(tokens: &[String]) -> Vec<Vec<String>> {
    tokens
        .split(|t| t == SEPARATOR)
        .filter(|c| !c.is_empty())
        .map(expand_dotted_head)
        .collect()
}

/// Asks before replacing an alias, when someone can answer.
fn confirm_overwrite(name: &str, force: bool) -> Result<bool> {
    if force || !std::io::stdin().is_terminal() {
        return Ok(true);
    }
    eprintln!(
        "{}",
        format!(t!("alias.warning.overwriting"), name = name).yellow().bold()
    );
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("common.prompt.are_you_sure"))
        .default(false)
        .interact()?;
    if !confirmed {
        eprintln!("{}", t!("common.info.operation_cancelled"));
    }
    Ok(confirmed)
}

// --- Handlers ---

fn set(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let name = validate_alias_name(invocation.get_one("name").unwrap_or_default())?;
    let commands = split_commands(invocation.get_many("commands"));
    if commands.is_empty() {
        return Err(anyhow!(t!("alias.error.no_commands"), name = name));
    }
    let documentation = invocation.get_one("documentation");
    let profile = target_profile(session, invocation)?;

    let exists = profile
        .borrow()
        .section(SECTION)
        .is_some_and(|s| s.contains_key(&name));
    if exists && !confirm_overwrite(&name, invocation.flag("force"))? {
        return Ok(());
    }

    let value = alias_value(&commands, documentation);
    update_section(session, &profile, SECTION, |section| {
        section.insert(name.clone(), value);
        Ok(())
    })?;
    report_written(session, &format!("{}.{}", SECTION, name), &profile);
    Ok(())
}

fn unset(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let names = invocation.get_many("names").to_vec();
    let profile = target_profile(session, invocation)?;
    let profile_name = profile.borrow().name.clone();
    update_section(session, &profile, SECTION, |section| {
        for name in &names {
            if section.remove(name).is_none() {
                return Err(anyhow!(
                    t!("common.error.key_not_found"),
                    key = name,
                    section = SECTION,
                    profile = profile_name
                ));
            }
        }
        Ok(())
    })?;
    for name in &names {
        report_written(session, &format!("{}.{}", SECTION, name), &profile);
    }
    Ok(())
}

fn show(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let wanted = invocation.get_many("names");
    // Later profiles win: keep the last definition of each name.
    let mut effective: Vec<(String, String, AliasDefinition)> = Vec::new();
    for (profile, name, value) in section_entries(session, SECTION) {
        if !wanted.is_empty() && !wanted.contains(&name) {
            continue;
        }
        let Ok(definition) = serde_json::from_value::<AliasDefinition>(value) else {
            continue;
        };
        effective.retain(|(_, n, _)| n != &name);
        effective.push((profile, name, definition));
    }
    effective.sort_by(|a, b| a.1.cmp(&b.1));

    if effective.is_empty() {
        session.emit(t!("alias.info.no_aliases"));
        return Ok(());
    }

    let width = effective
        .iter()
        .map(|(_, name, _)| measure_text_width(name))
        .max()
        .unwrap_or(0);
    for (profile, name, definition) in effective {
        let rendered: Vec<String> = definition.commands.iter().map(|c| c.join(" ")).collect();
        let padding = " ".repeat(width.saturating_sub(measure_text_width(&name)));
        let mut line = format!(
            "{}{}  {} {}",
            name.cyan(),
            padding,
            rendered.join(" , "),
            format!("[{}]", profile).dimmed()
        );
        if let Some(doc) = &definition.documentation {
            line.push_str(&format!("\n{}  {}", " ".repeat(width), doc.dimmed()));
        }
        session.emit(&line);
    }
    Ok(())
}

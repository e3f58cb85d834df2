// src/cli/handlers/parameter.rs

//! `clk parameter`: the arguments remembered for a command, stored in the `parameters`
//! section and injected before what the user types.

use crate::cli::handlers::commons::{
    command_path, profile_param, report_written, section_entries, target_profile, update_section,
};
use crate::core::command::{Command, Invocation};
use crate::core::config::value_to_tokens;
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::{Result, anyhow};
use colored::Colorize;
use serde_json::Value;

const SECTION: &str = "parameters";

pub fn command(path: &str) -> Command {
    let mut group = Command::group(path)
        .with_help(t!("parameter.help"))
        .with_child("set", set_command)
        .with_child("append", append_command)
        .with_child("unset", unset_command)
        .with_child("show", show_command);
    group.memory.enabled = false;
    group
}

fn writer(path: &str, help: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(help)
        .with_param(profile_param())
        .with_param(ParamSpec::argument("path").required().help(t!("parameter.param.path")))
        .with_param(ParamSpec::remainder("params").help(t!("parameter.param.params")));
    cmd.memory.enabled = false;
    cmd
}

fn set_command(path: &str) -> Command {
    writer(path, t!("parameter.set.help")).with_callback(|s: &mut Session, inv: &Invocation| {
        store(s, inv, false)
    })
}

fn append_command(path: &str) -> Command {
    writer(path, t!("parameter.append.help")).with_callback(|s: &mut Session, inv: &Invocation| {
        store(s, inv, true)
    })
}

fn unset_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("parameter.unset.help"))
        .with_param(profile_param())
        .with_param(
            ParamSpec::argument("paths")
                .multiple()
                .required()
                .help(t!("parameter.param.paths")),
        )
        .with_callback(unset);
    cmd.memory.enabled = false;
    cmd
}

fn show_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("parameter.show.help"))
        .with_param(ParamSpec::argument("paths").multiple().help(t!("parameter.param.paths")))
        .with_callback(show);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

fn store(session: &mut Session, invocation: &Invocation, append: bool) -> Result<()> {
    let raw = invocation.get_one("path").unwrap_or_default();
    let path = command_path(session, raw);
    let params = invocation.get_many("params").to_vec();
    let profile = target_profile(session, invocation)?;

    update_section(session, &profile, SECTION, |section| {
        let mut tokens = if append {
            section.get(&path).map(value_to_tokens).unwrap_or_default()
        } else {
            Vec::new()
        };
        tokens.extend(params);
        section.insert(path.clone(), Value::from(tokens));
        Ok(())
    })?;
    report_written(session, &format!("{}.{}", SECTION, path), &profile);
    Ok(())
}

fn unset(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let paths: Vec<String> = invocation
        .get_many("paths")
        .iter()
        .map(|raw| command_path(session, raw))
        .collect();
    let profile = target_profile(session, invocation)?;
    let profile_name = profile.borrow().name.clone();

    update_section(session, &profile, SECTION, |section| {
        for path in &paths {
            if section.remove(path).is_none() {
                return Err(anyhow!(
                    t!("common.error.key_not_found"),
                    key = path,
                    section = SECTION,
                    profile = profile_name
                ));
            }
        }
        Ok(())
    })?;
    for path in &paths {
        report_written(session, &format!("{}.{}", SECTION, path), &profile);
    }
    Ok(())
}

fn show(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let wanted: Vec<String> = invocation
        .get_many("paths")
        .iter()
        .map(|raw| command_path(session, raw))
        .collect();
    let lines: Vec<String> = section_entries(session, SECTION)
        .into_iter()
        .filter(|(_, path, _)| wanted.is_empty() || wanted.contains(path))
        .map(|(profile, path, value)| {
            format!(
                "{} {} {}",
                format!("[{}]", profile).dimmed(),
                path.cyan(),
                value_to_tokens(&value).join(" ")
            )
        })
        .collect();
    if lines.is_empty() {
        session.emit(t!("parameter.info.none"));
    }
    for line in lines {
        session.emit(&line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cli::program;
    use crate::core::session::{Session, SessionOptions};
    use serde_json::{Value, json};
    use std::fs;
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

    fn run(s: &mut Session, line: &str) -> anyhow::Result<()> {
        s.execute(&shlex::split(line).unwrap())
    }

    fn global_settings(dir: &TempDir) -> Value {
        let raw = fs::read_to_string(dir.path().join("global").join("settings.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_set_then_append_then_use() {
        let (dir, mut s) = session();
        run(&mut s, "parameter set echo foo").unwrap();
        run(&mut s, "parameter append echo --bar").unwrap();
        assert_eq!(
            global_settings(&dir)["parameters"]["echo"],
            json!(["foo", "--bar"])
        );
        run(&mut s, "echo baz").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some("foo --bar baz"));
    }

    #[test]
    fn test_local_profile_is_the_default_target_in_a_project() {
        let (dir, mut s) = session();
        fs::create_dir_all(dir.path().join("work").join(".clk")).unwrap();
        s.refresh().unwrap();
        run(&mut s, "parameter set echo local").unwrap();
        assert!(dir.path().join("work/.clk/settings.json").exists());
        run(&mut s, "parameter set --profile global echo global").unwrap();
        assert_eq!(global_settings(&dir)["parameters"]["echo"], json!(["global"]));
        run(&mut s, "echo").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some("local"));
    }

    #[test]
    fn test_unset_missing_key_fails() {
        let (_dir, mut s) = session();
        assert!(run(&mut s, "parameter unset echo").is_err());
        run(&mut s, "parameter set echo x").unwrap();
        run(&mut s, "parameter unset echo").unwrap();
        run(&mut s, "echo").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let (_dir, mut s) = session();
        let err = run(&mut s, "parameter set --profile nope echo x").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_failed_unset_is_not_written_by_a_later_command() {
        let (dir, mut s) = session();
        run(&mut s, "parameter set echo foo").unwrap();
        assert!(run(&mut s, "parameter unset echo nope").is_err());
        run(&mut s, "parameter set flowdep.show build").unwrap();

        let settings = global_settings(&dir);
        assert_eq!(settings["parameters"]["echo"], json!(["foo"]));
        assert_eq!(settings["parameters"]["flowdep.show"], json!(["build"]));
        run(&mut s, "echo baz").unwrap();
        assert_eq!(s.captured().last().map(String::as_str), Some("foo baz"));
    }
}

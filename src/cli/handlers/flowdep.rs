// src/cli/handlers/flowdep.rs

//! `clk flowdep`: the `flowdeps` section, which overrides the flow dependencies a
//! command declares. `[self]` inside a configured list stands for the declared ones.

use crate::cli::handlers::commons::{
    command_path, profile_param, report_written, target_profile, update_section,
};
use crate::core::command::{Command, Invocation};
use crate::core::config::value_to_tokens;
use crate::core::flow::{self, FlowError, Truncation};
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::{Result, anyhow};
use colored::Colorize;
use serde_json::Value;

const SECTION: &str = "flowdeps";

pub fn command(path: &str) -> Command {
    let mut group = Command::group(path)
        .with_help(t!("flowdep.help"))
        .with_child("set", set_command)
        .with_child("append", append_command)
        .with_child("unset", unset_command)
        .with_child("show", show_command)
        .with_child("graph", graph_command);
    group.memory.enabled = false;
    group
}

fn writer(path: &str, help: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(help)
        .with_param(profile_param())
        .with_param(ParamSpec::argument("path").required().help(t!("flowdep.param.path")))
        .with_param(
            ParamSpec::argument("dependencies")
                .multiple()
                .help(t!("flowdep.param.dependencies")),
        );
    cmd.memory.enabled = false;
    cmd
}

fn set_command(path: &str) -> Command {
    writer(path, t!("flowdep.set.help"))
        .with_callback(|s: &mut Session, inv: &Invocation| store(s, inv, false))
}

fn append_command(path: &str) -> Command {
    writer(path, t!("flowdep.append.help"))
        .with_callback(|s: &mut Session, inv: &Invocation| store(s, inv, true))
}

fn unset_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("flowdep.unset.help"))
        .with_param(profile_param())
        .with_param(
            ParamSpec::argument("paths")
                .multiple()
                .required()
                .help(t!("flowdep.param.path")),
        )
        .with_callback(unset);
    cmd.memory.enabled = false;
    cmd
}

fn show_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("flowdep.show.help"))
        .with_param(ParamSpec::argument("paths").multiple().help(t!("flowdep.param.path")))
        .with_callback(show);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

fn graph_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("flowdep.graph.help"))
        .with_param(ParamSpec::argument("path").required().help(t!("flowdep.param.path")))
        .with_callback(graph);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

/// Dependencies are stored as typed, except `[stop]` and `[self]`, which are kept verbatim.
fn normalize(session: &Session, raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|r| flow::parse_dependency_list(&Value::from(r.as_str())))
        .map(|dep| {
            if dep.starts_with('[') {
                dep
            } else {
                command_path(session, &dep)
            }
        })
        .collect()
}

fn store(session: &mut Session, invocation: &Invocation, append: bool) -> Result<()> {
    let path = command_path(session, invocation.get_one("path").unwrap_or_default());
    let deps = normalize(session, invocation.get_many("dependencies"));
    let profile = target_profile(session, invocation)?;

    update_section(session, &profile, SECTION, |section| {
        let mut list = if append {
            section.get(&path).map(value_to_tokens).unwrap_or_default()
        } else {
            Vec::new()
        };
        list.extend(deps);
        section.insert(path.clone(), Value::from(list));
        Ok(())
    })?;
    report_written(session, &format!("{}.{}", SECTION, path), &profile);

    // The write is kept, but a cycle makes the flow unusable: say so now.
    if let Err(e @ FlowError::Cycle(_)) = flow::dependencies_of(session, &path, Truncation::default()) {
        log::warn!("{}", e);
    }
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

/// Without paths, shows every command whose dependencies are configured.
fn show(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let mut paths: Vec<String> = invocation
        .get_many("paths")
        .iter()
        .map(|raw| command_path(session, raw))
        .collect();
    if paths.is_empty() {
        paths = session
            .config()
            .merged()
            .section(SECTION)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
    }
    if paths.is_empty() {
        session.emit(t!("flowdep.info.none"));
        return Ok(());
    }
    for path in paths {
        let line = match flow::dependencies_of(session, &path, Truncation::default()) {
            Ok(deps) => format!("{} {}", path.cyan(), deps.join(" ")),
            Err(e) => format!("{} {}", path.cyan(), e.to_string().red()),
        };
        session.emit(&line);
    }
    Ok(())
}

fn graph(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let path = command_path(session, invocation.get_one("path").unwrap_or_default());
    let lines = flow::dependency_tree(session, &path);
    for line in lines {
        session.emit(&line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::program;
    use crate::core::resolvers::hook::HookRegistry;
    use crate::core::session::SessionOptions;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn session() -> (TempDir, Session) {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global");
        let cwd = dir.path().join("work");
        fs::create_dir_all(&global).unwrap();
        fs::create_dir_all(&cwd).unwrap();
        let mut hooks = HookRegistry::default();
        for name in ["build", "test", "deploy"] {
            hooks.register_command(name, |p| {
                Command::new(p).with_callback(|s: &mut Session, inv: &Invocation| {
                    s.emit(&format!("ran {}", inv.path));
                    Ok(())
                })
            });
        }
        let options = SessionOptions {
            global_dir: Some(global),
            cwd,
            hooks,
            capture_output: true,
            ..Default::default()
        };
        (dir, Session::new(options, program()).unwrap())
    }

    fn run(s: &mut Session, line: &str) -> Result<()> {
        s.execute(&shlex::split(line).unwrap())
    }

    #[test]
    fn test_configured_dependencies_drive_the_flow() {
        let (_dir, mut s) = session();
        run(&mut s, "flowdep set test build").unwrap();
        run(&mut s, "flowdep append deploy test").unwrap();
        run(&mut s, "flowdep show deploy").unwrap();
        assert!(s.captured().iter().any(|l| l.contains("build test")));

        run(&mut s, "deploy --flow").unwrap();
        let tail: Vec<&str> = s.captured().iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["ran deploy", "ran test", "ran build"]);
    }

    #[test]
    fn test_comma_separated_dependencies() {
        let (_dir, mut s) = session();
        run(&mut s, "flowdep set deploy build,test").unwrap();
        assert_eq!(
            s.config().flowdeps_override("deploy"),
            Some(vec!["build".to_string(), "test".to_string()])
        );
    }

    #[test]
    fn test_graph_renders_the_tree() {
        let (_dir, mut s) = session();
        run(&mut s, "flowdep set test build").unwrap();
        run(&mut s, "flowdep set deploy test").unwrap();
        run(&mut s, "flowdep graph deploy").unwrap();
        let tail: Vec<&str> = s.captured().iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["    build", "  test", "deploy"]);
    }

    #[test]
    fn test_unset_restores_declared_dependencies() {
        let (_dir, mut s) = session();
        run(&mut s, "flowdep set deploy build").unwrap();
        run(&mut s, "flowdep unset deploy").unwrap();
        assert!(s.config().flowdeps_override("deploy").is_none());
    }
}

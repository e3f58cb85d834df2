// src/cli/handlers/command.rs

//! `clk command`: introspection of the command tree.

use crate::cli::handlers::commons::tree_lines;
use crate::constants::APP_NAME;
use crate::core::command::{Command, Invocation};
use crate::core::command_resolution::ResolveError;
use crate::core::resolvers::alias::expand_dotted_head;
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::Result;
use colored::Colorize;

pub fn command(path: &str) -> Command {
    let mut group = Command::group(path)
        .with_help(t!("command.help"))
        .with_child("which", which_command)
        .with_child("tree", tree_command);
    group.memory.enabled = false;
    group
}

fn which_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("command.which.help"))
        .with_param(
            ParamSpec::remainder("command")
                .required()
                .help(t!("command.param.command")),
        )
        .with_callback(which);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

fn tree_command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("command.tree.help"))
        .with_param(ParamSpec::argument("path").help(t!("command.param.path")))
        .with_callback(tree);
    cmd.handle_dry_run = true;
    cmd.memory.enabled = false;
    cmd
}

/// Follows the tokens to a command path. Every token must name a command.
fn locate(session: &Session, raw: &[String]) -> Result<String> {
    let tokens = expand_dotted_head(raw);
    let (path, consumed) = session.path_of_args(&tokens)?;
    if consumed < tokens.len() {
        let segment = tokens.get(consumed).cloned().unwrap_or_default();
        return Err(ResolveError::NotFound {
            path: tokens.join("."),
            segment,
        }
        .into());
    }
    Ok(path)
}

fn which(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let path = locate(session, invocation.get_many("command"))?;
    let resolved = session.resolve(&path)?;
    let mut lines = vec![format!(
        "{} {}",
        path.cyan().bold(),
        format!(t!("command.info.resolver"), resolver = resolved.resolver).dimmed()
    )];
    if let Some(original) = &resolved.command.original_command {
        lines.push(format!(t!("command.info.stands_for"), path = original.path));
    }
    if let Some(help) = &resolved.command.help {
        lines.push(help.clone());
    }
    for line in lines {
        session.emit(&line);
    }
    Ok(())
}

fn tree(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let raw: Vec<String> = invocation
        .get_one("path")
        .map(|p| p.split('.').filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let path = locate(session, &raw)?;

    let mut lines = Vec::new();
    session.run_isolated(|s| {
        // Listing must survive commands that fail to load.
        s.config_mut().resilient = true;
        let command = s.resolve_or_broken(&path);
        tree_lines(s, &command, 0, &mut lines);
        Ok(())
    })?;
    if path != APP_NAME {
        session.emit(&path.bold().to_string());
        lines.iter_mut().for_each(|l| l.insert_str(0, "  "));
    }
    for line in lines {
        session.emit(&line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::program;
    use crate::core::session::SessionOptions;
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

    fn run(s: &mut Session, line: &str) -> Result<()> {
        s.execute(&shlex::split(line).unwrap())
    }

    #[test]
    fn test_which_reports_the_resolver() {
        let (_dir, mut s) = session();
        run(&mut s, "command which parameter").unwrap();
        assert!(s.captured().iter().any(|l| l.contains("resolved by core")));
        run(&mut s, "command which parameter.set").unwrap();
        assert!(s.captured().iter().any(|l| l.contains("parameter.set") && l.contains("resolved by group")));

        run(&mut s, "alias set hi echo hello").unwrap();
        run(&mut s, "command which hi").unwrap();
        assert!(s.captured().iter().any(|l| l.contains("resolved by alias")));
    }

    #[test]
    fn test_which_unknown_command_fails() {
        let (_dir, mut s) = session();
        let err = run(&mut s, "command which parameter nope").unwrap_err();
        assert!(err.downcast_ref::<ResolveError>().is_some());
    }

    #[test]
    fn test_tree_lists_subcommands() {
        let (_dir, mut s) = session();
        run(&mut s, "command tree").unwrap();
        let lines = s.captured();
        assert!(lines.iter().any(|l| l.contains("flowdep")));
        assert!(lines.iter().any(|l| l.trim() == "graph"));

        run(&mut s, "command tree parameter").unwrap();
        assert!(s.captured().iter().any(|l| l.trim() == "append"));
    }
}

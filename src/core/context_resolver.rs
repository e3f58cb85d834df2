// src/core/context_resolver.rs

//! Walks a command line from the root to the leaf command, one level at a time.
//!
//! Each level is parsed from its remembered parameters followed by what the user typed
//! for it. The root is parsed repeatedly: its options (project, workspace, extensions)
//! change the profile stack, and therefore its own remembered parameters, so parsing
//! stops only once the injected prefix no longer changes.

use crate::constants::{APP_NAME, MAX_ROOT_PARSE_PASSES, NO_PARAMETERS_FLAG};
use crate::core::arg_parser::{self, LevelOutcome};
use crate::core::command::{Command, Invocation, join_path};
use crate::core::command_resolution::ResolveError;
use crate::core::config::ConfigOptions;
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::Result;
use std::path::PathBuf;
use std::rc::Rc;

/// One parsed level of the command line.
#[derive(Debug, Clone)]
pub struct Level {
    pub command: Rc<Command>,
    pub invocation: Invocation,
}

#[derive(Debug)]
pub enum ContextOutcome {
    /// Every level parsed, root first.
    Ready(Vec<Level>),
    /// Help was requested; the rendered text.
    Help(String),
}

/// The options of the root command that shape the profile stack.
pub fn root_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::option("project").help("Use this directory as the project"),
        ParamSpec::option("workspace").help("Use this directory as the workspace"),
        ParamSpec::option("enable-extension")
            .multiple()
            .help("Enable an extension for this invocation"),
        ParamSpec::option("disable-extension")
            .multiple()
            .help("Disable an extension for this invocation"),
        ParamSpec::flag("flow-verbose").help("Show the flow steps being run"),
        ParamSpec::flag("dry-run").help("Do not run commands that would change anything"),
    ]
}

/// Applies the root options on top of `base`. Absent options keep the base values.
pub fn options_from_root(invocation: &Invocation, base: &ConfigOptions) -> ConfigOptions {
    let mut options = base.clone();
    if let Some(project) = invocation.get_one("project") {
        options.project = Some(PathBuf::from(project));
    }
    if let Some(workspace) = invocation.get_one("workspace") {
        options.workspace = Some(PathBuf::from(workspace));
    }
    for name in invocation.get_many("enable-extension") {
        options.disable_extensions.retain(|n| n != name);
        if !options.enable_extensions.contains(name) {
            options.enable_extensions.push(name.clone());
        }
    }
    for name in invocation.get_many("disable-extension") {
        options.enable_extensions.retain(|n| n != name);
        if !options.disable_extensions.contains(name) {
            options.disable_extensions.push(name.clone());
        }
    }
    if invocation.is_explicit("flow-verbose") {
        options.flow_verbose = invocation.flag("flow-verbose");
    }
    if invocation.is_explicit("dry-run") {
        options.dry_run = invocation.flag("dry-run");
    }
    options
}

fn help_outcome(session: &Session, command: &Command) -> ContextOutcome {
    let epilog = command.help_renderer.after_help(command, session.config());
    let children = session.child_summaries(command);
    ContextOutcome::Help(arg_parser::render_help(command, &epilog, &children))
}

/// Parses the root until its remembered prefix is stable.
fn parse_root(
    session: &mut Session,
    root: &Command,
    args: &[String],
    implicit_only: bool,
) -> Result<Option<arg_parser::LevelMatches>> {
    let resilient = session.config().resilient;
    let base_options = session.config().options.clone();
    let mut injected = root
        .memory
        .injected(session.config(), APP_NAME, implicit_only);

    for pass in 1..=MAX_ROOT_PARSE_PASSES {
        let matches = match arg_parser::parse_level(root, &injected, args, resilient)? {
            LevelOutcome::Parsed(matches) => matches,
            LevelOutcome::Help => {
                session
                    .config_mut()
                    .record_parameters(APP_NAME, &injected, true);
                return Ok(None);
            }
        };
        let options = options_from_root(&matches.invocation, &base_options);
        if options != session.config().options {
            session.config_mut().options = options;
            session.refresh()?;
        }
        let next = root
            .memory
            .injected(session.config(), APP_NAME, implicit_only);
        if next == injected {
            log::trace!("Root arguments stable after {} pass(es)", pass);
            session
                .config_mut()
                .record_parameters(APP_NAME, &injected, true);
            return Ok(Some(matches));
        }
        log::debug!("Root remembered parameters changed to {:?}, parsing again", next);
        injected = next;
    }

    log::warn!(
        "Remembered root parameters did not settle after {} passes, using {:?}",
        MAX_ROOT_PARSE_PASSES,
        injected
    );
    session
        .config_mut()
        .record_parameters(APP_NAME, &injected, true);
    match arg_parser::parse_level(root, &injected, args, resilient)? {
        LevelOutcome::Parsed(matches) => Ok(Some(matches)),
        LevelOutcome::Help => Ok(None),
    }
}

/// Resolves and parses every level named by `args`.
pub fn resolve_context(session: &mut Session, args: &[String]) -> Result<ContextOutcome> {
    let implicit_only = args.iter().any(|a| a == NO_PARAMETERS_FLAG);
    let root = session.resolve(APP_NAME)?.command;

    let Some(root_matches) = parse_root(session, &root, args, implicit_only)? else {
        return Ok(help_outcome(session, &root));
    };

    let mut levels = vec![Level {
        command: root,
        invocation: root_matches.invocation,
    }];
    let mut requested = APP_NAME.to_string();
    let mut next = root_matches.subcommand;

    while let Some((name, rest)) = next.take() {
        requested = join_path(&requested, &name);
        let command = session.resolve(&requested)?.command;
        if let Some(reason) = &command.broken {
            if !session.config().resilient {
                return Err(ResolveError::Load {
                    path: requested,
                    reason: reason.clone(),
                }
                .into());
            }
        }

        let injected = command
            .memory
            .injected(session.config(), &command.path, implicit_only);
        session
            .config_mut()
            .record_parameters(&command.path, &injected, command.is_group);
        let resilient = session.config().resilient;
        let matches = match arg_parser::parse_level(&command, &injected, &rest, resilient)? {
            LevelOutcome::Parsed(matches) => matches,
            LevelOutcome::Help => return Ok(help_outcome(session, &command)),
        };

        next = matches.subcommand;
        if next.is_none() && command.is_group && !resilient {
            if let Some(default) = &command.default_subcommand {
                log::debug!("Using default subcommand '{}' of '{}'", default, command.path);
                next = Some((default.clone(), Vec::new()));
            }
        }
        levels.push(Level {
            command,
            invocation: matches.invocation,
        });
    }
    Ok(ContextOutcome::Ready(levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::program;
    use crate::constants::{LOCAL_PROFILE_DIR, SETTINGS_FILENAME, VERSION_FILENAME};
    use crate::core::command::{ParsedValue, ValueSource};
    use crate::core::migration;
    use crate::core::resolvers::hook::HookRegistry;
    use crate::core::session::SessionOptions;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    fn write_profile(location: &Path, settings: Value) {
        fs::create_dir_all(location).unwrap();
        fs::write(location.join(SETTINGS_FILENAME), settings.to_string()).unwrap();
        fs::write(location.join(VERSION_FILENAME), migration::latest_version().to_string()).unwrap();
    }

    fn session(global_settings: Value, hooks: HookRegistry) -> (TempDir, Session) {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global");
        let cwd = dir.path().join("work");
        fs::create_dir_all(&cwd).unwrap();
        write_profile(&global, global_settings);
        let options = SessionOptions {
            global_dir: Some(global),
            cwd,
            hooks,
            capture_output: true,
            ..Default::default()
        };
        (dir, Session::new(options, program()).unwrap())
    }

    fn args(line: &str) -> Vec<String> {
        shlex::split(line).unwrap()
    }

    fn level_paths(outcome: ContextOutcome) -> Vec<String> {
        match outcome {
            ContextOutcome::Ready(levels) => levels.iter().map(|l| l.command.path.clone()).collect(),
            ContextOutcome::Help(text) => panic!("unexpected help: {}", text),
        }
    }

    fn tool_hooks() -> HookRegistry {
        let mut hooks = HookRegistry::default();
        hooks.register_command("tool", |p| {
            let mut group = Command::group(p);
            group.default_subcommand = Some("status".to_string());
            group
        });
        hooks.register_command("tool.status", |p| {
            Command::new(p).with_callback(|s: &mut Session, _: &Invocation| {
                s.emit("status ran");
                Ok(())
            })
        });
        hooks
    }

    fn invocation(values: &[(&str, &[&str], ValueSource)]) -> Invocation {
        let mut inv = Invocation::default();
        for (name, vals, source) in values {
            inv.values.insert(
                name.to_string(),
                ParsedValue {
                    values: vals.iter().map(|v| v.to_string()).collect(),
                    source: *source,
                },
            );
        }
        inv
    }

    #[test]
    fn test_root_options_overlay_base() {
        let base = ConfigOptions {
            disable_extensions: vec!["tools".into()],
            dry_run: true,
            ..Default::default()
        };
        let inv = invocation(&[
            ("project", &["/p"], ValueSource::CommandLine),
            ("enable-extension", &["tools"], ValueSource::CommandLine),
            ("dry-run", &["false"], ValueSource::Default),
        ]);
        let options = options_from_root(&inv, &base);
        assert_eq!(options.project, Some(PathBuf::from("/p")));
        assert_eq!(options.enable_extensions, vec!["tools"]);
        assert!(options.disable_extensions.is_empty());
        assert!(options.dry_run);
    }

    #[test]
    fn test_root_parameters_are_parsed_until_stable() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        write_profile(
            &first.join(LOCAL_PROFILE_DIR),
            json!({"parameters": {"clk": ["--project", second.display().to_string()]}}),
        );
        write_profile(
            &second.join(LOCAL_PROFILE_DIR),
            json!({"parameters": {
                "clk": ["--project", second.display().to_string()],
                "echo": ["from-second"]
            }}),
        );
        let (_home, mut s) = session(
            json!({"parameters": {"clk": ["--project", first.display().to_string()]}}),
            HookRegistry::default(),
        );

        s.execute(&args("echo x")).unwrap();
        assert_eq!(s.captured(), ["from-second x"]);
    }

    #[test]
    fn test_unsettled_root_parameters_still_parse() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        write_profile(
            &first.join(LOCAL_PROFILE_DIR),
            json!({"parameters": {"clk": ["--project", second.display().to_string()]}}),
        );
        write_profile(
            &second.join(LOCAL_PROFILE_DIR),
            json!({"parameters": {"clk": ["--project", first.display().to_string()]}}),
        );
        let (_home, mut s) = session(
            json!({"parameters": {"clk": ["--project", first.display().to_string()]}}),
            HookRegistry::default(),
        );

        s.execute(&args("echo x")).unwrap();
        assert_eq!(s.captured(), ["x"]);
    }

    #[test]
    fn test_group_without_subcommand_runs_its_default() {
        let (_dir, mut s) = session(json!({}), tool_hooks());
        let paths = level_paths(resolve_context(&mut s, &args("tool")).unwrap());
        assert_eq!(paths, ["clk", "tool", "tool.status"]);

        s.execute(&args("tool")).unwrap();
        assert_eq!(s.captured(), ["status ran"]);
    }

    #[test]
    fn test_resilient_parsing_skips_the_default_subcommand() {
        let (_dir, mut s) = session(json!({}), tool_hooks());
        s.config_mut().resilient = true;
        let paths = level_paths(resolve_context(&mut s, &args("tool")).unwrap());
        assert_eq!(paths, ["clk", "tool"]);
    }

    #[test]
    fn test_help_shows_the_parameters_injected_by_this_run() {
        let mut hooks = HookRegistry::default();
        hooks.register_command("deploy", |p| {
            Command::new(p)
                .with_param(ParamSpec::option("tag"))
                .with_callback(|_: &mut Session, _: &Invocation| Ok(()))
        });
        let (_dir, mut s) = session(json!({"parameters": {"deploy": ["--tag", "v1"]}}), hooks);
        let ContextOutcome::Help(text) = resolve_context(&mut s, &args("deploy --help")).unwrap() else {
            panic!("expected help");
        };
        assert!(text.contains("Remembered parameters: --tag v1"), "{text}");
        assert_eq!(s.config().recorded_parameters("deploy"), ["--tag", "v1"]);

        let ContextOutcome::Help(text) =
            resolve_context(&mut s, &args("deploy --no-parameters --help")).unwrap()
        else {
            panic!("expected help");
        };
        assert!(!text.contains("Remembered parameters"), "{text}");
    }
}

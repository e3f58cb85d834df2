// src/core/resolvers/external.rs

use crate::core::arg_parser;
use crate::core::command::{Command, Invocation};
use crate::core::config::value_to_tokens;
use crate::core::metadata::parse_help_output;
use crate::core::resolver::{CommandResolver, ResolveContext};
use crate::core::session::Session;
use crate::models::ExternalMetadata;
use crate::system::environment::value_var_name;
use crate::system::executor;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The directories listed under `customcommands.executablepaths`, highest precedence first.
pub fn executable_dirs(ctx: &ResolveContext<'_>) -> Vec<PathBuf> {
    let Some(value) = ctx
        .config
        .merged()
        .get_accumulated("customcommands", "executablepaths")
    else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = value_to_tokens(value).into_iter().map(PathBuf::from).collect();
    dirs.reverse();
    dirs
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Every executable found in the search directories, keyed by dotted path.
/// The first directory listing a name wins.
fn discover(ctx: &ResolveContext<'_>) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    for dir in executable_dirs(ctx) {
        let Ok(entries) = fs::read_dir(&dir) else {
            log::trace!("Skipping missing executable directory '{}'", dir.display());
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || name.ends_with('.') || !is_executable(&path) {
                continue;
            }
            found.entry(name.to_string()).or_insert(path);
        }
    }
    found
}

fn load_metadata(ctx: &ResolveContext<'_>, path: &str, executable: &Path) -> Result<ExternalMetadata> {
    if let Some(metadata) = ctx.external_cache.borrow_mut().lookup(executable) {
        log::trace!("Using cached metadata of '{}'", executable.display());
        return Ok(metadata);
    }
    let output = executor::capture_output(executable, &["--help"], &ctx.config.child_environment(path))
        .with_context(|| format!("Failed to query '{} --help'", executable.display()))?;
    let metadata = parse_help_output(&output)
        .with_context(|| format!("Invalid metadata printed by '{}'", executable.display()))?;
    ctx.external_cache
        .borrow_mut()
        .store(executable, metadata.clone());
    Ok(metadata)
}

/// Values of every parameter exported as `CLK___<NAME>` variables.
pub fn value_environment(invocation: &Invocation) -> BTreeMap<String, String> {
    invocation
        .values
        .iter()
        .map(|(name, parsed)| (value_var_name(name), parsed.values.join(" ")))
        .collect()
}

/// Executables found in the configured directories, described by their `--help` output.
#[derive(Debug, Default)]
pub struct ExternalResolver;

impl CommandResolver for ExternalResolver {
    fn name(&self) -> &'static str {
        "external"
    }

    fn list_paths(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(discover(ctx).into_keys().collect())
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        _parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        let Some(executable) = discover(ctx).remove(path) else {
            return Ok(None);
        };
        let metadata = load_metadata(ctx, path, &executable)?;

        let mut command = Command::new(path);
        if !metadata.help.is_empty() {
            command.help = Some(metadata.help.clone());
        }
        command.params = metadata.params;
        command.flowdepends = metadata.flowdepends;
        command.flow_links = metadata.flow_links;
        command.ignore_unknown_options = metadata.ignore_unknown_options;
        command.handle_dry_run = metadata.handle_dry_run;

        let params = command.params.clone();
        let program = executable.display().to_string();
        command.callback = Some(Rc::new(
            move |session: &mut Session, invocation: &Invocation| {
                let args = arg_parser::to_args(&params, invocation);
                let config = session.config();
                // CLK_DRY_RUN is already part of the derived environment.
                let mut env = config.child_environment(&invocation.path);
                env.extend(value_environment(invocation));
                let cwd = config.cwd.clone();
                executor::run_process(&program, &args, &cwd, &env, session.token())?;
                Ok(())
            },
        ));
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::{ParsedValue, ValueSource};

    #[test]
    fn test_value_environment_names() {
        let mut inv = Invocation::default();
        inv.values.insert(
            "dry-level".into(),
            ParsedValue {
                values: vec!["a".into(), "b".into()],
                source: ValueSource::CommandLine,
            },
        );
        let env = value_environment(&inv);
        assert_eq!(env.get("CLK___DRY_LEVEL").map(String::as_str), Some("a b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_only_executable_files_count() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("deploy");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("notes");
        fs::write(&plain, "text").unwrap();
        assert!(is_executable(&exe));
        assert!(!is_executable(&plain));
        assert!(!is_executable(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_command_runs_with_its_declared_parameters() {
        use crate::cli::program;
        use crate::core::session::SessionOptions;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global");
        let cwd = dir.path().join("work");
        let bin = global.join(crate::constants::EXECUTABLES_DIR);
        let out = dir.path().join("greet.out");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(&cwd).unwrap();

        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--help\" ]; then\n\
             printf 'Greets someone.\\n--\\nO:name:str:Who to greet\\nF:loud:Shout\\nA:rest:str:Extra words:-1\\n'\n\
             exit 0\n\
             fi\n\
             printf '%s|%s\\n' \"$*\" \"$CLK___NAME\" > '{}'\n",
            out.display()
        );
        let exe = bin.join("greet");
        fs::write(&exe, script).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let options = SessionOptions {
            global_dir: Some(global),
            cwd,
            capture_output: true,
            ..Default::default()
        };
        let mut s = Session::new(options, program()).unwrap();
        let resolved = s.resolve("greet").unwrap();
        assert_eq!(resolved.resolver, "external");
        assert_eq!(resolved.command.help.as_deref(), Some("Greets someone."));

        s.execute(&shlex::split("greet --name bob --loud x y").unwrap())
            .unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "--name bob --loud x y|bob\n"
        );
    }
}

// src/core/resolvers/custom.rs

use crate::constants::APP_NAME;
use crate::core::command::{Command, Deprecation, Invocation};
use crate::core::config::value_to_tokens;
use crate::core::resolver::{CommandResolver, ResolveContext};
use crate::core::session::Session;
use crate::models::{
    Arity, CustomCommandDefinition, CustomParamDefinition, FlowLink, ParamSpec, ValueType,
};
use crate::system::executor::{self, CommandLine};
use anyhow::{Context, Result, anyhow, bail};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use walkdir::WalkDir;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{([A-Za-z0-9_-]+)\}").unwrap();
}

const DEFINITION_EXTENSION: &str = "toml";

/// The directories listed under `customcommands.commandpaths`, highest precedence first.
fn command_dirs(ctx: &ResolveContext<'_>) -> Vec<PathBuf> {
    let Some(value) = ctx
        .config
        .merged()
        .get_accumulated("customcommands", "commandpaths")
    else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = value_to_tokens(value).into_iter().map(PathBuf::from).collect();
    dirs.reverse();
    dirs
}

/// `git/sync.toml` and `git.sync.toml` both define `git.sync`.
fn definition_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<&str> = relative.iter().filter_map(|s| s.to_str()).collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.starts_with('.')) {
        return None;
    }
    Some(segments.join("."))
}

fn discover(ctx: &ResolveContext<'_>) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    for dir in command_dirs(ctx) {
        if !dir.is_dir() {
            log::trace!("Skipping missing command directory '{}'", dir.display());
            continue;
        }
        let files = WalkDir::new(&dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|x| x == DEFINITION_EXTENSION));
        for entry in files {
            if let Some(path) = definition_path(&dir, entry.path()) {
                found.entry(path).or_insert_with(|| entry.path().to_path_buf());
            }
        }
    }
    found
}

/// Reads a definition file.
pub fn load_definition(file: &Path) -> Result<CustomCommandDefinition> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read '{}'", file.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse '{}'", file.display()))
}

fn value_type_of(def: &CustomParamDefinition) -> Result<ValueType> {
    match &def.value_type {
        Some(raw) => raw
            .parse()
            .map_err(|reason: String| anyhow!("parameter '{}': {}", def.name, reason)),
        None => Ok(ValueType::String),
    }
}

fn with_common(mut spec: ParamSpec, def: &CustomParamDefinition) -> ParamSpec {
    if let Some(help) = &def.help {
        spec = spec.help(help);
    }
    if let Some(short) = def.short {
        spec = spec.short(short);
    }
    if let Some(default) = &def.default {
        spec.default = default.clone().into_vec();
    }
    spec
}

/// Turns the parameter tables of a definition into parameter specifications.
pub fn build_params(definition: &CustomCommandDefinition) -> Result<Vec<ParamSpec>> {
    let mut params = Vec::new();
    for def in &definition.options {
        let mut spec = with_common(ParamSpec::option(&def.name), def).value_type(value_type_of(def)?);
        if def.multiple {
            spec = spec.multiple();
        }
        spec.required = def.required;
        params.push(spec);
    }
    for def in &definition.flags {
        let spec = with_common(ParamSpec::flag(&def.name), def);
        if let Some(bad) = spec.default.iter().find(|v| v.parse::<bool>().is_err()) {
            bail!("flag '{}': default must be true or false, found '{}'", def.name, bad);
        }
        params.push(spec);
    }
    for def in &definition.arguments {
        let mut spec =
            with_common(ParamSpec::argument(&def.name), def).value_type(value_type_of(def)?);
        spec.arity = match def.nargs {
            None | Some(1) => Arity::One,
            Some(-1) => Arity::Many,
            Some(n) if n > 1 => Arity::Exactly(usize::try_from(n).unwrap_or(1)),
            Some(n) => bail!("argument '{}': nargs must be -1 or positive, found {}", def.name, n),
        };
        spec.required = def.required || (def.default.is_none() && spec.arity != Arity::Many);
        params.push(spec);
    }
    Ok(params)
}

/// Substitutes `{param}` placeholders in already split tokens.
///
/// A token that is exactly one placeholder expands to every value of the parameter, so
/// multi-valued parameters become several arguments. Unknown names are left untouched.
pub fn substitute(tokens: &[String], invocation: &Invocation) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(caps) = PLACEHOLDER_RE.captures(token) {
            let whole = caps.get(0).is_some_and(|m| m.as_str().len() == token.len());
            let name = caps.get(1).map_or("", |m| m.as_str());
            if whole && invocation.values.contains_key(name) {
                out.extend(invocation.get_many(name).iter().cloned());
                continue;
            }
        }
        let replaced = PLACEHOLDER_RE.replace_all(token, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match invocation.values.get(name) {
                Some(parsed) => parsed.values.join(" "),
                None => caps.get(0).map_or("", |m| m.as_str()).to_string(),
            }
        });
        out.push(replaced.into_owned());
    }
    out
}

fn run_lines(session: &mut Session, invocation: &Invocation, lines: &[String]) -> Result<()> {
    for raw in lines {
        let line = CommandLine::parse(raw)?;
        let tokens = substitute(&line.words, invocation);
        let Some((program, args)) = tokens.split_first() else {
            continue;
        };

        if program == APP_NAME {
            session.run_nested(args)?;
            continue;
        }
        let config = session.config();
        let env = config.child_environment(&invocation.path);
        let cwd = config.cwd.clone();
        line.settle(executor::run_process(program, args, &cwd, &env, session.token()))?;
    }
    Ok(())
}

/// Builds the command described by a definition.
pub fn command_from_definition(path: &str, definition: CustomCommandDefinition) -> Result<Command> {
    let params = build_params(&definition)?;
    let mut command = if definition.group {
        Command::group(path)
    } else {
        Command::new(path)
    };
    command.help = definition.help.clone();
    command.params = params;
    command.flowdepends = definition.flowdepends.clone();
    command.flow_links = definition
        .flowoptions
        .iter()
        .map(|(target, params)| FlowLink {
            target: target.clone(),
            params: params.clone(),
        })
        .collect();
    command.handle_dry_run = definition.handle_dry_run;
    command.default_subcommand = definition.default_command.clone();
    command.deprecation = definition
        .deprecated
        .clone()
        .map(|message| Deprecation { message });

    if !definition.run.is_empty() {
        let lines = definition.run;
        command.callback = Some(Rc::new(
            move |session: &mut Session, invocation: &Invocation| {
                run_lines(session, invocation, &lines)
            },
        ));
    }
    Ok(command)
}

/// Declarative commands read from `*.toml` files in the configured directories.
#[derive(Debug, Default)]
pub struct CustomResolver;

impl CommandResolver for CustomResolver {
    fn name(&self) -> &'static str {
        "custom"
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
        let Some(file) = discover(ctx).remove(path) else {
            return Ok(None);
        };
        log::debug!("Loading custom command '{}' from '{}'", path, file.display());
        let definition = load_definition(&file)?;
        command_from_definition(path, definition)
            .with_context(|| format!("Invalid definition in '{}'", file.display()))
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::{ParsedValue, ValueSource};
    use crate::models::ParamKind;

    fn invocation(values: &[(&str, &[&str])]) -> Invocation {
        let mut inv = Invocation::default();
        for (name, vals) in values {
            inv.values.insert(
                name.to_string(),
                ParsedValue {
                    values: vals.iter().map(|v| v.to_string()).collect(),
                    source: ValueSource::CommandLine,
                },
            );
        }
        inv
    }

    #[test]
    fn test_definition_paths() {
        let root = Path::new("/cmds");
        assert_eq!(
            definition_path(root, Path::new("/cmds/git/sync.toml")),
            Some("git.sync".to_string())
        );
        assert_eq!(
            definition_path(root, Path::new("/cmds/git.sync.toml")),
            Some("git.sync".to_string())
        );
        assert_eq!(definition_path(root, Path::new("/cmds/.hidden/x.toml")), None);
    }

    #[test]
    fn test_substitution_expands_whole_placeholders() {
        let inv = invocation(&[("files", &["a", "b"]), ("target", &["prod"])]);
        let tokens: Vec<String> = ["ls", "{files}", "--env={target}", "{unknown}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            substitute(&tokens, &inv),
            vec!["ls", "a", "b", "--env=prod", "{unknown}"]
        );
    }

    #[test]
    fn test_definition_from_toml() {
        let definition: CustomCommandDefinition = toml::from_str(
            r#"
help = "Deploy things"
run = ["echo deploying {target}"]
flowdepends = ["build"]
deprecated = "use ship instead"

[[options]]
name = "target"
type = "[dev|prod]"
default = "dev"

[[flags]]
name = "force"

[[arguments]]
name = "services"
nargs = -1

[flowoptions]
build = ["target"]
"#,
        )
        .unwrap();
        let command = command_from_definition("deploy", definition).unwrap();
        assert_eq!(command.params.len(), 3);
        assert_eq!(command.params[0].default, vec!["dev"]);
        assert_eq!(command.params[1].kind, ParamKind::Flag);
        assert_eq!(command.params[2].arity, Arity::Many);
        assert!(!command.params[2].required);
        assert_eq!(command.flowdepends, vec!["build"]);
        assert_eq!(command.flow_links[0].target, "build");
        assert!(command.deprecation.is_some());
        assert!(command.callback.is_some());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let parsed: Result<CustomCommandDefinition, _> = toml::from_str("halp = \"x\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_bad_flag_default_is_reported() {
        let definition: CustomCommandDefinition =
            toml::from_str("[[flags]]\nname = \"force\"\ndefault = \"maybe\"\n").unwrap();
        let err = command_from_definition("x", definition).unwrap_err();
        assert!(err.to_string().contains("force"));
    }
}

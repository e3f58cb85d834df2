// src/core/arg_parser.rs

//! Turns the parameter specifications of one command level into a `clap` parser, and the
//! parser's matches back into an [`Invocation`].
//!
//! Every level is parsed from `[name, remembered..., user...]`. A second, error-tolerant
//! parse of the user's tokens alone tells values typed by the user apart from remembered
//! ones.

use crate::constants::NO_PARAMETERS_FLAG;
use crate::core::command::{Command, Invocation, ParsedValue, ValueSource};
use crate::models::{Arity, ParamKind, ParamOrigin, ParamSpec, ValueType};
use clap::builder::{BoolishValueParser, PossibleValuesParser, ValueParser};
use clap::error::ErrorKind;
use clap::parser::ValueSource as ClapSource;
use clap::{Arg, ArgAction, ArgMatches, value_parser};
use thiserror::Error;

/// Id of the hidden catch-all added to commands that ignore unknown options.
pub const UNKNOWN_ARGS: &str = "__unknown";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{message}")]
    Usage { path: String, message: String },
}

/// What parsing one level produced.
#[derive(Debug)]
pub enum LevelOutcome {
    Parsed(LevelMatches),
    /// `--help` was requested at this level.
    Help,
}

#[derive(Debug, Clone)]
pub struct LevelMatches {
    pub invocation: Invocation,
    /// For groups: the subcommand token and every token after it.
    pub subcommand: Option<(String, Vec<String>)>,
}

fn no_flag(name: &str) -> String {
    format!("no-{}", name)
}

fn value_parser_for(value_type: &ValueType) -> ValueParser {
    match value_type {
        ValueType::String | ValueType::Path => ValueParser::string(),
        ValueType::Integer => value_parser!(i64).into(),
        ValueType::Float => value_parser!(f64).into(),
        ValueType::Bool => BoolishValueParser::new().into(),
        ValueType::Choice(choices) => PossibleValuesParser::new(choices.clone()).into(),
    }
}

fn builtin_params() -> ParamSpec {
    ParamSpec::flag(NO_PARAMETERS_FLAG)
        .help("Ignore remembered parameters from explicit profiles")
        .origin(ParamOrigin::Builtin)
}

/// Every parameter a level accepts, in declaration order, builtins last.
pub fn effective_params(command: &Command) -> Vec<ParamSpec> {
    let mut params = command.params.clone();
    params.push(builtin_params());
    if command.ignore_unknown_options && !params.iter().any(|p| p.trailing) && !command.is_group
    {
        params.push(ParamSpec::remainder(UNKNOWN_ARGS).origin(ParamOrigin::Builtin));
    }
    params
}

fn with_help(arg: Arg, spec: &ParamSpec) -> Arg {
    match &spec.help {
        Some(help) => arg.help(help.clone()),
        None => arg,
    }
}

fn build_args(spec: &ParamSpec) -> Vec<Arg> {
    match spec.kind {
        ParamKind::Flag => {
            let mut positive = with_help(
                Arg::new(spec.name.clone())
                    .long(spec.long().to_string())
                    .action(ArgAction::SetTrue),
                spec,
            );
            if let Some(short) = spec.short {
                positive = positive.short(short);
            }
            if spec.origin == ParamOrigin::Builtin {
                return vec![positive];
            }
            let negative_name = no_flag(&spec.name);
            let negative = Arg::new(negative_name.clone())
                .long(negative_name)
                .action(ArgAction::SetTrue)
                .hide(true)
                .overrides_with(spec.name.clone());
            vec![positive.overrides_with(no_flag(&spec.name)), negative]
        }
        ParamKind::Option => {
            let mut arg = with_help(
                Arg::new(spec.name.clone())
                    .long(spec.long().to_string())
                    .value_name(spec.name.to_uppercase())
                    .value_parser(value_parser_for(&spec.value_type))
                    .required(spec.required && spec.default.is_empty()),
                spec,
            );
            arg = match spec.arity {
                Arity::One => arg.action(ArgAction::Set).num_args(1),
                Arity::Exactly(n) => arg.action(ArgAction::Set).num_args(n),
                Arity::Many => arg.action(ArgAction::Append).num_args(1),
            };
            if let Some(short) = spec.short {
                arg = arg.short(short);
            }
            if !spec.default.is_empty() {
                arg = arg.default_values(spec.default.clone());
            }
            vec![arg]
        }
        ParamKind::Argument => {
            let mut arg = with_help(
                Arg::new(spec.name.clone())
                    .value_name(spec.name.to_uppercase())
                    .value_parser(value_parser_for(&spec.value_type))
                    .required(spec.required && spec.default.is_empty()),
                spec,
            );
            arg = match spec.arity {
                Arity::One => arg.num_args(1),
                Arity::Exactly(n) => arg.num_args(n),
                Arity::Many if spec.required => arg.num_args(1..),
                Arity::Many => arg.num_args(0..),
            };
            if spec.trailing {
                arg = arg.trailing_var_arg(true).allow_hyphen_values(true);
            }
            if spec.name == UNKNOWN_ARGS {
                arg = arg.hide(true);
            }
            if !spec.default.is_empty() {
                arg = arg.default_values(spec.default.clone());
            }
            vec![arg]
        }
    }
}

/// Builds the parser of one level.
pub fn build_clap(command: &Command, resilient: bool) -> clap::Command {
    let mut cmd = clap::Command::new(command.name().to_string())
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .args_override_self(true)
        .ignore_errors(resilient);
    if let Some(help) = &command.help {
        cmd = cmd
            .about(command.short_help().to_string())
            .long_about(help.clone());
    }
    if command.is_group {
        cmd = cmd
            .allow_external_subcommands(true)
            .external_subcommand_value_parser(value_parser!(String))
            .subcommand_value_name("COMMAND");
    }
    for spec in effective_params(command) {
        for arg in build_args(&spec) {
            cmd = cmd.arg(arg);
        }
    }
    cmd
}

/// Renders the help of a level. `children` are `(name, short help)` pairs.
pub fn render_help(command: &Command, after_help: &str, children: &[(String, String)]) -> String {
    let mut sections = Vec::new();
    if !children.is_empty() {
        let width = children.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        let mut lines = vec!["Commands:".to_string()];
        lines.extend(
            children
                .iter()
                .map(|(name, help)| format!("  {:width$}  {}", name, help, width = width)),
        );
        sections.push(lines.join("\n"));
    }
    if !after_help.is_empty() {
        sections.push(after_help.to_string());
    }
    let mut cmd = build_clap(command, true);
    if !sections.is_empty() {
        cmd = cmd.after_help(sections.join("\n\n"));
    }
    cmd.render_long_help().to_string()
}

fn argv(command: &Command, parts: &[&[String]]) -> Vec<String> {
    let mut argv = vec![command.name().to_string()];
    for part in parts {
        argv.extend(part.iter().cloned());
    }
    argv
}

fn raw_values(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches.try_get_raw(id).ok().flatten().map(|values| {
        values
            .map(|v| v.to_string_lossy().into_owned())
            .collect()
    })
}

fn set_on_command_line(matches: Option<&ArgMatches>, id: &str) -> bool {
    matches.is_some_and(|m| {
        m.try_get_raw(id).ok().flatten().is_some()
            && m.value_source(id) == Some(ClapSource::CommandLine)
    })
}

fn flag_set(matches: &ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied() == Some(true)
        && matches.value_source(id) == Some(ClapSource::CommandLine)
}

fn extract_value(
    spec: &ParamSpec,
    full: &ArgMatches,
    user: Option<&ArgMatches>,
) -> Option<ParsedValue> {
    let explicit_source = |typed: bool| {
        if typed || user.is_none() {
            ValueSource::CommandLine
        } else {
            ValueSource::Remembered
        }
    };
    if spec.kind == ParamKind::Flag {
        let negative = no_flag(&spec.name);
        let negative_defined = spec.origin != ParamOrigin::Builtin;
        let (value, typed) = if flag_set(full, &spec.name) {
            ("true", user.is_some_and(|u| flag_set(u, &spec.name)))
        } else if negative_defined && flag_set(full, &negative) {
            ("false", user.is_some_and(|u| flag_set(u, &negative)))
        } else {
            let default = spec.default.last().map_or("false", String::as_str);
            return Some(ParsedValue {
                values: vec![default.to_string()],
                source: ValueSource::Default,
            });
        };
        return Some(ParsedValue {
            values: vec![value.to_string()],
            source: explicit_source(typed),
        });
    }

    let values = raw_values(full, &spec.name)?;
    let source = match full.value_source(&spec.name) {
        Some(ClapSource::CommandLine) => explicit_source(set_on_command_line(user, &spec.name)),
        _ => ValueSource::Default,
    };
    Some(ParsedValue { values, source })
}

fn usage_error(command: &Command, error: &clap::Error) -> ParseError {
    ParseError::Usage {
        path: command.path.clone(),
        message: error.render().to_string().trim_end().to_string(),
    }
}

/// Parses one level. `injected` are remembered tokens placed before the user's.
pub fn parse_level(
    command: &Command,
    injected: &[String],
    user_args: &[String],
    resilient: bool,
) -> Result<LevelOutcome, ParseError> {
    let parser = build_clap(command, resilient);
    let full = match parser.clone().try_get_matches_from(argv(command, &[injected, user_args])) {
        Ok(matches) => matches,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            return Ok(LevelOutcome::Help);
        }
        Err(e) => return Err(usage_error(command, &e)),
    };
    let user = if injected.is_empty() {
        None
    } else {
        parser
            .ignore_errors(true)
            .try_get_matches_from(argv(command, &[user_args]))
            .ok()
    };

    let mut invocation = Invocation {
        path: command.path.clone(),
        injected_args: injected.to_vec(),
        ..Default::default()
    };
    for spec in effective_params(command) {
        if let Some(value) = extract_value(&spec, &full, user.as_ref()) {
            invocation.values.insert(spec.name.clone(), value);
        }
    }

    let subcommand = full.subcommand().map(|(name, sub)| {
        let rest: Vec<String> = sub
            .try_get_many::<String>("")
            .ok()
            .flatten()
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        (name.to_string(), rest)
    });
    let own_len = match &subcommand {
        Some((_, rest)) => user_args.len().saturating_sub(rest.len() + 1),
        None => user_args.len(),
    };
    invocation.user_args = user_args.get(..own_len).unwrap_or_default().to_vec();

    Ok(LevelOutcome::Parsed(LevelMatches {
        invocation,
        subcommand,
    }))
}

/// Rebuilds command-line tokens from parsed values.
///
/// Options and flags are emitted only when explicitly given; arguments are always emitted
/// when they have values, so positions are preserved. Flags become `--x` or `--no-x` and
/// multi-valued options repeat their name. Only declared parameters are considered; the
/// tokens swallowed by an unknown-options catch-all come last.
pub fn to_args(params: &[ParamSpec], invocation: &Invocation) -> Vec<String> {
    let mut named = Vec::new();
    let mut positional = Vec::new();
    for spec in params.iter().filter(|p| p.origin == ParamOrigin::Declared) {
        let Some(parsed) = invocation.values.get(&spec.name) else {
            continue;
        };
        match spec.kind {
            ParamKind::Flag if parsed.source.is_explicit() => {
                if parsed.values.last().is_some_and(|v| v == "true") {
                    named.push(format!("--{}", spec.long()));
                } else {
                    named.push(format!("--{}", no_flag(spec.long())));
                }
            }
            ParamKind::Option if parsed.source.is_explicit() => match spec.arity {
                Arity::Exactly(_) => {
                    named.push(format!("--{}", spec.long()));
                    named.extend(parsed.values.iter().cloned());
                }
                _ => {
                    for value in &parsed.values {
                        named.push(format!("--{}", spec.long()));
                        named.push(value.clone());
                    }
                }
            },
            ParamKind::Argument => positional.extend(parsed.values.iter().cloned()),
            _ => {}
        }
    }
    named.extend(positional);
    named.extend(invocation.get_many(UNKNOWN_ARGS).iter().cloned());
    named
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn parsed(outcome: LevelOutcome) -> LevelMatches {
        match outcome {
            LevelOutcome::Parsed(m) => m,
            LevelOutcome::Help => unreachable!("unexpected help request"),
        }
    }

    fn deploy() -> Command {
        Command::new("deploy")
            .with_param(
                ParamSpec::option("target")
                    .value_type(ValueType::Choice(vec!["dev".into(), "prod".into()]))
                    .default_value("dev"),
            )
            .with_param(ParamSpec::flag("force"))
            .with_param(ParamSpec::option("tag").multiple())
            .with_param(ParamSpec::argument("service"))
    }

    #[test]
    fn test_sources_distinguish_user_remembered_and_default() {
        let cmd = deploy();
        let m = parsed(
            parse_level(&cmd, &args(&["--force", "--tag", "a"]), &args(&["web", "--tag", "b"]), false)
                .unwrap(),
        );
        let inv = &m.invocation;
        assert_eq!(inv.get_one("target"), Some("dev"));
        assert_eq!(inv.source("target"), Some(ValueSource::Default));
        assert!(inv.flag("force"));
        assert_eq!(inv.source("force"), Some(ValueSource::Remembered));
        assert_eq!(inv.get_many("tag"), ["a", "b"]);
        assert_eq!(inv.source("tag"), Some(ValueSource::CommandLine));
        assert_eq!(inv.get_one("service"), Some("web"));
        assert_eq!(inv.user_args, args(&["web", "--tag", "b"]));
    }

    #[test]
    fn test_user_overrides_remembered_values() {
        let cmd = deploy();
        let m = parsed(
            parse_level(&cmd, &args(&["--target", "dev", "--force"]), &args(&["--target", "prod", "--no-force", "x"]), false)
                .unwrap(),
        );
        assert_eq!(m.invocation.get_one("target"), Some("prod"));
        assert!(!m.invocation.flag("force"));
        assert_eq!(m.invocation.source("force"), Some(ValueSource::CommandLine));
    }

    #[test]
    fn test_invalid_choice_is_a_usage_error() {
        let err = parse_level(&deploy(), &[], &args(&["--target", "qa", "x"]), false).unwrap_err();
        assert!(err.to_string().contains("qa"));
    }

    #[test]
    fn test_help_is_reported() {
        let outcome = parse_level(&deploy(), &[], &args(&["--help"]), false).unwrap();
        assert!(matches!(outcome, LevelOutcome::Help));
        let text = render_help(&deploy(), "Flow dependencies: build", &[]);
        assert!(text.contains("--target"));
        assert!(text.contains("Flow dependencies: build"));
    }

    #[test]
    fn test_group_splits_subcommand() {
        let group = Command::group("git").with_param(ParamSpec::flag("verbose"));
        let m = parsed(
            parse_level(&group, &[], &args(&["--verbose", "log", "-n", "3"]), false).unwrap(),
        );
        assert!(m.invocation.flag("verbose"));
        assert_eq!(
            m.subcommand,
            Some(("log".to_string(), args(&["-n", "3"])))
        );
        assert_eq!(m.invocation.user_args, args(&["--verbose"]));
    }

    #[test]
    fn test_remainder_swallows_options() {
        let cmd = Command::new("echo").with_param(ParamSpec::remainder("words"));
        let m = parsed(parse_level(&cmd, &args(&["a"]), &args(&["--b", "c"]), false).unwrap());
        assert_eq!(m.invocation.get_many("words"), ["a", "--b", "c"]);
    }

    #[test]
    fn test_resilient_parsing_tolerates_errors() {
        let cmd = deploy();
        assert!(parse_level(&cmd, &[], &args(&["--unknown"]), false).is_err());
        assert!(parse_level(&cmd, &[], &args(&["--unknown"]), true).is_ok());
    }

    #[test]
    fn test_to_args_emits_explicit_values_only() {
        let cmd = deploy();
        let m = parsed(
            parse_level(&cmd, &[], &args(&["--no-force", "--tag", "a", "--tag", "b", "web"]), false)
                .unwrap(),
        );
        assert_eq!(
            to_args(&cmd.params, &m.invocation),
            args(&["--no-force", "--tag", "a", "--tag", "b", "web"])
        );
    }
}

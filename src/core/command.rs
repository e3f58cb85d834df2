// src/core/command.rs

use crate::constants::APP_NAME;
use crate::core::config::Config;
use crate::core::resolver::CommandResolver;
use crate::core::session::Session;
use crate::models::{FlowLink, ParamOrigin, ParamSpec, TriggerSet};
use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// The behavior of a command.
pub type Callback = Rc<dyn Fn(&mut Session, &Invocation) -> Result<()>>;

/// Builds a statically known subcommand.
pub type CommandFactory = fn(&str) -> Command;

// --- Paths ---

/// Splits a dotted path into its parent path and leaf. The root has no parent.
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    if path == APP_NAME {
        return (None, path);
    }
    match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (Some(APP_NAME), path),
    }
}

/// Joins a parent path and a leaf. Children of the root are not prefixed.
pub fn join_path(parent: &str, leaf: &str) -> String {
    if parent == APP_NAME {
        leaf.to_string()
    } else {
        format!("{}.{}", parent, leaf)
    }
}

/// Every ancestor of `path` below the root, innermost first: `a.b.c` -> `a.b`, `a`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('.') {
        out.push(parent.to_string());
        current = parent;
    }
    out
}

/// `a.b` -> `["a", "b"]`; the root path yields no tokens.
pub fn path_tokens(path: &str) -> Vec<String> {
    if path == APP_NAME || path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

// --- Parsed values ---

/// Where a parsed value came from. Replaces default tracking inside the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Declared default, nobody asked for it.
    Default,
    /// Injected from the `parameters` section.
    Remembered,
    /// Typed by the user.
    CommandLine,
}

impl ValueSource {
    pub fn is_explicit(self) -> bool {
        self != Self::Default
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedValue {
    pub values: Vec<String>,
    pub source: ValueSource,
}

/// The outcome of parsing one command level.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub path: String,
    pub values: BTreeMap<String, ParsedValue>,
    /// Arguments supplied by the user for this level, remembered ones excluded.
    pub user_args: Vec<String>,
    /// Remembered arguments prepended for this level.
    pub injected_args: Vec<String>,
}

impl Invocation {
    pub fn get_one(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.values.last())
            .map(String::as_str)
    }

    pub fn get_many(&self, name: &str) -> &[String] {
        self.values
            .get(name)
            .map(|v| v.values.as_slice())
            .unwrap_or_default()
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get_one(name) == Some("true")
    }

    pub fn source(&self, name: &str) -> Option<ValueSource> {
        self.values.get(name).map(|v| v.source)
    }

    pub fn is_explicit(&self, name: &str) -> bool {
        self.source(name).is_some_and(ValueSource::is_explicit)
    }

    /// Drops the values of the given parameters.
    pub fn without(&self, names: &[String]) -> Self {
        let mut stripped = self.clone();
        stripped.values.retain(|k, _| !names.contains(k));
        stripped
    }
}

// --- Behavior objects ---

/// Runs the `triggers` configured for a command around its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub enabled: bool,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl TriggerPolicy {
    /// Triggers are read from the accumulate view, so every profile contributes.
    pub fn triggers_for(&self, config: &Config, path: &str) -> TriggerSet {
        if !self.enabled {
            return TriggerSet::default();
        }
        config
            .merged()
            .get_accumulated("triggers", path)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// A deprecation notice shown before the command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub message: String,
}

impl Deprecation {
    pub fn warn(&self, path: &str) {
        eprintln!(
            "{} '{}' is deprecated: {}",
            "Warning:".yellow().bold(),
            path,
            self.message
        );
    }
}

/// Extra help text rendered below the generated usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpRenderer {
    pub epilog: Option<String>,
}

impl HelpRenderer {
    pub fn after_help(&self, command: &Command, config: &Config) -> String {
        let mut lines = Vec::new();
        let deps = config
            .flowdeps_override(&command.path)
            .unwrap_or_else(|| command.flowdepends.clone());
        if !deps.is_empty() {
            lines.push(format!("Flow dependencies: {}", deps.join(", ")));
        }
        // What this run actually injected, so `--no-parameters` shows through.
        let remembered = config.recorded_parameters(&command.path);
        if !remembered.is_empty() {
            lines.push(format!("Remembered parameters: {}", remembered.join(" ")));
        }
        if let Some(epilog) = &self.epilog {
            lines.push(epilog.clone());
        }
        lines.join("\n")
    }
}

/// Whether remembered parameters are injected in front of the user's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterMemory {
    pub enabled: bool,
}

impl Default for ParameterMemory {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ParameterMemory {
    pub fn injected(&self, config: &Config, path: &str, implicit_only: bool) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        config.remembered_parameters(path, implicit_only)
    }
}

// --- Command ---

/// A subcommand known at compile time.
#[derive(Debug, Clone, Copy)]
pub struct StaticChild {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub build: CommandFactory,
}

/// A resolved, runnable command.
///
/// Once cached, the same `Rc<Command>` is handed out for its path; the only change allowed
/// after construction is a copy with another `path`.
#[derive(Clone, Default)]
pub struct Command {
    pub path: String,
    pub help: Option<String>,
    pub params: Vec<ParamSpec>,
    pub callback: Option<Callback>,
    /// Statically declared flow dependencies.
    pub flowdepends: Vec<String>,
    pub flow_links: Vec<FlowLink>,
    pub handle_dry_run: bool,
    pub is_group: bool,
    pub static_children: Vec<StaticChild>,
    /// A group's own resolver chain. `None` uses the default chain.
    pub resolvers: Option<Vec<Rc<dyn CommandResolver>>>,
    pub default_subcommand: Option<String>,
    /// The command a synthetic wrapper stands for.
    pub original_command: Option<Rc<Command>>,
    /// Copy this group's parameters onto its children.
    pub propagate_params: bool,
    pub ignore_unknown_options: bool,
    pub hidden: bool,
    /// Set on placeholders produced by best-effort resolution.
    pub broken: Option<String>,
    pub triggers: TriggerPolicy,
    pub deprecation: Option<Deprecation>,
    pub help_renderer: HelpRenderer,
    pub memory: ParameterMemory,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("params", &self.params.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("is_group", &self.is_group)
            .field("has_callback", &self.callback.is_some())
            .field("flowdepends", &self.flowdepends)
            .field(
                "original_command",
                &self.original_command.as_ref().map(|c| &c.path),
            )
            .field("broken", &self.broken)
            .finish()
    }
}

impl Command {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn group(path: &str) -> Self {
        Self {
            is_group: true,
            ..Self::new(path)
        }
    }

    /// A placeholder standing for a command that failed to load.
    pub fn broken(path: &str, reason: &str) -> Self {
        Self {
            help: Some(format!("Broken command: {}", reason)),
            broken: Some(reason.to_string()),
            ..Self::new(path)
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Session, &Invocation) -> Result<()> + 'static,
    {
        self.callback = Some(Rc::new(callback));
        self
    }

    pub fn with_child(mut self, name: &'static str, build: CommandFactory) -> Self {
        self.static_children.push(StaticChild {
            name,
            aliases: &[],
            build,
        });
        self
    }

    pub fn with_flowdepends(mut self, deps: &[&str]) -> Self {
        self.flowdepends = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        split_path(&self.path).1
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Names of the parameters copied from a propagating parent.
    pub fn inherited_param_names(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.origin == ParamOrigin::Inherited)
            .map(|p| p.name.clone())
            .collect()
    }

    /// A copy carrying another path. The only mutation allowed on a resolved command.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..self.clone()
        }
    }

    /// The first line of the help text.
    pub fn short_help(&self) -> &str {
        self.help
            .as_deref()
            .and_then(|h| h.lines().next())
            .unwrap_or("")
    }
}

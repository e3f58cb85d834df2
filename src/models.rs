// src/models.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A profile settings document: section name -> section content.
pub type Settings = Map<String, Value>;

// --- PROFILE MODELS ---

/// Whether a profile belongs to the user (global) or to the project being worked on (local).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActivationLevel {
    Global,
    Local,
}

/// The role a profile plays in the stack. The declaration order is the stack order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileKind {
    Distribution,
    GlobalPreset,
    Global,
    CwdPreset,
    WorkspacePreset,
    Workspace,
    LocalPreset,
    Local,
    Environment,
    CommandLine,
    Flow,
    ExtensionPreset,
    Extension,
}

impl ProfileKind {
    /// Directory profiles are backed by a settings file; every other kind is a preset.
    pub fn is_directory(self) -> bool {
        matches!(
            self,
            Self::Global | Self::Workspace | Self::Local | Self::Extension
        )
    }

    /// The activation level implied by the kind.
    pub fn level(self) -> ActivationLevel {
        match self {
            Self::Distribution
            | Self::GlobalPreset
            | Self::Global
            | Self::Environment
            | Self::CommandLine
            | Self::Flow => ActivationLevel::Global,
            _ => ActivationLevel::Local,
        }
    }
}

// --- SECTION MODELS (typed views over merged settings) ---

/// An entry of the `alias` section.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasDefinition {
    /// Each inner list is one command line: a dotted path followed by its arguments.
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
    #[serde(default)]
    pub documentation: Option<String>,
}

/// An entry of the `triggers` section.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TriggerSet {
    pub pre: Vec<Vec<String>>,
    pub post: Vec<Vec<String>>,
    pub onsuccess: Vec<Vec<String>>,
    pub onerror: Vec<Vec<String>>,
}

impl TriggerSet {
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty()
            && self.post.is_empty()
            && self.onsuccess.is_empty()
            && self.onerror.is_empty()
    }
}

/// An entry of the `extension` section.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// The `customcommands` section.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CustomCommandsSection {
    /// Directories scanned for declarative command definitions.
    pub commandpaths: Vec<String>,
    /// Directories scanned for external executables.
    pub executablepaths: Vec<String>,
}

// --- PARAMETER MODELS ---

/// What a parameter looks like on the command line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// `--name value`
    Option,
    /// `--name` / `--no-name`
    Flag,
    /// A positional value.
    Argument,
}

/// The type a parameter value is validated against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    #[default]
    String,
    Integer,
    Float,
    Bool,
    Path,
    Choice(Vec<String>),
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(choices) = s.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
            let values: Vec<String> = choices
                .split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if values.is_empty() {
                return Err(format!("empty choice list '{}'", s));
            }
            return Ok(Self::Choice(values));
        }
        match s.to_lowercase().as_str() {
            "" | "str" | "string" | "text" => Ok(Self::String),
            "int" | "integer" => Ok(Self::Integer),
            "float" | "number" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            "path" | "file" | "dir" => Ok(Self::Path),
            other => Err(format!("unknown type '{}'", other)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "TEXT"),
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Bool => write!(f, "BOOLEAN"),
            Self::Path => write!(f, "PATH"),
            Self::Choice(values) => write!(f, "[{}]", values.join("|")),
        }
    }
}

/// How many values a parameter takes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arity {
    #[default]
    One,
    Exactly(usize),
    /// Zero or more values (options become repeatable).
    Many,
}

/// Where a parameter definition came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamOrigin {
    #[default]
    Declared,
    /// Copied from a parent that propagates its parameters to its children.
    Inherited,
    /// Added by the flow post-resolution handler.
    Flow,
    /// Accepted by every command (`--no-parameters`).
    Builtin,
}

/// A parameter specification, independent of the argument parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub short: Option<char>,
    pub value_type: ValueType,
    pub arity: Arity,
    pub default: Vec<String>,
    pub required: bool,
    /// Swallows every remaining token, hyphenated or not.
    pub trailing: bool,
    pub help: Option<String>,
    pub origin: ParamOrigin,
}

impl ParamSpec {
    fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: normalize_param_name(name),
            kind,
            short: None,
            value_type: if kind == ParamKind::Flag {
                ValueType::Bool
            } else {
                ValueType::String
            },
            arity: Arity::One,
            default: Vec::new(),
            required: false,
            trailing: false,
            help: None,
            origin: ParamOrigin::Declared,
        }
    }

    pub fn option(name: &str) -> Self {
        Self::new(name, ParamKind::Option)
    }

    pub fn flag(name: &str) -> Self {
        Self::new(name, ParamKind::Flag)
    }

    pub fn argument(name: &str) -> Self {
        Self::new(name, ParamKind::Argument)
    }

    /// A positional that collects every remaining token.
    pub fn remainder(name: &str) -> Self {
        let mut spec = Self::new(name, ParamKind::Argument);
        spec.arity = Arity::Many;
        spec.trailing = true;
        spec
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = vec![value.to_string()];
        self
    }

    pub fn multiple(mut self) -> Self {
        self.arity = Arity::Many;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn origin(mut self, origin: ParamOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The long spelling, without dashes.
    pub fn long(&self) -> &str {
        &self.name
    }
}

/// Strips leading dashes and turns underscores into dashes: `--dry_run` -> `dry-run`.
pub fn normalize_param_name(raw: &str) -> String {
    raw.trim().trim_start_matches('-').replace('_', "-")
}

/// Declares that values explicitly given to some parameters of a command are forwarded
/// to one of its flow dependencies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowLink {
    pub target: String,
    pub params: Vec<String>,
}

/// What an external executable declares about itself through the help-metadata protocol.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalMetadata {
    pub help: String,
    pub params: Vec<ParamSpec>,
    pub flowdepends: Vec<String>,
    pub flow_links: Vec<FlowLink>,
    pub ignore_unknown_options: bool,
    pub handle_dry_run: bool,
}

// --- CUSTOM COMMAND DEFINITION MODELS (TOML) ---

/// A value that may be written either as a single string or as a list of strings.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// A parameter as written in a custom command definition file.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CustomParamDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub default: Option<OneOrMany>,
    #[serde(default)]
    pub multiple: bool,
    /// For arguments: number of values, `-1` for unlimited.
    #[serde(default)]
    pub nargs: Option<i64>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub short: Option<char>,
}

/// A declarative custom command, loaded from `<path>.toml` in a command search path.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct CustomCommandDefinition {
    #[serde(default)]
    pub help: Option<String>,
    /// Command lines executed in order. `{param}` tokens are substituted by parsed values.
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub options: Vec<CustomParamDefinition>,
    #[serde(default)]
    pub flags: Vec<CustomParamDefinition>,
    #[serde(default)]
    pub arguments: Vec<CustomParamDefinition>,
    #[serde(default)]
    pub flowdepends: Vec<String>,
    /// target dependency -> names of the parameters forwarded to it.
    #[serde(default)]
    pub flowoptions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub default_command: Option<String>,
    #[serde(default)]
    pub deprecated: Option<String>,
    #[serde(default)]
    pub handle_dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_parsing() {
        assert_eq!("int".parse::<ValueType>().unwrap(), ValueType::Integer);
        assert_eq!("".parse::<ValueType>().unwrap(), ValueType::String);
        assert_eq!(
            "[dev|prod]".parse::<ValueType>().unwrap(),
            ValueType::Choice(vec!["dev".to_string(), "prod".to_string()])
        );
        assert!("[]".parse::<ValueType>().is_err());
        assert!("matrix".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_param_names_are_normalized() {
        assert_eq!(ParamSpec::option("--dry_run").name, "dry-run");
        assert_eq!(ParamSpec::flag("verbose").value_type, ValueType::Bool);
        assert!(ParamSpec::remainder("args").trailing);
    }

    #[test]
    fn test_custom_definition_rejects_unknown_fields() {
        let toml_str = r#"
            help = "Deploys"
            runs = ["echo hi"]
        "#;
        let result: Result<CustomCommandDefinition, _> = toml::from_str(toml_str);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown field `runs`"));
    }

    #[test]
    fn test_custom_definition_defaults_accept_one_or_many() {
        let toml_str = r#"
            run = ["echo {target}"]
            [[options]]
            name = "target"
            default = ["a", "b"]
            multiple = true
        "#;
        let def: CustomCommandDefinition = toml::from_str(toml_str).unwrap();
        let default = def.options[0].default.clone().unwrap().into_vec();
        assert_eq!(default, vec!["a", "b"]);
    }
}

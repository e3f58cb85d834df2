// src/core/config.rs

use crate::constants::{
    ENV_COMMAND_PATH, ENV_CONFIG_DIR, ENV_DRY_RUN, ENV_EXTENSION_PREFIX,
    ENV_PARAMETER_PREFIX, ENV_PROJECT, ENV_WORKSPACE, LOCAL_PROFILE_DIR,
};
use crate::core::merger::{self, MergeError, MergedSettings};
use crate::core::paths;
use crate::core::profile::ProfileHandle;
use crate::core::profile_stack::{self, ProfileStore, StackEntry, StackInputs};
use crate::models::Settings;
use crate::system::environment::{EnvSnapshot, decode_path};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Options given on the root command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOptions {
    pub project: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub enable_extensions: Vec<String>,
    pub disable_extensions: Vec<String>,
    pub flow_verbose: bool,
    pub dry_run: bool,
}

/// The effective configuration of one invocation level.
///
/// Cloning is cheap: merged views and the derived child environment are shared. A nested
/// invocation works on a clone and the caller's copy is restored when it returns.
#[derive(Debug, Clone)]
pub struct Config {
    pub options: ConfigOptions,
    pub global_dir: PathBuf,
    pub cwd: PathBuf,
    /// Best-effort parsing: default subcommands are not spliced, broken commands are tolerated.
    pub resilient: bool,
    env: Rc<EnvSnapshot>,
    project: Option<PathBuf>,
    workspace: Option<PathBuf>,
    flow_settings: Settings,
    stack: Vec<StackEntry>,
    merged: Rc<MergedSettings>,
    child_env: Rc<BTreeMap<String, String>>,
    signature: String,
    parameter_log: BTreeMap<String, Vec<String>>,
}

fn env_settings(env: &EnvSnapshot) -> Settings {
    let mut parameters = Map::new();
    for (suffix, value) in env.with_prefix(ENV_PARAMETER_PREFIX) {
        match shlex::split(value) {
            Some(tokens) => {
                parameters.insert(decode_path(suffix), json!(tokens));
            }
            None => log::warn!(
                "Ignoring {}{}: cannot split '{}'",
                ENV_PARAMETER_PREFIX,
                suffix,
                value
            ),
        }
    }

    let mut extensions = Map::new();
    for (suffix, value) in env.with_prefix(ENV_EXTENSION_PREFIX) {
        match serde_json::from_str::<bool>(value.trim()) {
            Ok(enabled) => {
                extensions.insert(decode_path(suffix), json!({ "enabled": enabled }));
            }
            Err(_) => log::warn!(
                "Ignoring {}{}: expected true or false, found '{}'",
                ENV_EXTENSION_PREFIX,
                suffix,
                value
            ),
        }
    }

    let mut settings = Map::new();
    if !parameters.is_empty() {
        settings.insert("parameters".to_string(), Value::Object(parameters));
    }
    if !extensions.is_empty() {
        settings.insert("extension".to_string(), Value::Object(extensions));
    }
    settings
}

fn command_line_settings(options: &ConfigOptions) -> Settings {
    let mut extensions = Map::new();
    for name in &options.enable_extensions {
        extensions.insert(name.clone(), json!({ "enabled": true }));
    }
    for name in &options.disable_extensions {
        extensions.insert(name.clone(), json!({ "enabled": false }));
    }
    let mut settings = Map::new();
    if !extensions.is_empty() {
        settings.insert("extension".to_string(), Value::Object(extensions));
    }
    settings
}

fn value_to_env_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Turns a settings list into command-line tokens.
pub fn value_to_tokens(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => shlex::split(s).unwrap_or_else(|| vec![s.clone()]),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

impl Config {
    pub fn new(global_dir: PathBuf, cwd: PathBuf, env: EnvSnapshot, options: ConfigOptions) -> Self {
        Self {
            options,
            global_dir,
            cwd,
            resilient: false,
            env: Rc::new(env),
            project: None,
            workspace: None,
            flow_settings: Settings::new(),
            stack: Vec::new(),
            merged: Rc::new(MergedSettings::default()),
            child_env: Rc::new(BTreeMap::new()),
            signature: String::new(),
            parameter_log: BTreeMap::new(),
        }
    }

    fn locate_project(&self) -> Option<PathBuf> {
        let explicit = self
            .options
            .project
            .clone()
            .or_else(|| self.env.get(ENV_PROJECT).filter(|p| !p.is_empty()).map(PathBuf::from));
        match explicit {
            Some(project) => {
                let project = paths::expand_path(&project.display().to_string(), &self.cwd)
                    .unwrap_or(project);
                // Accept either the project root or its `.clk` directory.
                if project.file_name().is_some_and(|n| n == LOCAL_PROFILE_DIR) {
                    project.parent().map(Path::to_path_buf)
                } else {
                    Some(project)
                }
            }
            None => paths::find_project_root(&self.cwd, &self.global_dir),
        }
    }

    fn locate_workspace(&self) -> Option<PathBuf> {
        self.options
            .workspace
            .clone()
            .or_else(|| self.env.get(ENV_WORKSPACE).filter(|w| !w.is_empty()).map(PathBuf::from))
            .map(|w| paths::expand_path(&w.display().to_string(), &self.cwd).unwrap_or(w))
    }

    /// Rebuilds the profile stack and recomputes both merged views and the child environment.
    pub fn refresh(&mut self, store: &mut ProfileStore) -> Result<(), MergeError> {
        self.project = self.locate_project();
        self.workspace = self.locate_workspace();

        let inputs = StackInputs {
            global_dir: self.global_dir.clone(),
            cwd: self.cwd.clone(),
            workspace: self.workspace.clone(),
            project: self.project.clone(),
            environment: env_settings(&self.env),
            command_line: command_line_settings(&self.options),
            flow: self.flow_settings.clone(),
        };
        self.stack = profile_stack::build_stack(store, &inputs);

        let views: Vec<(String, Settings)> = self
            .stack
            .iter()
            .filter(|e| e.enabled)
            .map(|e| {
                let profile = e.profile.borrow();
                (profile.name.clone(), profile.merge_view().into_owned())
            })
            .collect();
        let merged = merger::merge(views.iter().map(|(name, s)| (name.as_str(), Some(s))))?;
        self.merged = Rc::new(merged);
        self.child_env = Rc::new(self.derive_child_env());
        self.signature = profile_stack::stack_signature(&self.stack, store.revision());
        log::trace!("Profile stack: {}", self.signature);
        Ok(())
    }

    fn derive_child_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.vars().clone();
        if let Some(section) = self.merged.section("environment") {
            for (key, value) in section {
                match value_to_env_string(value) {
                    Some(v) => {
                        env.insert(key.clone(), v);
                    }
                    None => {
                        env.remove(key);
                    }
                }
            }
        }
        env.insert(
            ENV_CONFIG_DIR.to_string(),
            self.global_dir.display().to_string(),
        );
        if let Some(project) = &self.project {
            env.insert(ENV_PROJECT.to_string(), project.display().to_string());
        }
        if self.options.dry_run {
            env.insert(ENV_DRY_RUN.to_string(), "1".to_string());
        } else {
            env.remove(ENV_DRY_RUN);
        }
        env
    }

    /// The environment handed to child processes, with command specific overrides.
    pub fn child_environment(&self, command_path: &str) -> BTreeMap<String, String> {
        let mut env = (*self.child_env).clone();
        env.insert(ENV_COMMAND_PATH.to_string(), command_path.to_string());
        env
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn merged(&self) -> &MergedSettings {
        &self.merged
    }

    pub fn stack(&self) -> &[StackEntry] {
        &self.stack
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn project(&self) -> Option<&Path> {
        self.project.as_deref()
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    /// Finds an active profile by name.
    pub fn profile(&self, name: &str) -> Option<ProfileHandle> {
        self.stack
            .iter()
            .find(|e| e.profile.borrow().name == name)
            .map(|e| e.profile.clone())
    }

    /// The profile writes go to when none is named: local inside a project, global otherwise.
    pub fn default_write_profile(&self) -> Option<ProfileHandle> {
        let preferred = if self.project.is_some() { "local" } else { "global" };
        self.profile(preferred)
    }

    /// Directory profiles that can be targeted by writes, lowest precedence first.
    pub fn writable_profiles(&self) -> Vec<ProfileHandle> {
        self.stack
            .iter()
            .filter(|e| e.profile.borrow().kind.is_directory())
            .map(|e| e.profile.clone())
            .collect()
    }

    /// Remembered parameters for `path`: the value of the highest enabled profile defining
    /// `parameters.<path>`. With `implicit_only`, explicit profiles are ignored.
    pub fn remembered_parameters(&self, path: &str, implicit_only: bool) -> Vec<String> {
        if !implicit_only {
            return self
                .merged
                .get("parameters", path)
                .map(value_to_tokens)
                .unwrap_or_default();
        }
        self.stack
            .iter()
            .rev()
            .filter(|e| e.enabled && !e.explicit())
            .find_map(|e| {
                let profile = e.profile.borrow();
                profile
                    .section("parameters")
                    .and_then(|s| s.get(path))
                    .map(value_to_tokens)
            })
            .unwrap_or_default()
    }

    /// Records the remembered arguments actually injected for `path`.
    ///
    /// A group can be parsed once per level of a multi-segment path, so it appends its
    /// record unless that exact record is already there. A leaf overwrites.
    pub fn record_parameters(&mut self, path: &str, injected: &[String], is_group: bool) {
        let log = self.parameter_log.entry(path.to_string()).or_default();
        if !is_group {
            *log = injected.to_vec();
            return;
        }
        if injected.is_empty() {
            return;
        }
        let already_recorded = log.len() >= injected.len()
            && log
                .windows(injected.len())
                .any(|window| window == injected);
        if !already_recorded {
            log.extend(injected.iter().cloned());
        }
    }

    pub fn recorded_parameters(&self, path: &str) -> &[String] {
        self.parameter_log
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The in-memory flow profile, highest in precedence.
    pub fn flow_settings_mut(&mut self) -> &mut Settings {
        &mut self.flow_settings
    }

    /// Effective flow dependency override for `path`, if any profile defines one.
    pub fn flowdeps_override(&self, path: &str) -> Option<Vec<String>> {
        self.merged.get("flowdeps", path).map(value_to_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn setup(env: &[(&str, &str)]) -> (TempDir, Config, ProfileStore) {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global");
        let cwd = dir.path().join("work");
        fs::create_dir_all(&global).unwrap();
        fs::create_dir_all(&cwd).unwrap();
        let config = Config::new(
            global,
            cwd,
            EnvSnapshot::from_pairs(env.iter().copied()),
            ConfigOptions::default(),
        );
        (dir, config, ProfileStore::default())
    }

    fn write_settings(dir: &Path, value: Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("settings.json"), value.to_string()).unwrap();
        fs::write(dir.join("version.txt"), "3").unwrap();
    }

    #[test]
    fn test_local_profile_overrides_global_parameters() {
        let (dir, mut config, mut store) = setup(&[]);
        write_settings(&config.global_dir, json!({"parameters": {"echo": ["foo"]}}));
        write_settings(
            &dir.path().join("work").join(LOCAL_PROFILE_DIR),
            json!({"parameters": {"echo": ["bar"]}}),
        );
        config.refresh(&mut store).unwrap();

        assert_eq!(config.project(), Some(dir.path().join("work").as_path()));
        assert_eq!(config.remembered_parameters("echo", false), vec!["bar"]);
        assert_eq!(
            config.merged().get_accumulated("parameters", "echo"),
            Some(&json!(["foo", "bar"]))
        );
    }

    #[test]
    fn test_environment_profile_seeds_parameters_and_extensions() {
        let (_dir, mut config, mut store) = setup(&[
            ("CLK_P_GIT_SYNC__ALL", "--force 'a b'"),
            ("CLK_E_TOOLS", "false"),
            ("CLK_E_BROKEN", "maybe"),
        ]);
        config.refresh(&mut store).unwrap();

        assert_eq!(
            config.remembered_parameters("git.sync-all", false),
            vec!["--force", "a b"]
        );
        assert_eq!(
            config.merged().get("extension", "tools"),
            Some(&json!({"enabled": false}))
        );
        assert!(config.merged().get("extension", "broken").is_none());
        // The environment profile is explicit.
        assert!(config.remembered_parameters("git.sync-all", true).is_empty());
    }

    #[test]
    fn test_implicit_only_parameters_skip_explicit_profiles() {
        let (_dir, mut config, mut store) = setup(&[]);
        write_settings(&config.global_dir, json!({"parameters": {"echo": ["explicit"]}}));
        config
            .flow_settings_mut()
            .insert("parameters".into(), json!({"echo": ["implicit"]}));
        config.refresh(&mut store).unwrap();

        assert_eq!(config.remembered_parameters("echo", false), vec!["implicit"]);
        assert_eq!(config.remembered_parameters("echo", true), vec!["implicit"]);

        config.flow_settings_mut().clear();
        config.refresh(&mut store).unwrap();
        assert!(config.remembered_parameters("echo", true).is_empty());
    }

    #[test]
    fn test_parameter_log_appends_for_groups_and_overwrites_for_leaves() {
        let (_dir, mut config, _store) = setup(&[]);
        let injected = vec!["--verbose".to_string()];
        config.record_parameters("git", &injected, true);
        config.record_parameters("git", &injected, true);
        assert_eq!(config.recorded_parameters("git"), ["--verbose"]);
        config.record_parameters("git", &["--color".to_string()], true);
        assert_eq!(config.recorded_parameters("git"), ["--verbose", "--color"]);

        config.record_parameters("git.log", &["-n".to_string()], false);
        config.record_parameters("git.log", &["-p".to_string()], false);
        assert_eq!(config.recorded_parameters("git.log"), ["-p"]);
    }

    #[test]
    fn test_disabled_extension_is_excluded_from_merge() {
        let (_dir, mut config, mut store) = setup(&[]);
        let ext = config.global_dir.join("extensions").join("tools");
        write_settings(&ext, json!({"alias": {"hi": {"commands": [["echo", "hi"]]}}}));
        config.refresh(&mut store).unwrap();
        assert!(config.merged().get("alias", "hi").is_some());

        config.options.disable_extensions.push("tools".into());
        config.refresh(&mut store).unwrap();
        assert!(config.merged().get("alias", "hi").is_none());
    }

    #[test]
    fn test_child_environment_is_derived_from_snapshot_and_settings() {
        let (_dir, mut config, mut store) = setup(&[("HOME", "/home/me"), ("DROP", "x")]);
        write_settings(
            &config.global_dir,
            json!({"environment": {"EDITOR": "vim", "DROP": null, "LEVEL": 3}}),
        );
        config.options.dry_run = true;
        config.refresh(&mut store).unwrap();

        let env = config.child_environment("build");
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/me"));
        assert_eq!(env.get("EDITOR").map(String::as_str), Some("vim"));
        assert_eq!(env.get("LEVEL").map(String::as_str), Some("3"));
        assert!(!env.contains_key("DROP"));
        assert_eq!(env.get(ENV_DRY_RUN).map(String::as_str), Some("1"));
        assert_eq!(env.get(ENV_COMMAND_PATH).map(String::as_str), Some("build"));
    }
}

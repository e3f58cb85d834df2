// src/core/profile_stack.rs

use crate::constants::{CUSTOM_COMMANDS_DIR, EXECUTABLES_DIR, EXTENSIONS_DIR, LOCAL_PROFILE_DIR};
use crate::core::profile::{Profile, ProfileHandle};
use crate::models::{ExtensionState, ProfileKind, Settings};
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Process-wide cache of profiles.
///
/// Directory profiles are created on first reference to a location and reused for the rest
/// of the process, so a write through one stack is visible to every later stack. Directory
/// presets are memoized the same way.
#[derive(Debug, Default)]
pub struct ProfileStore {
    directories: HashMap<PathBuf, ProfileHandle>,
    presets: HashMap<String, ProfileHandle>,
    revision: u64,
}

impl ProfileStore {
    pub fn directory(
        &mut self,
        name: &str,
        kind: ProfileKind,
        location: &Path,
        explicit: bool,
    ) -> ProfileHandle {
        self.directories
            .entry(location.to_path_buf())
            .or_insert_with(|| {
                log::debug!("Loading profile '{}' from '{}'", name, location.display());
                Rc::new(RefCell::new(Profile::load(name, kind, location, explicit)))
            })
            .clone()
    }

    fn preset<F>(&mut self, key: String, build: F) -> ProfileHandle
    where
        F: FnOnce() -> Profile,
    {
        self.presets
            .entry(key)
            .or_insert_with(|| Rc::new(RefCell::new(build())))
            .clone()
    }

    /// Bumped on every profile write. Part of the stack signature.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mark_written(&mut self) {
        self.revision += 1;
    }
}

/// One slot of the profile stack.
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub profile: ProfileHandle,
    /// Disabled entries stay listed but never reach the merger.
    pub enabled: bool,
    /// Name of the root profile owning an extension entry.
    pub owner: Option<String>,
    pub order: i64,
}

impl StackEntry {
    fn root(profile: ProfileHandle) -> Self {
        Self {
            profile,
            enabled: true,
            owner: None,
            order: 0,
        }
    }

    pub fn name(&self) -> String {
        self.profile.borrow().name.clone()
    }

    pub fn explicit(&self) -> bool {
        self.profile.borrow().explicit
    }
}

/// Everything the stack order depends on.
#[derive(Debug, Clone, Default)]
pub struct StackInputs {
    pub global_dir: PathBuf,
    pub cwd: PathBuf,
    pub workspace: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub environment: Settings,
    pub command_line: Settings,
    pub flow: Settings,
}

fn search_paths_preset(location: &Path) -> Settings {
    let mut settings = Map::new();
    settings.insert(
        "customcommands".to_string(),
        json!({
            "executablepaths": [location.join(EXECUTABLES_DIR).display().to_string()],
            "commandpaths": [location.join(CUSTOM_COMMANDS_DIR).display().to_string()],
        }),
    );
    settings
}

fn owned(profile: Profile) -> ProfileHandle {
    Rc::new(RefCell::new(profile))
}

/// Reads extension enablement from root profiles, later roots overriding earlier ones.
fn extension_states(roots: &[ProfileHandle]) -> HashMap<String, ExtensionState> {
    let mut states: HashMap<String, ExtensionState> = HashMap::new();
    for root in roots {
        let root = root.borrow();
        let Some(section) = root.section("extension") else {
            continue;
        };
        for (name, value) in section {
            let Ok(incoming) = serde_json::from_value::<ExtensionState>(value.clone()) else {
                log::warn!(
                    "Ignoring malformed entry 'extension.{}' in profile '{}'",
                    name,
                    root.name
                );
                continue;
            };
            let state = states.entry(name.clone()).or_default();
            if incoming.enabled.is_some() {
                state.enabled = incoming.enabled;
            }
            if incoming.order.is_some() {
                state.order = incoming.order;
            }
        }
    }
    states
}

fn discover_extension_dirs(root_location: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(root_location.join(EXTENSIONS_DIR)) else {
        return Vec::new();
    };
    let mut found: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            (!name.starts_with('.')).then(|| (name, e.path()))
        })
        .collect();
    found.sort();
    found
}

/// Builds the ordered profile stack:
/// distribution, global-preset, global, cwd-preset, workspace-preset, workspace,
/// local-preset, local, environment, command-line, flow.
///
/// Every directory root is directly followed by its extensions, each preceded by an
/// extension preset carrying its search paths, sorted by their configured order.
pub fn build_stack(store: &mut ProfileStore, inputs: &StackInputs) -> Vec<StackEntry> {
    let mut roots: Vec<ProfileHandle> = Vec::new();

    roots.push(store.preset("distribution".to_string(), || {
        let mut settings = Map::new();
        settings.insert(
            "value".to_string(),
            json!({ "clk.version": { "value": env!("CARGO_PKG_VERSION") } }),
        );
        Profile::preset("distribution", ProfileKind::Distribution, settings, false)
    }));

    let global_dir = inputs.global_dir.clone();
    roots.push(store.preset(
        format!("global-preset@{}", global_dir.display()),
        || {
            Profile::preset(
                "global-preset",
                ProfileKind::GlobalPreset,
                search_paths_preset(&global_dir),
                false,
            )
        },
    ));
    roots.push(store.directory("global", ProfileKind::Global, &inputs.global_dir, true));

    let mut cwd_settings = Map::new();
    cwd_settings.insert(
        "value".to_string(),
        json!({ "cwd": { "value": inputs.cwd.display().to_string() } }),
    );
    roots.push(owned(Profile::preset(
        "cwd-preset",
        ProfileKind::CwdPreset,
        cwd_settings,
        false,
    )));

    if let Some(workspace) = &inputs.workspace {
        let location = workspace.clone();
        roots.push(store.preset(format!("workspace-preset@{}", location.display()), || {
            Profile::preset(
                "workspace-preset",
                ProfileKind::WorkspacePreset,
                search_paths_preset(&location),
                false,
            )
        }));
        roots.push(store.directory("workspace", ProfileKind::Workspace, workspace, true));
    }

    if let Some(project) = &inputs.project {
        let location = project.join(LOCAL_PROFILE_DIR);
        let preset_location = location.clone();
        roots.push(store.preset(format!("local-preset@{}", location.display()), || {
            Profile::preset(
                "local-preset",
                ProfileKind::LocalPreset,
                search_paths_preset(&preset_location),
                false,
            )
        }));
        roots.push(store.directory("local", ProfileKind::Local, &location, true));
    }

    roots.push(owned(Profile::preset(
        "env",
        ProfileKind::Environment,
        inputs.environment.clone(),
        true,
    )));
    roots.push(owned(Profile::preset(
        "commandline",
        ProfileKind::CommandLine,
        inputs.command_line.clone(),
        true,
    )));
    roots.push(owned(Profile::preset(
        "flow",
        ProfileKind::Flow,
        inputs.flow.clone(),
        false,
    )));

    let states = extension_states(&roots);
    let mut stack = Vec::new();

    for root in roots {
        let (root_name, root_location, is_directory) = {
            let r = root.borrow();
            (r.name.clone(), r.location.clone(), r.kind.is_directory())
        };
        stack.push(StackEntry::root(root));

        let Some(root_location) = root_location.filter(|_| is_directory) else {
            continue;
        };

        let mut extensions: Vec<StackEntry> = Vec::new();
        for (short, location) in discover_extension_dirs(&root_location) {
            let name = format!("{}/{}", root_name, short);
            let profile = store.directory(&name, ProfileKind::Extension, &location, true);
            let (legacy_enabled, legacy_order) = {
                let p = profile.borrow();
                (
                    p.self_section().get("enabled").and_then(Value::as_bool),
                    p.self_section().get("order").and_then(Value::as_i64),
                )
            };
            let state = states.get(&short).cloned().unwrap_or_default();
            let enabled = state.enabled.or(legacy_enabled).unwrap_or(true);
            let order = state.order.or(legacy_order).unwrap_or(0);

            let preset_location = location.clone();
            let preset_name = format!("{}-preset", name);
            let preset = store.preset(format!("{}@{}", preset_name, location.display()), || {
                Profile::preset(
                    &preset_name,
                    ProfileKind::ExtensionPreset,
                    search_paths_preset(&preset_location),
                    false,
                )
            });
            extensions.push(StackEntry {
                profile: preset,
                enabled,
                owner: Some(root_name.clone()),
                order,
            });
            extensions.push(StackEntry {
                profile,
                enabled,
                owner: Some(root_name.clone()),
                order,
            });
        }
        // Stable: a preset stays in front of its extension.
        extensions.sort_by_key(|e| e.order);
        stack.extend(extensions);
    }

    stack
}

/// Identifies the set of enabled profiles and their content revision.
pub fn stack_signature(stack: &[StackEntry], revision: u64) -> String {
    let names: Vec<String> = stack
        .iter()
        .filter(|e| e.enabled)
        .map(StackEntry::name)
        .collect();
    format!("{}#{}", names.join("|"), revision)
}

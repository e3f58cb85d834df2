// src/core/profile.rs

use crate::constants::{EXTENSIONS_DIR, SELF_KEY, SETTINGS_FILENAME, VERSION_FILENAME};
use crate::core::migration;
use crate::core::paths;
use crate::models::{ActivationLevel, ProfileKind, Settings};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Filesystem error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not serialize settings of '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "Profile '{name}' has version {version} but this release only knows {supported} migration steps. It is kept read-only; upgrade clk to modify it."
    )]
    Frozen {
        name: String,
        version: u32,
        supported: u32,
    },
    #[error("Profile '{name}' is read-only.")]
    ReadOnly { name: String },
    #[error("Section '{section}' of profile '{name}' is not an object.")]
    NotAnObject { name: String, section: String },
}

/// A profile shared between the store and every stack that contains it.
pub type ProfileHandle = Rc<RefCell<Profile>>;

/// A named settings source.
///
/// Directory profiles read `settings.json` and `version.txt` from their location; preset
/// profiles are synthesized in memory and never persisted. The reserved `_self` section is
/// split off on load, so readers never see it, and put back on write.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub kind: ProfileKind,
    pub location: Option<PathBuf>,
    pub explicit: bool,
    pub isroot: bool,
    pub readonly: bool,
    pub version: u32,
    /// Written by a newer release: readable, never written.
    pub frozen: bool,
    pub default_color: Option<String>,
    settings: Settings,
    self_section: Map<String, Value>,
}

/// Writes `value` as pretty JSON through a temporary file renamed over `path`.
pub fn write_json_atomically(path: &Path, value: &Value) -> Result<(), ProfileError> {
    let io = |source: std::io::Error| ProfileError::Io {
        path: path.display().to_string(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    paths::ensure_dir(dir).map_err(|e| io(std::io::Error::other(e.to_string())))?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    let body = serde_json::to_string_pretty(value).map_err(|source| ProfileError::Serialize {
        name: path.display().to_string(),
        source,
    })?;
    file.write_all(body.as_bytes()).map_err(io)?;
    file.write_all(b"\n").map_err(io)?;
    file.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

fn read_settings_file(path: &Path) -> Settings {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::new(),
        Err(e) => {
            log::warn!(
                "Could not read '{}', its settings are ignored: {}",
                path.display(),
                e
            );
            return Settings::new();
        }
    };
    if content.trim().is_empty() {
        return Settings::new();
    }
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            log::warn!(
                "'{}' does not hold a JSON object (found {}), its settings are ignored.",
                path.display(),
                other
            );
            Settings::new()
        }
        Err(e) => {
            log::warn!(
                "'{}' is corrupt, its settings are ignored: {}",
                path.display(),
                e
            );
            Settings::new()
        }
    }
}

fn read_version_file(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    match content.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring unreadable version file '{}'", path.display());
            None
        }
    }
}

impl Profile {
    /// Builds an in-memory profile.
    pub fn preset(name: &str, kind: ProfileKind, settings: Settings, explicit: bool) -> Self {
        let mut profile = Self {
            name: name.to_string(),
            kind,
            location: None,
            explicit,
            isroot: kind != ProfileKind::ExtensionPreset,
            readonly: false,
            version: migration::latest_version(),
            frozen: false,
            default_color: None,
            settings: Settings::new(),
            self_section: Map::new(),
        };
        profile.replace_settings(settings);
        profile
    }

    /// Loads a directory profile from `location`, migrating it if its version is behind.
    ///
    /// An absent settings file is a new, empty profile at the latest version. A corrupt one
    /// is treated as empty with a warning. A failed migration leaves the profile on its old
    /// version with a warning.
    pub fn load(name: &str, kind: ProfileKind, location: &Path, explicit: bool) -> Self {
        let settings_path = location.join(SETTINGS_FILENAME);
        let exists = settings_path.exists();
        let mut settings = read_settings_file(&settings_path);
        let self_section = match settings.remove(SELF_KEY) {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        let default_color = self_section
            .get("color")
            .and_then(Value::as_str)
            .map(str::to_string);

        let latest = migration::latest_version();
        let mut version = read_version_file(&location.join(VERSION_FILENAME))
            .unwrap_or(if exists { 0 } else { latest });

        let frozen = version > latest;
        if frozen {
            log::warn!(
                "{}",
                ProfileError::Frozen {
                    name: name.to_string(),
                    version,
                    supported: latest,
                }
            );
        } else if version < latest {
            match migration::migrate(location, &mut settings, Some(&self_section), version) {
                Ok(new_version) => version = new_version,
                Err(e) => log::warn!(
                    "Migration of profile '{}' failed, keeping version {}: {}",
                    name,
                    version,
                    e
                ),
            }
        }

        Self {
            name: name.to_string(),
            kind,
            location: Some(location.to_path_buf()),
            explicit,
            isroot: kind != ProfileKind::Extension,
            readonly: false,
            version,
            frozen,
            default_color,
            settings,
            self_section,
        }
    }

    /// The part of the name after the last `/`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Whether the profile lives inside the `extensions/` directory of a root profile.
    pub fn is_extension(&self) -> bool {
        self.location
            .as_deref()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .is_some_and(|dir| dir == EXTENSIONS_DIR)
    }

    pub fn activation_level(&self) -> ActivationLevel {
        self.kind.level()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Profile-local metadata stored under `_self`.
    pub fn self_section(&self) -> &Map<String, Value> {
        &self.self_section
    }

    pub fn replace_settings(&mut self, mut settings: Settings) {
        if let Some(Value::Object(meta)) = settings.remove(SELF_KEY) {
            self.self_section = meta;
        }
        self.settings = settings;
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.settings.get(name).and_then(Value::as_object)
    }

    /// Runs `edit` on a copy of a section. The copy replaces the section only when
    /// `edit` succeeds, so a failed edit leaves the profile untouched.
    pub fn edit_section<R, E>(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut Map<String, Value>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<ProfileError>,
    {
        let mut draft = match self.settings.get(name) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(section)) => section.clone(),
            Some(_) => {
                return Err(ProfileError::NotAnObject {
                    name: self.name.clone(),
                    section: name.to_string(),
                }
                .into());
            }
        };
        let outcome = edit(&mut draft)?;
        self.settings.insert(name.to_string(), Value::Object(draft));
        Ok(outcome)
    }

    /// Fails when the profile must not be modified.
    pub fn check_writable(&self) -> Result<(), ProfileError> {
        if self.frozen {
            return Err(ProfileError::Frozen {
                name: self.name.clone(),
                version: self.version,
                supported: migration::latest_version(),
            });
        }
        if self.readonly {
            return Err(ProfileError::ReadOnly {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Persists a directory profile. Presets only live in memory, so this is a no-op for them.
    pub fn write(&self) -> Result<(), ProfileError> {
        self.check_writable()?;
        let Some(location) = &self.location else {
            return Ok(());
        };

        let mut document = self.settings.clone();
        if !self.self_section.is_empty() {
            document.insert(SELF_KEY.to_string(), Value::Object(self.self_section.clone()));
        }
        write_json_atomically(&location.join(SETTINGS_FILENAME), &Value::Object(document))?;

        let version_path = location.join(VERSION_FILENAME);
        if !version_path.exists() {
            fs::write(&version_path, self.version.to_string()).map_err(|source| {
                ProfileError::Io {
                    path: version_path.display().to_string(),
                    source,
                }
            })?;
        }
        log::debug!("Wrote settings of profile '{}'", self.name);
        Ok(())
    }

    /// The settings as merged: search paths in `customcommands` are expanded and anchored
    /// at the profile's location.
    pub fn merge_view(&self) -> Cow<'_, Settings> {
        let Some(location) = &self.location else {
            return Cow::Borrowed(&self.settings);
        };
        let Some(Value::Object(section)) = self.settings.get("customcommands") else {
            return Cow::Borrowed(&self.settings);
        };

        let mut resolved = section.clone();
        for key in ["commandpaths", "executablepaths"] {
            if let Some(Value::Array(entries)) = resolved.get_mut(key) {
                for entry in entries.iter_mut() {
                    let Some(raw) = entry.as_str() else { continue };
                    match paths::expand_path(raw, location) {
                        Ok(path) => *entry = Value::String(path.display().to_string()),
                        Err(e) => log::debug!("Keeping '{}' unexpanded: {}", raw, e),
                    }
                }
            }
        }
        let mut settings = self.settings.clone();
        settings.insert("customcommands".to_string(), Value::Object(resolved));
        Cow::Owned(settings)
    }
}

// src/core/migration.rs

//! Versioned rewrites of directory profile settings.
//!
//! A directory profile stores its migration version in `version.txt`. On load, every step
//! above that version is applied in order. A profile whose version is higher than the
//! number of registered steps was written by a newer release and is frozen instead.

use crate::constants::{BACKUP_SUFFIX, SETTINGS_FILENAME, VERSION_FILENAME};
use crate::core::profile::write_json_atomically;
use crate::models::Settings;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Migration '{step}' cannot handle the value of '{key}': {reason}")]
    Malformed {
        step: &'static str,
        key: String,
        reason: String,
    },
    #[error("Migration I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not persist migrated settings: {0}")]
    Persist(String),
}

/// One registered rewrite. Returns whether it changed anything.
#[derive(Debug)]
pub struct MigrationStep {
    pub name: &'static str,
    pub apply: fn(&mut Settings) -> Result<bool, MigrationError>,
}

pub static MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        name: "alias-lists-to-objects",
        apply: migrate_legacy_aliases,
    },
    MigrationStep {
        name: "pythonpaths-to-commandpaths",
        apply: migrate_command_paths,
    },
    MigrationStep {
        name: "flowdeps-strings-to-lists",
        apply: migrate_flowdeps_strings,
    },
];

/// The version a fully migrated profile carries.
pub fn latest_version() -> u32 {
    u32::try_from(MIGRATIONS.len()).unwrap_or(u32::MAX)
}

fn io_error(path: &Path, source: std::io::Error) -> MigrationError {
    MigrationError::Io {
        path: path.display().to_string(),
        source,
    }
}

// --- Steps ---

/// Splits a flat token list on `,` separators into several command lines.
fn split_command_tokens(tokens: &[Value]) -> Vec<Vec<Value>> {
    let mut commands = vec![Vec::new()];
    for token in tokens {
        if token.as_str() == Some(",") {
            commands.push(Vec::new());
        } else if let Some(current) = commands.last_mut() {
            current.push(token.clone());
        }
    }
    commands.retain(|c| !c.is_empty());
    commands
}

/// `alias.<name> = [...]` becomes `alias.<name> = {commands: [[...]], documentation: null}`.
fn migrate_legacy_aliases(settings: &mut Settings) -> Result<bool, MigrationError> {
    let Some(Value::Object(aliases)) = settings.get_mut("alias") else {
        return Ok(false);
    };
    let mut changed = false;
    for (name, definition) in aliases.iter_mut() {
        let commands = match definition {
            Value::Object(_) => continue,
            Value::Array(items) if items.iter().all(Value::is_array) => items.clone(),
            Value::Array(items) if items.iter().all(Value::is_string) => split_command_tokens(items)
                .into_iter()
                .map(Value::Array)
                .collect(),
            other => {
                return Err(MigrationError::Malformed {
                    step: "alias-lists-to-objects",
                    key: format!("alias.{}", name),
                    reason: format!("expected a list of commands, found {}", other),
                });
            }
        };
        *definition = json!({ "commands": commands, "documentation": null });
        changed = true;
    }
    Ok(changed)
}

/// `customcommands.pythonpaths` is folded into `customcommands.commandpaths`.
fn migrate_command_paths(settings: &mut Settings) -> Result<bool, MigrationError> {
    let Some(Value::Object(section)) = settings.get_mut("customcommands") else {
        return Ok(false);
    };
    let Some(legacy) = section.remove("pythonpaths") else {
        return Ok(false);
    };
    let Value::Array(legacy) = legacy else {
        return Err(MigrationError::Malformed {
            step: "pythonpaths-to-commandpaths",
            key: "customcommands.pythonpaths".to_string(),
            reason: "expected a list of paths".to_string(),
        });
    };
    let target = section
        .entry("commandpaths")
        .or_insert_with(|| Value::Array(Vec::new()));
    match target {
        Value::Array(paths) => {
            for path in legacy {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
            Ok(true)
        }
        _ => Err(MigrationError::Malformed {
            step: "pythonpaths-to-commandpaths",
            key: "customcommands.commandpaths".to_string(),
            reason: "expected a list of paths".to_string(),
        }),
    }
}

/// `flowdeps.<path> = "a,b"` becomes `["a", "b"]`.
fn migrate_flowdeps_strings(settings: &mut Settings) -> Result<bool, MigrationError> {
    let Some(Value::Object(flowdeps)) = settings.get_mut("flowdeps") else {
        return Ok(false);
    };
    let mut changed = false;
    for (path, deps) in flowdeps.iter_mut() {
        match deps {
            Value::Array(_) => {}
            Value::String(s) => {
                let list: Vec<Value> = s
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(|d| Value::String(d.to_string()))
                    .collect();
                *deps = Value::Array(list);
                changed = true;
            }
            other => {
                return Err(MigrationError::Malformed {
                    step: "flowdeps-strings-to-lists",
                    key: format!("flowdeps.{}", path),
                    reason: format!("expected a list of paths, found {}", other),
                });
            }
        }
    }
    Ok(changed)
}

// --- Runner ---

fn backup_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.{}", SETTINGS_FILENAME, BACKUP_SUFFIX))
}

/// Best-effort cleanup step. A file that is already gone is the wanted state.
fn warn_on_failure(action: &str, path: &Path, result: std::io::Result<()>) {
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            log::warn!("Could not {} '{}': {}", action, path.display(), e);
        }
        _ => {}
    }
}

fn restore_backup(dir: &Path, had_settings: bool, old_version: u32) {
    let settings_path = dir.join(SETTINGS_FILENAME);
    let backup = backup_path(dir);
    if had_settings {
        if let Err(e) = fs::copy(&backup, &settings_path) {
            log::warn!(
                "Could not restore '{}' from its backup: {}",
                settings_path.display(),
                e
            );
            return;
        }
    } else {
        warn_on_failure("remove", &settings_path, fs::remove_file(&settings_path));
    }
    let version_path = dir.join(VERSION_FILENAME);
    warn_on_failure(
        "restore the version in",
        &version_path,
        fs::write(&version_path, old_version.to_string()),
    );
    warn_on_failure("remove", &backup, fs::remove_file(&backup));
}

/// Applies every step above `from_version` to the profile stored in `dir`.
///
/// The settings file is backed up before anything is written. If a step fails nothing is
/// written; if persisting fails the backup is restored and the version file reverted. On
/// success `settings` holds the migrated document and the new version is returned.
pub fn migrate(
    dir: &Path,
    settings: &mut Settings,
    self_section: Option<&Map<String, Value>>,
    from_version: u32,
) -> Result<u32, MigrationError> {
    let start = usize::try_from(from_version).unwrap_or(usize::MAX);
    let pending = MIGRATIONS.get(start..).unwrap_or_default();
    if pending.is_empty() {
        return Ok(from_version);
    }

    let mut working = settings.clone();
    for step in pending {
        let changed = (step.apply)(&mut working)?;
        log::debug!(
            "Migration '{}' on '{}': {}",
            step.name,
            dir.display(),
            if changed { "applied" } else { "nothing to do" }
        );
    }

    let settings_path = dir.join(SETTINGS_FILENAME);
    let had_settings = settings_path.exists();
    if had_settings {
        fs::copy(&settings_path, backup_path(dir)).map_err(|e| io_error(&settings_path, e))?;
    }

    let mut document = working.clone();
    if let Some(meta) = self_section.filter(|m| !m.is_empty()) {
        document.insert(
            crate::constants::SELF_KEY.to_string(),
            Value::Object(meta.clone()),
        );
    }

    let version = latest_version();
    let persisted = write_json_atomically(&settings_path, &Value::Object(document))
        .map_err(|e| MigrationError::Persist(e.to_string()))
        .and_then(|()| {
            fs::write(dir.join(VERSION_FILENAME), version.to_string())
                .map_err(|e| io_error(&dir.join(VERSION_FILENAME), e))
        });

    if let Err(e) = persisted {
        restore_backup(dir, had_settings, from_version);
        return Err(e);
    }

    let backup = backup_path(dir);
    warn_on_failure("remove", &backup, fs::remove_file(&backup));
    *settings = working;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(value: Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_legacy_aliases_become_objects() {
        let mut s = settings(json!({
            "alias": {
                "hello": ["echo", "hi", ",", "echo", "there"],
                "nested": [["echo", "a"]],
                "modern": {"commands": [["echo"]], "documentation": "d"}
            }
        }));
        assert!(migrate_legacy_aliases(&mut s).unwrap());
        assert_eq!(
            s["alias"]["hello"],
            json!({"commands": [["echo", "hi"], ["echo", "there"]], "documentation": null})
        );
        assert_eq!(s["alias"]["nested"]["commands"], json!([["echo", "a"]]));
        assert_eq!(s["alias"]["modern"]["documentation"], json!("d"));
    }

    #[test]
    fn test_pythonpaths_fold_into_commandpaths() {
        let mut s = settings(json!({
            "customcommands": {"pythonpaths": ["a", "b"], "commandpaths": ["b"]}
        }));
        assert!(migrate_command_paths(&mut s).unwrap());
        assert_eq!(s["customcommands"], json!({"commandpaths": ["b", "a"]}));
    }

    #[test]
    fn test_flowdeps_strings_become_lists() {
        let mut s = settings(json!({"flowdeps": {"build": "fetch, lint", "test": ["build"]}}));
        assert!(migrate_flowdeps_strings(&mut s).unwrap());
        assert_eq!(s["flowdeps"]["build"], json!(["fetch", "lint"]));
        assert_eq!(s["flowdeps"]["test"], json!(["build"]));

        let mut bad = settings(json!({"flowdeps": {"build": 3}}));
        assert!(migrate_flowdeps_strings(&mut bad).is_err());
    }

    #[test]
    fn test_migrate_writes_settings_and_version() {
        let dir = tempdir().unwrap();
        let mut s = settings(json!({"flowdeps": {"build": "fetch"}}));
        fs::write(
            dir.path().join(SETTINGS_FILENAME),
            serde_json::to_string(&s).unwrap(),
        )
        .unwrap();

        let version = migrate(dir.path(), &mut s, None, 0).unwrap();

        assert_eq!(version, latest_version());
        assert_eq!(s["flowdeps"]["build"], json!(["fetch"]));
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SETTINGS_FILENAME)).unwrap())
                .unwrap();
        assert_eq!(on_disk["flowdeps"]["build"], json!(["fetch"]));
        assert_eq!(
            fs::read_to_string(dir.path().join(VERSION_FILENAME)).unwrap(),
            latest_version().to_string()
        );
        assert!(!backup_path(dir.path()).exists());
    }

    #[test]
    fn test_failed_step_leaves_disk_untouched() {
        let dir = tempdir().unwrap();
        let original = json!({"alias": {"broken": 42}});
        fs::write(dir.path().join(SETTINGS_FILENAME), original.to_string()).unwrap();
        let mut s = settings(original.clone());

        let result = migrate(dir.path(), &mut s, None, 0);

        assert!(matches!(result, Err(MigrationError::Malformed { .. })));
        assert_eq!(Value::Object(s), original);
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SETTINGS_FILENAME)).unwrap())
                .unwrap();
        assert_eq!(on_disk, original);
    }

    #[test]
    fn test_up_to_date_profile_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let mut s = settings(json!({}));
        assert_eq!(
            migrate(dir.path(), &mut s, None, latest_version()).unwrap(),
            latest_version()
        );
        assert!(!dir.path().join(SETTINGS_FILENAME).exists());
    }

    #[test]
    fn test_failed_persist_restores_the_backup() {
        let dir = tempdir().unwrap();
        let original = json!({"flowdeps": {"build": "fetch"}});
        fs::write(dir.path().join(SETTINGS_FILENAME), original.to_string()).unwrap();
        // A directory in place of the version file makes the last write fail.
        fs::create_dir(dir.path().join(VERSION_FILENAME)).unwrap();
        let mut s = settings(original.clone());

        let result = migrate(dir.path(), &mut s, None, 0);

        assert!(matches!(result, Err(MigrationError::Io { .. })));
        assert_eq!(Value::Object(s), original);
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SETTINGS_FILENAME)).unwrap())
                .unwrap();
        assert_eq!(on_disk, original);
        assert!(!backup_path(dir.path()).exists());
    }
}

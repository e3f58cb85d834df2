// src/core/merger.rs

use crate::constants::SELF_KEY;
use crate::models::Settings;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MergeError {
    #[error(
        "Section '{section}' of profile '{profile}' is a {found}, but lower profiles define it as a {expected}."
    )]
    ShapeMismatch {
        section: String,
        profile: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Section '{section}' of profile '{profile}' must be an object or a list, found a {found}.")]
    UnsupportedShape {
        section: String,
        profile: String,
        found: &'static str,
    },
    #[error(
        "Key '{section}.{key}' of profile '{profile}' is a {found}, but lower profiles define it as a {expected}."
    )]
    KeyShapeMismatch {
        section: String,
        key: String,
        profile: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Key '{section}.{key}' of profile '{profile}' must be a list, an object or a string, found a {found}.")]
    UnsupportedKeyShape {
        section: String,
        key: String,
        profile: String,
        found: &'static str,
    },
}

/// The two merge outcomes of a profile stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSettings {
    /// Later profiles replace a section's top-level keys.
    pub overrides: Settings,
    /// Later profiles extend the lists and objects found under a section's keys.
    pub accumulated: Settings,
}

impl MergedSettings {
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.overrides.get(name).and_then(Value::as_object)
    }

    pub fn accumulated_section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.accumulated.get(name).and_then(Value::as_object)
    }

    /// `section[key]` from the override view.
    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// `section[key]` from the accumulate view.
    pub fn get_accumulated(&self, section: &str, key: &str) -> Option<&Value> {
        self.accumulated_section(section).and_then(|s| s.get(key))
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Accumulates one section's keys, one level deep: lists concatenate, objects take the
/// incoming keys, strings are replaced. Any other combination is an error.
fn accumulate_keys(
    existing: &mut Map<String, Value>,
    incoming: &Map<String, Value>,
    section: &str,
    profile: &str,
) -> Result<(), MergeError> {
    for (key, value) in incoming {
        let Some(slot) = existing.get_mut(key) else {
            existing.insert(key.clone(), value.clone());
            continue;
        };
        match (slot, value) {
            (Value::Array(items), Value::Array(new)) => items.extend(new.iter().cloned()),
            (Value::Object(fields), Value::Object(new)) => {
                for (field, item) in new {
                    fields.insert(field.clone(), item.clone());
                }
            }
            (Value::String(text), Value::String(new)) => *text = new.clone(),
            (_, Value::Null | Value::Bool(_) | Value::Number(_)) => {
                return Err(MergeError::UnsupportedKeyShape {
                    section: section.to_string(),
                    key: key.clone(),
                    profile: profile.to_string(),
                    found: shape_name(value),
                });
            }
            (slot, value) => {
                return Err(MergeError::KeyShapeMismatch {
                    section: section.to_string(),
                    key: key.clone(),
                    profile: profile.to_string(),
                    expected: shape_name(slot),
                    found: shape_name(value),
                });
            }
        }
    }
    Ok(())
}

/// Merges profile settings, lowest precedence first, into the override and accumulate views.
///
/// Each item is a profile name (used in diagnostics) and its settings; `None` entries are
/// placeholders and are skipped. The `_self` section never reaches either view. Disabled
/// profiles must be filtered out by the caller before merging.
pub fn merge<'a, I>(profiles: I) -> Result<MergedSettings, MergeError>
where
    I: IntoIterator<Item = (&'a str, Option<&'a Settings>)>,
{
    let mut merged = MergedSettings::default();

    for (profile, settings) in profiles {
        let Some(settings) = settings else {
            continue;
        };
        for (section, value) in settings {
            if section == SELF_KEY || value.is_null() {
                continue;
            }
            if !value.is_object() && !value.is_array() {
                return Err(MergeError::UnsupportedShape {
                    section: section.clone(),
                    profile: profile.to_string(),
                    found: shape_name(value),
                });
            }

            if !merged.overrides.contains_key(section) {
                merged.overrides.insert(section.clone(), value.clone());
                merged.accumulated.insert(section.clone(), value.clone());
                continue;
            }
            let (Some(over), Some(acc)) = (
                merged.overrides.get_mut(section),
                merged.accumulated.get_mut(section),
            ) else {
                continue;
            };

            match (over, acc, value) {
                (Value::Object(existing), Value::Object(accumulated), Value::Object(new)) => {
                    for (key, item) in new {
                        existing.insert(key.clone(), item.clone());
                    }
                    accumulate_keys(accumulated, new, section, profile)?;
                }
                (Value::Array(existing), Value::Array(accumulated), Value::Array(new)) => {
                    existing.extend(new.iter().cloned());
                    accumulated.extend(new.iter().cloned());
                }
                (existing, _, new) => {
                    return Err(MergeError::ShapeMismatch {
                        section: section.clone(),
                        profile: profile.to_string(),
                        expected: shape_name(existing),
                        found: shape_name(new),
                    });
                }
            }
        }
    }

    Ok(merged)
}

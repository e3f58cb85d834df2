// src/system/environment.rs

use crate::constants::{ENV_EXTENSION_PREFIX, ENV_PARAMETER_PREFIX, ENV_VALUE_PREFIX};
use std::collections::BTreeMap;

/// The process environment captured once at startup.
///
/// Child processes never see the live process environment: what they receive is derived
/// from this snapshot plus the merged `environment` section on every settings refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Captures the current process environment. Non UTF-8 entries are skipped.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars.iter().filter_map(move |(k, v)| {
            k.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, v.as_str()))
        })
    }
}

/// Encodes a dotted path for use in a variable name.
/// Segments are upper-cased, `-` becomes `__` and `.` becomes `_`.
pub fn encode_path(path: &str) -> String {
    path.to_uppercase().replace('-', "__").replace('.', "_")
}

/// Inverse of [`encode_path`].
pub fn decode_path(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if chars.peek() == Some(&'_') {
                chars.next();
                out.push('-');
            } else {
                out.push('.');
            }
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// `CLK_P_<PATH>`: remembered parameters for a command path.
pub fn parameter_var_name(path: &str) -> String {
    format!("{}{}", ENV_PARAMETER_PREFIX, encode_path(path))
}

/// `CLK_E_<NAME>`: enablement of an extension.
pub fn extension_var_name(name: &str) -> String {
    format!("{}{}", ENV_EXTENSION_PREFIX, encode_path(name))
}

/// `CLK___<NAME>`: a parsed parameter value exported to an external command.
pub fn value_var_name(param: &str) -> String {
    format!("{}{}", ENV_VALUE_PREFIX, param.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_encoding() {
        assert_eq!(encode_path("git.sync-all"), "GIT_SYNC__ALL");
        assert_eq!(decode_path("GIT_SYNC__ALL"), "git.sync-all");
        assert_eq!(parameter_var_name("echo"), "CLK_P_ECHO");
        assert_eq!(extension_var_name("my-ext"), "CLK_E_MY__EXT");
        assert_eq!(value_var_name("dry-run"), "CLK___DRY_RUN");
    }

    #[test]
    fn test_prefix_listing_skips_bare_prefix() {
        let env = EnvSnapshot::from_pairs([("CLK_P_", "x"), ("CLK_P_ECHO", "a b"), ("HOME", "/h")]);
        let found: Vec<_> = env.with_prefix("CLK_P_").collect();
        assert_eq!(found, vec![("ECHO", "a b")]);
    }
}

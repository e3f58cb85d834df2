// src/core/flow.rs

//! Flow dependencies: the commands to run before a command, computed from what commands
//! declare and what the `flowdeps` section overrides.

use crate::constants::{FLOW_SELF_PLACEHOLDER, FLOW_STOP_MARKER};
use crate::core::arg_parser;
use crate::core::command::{Command, Invocation, ancestors, path_tokens};
use crate::core::config::value_to_tokens;
use crate::core::session::Session;
use anyhow::Result;
use colored::Colorize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowError {
    #[error("Flow dependency cycle: {0}")]
    Cycle(String),
    #[error("'{marker}' is not a flow dependency of '{path}' (dependencies: {available})")]
    TruncationPointNotFound {
        path: String,
        marker: String,
        available: String,
    },
}

/// Where the computed list starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Truncation<'a> {
    /// Start at this step, included.
    pub from: Option<&'a str>,
    /// Start after this step.
    pub after: Option<&'a str>,
    /// A missing step leaves the list untouched instead of failing.
    pub safe: bool,
}

/// Replaces `[self]` in a configured list by the statically declared dependencies.
pub fn expand_self(configured: &[String], declared: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(configured.len() + declared.len());
    for dep in configured {
        if dep == FLOW_SELF_PLACEHOLDER {
            out.extend(declared.iter().cloned());
        } else {
            out.push(dep.clone());
        }
    }
    out
}

fn expand<F>(path: &str, own: &F, visiting: &mut Vec<String>, out: &mut Vec<String>) -> Result<(), FlowError>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut direct = own(path);
    for ancestor in ancestors(path) {
        direct.extend(own(&ancestor));
    }
    for dep in direct {
        if dep == FLOW_STOP_MARKER {
            out.push(dep);
            continue;
        }
        if visiting.contains(&dep) {
            visiting.push(dep);
            return Err(FlowError::Cycle(visiting.join(" -> ")));
        }
        visiting.push(dep.clone());
        expand(&dep, own, visiting, out)?;
        visiting.pop();
        out.push(dep);
    }
    Ok(())
}

fn truncate(path: &str, deps: Vec<String>, truncation: Truncation<'_>) -> Result<Vec<String>, FlowError> {
    let (marker, skip) = match (truncation.from, truncation.after) {
        (Some(from), _) => (from, 0),
        (None, Some(after)) => (after, 1),
        (None, None) => return Ok(deps),
    };
    match deps.iter().position(|d| d == marker) {
        Some(index) => Ok(deps.into_iter().skip(index + skip).collect()),
        None if truncation.safe => Ok(deps),
        None => Err(FlowError::TruncationPointNotFound {
            path: path.to_string(),
            marker: marker.to_string(),
            available: deps.join(", "),
        }),
    }
}

/// Computes the ordered, distinct dependencies of `path`.
///
/// `own` gives the direct dependencies of a path. The direct dependencies of `path` come
/// first, then those of its parents, innermost first. Each dependency is preceded by its
/// own dependencies. Everything up to the last `[stop]` is dropped, then duplicates are
/// removed keeping the first occurrence.
pub fn dependencies_with<F>(path: &str, own: F, truncation: Truncation<'_>) -> Result<Vec<String>, FlowError>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut raw = Vec::new();
    let mut visiting = vec![path.to_string()];
    expand(path, &own, &mut visiting, &mut raw)?;

    if let Some(stop) = raw.iter().rposition(|d| d == FLOW_STOP_MARKER) {
        raw.drain(..=stop);
    }
    let mut seen = HashSet::new();
    raw.retain(|d| seen.insert(d.clone()));

    truncate(path, raw, truncation)
}

/// The direct dependencies of `path` in the current configuration.
pub fn own_dependencies(session: &Session, path: &str) -> Vec<String> {
    let declared = session
        .resolve(path)
        .map(|r| r.command.flowdepends.clone())
        .unwrap_or_else(|e| {
            log::debug!("No declared flow dependencies for '{}': {}", path, e);
            Vec::new()
        });
    match session.config().flowdeps_override(path) {
        Some(configured) => expand_self(&configured, &declared),
        None => declared,
    }
}

/// [`dependencies_with`] against the session's configuration.
pub fn dependencies_of(session: &Session, path: &str, truncation: Truncation<'_>) -> Result<Vec<String>, FlowError> {
    dependencies_with(path, |p| own_dependencies(session, p), truncation)
}

/// Arguments forwarded from `invocation` to `target` through the command's flow links.
pub fn forwarded_args(command: &Command, invocation: &Invocation, target: &str) -> Vec<String> {
    let linked: Vec<&String> = command
        .flow_links
        .iter()
        .filter(|link| link.target == target)
        .flat_map(|link| link.params.iter())
        .collect();
    if linked.is_empty() {
        return Vec::new();
    }
    let params: Vec<_> = command
        .params
        .iter()
        .filter(|p| linked.contains(&&p.name))
        .cloned()
        .collect();
    let mut explicit = invocation.clone();
    explicit.values.retain(|name, value| {
        linked.contains(&name) && value.source.is_explicit()
    });
    arg_parser::to_args(&params, &explicit)
}

fn status(session: &Session, message: &str) {
    if session.config().options.flow_verbose {
        eprintln!("{} {}", "[flow]".cyan().bold(), message);
    } else {
        log::info!("{}", message);
    }
}

/// Runs the flow dependencies of `command`, each as an isolated nested invocation.
pub fn run_dependencies(session: &mut Session, command: &Command, invocation: &Invocation) -> Result<()> {
    let truncation = Truncation {
        from: invocation.get_one("flow-from"),
        after: invocation.get_one("flow-after"),
        safe: false,
    };
    let deps = dependencies_of(session, &command.path, truncation)?;
    let total = deps.len();
    for (index, dep) in deps.iter().enumerate() {
        session.check_interrupted(&command.path)?;
        status(session, &format!("({}/{}) Running {}", index + 1, total, dep.bold()));
        let forwarded = forwarded_args(command, invocation, dep);
        session.run_isolated(|s| {
            if !forwarded.is_empty() {
                let mut tokens = s.config().remembered_parameters(dep, false);
                tokens.extend(forwarded.iter().cloned());
                let parameters = s
                    .config_mut()
                    .flow_settings_mut()
                    .entry("parameters")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(section) = parameters {
                    section.insert(dep.clone(), Value::from(tokens));
                }
                s.refresh()?;
            }
            s.execute(&path_tokens(dep))
        })?;
        status(session, &format!("({}/{}) Done {}", index + 1, total, dep));
    }
    if total > 0 {
        status(session, &format!("Running {}", command.path.bold()));
    }
    Ok(())
}

/// Renders the dependency tree of `path` for display.
pub fn dependency_tree(session: &Session, path: &str) -> Vec<String> {
    fn walk(session: &Session, path: &str, depth: usize, visiting: &mut Vec<String>, lines: &mut Vec<String>) {
        for dep in own_dependencies(session, path) {
            let indent = "  ".repeat(depth);
            if dep == FLOW_STOP_MARKER {
                lines.push(format!("{}{}", indent, dep.dimmed()));
                continue;
            }
            if visiting.contains(&dep) {
                lines.push(format!("{}{} {}", indent, dep, "(cycle)".red()));
                continue;
            }
            lines.push(format!("{}{}", indent, dep));
            visiting.push(dep.clone());
            walk(session, &dep, depth + 1, visiting, lines);
            visiting.pop();
        }
    }
    let mut lines = vec![path.to_string()];
    let mut visiting = vec![path.to_string()];
    walk(session, path, 1, &mut visiting, &mut lines);
    lines
}

/// Accepts either a list or a comma separated string for a `flowdeps` entry.
pub fn parse_dependency_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        other => value_to_tokens(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn deps(g: &HashMap<String, Vec<String>>, path: &str, truncation: Truncation<'_>) -> Result<Vec<String>, FlowError> {
        dependencies_with(path, |p| g.get(p).cloned().unwrap_or_default(), truncation)
    }

    #[test]
    fn test_depth_first_and_deduplicated() {
        let g = graph(&[
            ("deploy", &["build", "test"]),
            ("test", &["build", "lint"]),
            ("build", &["fetch"]),
        ]);
        let first = deps(&g, "deploy", Truncation::default()).unwrap();
        assert_eq!(first, vec!["fetch", "build", "lint", "test"]);
        assert_eq!(deps(&g, "deploy", Truncation::default()).unwrap(), first);
    }

    #[test]
    fn test_parent_dependencies_follow_own() {
        let g = graph(&[("app.run", &["compile"]), ("app", &["setup"])]);
        assert_eq!(
            deps(&g, "app.run", Truncation::default()).unwrap(),
            vec!["compile", "setup"]
        );
    }

    #[test]
    fn test_stop_marker_discards_everything_before() {
        let g = graph(&[("x", &["a", "b", "[stop]", "c", "d"])]);
        assert_eq!(deps(&g, "x", Truncation::default()).unwrap(), vec!["c", "d"]);
    }

    #[test]
    fn test_from_and_after() {
        let g = graph(&[("x", &["a", "b", "c", "d"])]);
        let from = Truncation {
            from: Some("c"),
            ..Default::default()
        };
        assert_eq!(deps(&g, "x", from).unwrap(), vec!["c", "d"]);
        let after = Truncation {
            after: Some("c"),
            ..Default::default()
        };
        assert_eq!(deps(&g, "x", after).unwrap(), vec!["d"]);
    }

    #[test]
    fn test_missing_truncation_point() {
        let g = graph(&[("x", &["a", "b"])]);
        let strict = Truncation {
            from: Some("z"),
            ..Default::default()
        };
        assert!(matches!(
            deps(&g, "x", strict),
            Err(FlowError::TruncationPointNotFound { .. })
        ));
        let safe = Truncation {
            from: Some("z"),
            safe: true,
            ..Default::default()
        };
        assert_eq!(deps(&g, "x", safe).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_cycles_are_detected() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        assert_eq!(
            deps(&g, "a", Truncation::default()),
            Err(FlowError::Cycle("a -> b -> c -> a".to_string()))
        );
    }

    #[test]
    fn test_self_placeholder() {
        let configured = vec!["pre".to_string(), "[self]".to_string(), "post".to_string()];
        let declared = vec!["build".to_string(), "test".to_string()];
        assert_eq!(
            expand_self(&configured, &declared),
            vec!["pre", "build", "test", "post"]
        );
    }

    #[test]
    fn test_dependency_list_parsing() {
        assert_eq!(
            parse_dependency_list(&serde_json::json!("a, b,,c")),
            vec!["a", "b", "c"]
        );
        assert_eq!(parse_dependency_list(&serde_json::json!(["a"])), vec!["a"]);
    }
}

// src/core/resolvers/alias.rs

use crate::core::command::{Command, Invocation, join_path, split_path};
use crate::core::command_resolution::ResolveError;
use crate::core::resolver::{CommandResolver, ResolveContext};
use crate::core::session::Session;
use crate::models::{AliasDefinition, ParamSpec};
use anyhow::{Result, anyhow};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reads the `alias` section. Malformed entries are skipped with a warning.
pub fn alias_definitions(ctx: &ResolveContext<'_>) -> BTreeMap<String, AliasDefinition> {
    let Some(section) = ctx.config.merged().section("alias") else {
        return BTreeMap::new();
    };
    section
        .iter()
        .filter_map(|(name, value)| {
            match serde_json::from_value::<AliasDefinition>(value.clone()) {
                Ok(def) => Some((name.clone(), def)),
                Err(e) => {
                    log::warn!("Ignoring malformed alias '{}': {}", name, e);
                    None
                }
            }
        })
        .collect()
}

/// `["git.log", "-n", "3"]` -> `["git", "log", "-n", "3"]`.
pub fn expand_dotted_head(command: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(command.len() + 1);
    let mut iter = command.iter();
    if let Some(head) = iter.next() {
        if head.contains('.') && !head.starts_with('-') {
            expanded.extend(head.split('.').filter(|s| !s.is_empty()).map(str::to_string));
        } else {
            expanded.push(head.clone());
        }
    }
    expanded.extend(iter.cloned());
    expanded
}

/// Commands stored in settings that replay other commands.
#[derive(Debug, Default)]
pub struct AliasResolver;

impl CommandResolver for AliasResolver {
    fn name(&self) -> &'static str {
        "alias"
    }

    fn list_paths(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(alias_definitions(ctx).into_keys().collect())
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        _parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        let Some(definition) = alias_definitions(ctx).remove(path) else {
            return Ok(None);
        };
        let commands: Vec<Vec<String>> = definition
            .commands
            .iter()
            .map(|c| expand_dotted_head(c))
            .filter(|c| !c.is_empty())
            .collect();
        if commands.is_empty() {
            return Err(anyhow!("alias '{}' has no commands", path));
        }

        let mut targets = Vec::with_capacity(commands.len());
        for command in &commands {
            let (target, consumed) = match ctx.resolution.path_of_args(ctx, command) {
                Ok((_, 0)) => {
                    log::debug!("Alias '{}' refers to an unknown command {:?}", path, command);
                    continue;
                }
                Ok(found) => found,
                Err(e @ ResolveError::Cycle { .. }) => return Err(e.into()),
                Err(e) => {
                    log::debug!("Alias '{}' refers to an unresolvable command: {}", path, e);
                    continue;
                }
            };
            targets.push((target, consumed == command.len()));
        }

        // Flow dependencies: the union of those of every aliased command without an
        // explicit override of its own.
        let mut flowdepends: Vec<String> = Vec::new();
        for (target, _) in &targets {
            if ctx.config.flowdeps_override(target).is_some() {
                continue;
            }
            let Ok(resolved) = ctx.resolution.resolve(ctx, target) else {
                continue;
            };
            for dep in &resolved.command.flowdepends {
                if !flowdepends.contains(dep) {
                    flowdepends.push(dep.clone());
                }
            }
        }

        let help = definition.documentation.clone().unwrap_or_else(|| {
            let rendered: Vec<String> = commands.iter().map(|c| c.join(" ")).collect();
            format!("Alias for: {}", rendered.join(" , "))
        });

        let mut command = Command::new(path).with_help(&help);
        command.flowdepends = flowdepends;
        // The replayed commands decide for themselves.
        command.handle_dry_run = true;

        // A single command naming exactly a group makes the alias a group too, whose
        // subcommands are those of the target.
        if let [(target, exact)] = targets.as_slice() {
            if let Ok(resolved) = ctx.resolution.resolve(ctx, target) {
                if *exact && resolved.command.is_group {
                    command.is_group = true;
                    command.resolvers = None;
                }
                command.original_command = Some(resolved.command);
            }
        }

        if !command.is_group {
            command.params.push(
                ParamSpec::remainder("args").help("Extra arguments appended to the last command"),
            );
            command.ignore_unknown_options = true;
        }

        command.callback = Some(std::rc::Rc::new(
            move |session: &mut Session, invocation: &Invocation| {
                let last = commands.len().saturating_sub(1);
                for (index, stored) in commands.iter().enumerate() {
                    let mut args = stored.clone();
                    if index == last {
                        args.extend(invocation.get_many("args").iter().cloned());
                    }
                    log::debug!("Alias step {}: {:?}", index + 1, args);
                    session.run_nested(&args)?;
                }
                Ok(())
            },
        ));

        Ok(Some(command))
    }
}

/// Serves the subcommands of an alias that stands for a group.
#[derive(Debug, Default)]
pub struct AliasToGroupResolver;

impl AliasToGroupResolver {
    fn target_group(parent: &Command) -> Option<&Command> {
        parent
            .original_command
            .as_deref()
            .filter(|original| parent.is_group && original.is_group)
    }
}

impl CommandResolver for AliasToGroupResolver {
    fn name(&self) -> &'static str {
        "alias-to-group"
    }

    fn list_paths(&self, _ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn list_children(&self, ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        match Self::target_group(parent) {
            Some(target) => Ok(ctx.resolution.child_names(ctx, target)),
            None => Ok(Vec::new()),
        }
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        let Some(target) = Self::target_group(parent) else {
            return Ok(None);
        };
        let (_, leaf) = split_path(path);
        let resolved = ctx
            .resolution
            .resolve(ctx, &join_path(&target.path, leaf))?;
        Ok(Some(resolved.command.with_path(path)))
    }
}

/// Builds the JSON stored for an alias.
pub fn alias_value(commands: &[Vec<String>], documentation: Option<&str>) -> Value {
    serde_json::json!({
        "commands": commands,
        "documentation": documentation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_dotted_head() {
        let cmd = vec!["git.log".to_string(), "-n".to_string(), "3".to_string()];
        assert_eq!(expand_dotted_head(&cmd), vec!["git", "log", "-n", "3"]);
        let cmd = vec!["echo".to_string(), "a.b".to_string()];
        assert_eq!(expand_dotted_head(&cmd), vec!["echo", "a.b"]);
    }

    #[test]
    fn test_alias_value_shape() {
        let value = alias_value(&[vec!["echo".into(), "hi".into()]], None);
        assert_eq!(
            value,
            serde_json::json!({"commands": [["echo", "hi"]], "documentation": null})
        );
    }
}

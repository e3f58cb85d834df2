// src/core/resolvers/builtin.rs

use crate::constants::APP_NAME;
use crate::core::command::{Command, StaticChild, join_path, split_path};
use crate::core::resolver::{CommandResolver, ResolveContext};
use anyhow::Result;

fn find_child<'a>(children: &'a [StaticChild], name: &str) -> Option<&'a StaticChild> {
    children
        .iter()
        .find(|c| c.name == name || c.aliases.contains(&name))
}

fn build_child(children: &[StaticChild], path: &str) -> Option<Command> {
    let (_, leaf) = split_path(path);
    find_child(children, leaf).map(|child| (child.build)(path))
}

/// The built-in commands registered on the root command.
#[derive(Debug, Default)]
pub struct CoreResolver;

impl CommandResolver for CoreResolver {
    fn name(&self) -> &'static str {
        "core"
    }

    fn list_paths(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(ctx
            .resolution
            .root()
            .static_children
            .iter()
            .map(|c| join_path(APP_NAME, c.name))
            .collect())
    }

    fn list_children(&self, ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        if parent.path != APP_NAME {
            return Ok(Vec::new());
        }
        Ok(ctx
            .resolution
            .root()
            .static_children
            .iter()
            .map(|c| c.name.to_string())
            .collect())
    }

    fn claims(&self, ctx: &ResolveContext<'_>, parent: &Command, leaf: &str) -> Result<bool> {
        Ok(parent.path == APP_NAME
            && find_child(&ctx.resolution.root().static_children, leaf).is_some())
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        _parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        Ok(build_child(&ctx.resolution.root().static_children, path))
    }
}

/// The statically declared subcommands of a non-root group.
#[derive(Debug, Default)]
pub struct GroupResolver;

impl CommandResolver for GroupResolver {
    fn name(&self) -> &'static str {
        "group"
    }

    /// Static children are only reachable through their parent.
    fn list_paths(&self, _ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn list_children(&self, _ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        Ok(parent
            .static_children
            .iter()
            .map(|c| c.name.to_string())
            .collect())
    }

    fn claims(&self, _ctx: &ResolveContext<'_>, parent: &Command, leaf: &str) -> Result<bool> {
        Ok(find_child(&parent.static_children, leaf).is_some())
    }

    fn materialize(
        &self,
        _ctx: &ResolveContext<'_>,
        parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        Ok(build_child(&parent.static_children, path))
    }
}

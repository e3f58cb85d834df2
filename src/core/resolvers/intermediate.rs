// src/core/resolvers/intermediate.rs

use crate::core::command::{Command, join_path};
use crate::core::resolver::{CommandResolver, ResolveContext};
use anyhow::Result;

/// Synthesizes the groups implied by longer paths: if `git.remote.add` exists but nothing
/// defines `git.remote`, the latter is an empty group.
#[derive(Debug, Default)]
pub struct IntermediateResolver;

impl CommandResolver for IntermediateResolver {
    fn name(&self) -> &'static str {
        "intermediate"
    }

    fn list_paths(&self, _ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn list_children(&self, ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        let prefix = join_path(&parent.path, "");
        let mut children: Vec<String> = ctx
            .resolution
            .known_paths(ctx)
            .iter()
            .filter_map(|path| path.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split_once('.'))
            .map(|(segment, _)| segment.to_string())
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    fn materialize(
        &self,
        _ctx: &ResolveContext<'_>,
        _parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        Ok(Some(Command::group(path)))
    }
}

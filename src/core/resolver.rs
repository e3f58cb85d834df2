// src/core/resolver.rs

use crate::core::cache::ExternalMetadataCache;
use crate::core::command::{Command, split_path};
use crate::core::command_resolution::CommandResolution;
use crate::core::config::Config;
use crate::core::resolvers::hook::HookRegistry;
use anyhow::Result;
use std::cell::RefCell;
use std::fmt;

/// What a resolver may look at while listing or materializing commands.
pub struct ResolveContext<'a> {
    pub config: &'a Config,
    pub hooks: &'a HookRegistry,
    pub external_cache: &'a RefCell<ExternalMetadataCache>,
    pub resolution: &'a CommandResolution,
}

impl fmt::Debug for ResolveContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveContext")
            .field("signature", &self.config.signature())
            .finish_non_exhaustive()
    }
}

/// A source of commands.
///
/// Resolvers are asked, in chain order, whether they list a name among the children of a
/// parent; the first one that does materializes it. Returning `Ok(None)` from
/// [`materialize`](CommandResolver::materialize) means "not claimed after all" and the
/// chain moves on. Errors are reserved for real failures such as unreadable definitions.
pub trait CommandResolver: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Every dotted path this resolver can serve, at any depth.
    fn list_paths(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>>;

    /// Leaf names this resolver serves directly under `parent`.
    fn list_children(&self, ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        Ok(self
            .list_paths(ctx)?
            .into_iter()
            .filter_map(|path| match split_path(&path) {
                (Some(p), leaf) if p == parent.path => Some(leaf.to_string()),
                _ => None,
            })
            .collect())
    }

    /// Whether `leaf` is served under `parent`. Resolvers accepting extra spellings
    /// (such as aliases of built-ins) override this.
    fn claims(&self, ctx: &ResolveContext<'_>, parent: &Command, leaf: &str) -> Result<bool> {
        Ok(self.list_children(ctx, parent)?.iter().any(|c| c == leaf))
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        parent: &Command,
        path: &str,
    ) -> Result<Option<Command>>;
}

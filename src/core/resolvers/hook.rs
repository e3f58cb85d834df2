// src/core/resolvers/hook.rs

use crate::core::command::{Command, split_path};
use crate::core::resolver::{CommandResolver, ResolveContext};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Builds a hook command for the path it is resolved at.
pub type HookFactory = Rc<dyn Fn(&str) -> Command>;

/// Rewrites a freshly resolved command before it is cached.
pub type PostResolutionHandler = Rc<dyn Fn(&ResolveContext<'_>, &mut Command)>;

/// Commands and post-resolution handlers registered programmatically by library users.
#[derive(Default, Clone)]
pub struct HookRegistry {
    commands: BTreeMap<String, HookFactory>,
    post_handlers: Vec<PostResolutionHandler>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("post_handlers", &self.post_handlers.len())
            .finish()
    }
}

impl HookRegistry {
    /// Registers a command at a dotted path. A later registration replaces an earlier one.
    pub fn register_command<F>(&mut self, path: &str, factory: F)
    where
        F: Fn(&str) -> Command + 'static,
    {
        self.commands.insert(path.to_string(), Rc::new(factory));
    }

    pub fn register_post_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ResolveContext<'_>, &mut Command) + 'static,
    {
        self.post_handlers.push(Rc::new(handler));
    }

    pub fn post_handlers(&self) -> &[PostResolutionHandler] {
        &self.post_handlers
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.commands.keys()
    }

    fn build(&self, path: &str) -> Option<Command> {
        self.commands.get(path).map(|factory| factory(path))
    }
}

/// Serves the commands of the [`HookRegistry`].
#[derive(Debug, Default)]
pub struct HookResolver;

impl CommandResolver for HookResolver {
    fn name(&self) -> &'static str {
        "hook"
    }

    fn list_paths(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>> {
        Ok(ctx.hooks.paths().cloned().collect())
    }

    fn list_children(&self, ctx: &ResolveContext<'_>, parent: &Command) -> Result<Vec<String>> {
        Ok(ctx
            .hooks
            .paths()
            .filter_map(|path| match split_path(path) {
                (Some(p), leaf) if p == parent.path => Some(leaf.to_string()),
                _ => None,
            })
            .collect())
    }

    fn materialize(
        &self,
        ctx: &ResolveContext<'_>,
        _parent: &Command,
        path: &str,
    ) -> Result<Option<Command>> {
        Ok(ctx.hooks.build(path))
    }
}

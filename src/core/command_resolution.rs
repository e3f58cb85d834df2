// src/core/command_resolution.rs

use crate::constants::{APP_NAME, CORE_ONLY_PREFIX};
use crate::core::cache::CommandCache;
use crate::core::command::{Command, join_path, split_path};
use crate::core::resolver::{CommandResolver, ResolveContext};
use crate::core::resolvers;
use crate::models::{ParamKind, ParamOrigin, ParamSpec};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// A resolved command and the name of the resolver that produced it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub command: Rc<Command>,
    pub resolver: &'static str,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No such command '{path}' (unknown name '{segment}')")]
    NotFound { path: String, segment: String },
    #[error("Cycle detected while resolving '{path}': {chain}")]
    Cycle { path: String, chain: String },
    #[error("Command '{path}' could not be loaded: {reason}\nRun with CLK_LOG=debug for more details.")]
    Load { path: String, reason: String },
}

fn load_error(path: &str, error: anyhow::Error) -> ResolveError {
    match error.downcast::<ResolveError>() {
        Ok(cycle @ ResolveError::Cycle { .. }) => cycle,
        Ok(other) => ResolveError::Load {
            path: path.to_string(),
            reason: other.to_string(),
        },
        Err(error) => ResolveError::Load {
            path: path.to_string(),
            reason: format!("{:#}", error),
        },
    }
}

/// Adds `--flow`, `--flow-from` and `--flow-after` to commands that have flow dependencies.
fn add_flow_params(ctx: &ResolveContext<'_>, command: &mut Command) {
    let has_deps = !command.flowdepends.is_empty()
        || ctx
            .config
            .flowdeps_override(&command.path)
            .is_some_and(|deps| !deps.is_empty());
    if !has_deps {
        return;
    }
    let flow_params = [
        ParamSpec::flag("flow").help("Run the flow dependencies before the command"),
        ParamSpec::option("flow-from")
            .help("Run the flow starting at this dependency (included)"),
        ParamSpec::option("flow-after")
            .help("Run the flow starting after this dependency (excluded)"),
    ];
    for param in flow_params {
        if !command.has_param(&param.name) {
            command.params.push(param.origin(ParamOrigin::Flow));
        }
    }
}

/// Copies what `parent` shares onto `child`. Parameters the child declares itself win.
fn inherit_params(parent: &Command, child: &mut Command) {
    let inherited: Vec<ParamSpec> = parent
        .params
        .iter()
        .filter(|p| p.kind != ParamKind::Argument)
        .filter(|p| match p.origin {
            ParamOrigin::Declared => parent.propagate_params,
            ParamOrigin::Inherited => true,
            ParamOrigin::Flow | ParamOrigin::Builtin => false,
        })
        .filter(|p| !child.has_param(&p.name))
        .cloned()
        .collect();
    child
        .params
        .extend(inherited.into_iter().map(|p| p.origin(ParamOrigin::Inherited)));
}

/// Maps dotted paths to commands through the resolver chains, memoizing the results.
pub struct CommandResolution {
    root: Rc<Command>,
    root_chain: Vec<Rc<dyn CommandResolver>>,
    child_chain: Vec<Rc<dyn CommandResolver>>,
    root_core_chain: Vec<Rc<dyn CommandResolver>>,
    child_core_chain: Vec<Rc<dyn CommandResolver>>,
    cache: RefCell<CommandCache>,
    in_progress: RefCell<Vec<String>>,
    known_paths: RefCell<Option<(String, Rc<Vec<String>>)>>,
}

impl fmt::Debug for CommandResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResolution")
            .field("root", &self.root.path)
            .field("cached", &self.cache.borrow().len())
            .field("in_progress", &self.in_progress.borrow())
            .finish_non_exhaustive()
    }
}

impl CommandResolution {
    pub fn new(root: Command) -> Self {
        Self {
            root: Rc::new(root),
            root_chain: resolvers::default_chain(true),
            child_chain: resolvers::default_chain(false),
            root_core_chain: resolvers::core_only_chain(true),
            child_core_chain: resolvers::core_only_chain(false),
            cache: RefCell::new(CommandCache::default()),
            in_progress: RefCell::new(Vec::new()),
            known_paths: RefCell::new(None),
        }
    }

    /// The main entry point.
    pub fn root(&self) -> &Command {
        &self.root
    }

    fn chain_for(&self, parent: &Command) -> Vec<Rc<dyn CommandResolver>> {
        if let Some(own) = &parent.resolvers {
            return own.clone();
        }
        if parent.path == APP_NAME {
            self.root_chain.clone()
        } else {
            self.child_chain.clone()
        }
    }

    fn core_chain_for(&self, parent: &Command) -> &[Rc<dyn CommandResolver>] {
        if parent.path == APP_NAME {
            &self.root_core_chain
        } else {
            &self.child_core_chain
        }
    }

    /// Resolves `path`, from the cache when the profile stack has not changed.
    pub fn resolve(&self, ctx: &ResolveContext<'_>, path: &str) -> Result<Resolved, ResolveError> {
        self.cache.borrow_mut().validate(ctx.config.signature());
        let cached = self.cache.borrow().get(path);
        if let Some(hit) = cached {
            return Ok(hit);
        }

        if path == APP_NAME {
            let resolved = Resolved {
                command: self.root.clone(),
                resolver: "core",
            };
            self.cache.borrow_mut().insert(path, resolved.clone());
            return Ok(resolved);
        }

        if self.in_progress.borrow().iter().any(|p| p == path) {
            let mut chain = self.in_progress.borrow().clone();
            chain.push(path.to_string());
            return Err(ResolveError::Cycle {
                path: path.to_string(),
                chain: chain.join(" -> "),
            });
        }

        self.in_progress.borrow_mut().push(path.to_string());
        let result = self.resolve_uncached(ctx, path);
        self.in_progress.borrow_mut().pop();

        let resolved = result?;
        log::trace!("Resolved '{}' with the {} resolver", path, resolved.resolver);
        self.cache.borrow_mut().insert(path, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(
        &self,
        ctx: &ResolveContext<'_>,
        path: &str,
    ) -> Result<Resolved, ResolveError> {
        let (parent_path, leaf) = split_path(path);
        let parent = self.resolve(ctx, parent_path.unwrap_or(APP_NAME))?.command;
        let not_found = || ResolveError::NotFound {
            path: path.to_string(),
            segment: leaf.to_string(),
        };
        if !parent.is_group {
            return Err(not_found());
        }

        let (lookup, chain) = match leaf.strip_prefix(CORE_ONLY_PREFIX) {
            Some(stripped) if !stripped.is_empty() => {
                (stripped, self.core_chain_for(&parent).to_vec())
            }
            _ => (leaf, self.chain_for(&parent)),
        };
        let canonical = join_path(&parent.path, lookup);

        for resolver in chain {
            let claimed = resolver
                .claims(ctx, &parent, lookup)
                .map_err(|e| load_error(path, e))?;
            if !claimed {
                continue;
            }
            let mut command = match resolver.materialize(ctx, &parent, &canonical) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("The {} resolver failed on '{}': {:#}", resolver.name(), path, e);
                    return Err(load_error(path, e));
                }
            };
            command.path = canonical;
            inherit_params(&parent, &mut command);
            add_flow_params(ctx, &mut command);
            for handler in ctx.hooks.post_handlers() {
                handler(ctx, &mut command);
            }
            return Ok(Resolved {
                command: Rc::new(command),
                resolver: resolver.name(),
            });
        }
        Err(not_found())
    }

    /// Best-effort resolution: failures become a placeholder describing them.
    pub fn resolve_or_broken(&self, ctx: &ResolveContext<'_>, path: &str) -> Rc<Command> {
        match self.resolve(ctx, path) {
            Ok(resolved) => resolved.command,
            Err(e) => {
                log::debug!("Could not resolve '{}': {}", path, e);
                Rc::new(Command::broken(path, &e.to_string()))
            }
        }
    }

    /// Names of the subcommands of `command`, sorted.
    pub fn child_names(&self, ctx: &ResolveContext<'_>, command: &Command) -> Vec<String> {
        if !command.is_group {
            return Vec::new();
        }
        let mut names = BTreeSet::new();
        for resolver in self.chain_for(command) {
            match resolver.list_children(ctx, command) {
                Ok(children) => names.extend(children),
                Err(e) => log::debug!(
                    "The {} resolver could not list '{}': {:#}",
                    resolver.name(),
                    command.path,
                    e
                ),
            }
        }
        names.into_iter().collect()
    }

    /// Every path the default chain can list, memoized per profile stack.
    pub fn known_paths(&self, ctx: &ResolveContext<'_>) -> Rc<Vec<String>> {
        let signature = ctx.config.signature();
        if let Some((cached_for, paths)) = &*self.known_paths.borrow() {
            if cached_for == signature {
                return paths.clone();
            }
        }
        let mut paths = BTreeSet::new();
        for resolver in &self.root_chain {
            match resolver.list_paths(ctx) {
                Ok(listed) => paths.extend(listed),
                Err(e) => log::debug!("The {} resolver could not list paths: {:#}", resolver.name(), e),
            }
        }
        let paths = Rc::new(paths.into_iter().collect::<Vec<_>>());
        *self.known_paths.borrow_mut() = Some((signature.to_string(), paths.clone()));
        paths
    }

    /// Follows leading command tokens of `args` as deep as they resolve.
    ///
    /// Returns the deepest path reached and how many tokens it used. Only cycles are
    /// reported; any other failure just stops the walk.
    pub fn path_of_args(
        &self,
        ctx: &ResolveContext<'_>,
        args: &[String],
    ) -> Result<(String, usize), ResolveError> {
        let mut current = APP_NAME.to_string();
        let mut consumed = 0;
        for token in args {
            if token.starts_with('-') || !self.resolve(ctx, &current)?.command.is_group {
                break;
            }
            let candidate = join_path(&current, token);
            match self.resolve(ctx, &candidate) {
                Ok(_) => {
                    current = candidate;
                    consumed += 1;
                }
                Err(e @ ResolveError::Cycle { .. }) => return Err(e),
                Err(_) => break,
            }
        }
        Ok((current, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ExternalMetadataCache;
    use crate::core::config::{Config, ConfigOptions};
    use crate::core::profile_stack::ProfileStore;
    use crate::core::resolvers::hook::HookRegistry;
    use crate::system::environment::EnvSnapshot;
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn echo(path: &str) -> Command {
        Command::new(path)
            .with_help("Print")
            .with_param(ParamSpec::remainder("words"))
    }

    fn remote_add(path: &str) -> Command {
        Command::new(path).with_flowdepends(&["echo"])
    }

    fn remote(path: &str) -> Command {
        Command::group(path).with_child("add", remote_add)
    }

    fn root() -> Command {
        let mut root = Command::group(APP_NAME);
        root.static_children.push(crate::core::command::StaticChild {
            name: "echo",
            aliases: &["say"],
            build: echo,
        });
        root.with_child("remote", remote)
    }

    struct Fixture {
        _dir: TempDir,
        config: Config,
        hooks: HookRegistry,
        external: RefCell<ExternalMetadataCache>,
        resolution: CommandResolution,
        store: ProfileStore,
    }

    impl Fixture {
        fn new(settings: Value) -> Self {
            let dir = tempdir().unwrap();
            let global = dir.path().join("global");
            let cwd = dir.path().join("work");
            fs::create_dir_all(&global).unwrap();
            fs::create_dir_all(&cwd).unwrap();
            fs::write(global.join("settings.json"), settings.to_string()).unwrap();
            fs::write(global.join("version.txt"), "3").unwrap();
            let mut store = ProfileStore::default();
            let mut config = Config::new(
                global,
                cwd,
                EnvSnapshot::from_pairs(Vec::<(String, String)>::new()),
                ConfigOptions::default(),
            );
            config.refresh(&mut store).unwrap();
            Self {
                _dir: dir,
                config,
                hooks: HookRegistry::default(),
                external: RefCell::new(ExternalMetadataCache::in_memory()),
                resolution: CommandResolution::new(root()),
                store,
            }
        }

        fn ctx(&self) -> ResolveContext<'_> {
            ResolveContext {
                config: &self.config,
                hooks: &self.hooks,
                external_cache: &self.external,
                resolution: &self.resolution,
            }
        }
    }

    #[test]
    fn test_cached_commands_are_identical() {
        let fx = Fixture::new(json!({}));
        let ctx = fx.ctx();
        let first = fx.resolution.resolve(&ctx, "echo").unwrap();
        let second = fx.resolution.resolve(&ctx, "echo").unwrap();
        assert!(Rc::ptr_eq(&first.command, &second.command));
        assert_eq!(first.resolver, "core");
        let by_alias = fx.resolution.resolve(&ctx, "say").unwrap();
        assert_eq!(by_alias.command.path, "say");
    }

    #[test]
    fn test_stack_change_invalidates_cache() {
        let mut fx = Fixture::new(json!({}));
        let first = fx.resolution.resolve(&fx.ctx(), "echo").unwrap();
        fx.store.mark_written();
        fx.config.refresh(&mut fx.store).unwrap();
        let second = fx.resolution.resolve(&fx.ctx(), "echo").unwrap();
        assert!(!Rc::ptr_eq(&first.command, &second.command));
    }

    #[test]
    fn test_not_found_names_the_segment() {
        let fx = Fixture::new(json!({}));
        let err = fx.resolution.resolve(&fx.ctx(), "remote.nope.deeper").unwrap_err();
        assert!(
            matches!(&err, ResolveError::NotFound { segment, .. } if segment == "nope"),
            "{err}"
        );
    }

    #[test]
    fn test_alias_wins_over_core_unless_underscored() {
        let fx = Fixture::new(json!({
            "alias": {"echo": {"commands": [["remote", "add"]]}}
        }));
        let ctx = fx.ctx();
        assert_eq!(fx.resolution.resolve(&ctx, "echo").unwrap().resolver, "alias");
        let core = fx.resolution.resolve(&ctx, "_echo").unwrap();
        assert_eq!(core.resolver, "core");
        assert_eq!(core.command.path, "echo");
    }

    #[test]
    fn test_alias_flowdepends_and_flow_params() {
        let fx = Fixture::new(json!({
            "alias": {"both": {"commands": [["remote", "add"], ["echo", "x"]]}}
        }));
        let resolved = fx.resolution.resolve(&fx.ctx(), "both").unwrap();
        assert_eq!(resolved.command.flowdepends, vec!["echo"]);
        assert!(resolved.command.has_param("flow"));
        assert!(resolved.command.has_param("flow-from"));
    }

    #[test]
    fn test_alias_overridden_deps_are_not_unioned() {
        let fx = Fixture::new(json!({
            "alias": {"both": {"commands": [["remote", "add"]]}},
            "flowdeps": {"remote.add": []}
        }));
        let resolved = fx.resolution.resolve(&fx.ctx(), "both").unwrap();
        assert!(resolved.command.flowdepends.is_empty());
    }

    #[test]
    fn test_alias_cycle_is_reported() {
        let fx = Fixture::new(json!({
            "alias": {
                "a": {"commands": [["b"]]},
                "b": {"commands": [["a"]]}
            }
        }));
        let err = fx.resolution.resolve(&fx.ctx(), "a").unwrap_err();
        assert!(matches!(err, ResolveError::Cycle { .. }), "{err}");
    }

    #[test]
    fn test_alias_to_group_serves_children() {
        let fx = Fixture::new(json!({
            "alias": {"r": {"commands": [["remote"]]}}
        }));
        let ctx = fx.ctx();
        let alias = fx.resolution.resolve(&ctx, "r").unwrap();
        assert!(alias.command.is_group);
        assert_eq!(fx.resolution.child_names(&ctx, &alias.command), vec!["add"]);
        let child = fx.resolution.resolve(&ctx, "r.add").unwrap();
        assert_eq!(child.resolver, "alias-to-group");
        assert_eq!(child.command.path, "r.add");
    }

    #[test]
    fn test_intermediate_groups_are_synthesized() {
        let fx = Fixture::new(json!({
            "alias": {"ops.db.backup": {"commands": [["echo", "backup"]]}}
        }));
        let ctx = fx.ctx();
        let ops = fx.resolution.resolve(&ctx, "ops").unwrap();
        assert_eq!(ops.resolver, "intermediate");
        assert!(ops.command.is_group);
        assert_eq!(fx.resolution.child_names(&ctx, &ops.command), vec!["db"]);
        assert_eq!(
            fx.resolution.resolve(&ctx, "ops.db.backup").unwrap().resolver,
            "alias"
        );
    }

    #[test]
    fn test_post_handlers_run_before_caching() {
        let mut fx = Fixture::new(json!({}));
        fx.hooks.register_post_handler(|_ctx, command| {
            if command.path == "echo" {
                command.hidden = true;
            }
        });
        let ctx = fx.ctx();
        assert!(fx.resolution.resolve(&ctx, "echo").unwrap().command.hidden);
        assert!(!fx.resolution.resolve(&ctx, "remote").unwrap().command.hidden);
    }

    #[test]
    fn test_propagated_params_are_inherited() {
        let mut fx = Fixture::new(json!({}));
        fx.hooks.register_command("tool", |path| {
            let mut group = Command::group(path)
                .with_param(ParamSpec::flag("verbose"))
                .with_child("run", |p| Command::new(p));
            group.propagate_params = true;
            group
        });
        let ctx = fx.ctx();
        let child = fx.resolution.resolve(&ctx, "tool.run").unwrap();
        assert_eq!(child.command.inherited_param_names(), vec!["verbose"]);
    }

    #[test]
    fn test_broken_placeholder_in_best_effort() {
        let fx = Fixture::new(json!({}));
        let cmd = fx.resolution.resolve_or_broken(&fx.ctx(), "missing");
        assert!(cmd.broken.is_some());
    }

    #[test]
    fn test_path_of_args_stops_at_options() {
        let fx = Fixture::new(json!({}));
        let args: Vec<String> = ["remote", "add", "--x"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            fx.resolution.path_of_args(&fx.ctx(), &args).unwrap(),
            ("remote.add".to_string(), 2)
        );
    }
}

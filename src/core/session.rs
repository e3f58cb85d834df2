// src/core/session.rs

//! The explicit context of one `clk` process: the profile store, the configuration
//! snapshots, the resolver cache and the cancellation token.
//!
//! A command line goes through [`Session::execute`]:
//!
//! 1. context resolution parses every level, injecting remembered parameters;
//! 2. a group reached without a subcommand prints its help;
//! 3. a deprecation notice is shown;
//! 4. the flow dependencies run, when asked for;
//! 5. `pre` triggers run;
//! 6. group callbacks then the leaf callback run, unless dry-run skips them;
//! 7. `onsuccess` or `onerror` triggers run, then `post` triggers.

use crate::constants::{APP_NAME, EXTERNAL_CACHE_FILENAME, MAX_NESTING_DEPTH};
use crate::core::cache::ExternalMetadataCache;
use crate::core::command::{Command, Invocation, join_path};
use crate::core::command_resolution::{CommandResolution, ResolveError, Resolved};
use crate::core::config::{Config, ConfigOptions};
use crate::core::context_resolver::{self, ContextOutcome, Level};
use crate::core::flow;
use crate::core::paths;
use crate::core::profile::ProfileHandle;
use crate::core::profile_stack::ProfileStore;
use crate::core::resolver::ResolveContext;
use crate::core::resolvers::alias::expand_dotted_head;
use crate::core::resolvers::hook::HookRegistry;
use crate::models::TriggerSet;
use crate::state::ConfigStack;
use crate::system::environment::EnvSnapshot;
use crate::system::executor::ExecutionError;
use crate::CancellationToken;
use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything a session reads from the outside world.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// The global profile directory. Located from the environment when absent.
    pub global_dir: Option<PathBuf>,
    pub cwd: PathBuf,
    pub env: EnvSnapshot,
    pub config: ConfigOptions,
    pub hooks: HookRegistry,
    /// Keep what commands print instead of writing it to stdout.
    pub capture_output: bool,
}

impl SessionOptions {
    /// Options taken from the running process: its working directory and environment.
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            cwd: std::env::current_dir().context("Cannot read the current directory")?,
            env: EnvSnapshot::capture(),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
pub struct Session {
    store: ProfileStore,
    configs: ConfigStack,
    resolution: CommandResolution,
    hooks: HookRegistry,
    external_cache: RefCell<ExternalMetadataCache>,
    token: CancellationToken,
    captured: Option<Vec<String>>,
    /// Paths whose triggers are running. Their trigger commands do not fire them again.
    firing: Vec<String>,
}

impl Session {
    pub fn new(options: SessionOptions, root: Command) -> Result<Self> {
        let global_dir = match options.global_dir {
            Some(dir) => dir,
            None => paths::global_config_dir(&options.env)?,
        };
        let external_cache = if options.capture_output {
            ExternalMetadataCache::in_memory()
        } else {
            ExternalMetadataCache::load(paths::cache_dir(&global_dir).join(EXTERNAL_CACHE_FILENAME))
        };

        let mut store = ProfileStore::default();
        let mut config = Config::new(global_dir, options.cwd, options.env, options.config);
        config.refresh(&mut store)?;

        Ok(Self {
            store,
            configs: ConfigStack::new(config),
            resolution: CommandResolution::new(root),
            hooks: options.hooks,
            external_cache: RefCell::new(external_cache),
            token: Arc::new(AtomicBool::new(false)),
            captured: options.capture_output.then(Vec::new),
            firing: Vec::new(),
        })
    }

    fn ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            config: self.configs.current(),
            hooks: &self.hooks,
            external_cache: &self.external_cache,
            resolution: &self.resolution,
        }
    }

    pub fn config(&self) -> &Config {
        self.configs.current()
    }

    pub fn config_mut(&mut self) -> &mut Config {
        self.configs.current_mut()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Rebuilds the profile stack of the current configuration.
    pub fn refresh(&mut self) -> Result<()> {
        self.configs.current_mut().refresh(&mut self.store)?;
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> Result<Resolved, ResolveError> {
        self.resolution.resolve(&self.ctx(), path)
    }

    /// Resolution for listings: failures become broken placeholders.
    pub fn resolve_or_broken(&self, path: &str) -> Rc<Command> {
        self.resolution.resolve_or_broken(&self.ctx(), path)
    }

    pub fn child_names(&self, command: &Command) -> Vec<String> {
        self.resolution.child_names(&self.ctx(), command)
    }

    /// Name and one-line help of each visible subcommand of `command`.
    pub fn child_summaries(&self, command: &Command) -> Vec<(String, String)> {
        self.child_names(command)
            .into_iter()
            .filter_map(|name| {
                let child = self.resolve_or_broken(&join_path(&command.path, &name));
                (!child.hidden).then(|| (name, child.short_help().to_string()))
            })
            .collect()
    }

    /// Follows the leading command tokens of `args`. See [`CommandResolution::path_of_args`].
    pub fn path_of_args(&self, args: &[String]) -> Result<(String, usize), ResolveError> {
        self.resolution.path_of_args(&self.ctx(), args)
    }

    /// Writes a line of command output.
    pub fn emit(&mut self, line: &str) {
        match &mut self.captured {
            Some(lines) if line.is_empty() => lines.push(String::new()),
            Some(lines) => lines.extend(line.lines().map(str::to_string)),
            None => println!("{}", line),
        }
    }

    /// Lines kept so far when output is captured.
    pub fn captured(&self) -> &[String] {
        self.captured.as_deref().unwrap_or_default()
    }

    /// Writes `profile` to disk and rebuilds the current configuration.
    pub fn persist(&mut self, profile: &ProfileHandle) -> Result<()> {
        profile.borrow().write()?;
        self.settings_changed()
    }

    /// To be called after settings changed on disk outside of [`Session::persist`].
    pub fn settings_changed(&mut self) -> Result<()> {
        self.store.mark_written();
        self.refresh()
    }

    /// Fails once the token has been raised, so no further step starts.
    pub fn check_interrupted(&self, path: &str) -> Result<(), ExecutionError> {
        if self.token.load(Ordering::SeqCst) {
            return Err(ExecutionError::Interrupted {
                command: path.to_string(),
            });
        }
        Ok(())
    }

    /// Runs `f` in a snapshot of the current configuration. The snapshot is dropped
    /// afterwards, whether `f` fails or not.
    pub fn run_isolated<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if self.configs.depth() >= MAX_NESTING_DEPTH {
            return Err(anyhow!(
                "Nested invocations deeper than {} levels, giving up",
                MAX_NESTING_DEPTH
            ));
        }
        let revision = self.store.revision();
        self.configs.push();
        let mut session = scopeguard::guard(self, move |s| {
            s.configs.pop();
            // A nested command wrote settings: the outer configuration must see them.
            if s.store.revision() != revision {
                if let Err(e) = s.refresh() {
                    log::warn!("Could not reload settings after a nested command: {:#}", e);
                }
            }
        });
        f(&mut **session)
    }

    /// Runs a command line as a nested invocation.
    pub fn run_nested(&mut self, args: &[String]) -> Result<()> {
        log::debug!("Nested invocation: {:?}", args);
        self.run_isolated(|s| s.execute(args))
    }

    /// Parses and runs a command line in the current configuration.
    pub fn execute(&mut self, args: &[String]) -> Result<()> {
        self.check_interrupted(APP_NAME)?;
        match context_resolver::resolve_context(self, args)? {
            ContextOutcome::Help(text) => {
                self.emit(&text);
                Ok(())
            }
            ContextOutcome::Ready(levels) => self.run_levels(&levels),
        }
    }

    fn run_levels(&mut self, levels: &[Level]) -> Result<()> {
        let Some(leaf) = levels.last() else {
            return Ok(());
        };
        let command = leaf.command.clone();
        if let Some(reason) = &command.broken {
            return Err(ResolveError::Load {
                path: command.path.clone(),
                reason: reason.clone(),
            }
            .into());
        }
        if command.is_group && command.callback.is_none() {
            let epilog = command.help_renderer.after_help(&command, self.config());
            let children = self.child_summaries(&command);
            let help = crate::core::arg_parser::render_help(&command, &epilog, &children);
            self.emit(&help);
            return Ok(());
        }

        if let Some(deprecation) = &command.deprecation {
            deprecation.warn(&command.path);
        }

        let invocation = &leaf.invocation;
        let wants_flow = invocation.flag("flow")
            || invocation.is_explicit("flow-from")
            || invocation.is_explicit("flow-after");
        if wants_flow {
            flow::run_dependencies(self, &command, invocation)?;
        }

        if self.firing.contains(&command.path) {
            log::debug!("Not firing the triggers of '{}' again", command.path);
            return self.run_callbacks(levels);
        }
        let triggers = command.triggers.triggers_for(self.config(), &command.path);
        if triggers.is_empty() {
            return self.run_callbacks(levels);
        }
        self.firing.push(command.path.clone());
        let result = self.run_with_triggers(levels, &command.path, &triggers);
        self.firing.retain(|p| p != &command.path);
        result
    }

    fn run_with_triggers(&mut self, levels: &[Level], path: &str, triggers: &TriggerSet) -> Result<()> {
        self.run_triggers(path, "pre", &triggers.pre)?;

        let outcome = self.run_callbacks(levels);
        match &outcome {
            Ok(()) => self.run_triggers(path, "onsuccess", &triggers.onsuccess)?,
            Err(e) => {
                log::debug!("'{}' failed: {:#}", path, e);
                if let Err(trigger_error) = self.run_triggers(path, "onerror", &triggers.onerror) {
                    log::warn!("onerror trigger of '{}' failed: {:#}", path, trigger_error);
                }
            }
        }
        let post = self.run_triggers(path, "post", &triggers.post);
        outcome?;
        post
    }

    fn run_triggers(&mut self, path: &str, kind: &str, commands: &[Vec<String>]) -> Result<()> {
        for trigger in commands {
            self.check_interrupted(path)?;
            log::debug!("Running {} trigger of '{}': {:?}", kind, path, trigger);
            self.run_nested(&expand_dotted_head(trigger))
                .with_context(|| format!("{} trigger of '{}' failed", kind, path))?;
        }
        Ok(())
    }

    fn skipped_by_dry_run(&self, command: &Command) -> bool {
        if self.config().options.dry_run && !command.handle_dry_run {
            eprintln!(
                "{} {}",
                "[dry-run]".yellow(),
                format!(t!("session.dry_run.skipped"), path = command.path)
            );
            return true;
        }
        false
    }

    /// Group callbacks run outermost first, then the leaf's.
    fn run_callbacks(&mut self, levels: &[Level]) -> Result<()> {
        let last = levels.len().saturating_sub(1);
        for (index, level) in levels.iter().enumerate() {
            let Some(callback) = level.command.callback.clone() else {
                continue;
            };
            self.check_interrupted(&level.command.path)?;
            if self.skipped_by_dry_run(&level.command) {
                continue;
            }
            let invocation = if index == last {
                level
                    .invocation
                    .without(&level.command.inherited_param_names())
            } else {
                overlay_inherited(levels, index)
            };
            callback(self, &invocation)?;
        }
        Ok(())
    }

    /// Saves what is worth keeping between runs.
    pub fn finish(&mut self) -> Result<()> {
        self.external_cache.borrow_mut().save()
    }
}

/// The invocation of the group at `index`, with the values its descendants received
/// explicitly for parameters it shares.
fn overlay_inherited(levels: &[Level], index: usize) -> Invocation {
    let Some(group) = levels.get(index) else {
        return Invocation::default();
    };
    let mut invocation = group.invocation.clone();
    let shared: Vec<&str> = group
        .command
        .params
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    for level in levels.iter().skip(index + 1) {
        for name in level.command.inherited_param_names() {
            if !shared.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = level.invocation.values.get(&name) {
                if value.source.is_explicit() {
                    invocation.values.insert(name, value.clone());
                }
            }
        }
    }
    invocation
}

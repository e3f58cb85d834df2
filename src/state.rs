// src/state.rs

use crate::core::config::Config;

/// The configuration of the running invocation plus one snapshot per nested invocation.
///
/// A nested invocation (an alias step, a flow step, a trigger) starts from a copy of the
/// configuration it was started from. Whatever it changes (root options, flow parameters,
/// the parameter log) is dropped when the snapshot is popped.
#[derive(Debug)]
pub struct ConfigStack {
    base: Config,
    nested: Vec<Config>,
}

impl ConfigStack {
    pub fn new(base: Config) -> Self {
        Self {
            base,
            nested: Vec::new(),
        }
    }

    /// The configuration of the innermost invocation.
    pub fn current(&self) -> &Config {
        self.nested.last().unwrap_or(&self.base)
    }

    pub fn current_mut(&mut self) -> &mut Config {
        match self.nested.last_mut() {
            Some(config) => config,
            None => &mut self.base,
        }
    }

    /// Starts a nested invocation from a snapshot of the current configuration.
    pub fn push(&mut self) {
        let snapshot = self.current().clone();
        self.nested.push(snapshot);
    }

    /// Ends the innermost nested invocation. The base configuration is never popped.
    pub fn pop(&mut self) -> Option<Config> {
        self.nested.pop()
    }

    /// Number of nested invocations currently running.
    pub fn depth(&self) -> usize {
        self.nested.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigOptions;
    use crate::system::environment::EnvSnapshot;
    use std::path::PathBuf;

    fn config() -> Config {
        Config::new(
            PathBuf::from("/global"),
            PathBuf::from("/work"),
            EnvSnapshot::default(),
            ConfigOptions::default(),
        )
    }

    #[test]
    fn test_nested_changes_are_discarded_on_pop() {
        let mut stack = ConfigStack::new(config());
        stack.push();
        stack.current_mut().options.dry_run = true;
        stack.current_mut().record_parameters("echo", &["x".to_string()], false);
        assert_eq!(stack.depth(), 1);
        assert!(stack.current().options.dry_run);

        assert!(stack.pop().is_some());
        assert_eq!(stack.depth(), 0);
        assert!(!stack.current().options.dry_run);
        assert!(stack.current().recorded_parameters("echo").is_empty());
    }

    #[test]
    fn test_base_is_never_popped() {
        let mut stack = ConfigStack::new(config());
        assert!(stack.pop().is_none());
        assert_eq!(stack.current().cwd, PathBuf::from("/work"));
    }
}

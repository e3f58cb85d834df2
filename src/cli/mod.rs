// src/cli/mod.rs

//! The `clk` program: the root command and its built-in subcommands.

use crate::constants::APP_NAME;
use crate::core::command::Command;
use crate::core::context_resolver;

pub mod dispatcher;
pub mod handlers;

/// Builds the root command with the core registry as its static children.
pub fn program() -> Command {
    let mut root = Command::group(APP_NAME).with_help(t!("cli.about"));
    root.params = context_resolver::root_params();
    root.static_children = dispatcher::COMMAND_REGISTRY.to_vec();
    root.help_renderer.epilog = Some(t!("cli.help.epilog").to_string());
    root.handle_dry_run = true;
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_registers_every_builtin() {
        let root = program();
        let names: Vec<&str> = root.static_children.iter().map(|c| c.name).collect();
        for expected in ["alias", "command", "echo", "extension", "flowdep", "parameter"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert!(root.is_group);
        assert!(root.has_param("project"));
    }
}

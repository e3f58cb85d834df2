// src/cli/dispatcher.rs

use crate::cli::{handlers, program};
use crate::core::command::StaticChild;
use crate::core::session::{Session, SessionOptions};
use anyhow::Result;

/// The single source of truth for the built-in commands served by the core resolver.
/// To add a command, add an entry here.
pub static COMMAND_REGISTRY: &[StaticChild] = &[
    StaticChild {
        name: "alias",
        aliases: &[],
        build: handlers::alias::command,
    },
    StaticChild {
        name: "command",
        aliases: &["cmd"],
        build: handlers::command::command,
    },
    StaticChild {
        name: "echo",
        aliases: &[],
        build: handlers::echo::command,
    },
    StaticChild {
        name: "extension",
        aliases: &["ext"],
        build: handlers::extension::command,
    },
    StaticChild {
        name: "flowdep",
        aliases: &[],
        build: handlers::flowdep::command,
    },
    StaticChild {
        name: "parameter",
        aliases: &["param"],
        build: handlers::parameter::command,
    },
];

/// Finds a built-in by its name or one of its aliases.
pub fn find_command(name: &str) -> Option<&'static StaticChild> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// Runs one command line of the process.
///
/// Caches worth keeping are saved even when the command fails.
pub fn dispatch(args: &[String]) -> Result<()> {
    log::debug!("Dispatching args: {:?}", args);
    let mut session = Session::new(SessionOptions::from_process()?, program())?;
    let result = session.execute(args);
    if let Err(e) = session.finish() {
        log::warn!("Could not save caches: {:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_command_by_alias() {
        assert_eq!(find_command("param").map(|c| c.name), Some("parameter"));
        assert_eq!(find_command("echo").map(|c| c.name), Some("echo"));
        assert!(find_command("nope").is_none());
    }
}

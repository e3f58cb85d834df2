// src/cli/handlers/echo.rs

use crate::core::command::{Command, Invocation};
use crate::core::session::Session;
use crate::models::ParamSpec;
use anyhow::Result;

/// `clk echo WORDS...`: prints its arguments, remembered ones included.
pub fn command(path: &str) -> Command {
    let mut cmd = Command::new(path)
        .with_help(t!("echo.help"))
        .with_param(ParamSpec::remainder("words").help(t!("echo.param.words")))
        .with_callback(handle);
    cmd.handle_dry_run = true;
    cmd
}

fn handle(session: &mut Session, invocation: &Invocation) -> Result<()> {
    let line = invocation.get_many("words").join(" ");
    session.emit(&line);
    Ok(())
}

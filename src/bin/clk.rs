// src/bin/clk.rs

use clk::cli::dispatcher;
use clk::constants::ENV_LOG;
use clk::core::arg_parser::ParseError;
use clk::core::command_resolution::ResolveError;
use clk::system::executor::ExecutionError;
use colored::*;

/// Maps a failure to the process exit code.
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(exec_err) = error.downcast_ref::<ExecutionError>() {
        return exec_err.exit_code();
    }
    if error.is::<ResolveError>() || error.is::<ParseError>() {
        return 2;
    }
    1
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(ENV_LOG, "warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = dispatcher::dispatch(&args) {
        let code = exit_code(&e);
        // An interrupted command already said everything it had to say.
        if !matches!(
            e.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Interrupted { .. })
        ) {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
        }
        std::process::exit(code);
    }
}

use std::process;

use crate::supervise::{self, ExitReason, RunOptions};

use cli::JobpenAction;
use help::{long_help_message, USAGE_MSG};

mod cli;
mod help;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The one exit code for everything that is not a relayed command status:
/// an abort request, a channel that could not be opened, a command that
/// could not be launched. Peers cannot tell these apart, by contract.
const EARLY_EXIT_CODE: i32 = -1;

pub fn main() {
    crate::log::JobpenLogger::new("jobpen: ").into_global_logger();

    let action = match JobpenAction::from_env() {
        Ok(action) => action,
        Err(error) => {
            println_ignore_io_error!("jobpen: {error}\n{USAGE_MSG}");
            process::exit(EARLY_EXIT_CODE);
        }
    };

    match action {
        JobpenAction::Help => {
            println_ignore_io_error!("{}", long_help_message());
            process::exit(0);
        }
        JobpenAction::Version => {
            eprintln_ignore_io_error!("jobpen {VERSION}");
            process::exit(0);
        }
        JobpenAction::Run(options) => {
            let result = supervise::run(RunOptions {
                command: options.command.into(),
                arguments: options.arguments,
                visible: !options.hidden,
                // the channel name is derived from our own pid, so
                // concurrently running instances cannot collide
                instance: process::id(),
            });

            match result {
                Ok(ExitReason::Code(code)) => process::exit(code),
                Ok(ExitReason::Signal(signal)) => process::exit(128 + signal),
                Ok(ExitReason::Aborted) => process::exit(EARLY_EXIT_CODE),
                Err(error) => {
                    eprintln_ignore_io_error!("jobpen: {error}");
                    process::exit(EARLY_EXIT_CODE);
                }
            }
        }
    }
}

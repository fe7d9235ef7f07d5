//! shellish entry point.
//!
//! Usage:
//!   shellish                  # interactive prompt
//!   shellish -c '<line>'      # run one line and exit with its status

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use argh::FromArgs;
use shellish::{Config, Interpreter};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// A small fork/exec command interpreter with pipes, redirections and chat rooms.
struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line instead of reading interactively.
    command: Option<String>,

    #[argh(option)]
    /// directory that holds the chat rooms (default: $SHELLISH_CHAT_ROOT or the temp dir).
    chat_root: Option<PathBuf>,

    #[argh(option)]
    /// longest accepted input line in bytes.
    max_line: Option<usize>,

    #[argh(option)]
    /// number of lines kept in the editing history.
    history: Option<usize>,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(root) = &self.chat_root {
            config = config.with_chat_root(root);
        }
        if let Some(max_line) = self.max_line {
            config = config.with_max_line_len(max_line);
        }
        if let Some(history) = self.history {
            config = config.with_history_size(history);
        }
        config
    }
}

fn main() -> ExitCode {
    // RUST_LOG selects the level; warnings and errors only by default.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Args = argh::from_env();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = args.config();
    tracing::debug!(?config, "starting");
    let mut sh = Interpreter::new(config);

    if let Some(line) = &args.command {
        let code = sh.run_line(line);
        return Ok(ExitCode::from(code.clamp(0, 255) as u8));
    }

    sh.repl()?;
    Ok(ExitCode::SUCCESS)
}

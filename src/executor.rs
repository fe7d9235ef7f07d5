//! What a forked stage child does once its pipe ends are in place.

use crate::builtin::{Builtins, SYSNAME};
use crate::command::{Stage, status};
use crate::env::Environment;
use crate::external::{self, ExecError};
use crate::process::flush_stdout;
use crate::redirect;
use nix::sys::signal::{SigHandler, Signal, signal};
use std::io;

/// Run `stage` in the current (child) process and never return.
///
/// Order matters: redirections are applied first, then the name is looked up
/// in `builtins`, and only then is it executed as an external program
/// searched in the `PATH` of `env`.
pub(crate) fn run_stage(stage: &Stage, builtins: &Builtins, env: &mut Environment) -> ! {
    restore_default_sigpipe();

    if let Err(e) = redirect::apply(&stage.redirects) {
        eprintln!("-{SYSNAME}: {e}");
        std::process::exit(status::FAILURE);
    }

    let builtin_code = {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        builtins.run(stage, &mut stdin, &mut stdout, env)
    };
    if let Some(code) = builtin_code {
        flush_stdout();
        std::process::exit(code);
    }

    let search_paths = env.get_var("PATH").unwrap_or_default();
    let Err(e) = external::exec_external(stage, &search_paths);
    eprintln!("-{SYSNAME}: {e}");
    std::process::exit(match e {
        ExecError::NotFound(_) => status::NOT_FOUND,
        ExecError::InvalidArgument(_) => status::FAILURE,
    })
}

/// The runtime ignores SIGPIPE; programs exec'ed from here expect the default
/// so that a closed downstream reader terminates them.
fn restore_default_sigpipe() {
    // SAFETY: installs the default disposition, no handler code involved.
    if let Err(e) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) } {
        tracing::warn!("cannot restore SIGPIPE: {}", e);
    }
}

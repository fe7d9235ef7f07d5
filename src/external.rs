use crate::command::Stage;
use nix::unistd::execv;
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("{0}: argument contains a NUL byte")]
    InvalidArgument(String),
}

/// Paths to try, in order, when running `name` as an external program.
///
/// Behavior:
/// - Empty name: nothing to try.
/// - Name containing a `/` (absolute, `./foo`, `bin/foo`): the name itself.
/// - Single path component: `<dir>/<name>` for each directory of `search_paths`,
///   split on runs of `:` so empty entries are skipped.
pub fn command_candidates(search_paths: &str, name: &str) -> Vec<PathBuf> {
    if name.is_empty() {
        return Vec::new();
    }
    if name.contains('/') {
        return vec![PathBuf::from(name)];
    }
    search_paths
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .collect()
}

/// Replace the calling process with the stage's program.
///
/// Each candidate from [`command_candidates`] is handed to `execv` with the
/// stage's argument vector; the first that succeeds never returns. Returns
/// only when every attempt failed.
pub fn exec_external(stage: &Stage, search_paths: &str) -> Result<Infallible, ExecError> {
    let argv = stage
        .argv()
        .map_err(|_| ExecError::InvalidArgument(stage.name.clone()))?;

    for candidate in command_candidates(search_paths, &stage.name) {
        let Ok(path) = CString::new(candidate.as_os_str().as_bytes()) else {
            continue;
        };
        if let Err(errno) = execv(&path, &argv) {
            tracing::trace!(path = %candidate.display(), %errno, "exec attempt failed");
        }
    }
    Err(ExecError::NotFound(stage.name.clone()))
}

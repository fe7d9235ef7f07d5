//! Rebinding of a stage's standard streams to files.
//!
//! Runs inside the forked child, after pipe wiring, so a redirection always
//! overrides the pipe for the same stream.

use crate::command::{RedirectSlot, Redirects};
use nix::unistd::dup2;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use thiserror::Error;

const STDIN_FD: RawFd = 0;
const STDOUT_FD: RawFd = 1;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("{path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Rebind {
        path: String,
        #[source]
        source: nix::Error,
    },
}

/// Open `path` the way `slot` requires.
///
/// Output files are created with mode 0644 when absent.
pub fn open_target(slot: RedirectSlot, path: &str) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match slot {
        RedirectSlot::Input => options.read(true),
        RedirectSlot::Truncate => options.write(true).create(true).truncate(true).mode(0o644),
        RedirectSlot::Append => options.append(true).create(true).mode(0o644),
    };
    options.open(path)
}

fn target_fd(slot: RedirectSlot) -> RawFd {
    match slot {
        RedirectSlot::Input => STDIN_FD,
        RedirectSlot::Truncate | RedirectSlot::Append => STDOUT_FD,
    }
}

/// Apply every filled slot, in slot order, to the calling process.
///
/// Stops at the first file that cannot be opened.
pub fn apply(redirects: &Redirects) -> Result<(), RedirectError> {
    for (slot, path) in redirects.iter() {
        let file = open_target(slot, path).map_err(|source| RedirectError::Open {
            path: path.to_string(),
            source,
        })?;
        dup2(file.as_raw_fd(), target_fd(slot)).map_err(|source| RedirectError::Rebind {
            path: path.to_string(),
            source,
        })?;
        tracing::debug!(?slot, path, "stream redirected");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};

    #[test]
    fn test_truncate_keeps_only_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();

        open_target(RedirectSlot::Truncate, path)
            .unwrap()
            .write_all(b"first write\n")
            .unwrap();
        open_target(RedirectSlot::Truncate, path)
            .unwrap()
            .write_all(b"second\n")
            .unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "second\n");
    }

    #[test]
    fn test_append_concatenates_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let path = path.to_str().unwrap();

        open_target(RedirectSlot::Append, path)
            .unwrap()
            .write_all(b"one\n")
            .unwrap();
        open_target(RedirectSlot::Append, path)
            .unwrap()
            .write_all(b"two\n")
            .unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_input_reads_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bin");
        fs::write(&path, b"\x00raw\xffbytes").unwrap();

        let mut buf = Vec::new();
        open_target(RedirectSlot::Input, path.to_str().unwrap())
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"\x00raw\xffbytes");
    }

    #[test]
    fn test_missing_input_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut redirects = Redirects::default();
        let missing = dir.path().join("missing.txt");
        redirects.set(RedirectSlot::Input, missing.to_str().unwrap());

        let err = apply(&redirects).unwrap_err();
        assert!(matches!(err, RedirectError::Open { .. }));
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_output_slots_target_stdout() {
        assert_eq!(target_fd(RedirectSlot::Input), STDIN_FD);
        assert_eq!(target_fd(RedirectSlot::Truncate), STDOUT_FD);
        assert_eq!(target_fd(RedirectSlot::Append), STDOUT_FD);
    }
}

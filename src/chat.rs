//! Multi-party chat over named pipes.
//!
//! A room is a directory `<root>/chatroom-<room>` and every participant owns a
//! FIFO inside it named after them. Membership is whatever FIFOs the
//! directory holds at send time; nothing is tracked in memory.
//!
//! Delivery is best effort. Each message is written to each peer by a
//! short-lived forked helper that opens the peer's FIFO non-blocking, so a
//! peer without a reader is skipped instead of stalling the sender.

use crate::process;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode;
use nix::sys::wait::WaitStatus;
use nix::libc::_exit;
use nix::unistd::{ForkResult, Pid, fork, mkfifo};
use std::convert::Infallible;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of every room directory under the chat root.
pub const ROOM_PREFIX: &str = "chatroom-";

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid {kind} name {name:?}")]
    InvalidName { kind: &'static str, name: String },
    #[error("{}: {source}", .path.display())]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: exists and is not a named pipe", .path.display())]
    NotAFifo { path: PathBuf },
    #[error("{what}: {source}")]
    Sys {
        what: &'static str,
        #[source]
        source: Errno,
    },
    #[error(transparent)]
    Terminal(#[from] io::Error),
}

fn validate(kind: &'static str, name: &str) -> Result<(), ChatError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(ChatError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// A chat room: a directory of participant FIFOs.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    dir: PathBuf,
}

impl Room {
    /// Open the room `name` under `root`, creating its directory if needed.
    pub fn open(root: &Path, name: &str) -> Result<Self, ChatError> {
        validate("room", name)?;
        let dir = root.join(format!("{ROOM_PREFIX}{name}"));
        match DirBuilder::new().mode(0o777).create(&dir) {
            Ok(()) => tracing::debug!(dir = %dir.display(), "room created"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(source) => return Err(ChatError::Fs { path: dir, source }),
        }
        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add `participant` to the room by creating their FIFO.
    ///
    /// Joining again with the same name reuses the existing FIFO.
    pub fn join(&self, participant: &str) -> Result<Participant, ChatError> {
        validate("participant", participant)?;
        let pipe = self.dir.join(participant);
        match mkfifo(&pipe, Mode::from_bits_truncate(0o666)) {
            Ok(()) => {}
            Err(Errno::EEXIST) => {
                let is_fifo = fs::metadata(&pipe)
                    .map(|meta| meta.file_type().is_fifo())
                    .unwrap_or(false);
                if !is_fifo {
                    return Err(ChatError::NotAFifo { path: pipe });
                }
            }
            Err(errno) => {
                return Err(ChatError::Fs {
                    path: pipe,
                    source: errno.into(),
                });
            }
        }
        Ok(Participant {
            room: self.clone(),
            name: participant.to_string(),
            pipe,
        })
    }

    /// Names of every participant FIFO in the room, sorted.
    pub fn members(&self) -> Result<Vec<String>, ChatError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ChatError::Fs {
            path: self.dir.clone(),
            source,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_fifo()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Per-message fan-out outcome, kept for logging only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// One member of a room, addressed by their FIFO.
#[derive(Debug, Clone)]
pub struct Participant {
    room: Room,
    name: String,
    pipe: PathBuf,
}

impl Participant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn pipe(&self) -> &Path {
        &self.pipe
    }

    /// The input prompt, `[<room>] <name> > `.
    pub fn prompt(&self) -> String {
        format!("[{}] {} > ", self.room.name, self.name)
    }

    /// Frame `text` as sent by this participant.
    pub fn frame(&self, text: &str) -> String {
        format!("{}: {}", self.name, text)
    }

    /// Send `message` to every other participant, one helper process at a time.
    ///
    /// Peers are visited in sorted name order. Failures are counted as drops
    /// and never reported to the caller.
    pub fn broadcast(&self, message: &str) -> Delivery {
        let mut delivery = Delivery::default();
        let peers = match self.room.members() {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("cannot list room {}: {}", self.room.name, e);
                return delivery;
            }
        };

        let payload = format!("{message}\n");
        for peer in peers.iter().filter(|peer| **peer != self.name) {
            let target = self.room.dir.join(peer);
            match deliver(&target, payload.as_bytes()) {
                Ok(true) => delivery.delivered += 1,
                Ok(false) => {
                    tracing::debug!(peer = %peer, "message dropped");
                    delivery.dropped += 1;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, "delivery helper failed: {}", e);
                    delivery.dropped += 1;
                }
            }
        }
        delivery
    }

    /// Print every message arriving on this participant's FIFO to `out`.
    ///
    /// The FIFO is opened for reading and writing so the open does not wait
    /// for a writer and the pipe never reports end-of-file. Only returns on
    /// error.
    pub fn listen<W: Write>(&self, out: &mut W) -> Result<Infallible, ChatError> {
        let fs_err = |source| ChatError::Fs {
            path: self.pipe.clone(),
            source,
        };
        let fifo = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.pipe)
            .map_err(fs_err)?;

        let prompt = self.prompt();
        let mut reader = BufReader::with_capacity(READ_CHUNK, fifo);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => return Err(fs_err(io::ErrorKind::UnexpectedEof.into())),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(fs_err(e)),
            }
            let message = line.strip_suffix(b"\n").unwrap_or(&line);
            if message.is_empty() {
                continue;
            }
            let message = String::from_utf8_lossy(message);
            write!(out, "\r[{}] {}\n{}", self.room.name(), message, prompt)?;
            out.flush()?;
        }
    }

    /// Fork a process running [`Participant::listen`] on standard output.
    pub fn spawn_listener(&self) -> Result<Pid, ChatError> {
        process::flush_stdout();
        // SAFETY: the child only runs the listener loop and then `_exit`s.
        match unsafe { fork() }.map_err(|source| ChatError::Sys {
            what: "fork",
            source,
        })? {
            ForkResult::Child => {
                let Err(e) = self.listen(&mut io::stdout());
                eprintln!("chatroom: {e}");
                unsafe { _exit(1) }
            }
            ForkResult::Parent { child } => {
                tracing::debug!(%child, participant = %self.name, "listener started");
                Ok(child)
            }
        }
    }
}

/// Write `payload` to the FIFO at `target` from a forked helper.
///
/// Returns whether the helper managed to write the whole payload.
fn deliver(target: &Path, payload: &[u8]) -> Result<bool, ChatError> {
    // SAFETY: the child only opens, writes and `_exit`s.
    match unsafe { fork() }.map_err(|source| ChatError::Sys {
        what: "fork",
        source,
    })? {
        ForkResult::Child => {
            let written = write_nonblocking(target, payload).is_ok();
            unsafe { _exit(if written { 0 } else { 1 }) }
        }
        ForkResult::Parent { child } => {
            let status = process::wait_for(child).map_err(|source| ChatError::Sys {
                what: "waitpid",
                source,
            })?;
            Ok(matches!(status, WaitStatus::Exited(_, 0)))
        }
    }
}

/// Fails with `ENXIO` right away when nobody has the FIFO open for reading.
fn write_nonblocking(target: &Path, payload: &[u8]) -> io::Result<()> {
    let mut fifo = OpenOptions::new()
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(target)?;
    fifo.write_all(payload)
}

/// An interactive chat session of one participant.
pub struct Session {
    participant: Participant,
}

impl Session {
    /// Join (creating if necessary) `room` under `root` as `participant`.
    pub fn join(root: &Path, room: &str, participant: &str) -> Result<Self, ChatError> {
        let room = Room::open(root, room)?;
        let participant = room.join(participant)?;
        Ok(Self { participant })
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Run the session until `input` reaches end-of-file.
    ///
    /// A listener process prints incoming messages while this process reads
    /// lines from `input` and broadcasts them. On end-of-file the listener is
    /// terminated and reaped before returning.
    pub fn run(&self, input: &mut dyn Read, out: &mut dyn Write) -> Result<(), ChatError> {
        writeln!(out, "Welcome to {}!", self.participant.room().name())?;
        out.flush()?;

        let listener = self.participant.spawn_listener()?;
        let result = self.converse(input, out);

        if let Err(errno) = kill(listener, Signal::SIGTERM) {
            tracing::warn!(%listener, "cannot stop listener: {}", errno);
        }
        process::wait_for(listener).map_err(|source| ChatError::Sys {
            what: "waitpid",
            source,
        })?;
        tracing::debug!(%listener, "listener stopped");
        result
    }

    fn converse(&self, input: &mut dyn Read, out: &mut dyn Write) -> Result<(), ChatError> {
        let prompt = self.participant.prompt();
        let room = self.participant.room().name();
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            write!(out, "{prompt}")?;
            out.flush()?;

            line.clear();
            if reader.read_line(&mut line)? == 0 {
                writeln!(out)?;
                return Ok(());
            }
            let text = line.strip_suffix('\n').unwrap_or(&line);
            if text.is_empty() {
                continue;
            }

            let message = self.participant.frame(text);
            writeln!(out, "[{room}] {message}")?;
            out.flush()?;

            let delivery = self.participant.broadcast(&message);
            tracing::debug!(participant = self.participant.name(), ?delivery, "message sent");
        }
    }
}

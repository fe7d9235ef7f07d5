//! A small command-line interpreter built on fork/exec.
//!
//! A line of input is tokenized and assembled into a [`Pipeline`] of stages,
//! one process is forked per stage, adjacent stages are connected with pipes,
//! and file redirections are applied inside each child before it runs its
//! program. A handful of built-ins are handled by the interpreter itself,
//! among them `chatroom`, a FIFO-based multi-party messaging session.
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`],
//! [`config`] and [`env`] expose the data model and the knobs needed to embed
//! the interpreter elsewhere.

mod builtin;
pub mod chat;
pub mod command;
pub mod config;
pub mod env;
mod executor;
mod external;
mod interpreter;
mod lexer;
pub mod parser;
mod process;
mod redirect;

pub use command::{ExitCode, Pipeline, RedirectSlot, Stage};
pub use config::Config;
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::{Interpreter, PipelineError};
pub use parser::{ParseError, parse_line};

use crate::chat::Session;
use crate::command::{ExitCode, Stage, status};
use crate::env::Environment;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

/// Name the interpreter uses when reporting errors.
pub(crate) const SYSNAME: &str = "shellish";

/// Where a built-in has to run to have its effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Mutates the interpreter itself, so it runs in the interpreter process.
    Shell,
    /// Runs in the stage's forked child like an external program would.
    Stage,
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// without exec'ing a new program image.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "chatroom".
    fn name() -> &'static str;

    fn scope() -> Scope {
        Scope::Stage
    }

    /// Rewrite raw arguments before `argh` sees them.
    fn normalize_args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Object-safe form of a parsed built-in invocation.
pub(crate) trait ExecutableCommand {
    /// Runs the command, reporting any failure on standard error.
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> ExitCode;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> ExitCode {
        let code = match T::execute(*self, stdin, stdout, env) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("-{}: {}: {:#}", SYSNAME, T::name(), e);
                1
            }
        };
        if let Err(e) = stdout.flush() {
            tracing::warn!("{}: failed to flush output: {}", T::name(), e);
        }
        code
    }
}

/// Outcome of `argh` refusing the arguments: help text or a usage error.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> ExitCode {
        if self.is_error {
            eprintln!("{}", self.output.trim_end());
            1
        } else {
            let _ = writeln!(stdout, "{}", self.output.trim_end());
            let _ = stdout.flush();
            0
        }
    }
}

/// An entry of the built-in table.
pub(crate) trait BuiltinFactory {
    fn scope(&self) -> Scope;

    /// Parse `args` (without the command name) into a runnable command.
    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand>;
}

struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> BuiltinFactory for Factory<T> {
    fn scope(&self) -> Scope {
        T::scope()
    }

    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand> {
        let args = T::normalize_args(args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        }
    }
}

/// Name to handler table consulted before any PATH lookup.
pub(crate) struct Builtins {
    table: HashMap<&'static str, Box<dyn BuiltinFactory>>,
}

impl Builtins {
    /// A table with no built-ins at all.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn register<T: BuiltinCommand + 'static>(&mut self) -> &mut Self {
        self.table
            .insert(T::name(), Box::new(Factory::<T>::default()));
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn BuiltinFactory> {
        self.table.get(name).map(Box::as_ref)
    }

    /// Run `stage` if its name is a built-in; `None` means it is not one.
    pub fn run(
        &self,
        stage: &Stage,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Option<ExitCode> {
        let factory = self.lookup(&stage.name)?;
        let args: Vec<&str> = stage.operands().iter().map(String::as_str).collect();
        tracing::debug!(name = %stage.name, ?args, "running builtin");
        Some(factory.create(&args).execute(stdin, stdout, env))
    }
}

impl Default for Builtins {
    /// The interpreter's standard built-ins: `cd`, `exit`, `chatroom` and `cut`.
    fn default() -> Self {
        let mut builtins = Self::empty();
        builtins
            .register::<Cd>()
            .register::<Exit>()
            .register::<Chatroom>()
            .register::<Cut>();
        builtins
    }
}

#[derive(FromArgs)]
/// Change the current working directory of the shell.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: String,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn scope() -> Scope {
        Scope::Shell
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = PathBuf::from(&self.target);
        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(status::SUCCESS)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn scope() -> Scope {
        Scope::Shell
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(status::EXIT)
    }
}

#[derive(FromArgs)]
/// Chat with everyone else in a room until end of input.
pub struct Chatroom {
    #[argh(positional)]
    /// room to join; created on first use.
    pub room: String,

    #[argh(positional)]
    /// your name in the room.
    pub user: String,
}

impl BuiltinCommand for Chatroom {
    fn name() -> &'static str {
        "chatroom"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let session = Session::join(&env.chat_root, &self.room, &self.user)?;
        session.run(stdin, stdout)?;
        Ok(status::SUCCESS)
    }
}

#[derive(FromArgs)]
/// Print selected fields of each input line.
pub struct Cut {
    #[argh(option, short = 'd', default = "'\\t'")]
    /// field delimiter (default TAB).
    pub delimiter: char,

    #[argh(option, short = 'f')]
    /// comma-separated list of 1-based fields to print, in the order given.
    pub fields: String,
}

impl Cut {
    fn field_list(&self) -> Result<Vec<usize>> {
        self.fields
            .split(',')
            .map(|field| match field.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => bail!("invalid field {:?}", field),
            })
            .collect()
    }
}

impl BuiltinCommand for Cut {
    fn name() -> &'static str {
        "cut"
    }

    /// Accepts `-d:` and `-f1,3` by splitting the value off the flag.
    fn normalize_args(args: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg.strip_prefix("-d").or_else(|| arg.strip_prefix("-f")) {
                Some(value) if !value.is_empty() => {
                    out.push(arg[..2].to_string());
                    out.push(value.to_string());
                }
                _ => out.push(arg.to_string()),
            }
        }
        out
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let fields = self.field_list()?;
        let delimiter = self.delimiter.to_string();

        for line in BufReader::new(stdin).lines() {
            let line = line.context("read error")?;
            let parts: Vec<&str> = line.split(self.delimiter).collect();
            let selected: Vec<&str> = fields
                .iter()
                .map(|&n| parts.get(n - 1).copied().unwrap_or(""))
                .collect();
            writeln!(stdout, "{}", selected.join(&delimiter))?;
        }
        Ok(status::SUCCESS)
    }
}

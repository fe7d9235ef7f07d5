use crate::builtin::{Builtins, SYSNAME, Scope};
use crate::command::{ExitCode, Pipeline, status};
use crate::config::Config;
use crate::env::Environment;
use crate::executor;
use crate::parser;
use crate::process::{self, flush_stdout};
use nix::unistd::{ForkResult, Pid, dup2, fork, gethostname, pipe};
use rustyline::config::Config as EditorConfig;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use thiserror::Error;

/// Reasons a pipeline could not be started at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot create pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("cannot fork: {0}")]
    Fork(#[source] nix::Error),
    #[error("syntax error: empty command in pipeline")]
    EmptyStage,
}

/// A minimal shell-like interpreter that runs pipelines of built-in and
/// external commands, one forked process per stage.
///
/// The interpreter owns an [`Environment`] and the table of built-ins that
/// are consulted before any `PATH` lookup.
///
/// Example
/// ```no_run
/// use shellish::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run_line("echo hello | tr a-z A-Z");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Builtins,
    config: Config,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        Self {
            env: Environment::new(config.chat_root.clone()),
            builtins: Builtins::default(),
            config,
        }
    }

    /// Whether `exit` has been requested.
    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Parse and execute one input line, returning its exit status.
    ///
    /// A line the parser refuses is reported and yields status 2.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        match parser::parse_line(line, self.config.max_line_len) {
            Ok(pipeline) => self.execute(&pipeline),
            Err(e) => {
                eprintln!("-{SYSNAME}: {e}");
                status::UNKNOWN
            }
        }
    }

    /// Execute an already parsed pipeline.
    ///
    /// Foreground pipelines report the status of their last stage; background
    /// ones report 0 as soon as every stage has been forked.
    pub fn execute(&mut self, pipeline: &Pipeline) -> ExitCode {
        if pipeline.is_empty() || pipeline.is_noop() {
            return status::SUCCESS;
        }
        if let Some(code) = self.run_in_shell(pipeline) {
            return code;
        }

        let children = match self.spawn(pipeline) {
            Ok(children) => children,
            Err(e) => {
                tracing::error!("pipeline setup failed: {}", e);
                eprintln!("-{SYSNAME}: {e}");
                return status::UNKNOWN;
            }
        };

        if pipeline.background {
            if let Some(last) = children.last() {
                println!("[bg] PID {last} running in background");
            }
            return status::SUCCESS;
        }

        let mut code = status::SUCCESS;
        for child in children {
            code = match process::wait_for(child) {
                Ok(wait_status) => process::exit_code(wait_status),
                Err(e) => {
                    tracing::warn!(%child, "waitpid failed: {}", e);
                    status::UNKNOWN
                }
            };
        }
        code
    }

    /// Built-ins that change the interpreter itself run here instead of in a
    /// child, but only when they are the whole (foreground) pipeline.
    fn run_in_shell(&mut self, pipeline: &Pipeline) -> Option<ExitCode> {
        let [stage] = pipeline.stages.as_slice() else {
            return None;
        };
        if pipeline.background {
            return None;
        }
        let factory = self.builtins.lookup(&stage.name)?;
        if factory.scope() != Scope::Shell {
            return None;
        }
        self.builtins.run(
            stage,
            &mut io::stdin().lock(),
            &mut io::stdout().lock(),
            &mut self.env,
        )
    }

    /// Fork one process per stage, connected by pipes, and return their pids
    /// in stage order.
    fn spawn(&mut self, pipeline: &Pipeline) -> std::result::Result<Vec<Pid>, PipelineError> {
        if pipeline.len() > 1 && pipeline.stages.iter().any(|stage| stage.is_noop()) {
            return Err(PipelineError::EmptyStage);
        }

        let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(pipeline.len() - 1);
        for _ in 1..pipeline.len() {
            pipes.push(pipe().map_err(PipelineError::Pipe)?);
        }

        flush_stdout();
        let mut children = Vec::with_capacity(pipeline.len());
        for (i, stage) in pipeline.stages.iter().enumerate() {
            // SAFETY: the child only rewires descriptors and then either
            // runs a built-in or execs, exiting in every case.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    if let Err(e) = connect(&pipes, i, pipeline.len()) {
                        eprintln!("-{SYSNAME}: {}: cannot connect pipe: {e}", stage.name);
                        std::process::exit(status::FAILURE);
                    }
                    drop(std::mem::take(&mut pipes));
                    executor::run_stage(stage, &self.builtins, &mut self.env);
                }
                Ok(ForkResult::Parent { child }) => {
                    tracing::debug!(%child, stage = %stage.name, "stage started");
                    children.push(child);
                }
                Err(e) => {
                    drop(pipes);
                    for child in children {
                        let _ = process::wait_for(child);
                    }
                    return Err(PipelineError::Fork(e));
                }
            }
        }
        Ok(children)
    }

    /// Read-eval loop on the terminal until end of input or `exit`.
    pub fn repl(&mut self) -> Result<()> {
        let editor_config = EditorConfig::builder()
            .max_history_size(self.config.history_size)?
            .auto_add_history(false)
            .build();
        let mut rl = DefaultEditor::with_config(editor_config)?;

        while !self.should_exit() {
            let reaped = process::reap_finished();
            if reaped > 0 {
                tracing::debug!(reaped, "collected background children");
            }

            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        if let Err(e) = rl.add_history_entry(line.as_str()) {
                            tracing::warn!("cannot record history: {}", e);
                        }
                    }
                    let code = self.run_line(&line);
                    tracing::debug!(code, "line finished");
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn prompt(&self) -> String {
        let user = self.env.get_var("USER").unwrap_or_default();
        let host = gethostname()
            .map(|host| host.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}@{}:{} {}$ ",
            user,
            host,
            self.env.current_dir.display(),
            SYSNAME
        )
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Wire stage `index` of `len` to its neighbours' pipes.
///
/// Called in the child; the original descriptors are closed afterwards.
fn connect(pipes: &[(OwnedFd, OwnedFd)], index: usize, len: usize) -> nix::Result<()> {
    if index > 0 {
        dup2(pipes[index - 1].0.as_raw_fd(), 0)?;
    }
    if index + 1 < len {
        dup2(pipes[index].1.as_raw_fd(), 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::tests::lock_current_dir;
    use std::env as stdenv;
    use std::fs;

    fn interpreter_in(dir: &std::path::Path) -> Interpreter {
        Interpreter::new(Config::default().with_chat_root(dir))
    }

    #[test]
    fn test_empty_line_is_noop() {
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line(""), status::SUCCESS);
        assert_eq!(sh.run_line("   "), status::SUCCESS);
    }

    #[test]
    fn test_exit_sets_flag_without_forking() {
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line("exit"), status::EXIT);
        assert!(sh.should_exit());
    }

    #[test]
    fn test_exit_inside_pipeline_does_not_stop_shell() {
        let _lock = lock_current_dir();
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line("exit | true"), status::SUCCESS);
        assert!(!sh.should_exit());
    }

    #[test]
    fn test_cd_changes_interpreter_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(temp.path()).unwrap();
        let mut sh = interpreter_in(temp.path());

        let code = sh.run_line(&format!("cd {}", canonical.display()));
        assert_eq!(code, status::SUCCESS);
        assert_eq!(sh.env.current_dir, canonical);
        assert_eq!(stdenv::current_dir().unwrap(), canonical);

        stdenv::set_current_dir(orig).unwrap();
    }

    #[test]
    fn test_failed_cd_keeps_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut sh = Interpreter::default();

        let code = sh.run_line("cd /definitely/not/a/real/dir");
        assert_eq!(code, 1);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_foreground_status_is_last_stage() {
        let _lock = lock_current_dir();
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line("true"), 0);
        assert_eq!(sh.run_line("false"), 1);
        assert_eq!(sh.run_line("false | true"), 0);
        assert_eq!(sh.run_line("true | false"), 1);
    }

    #[test]
    fn test_unknown_command_is_127() {
        let _lock = lock_current_dir();
        let mut sh = Interpreter::default();
        assert_eq!(
            sh.run_line("definitely-not-a-real-program-xyz"),
            status::NOT_FOUND
        );
    }

    #[test]
    fn test_signal_status() {
        let _lock = lock_current_dir();
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line("sh -c 'kill -TERM $$'"), 128 + 15);
    }

    #[test]
    fn test_empty_stage_is_setup_failure() {
        let mut sh = Interpreter::default();
        assert_eq!(sh.run_line("echo hi |"), status::UNKNOWN);
        assert_eq!(sh.run_line("| wc"), status::UNKNOWN);
    }

    #[test]
    fn test_line_too_long() {
        let mut sh = Interpreter::new(Config::default().with_max_line_len(8));
        assert_eq!(sh.run_line("echo 0123456789"), status::UNKNOWN);
    }

    #[test]
    fn test_pipeline_with_redirect() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("out.txt");
        let mut sh = interpreter_in(temp.path());

        let code = sh.run_line(&format!("echo hi | tr a-z A-Z > {}", out.display()));
        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(out).unwrap(), "HI\n");
    }

    #[test]
    fn test_builtin_cut_in_pipeline() {
        let _lock = lock_current_dir();
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("fields.txt");
        let mut sh = interpreter_in(temp.path());

        let code = sh.run_line(&format!(
            "printf a:b:c\\n | cut -d : -f 2 > {}",
            out.display()
        ));
        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(out).unwrap(), "b\n");
    }
}

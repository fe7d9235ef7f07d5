use std::ffi::CString;
use std::ops::Index;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Exit statuses with a fixed meaning inside the interpreter.
pub mod status {
    use super::ExitCode;

    pub const SUCCESS: ExitCode = 0;
    /// The line asked the interpreter to terminate.
    pub const EXIT: ExitCode = 1;
    /// A stage could not be prepared in its child: a redirection or pipe end
    /// could not be put in place.
    pub const FAILURE: ExitCode = 1;
    /// Pipeline setup failed before any program could run.
    pub const UNKNOWN: ExitCode = 2;
    /// No PATH directory held an executable with the stage's name.
    pub const NOT_FOUND: ExitCode = 127;
}

/// One of the three redirection slots a stage carries.
///
/// Slots are applied in declaration order, so when both output slots are
/// filled the append target is applied last and wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectSlot {
    /// `< file`: standard input is read from the file.
    Input = 0,
    /// `> file`: standard output is written to the file, truncating it.
    Truncate = 1,
    /// `>> file`: standard output is appended to the file.
    Append = 2,
}

impl RedirectSlot {
    pub const ALL: [RedirectSlot; 3] = [Self::Input, Self::Truncate, Self::Append];
}

/// Redirection targets of a stage, at most one per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects([Option<String>; 3]);

impl Redirects {
    /// Store `target` in `slot`, replacing whatever an earlier token put there.
    pub fn set(&mut self, slot: RedirectSlot, target: impl Into<String>) {
        self.0[slot as usize] = Some(target.into());
    }

    /// Iterate over the filled slots in application order.
    pub fn iter(&self) -> impl Iterator<Item = (RedirectSlot, &str)> {
        RedirectSlot::ALL
            .into_iter()
            .filter_map(|slot| self[slot].as_deref().map(|target| (slot, target)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl Index<RedirectSlot> for Redirects {
    type Output = Option<String>;

    fn index(&self, slot: RedirectSlot) -> &Self::Output {
        &self.0[slot as usize]
    }
}

/// A single command of a pipeline: its program name, arguments and redirections.
///
/// `args[0]` always duplicates `name`, so the argument vector can be handed to
/// `execv` as-is. A stage with an empty name is the no-op produced for blank
/// input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub args: Vec<String>,
    pub redirects: Redirects,
}

impl Stage {
    /// Create a stage whose argument vector starts with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            args: vec![name.clone()],
            name,
            redirects: Redirects::default(),
        }
    }

    /// A stage that does nothing when executed.
    pub fn is_noop(&self) -> bool {
        self.name.is_empty()
    }

    /// Arguments after the program name.
    pub fn operands(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }

    /// The argument vector as C strings; `execv` appends the terminating null.
    ///
    /// Fails if an argument contains an interior NUL byte.
    pub fn argv(&self) -> Result<Vec<CString>, std::ffi::NulError> {
        self.args.iter().map(|arg| CString::new(arg.as_bytes())).collect()
    }
}

/// An ordered chain of stages connected by pipes, plus the line-level flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// The line ended with a bare `&`: do not wait for the stages.
    pub background: bool,
    /// The line ended with a bare `?`: the line editor asked for completion.
    pub autocomplete: bool,
}

impl Pipeline {
    /// The pipeline produced for blank input: one no-op stage.
    pub fn noop() -> Self {
        Self {
            stages: vec![Stage::default()],
            background: false,
            autocomplete: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.stages.len() == 1 && self.stages[0].is_noop()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

//! Output-transforming pipe stages, composable with `|` after a command.

use crate::{error::PipeError, token::pop_token};
use log::trace;
use regex::{Regex, RegexBuilder};
use std::str::FromStr;
use strum::{AsRefStr, EnumString};

/// The pipe names installed as children of the `|` command node.
pub const PIPE_COMMAND_NAMES: &[&str] = &[
    "count", "except", "find", "hold", "match", "no-more", "resolve", "save", "trim",
];

#[derive(AsRefStr, Clone, Copy, Debug, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "kebab_case")]
/// All recognized pipe stage kinds. `Compare` and `Display` are reserved and
/// not installed in the command tree.
pub enum PipeKind {
    Compare,
    Count,
    Display,
    Except,
    Find,
    Hold,
    Match,
    NoMore,
    Resolve,
    Save,
    Trim,
}

impl PipeKind {
    /// Parse a pipe kind from a command name, ignoring trailing tokens.
    pub fn from_name(name: &str) -> Option<Self> {
        let mut line = name.to_string();
        let token = pop_token(&mut line);
        Self::from_str(&token).ok()
    }

    /// The help text shown next to the pipe command name.
    pub fn help(self) -> &'static str {
        match self {
            Self::Compare => "Compare configuration changes with a prior version",
            Self::Count => "Count occurrences",
            Self::Display => "Display additional configuration information",
            Self::Except => "Show only text that does not match a pattern",
            Self::Find => "Search for the first occurrence of a pattern",
            Self::Hold => "Hold text without exiting the --More-- prompt",
            Self::Match => "Show only text that matches a pattern",
            Self::NoMore => "Don't paginate output",
            Self::Resolve => "Resolve IP addresses (NOT IMPLEMENTED YET)",
            Self::Save => "Save output text to a file (NOT IMPLEMENTED YET)",
            Self::Trim => "Trim specified number of columns from the start line (NOT IMPLEMENTED YET)",
        }
    }

    /// True if this stage needs a compiled regular expression.
    pub fn wants_regex(self) -> bool {
        matches!(self, Self::Match | Self::Except | Self::Find)
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
/// Session-level modes a pipe stage may flip while running.
pub struct PipeModes {
    /// Keep the pager at the `--More--` prompt after the command finished.
    pub hold: bool,
    /// Disable pagination for the duration of the command.
    pub nomore: bool,
}

/// A single instantiated stage of a pipe chain.
pub struct PipeStage {
    kind: PipeKind,
    args: Vec<String>,
    regex: Option<Regex>,
    counter: u64,
    seen: bool,
}

impl PipeStage {
    /// Create a stage of the given kind with its command-line arguments.
    pub fn new(kind: PipeKind, args: Vec<String>) -> Self {
        Self {
            kind,
            args,
            regex: None,
            counter: 0,
            seen: false,
        }
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// True iff the stage currently holds a compiled regex.
    pub fn has_regex(&self) -> bool {
        self.regex.is_some()
    }

    fn compile_regex(&mut self) -> Result<(), PipeError> {
        let pattern = self
            .args
            .get(0)
            .ok_or_else(|| PipeError::ArgsMissing(self.kind.as_ref().to_string()))?;
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|_| PipeError::RegexInvalid(pattern.clone()))?;
        self.regex = Some(regex);
        Ok(())
    }

    /// Prepare the stage before the first line arrives.
    pub fn start(&mut self, modes: &mut PipeModes) -> Result<(), PipeError> {
        trace!("Starting pipe stage {}", self.kind.as_ref());
        match self.kind {
            PipeKind::Count => {
                self.counter = 0;
                Ok(())
            }
            PipeKind::Match | PipeKind::Except => self.compile_regex(),
            PipeKind::Find => {
                self.seen = false;
                self.compile_regex()
            }
            PipeKind::NoMore => {
                modes.nomore = true;
                Ok(())
            }
            PipeKind::Hold | PipeKind::Compare | PipeKind::Display => Ok(()),
            PipeKind::Resolve | PipeKind::Save | PipeKind::Trim => {
                Err(PipeError::Unimplemented(self.kind.as_ref().to_string()))
            }
        }
    }

    /// Transform one line in place; clearing the line drops it.
    pub fn process(&mut self, line: &mut String) {
        if line.is_empty() {
            return;
        }
        match self.kind {
            PipeKind::Count => {
                self.counter += 1;
                line.clear();
            }
            PipeKind::Match => {
                if !self.matches(line) {
                    line.clear();
                }
            }
            PipeKind::Except => {
                if self.matches(line) {
                    line.clear();
                }
            }
            PipeKind::Find => {
                if !self.seen && self.matches(line) {
                    self.seen = true;
                }
                if !self.seen {
                    // Don't print yet
                    line.clear();
                }
            }
            _ => (),
        }
    }

    /// Finish the stage after the last line; may append final output.
    pub fn eof(&mut self, line: &mut String, modes: &mut PipeModes) {
        match self.kind {
            PipeKind::Count => {
                self.process(line);
                line.push_str(&format!("Count: {} lines\n", self.counter));
            }
            PipeKind::Hold => modes.hold = true,
            PipeKind::NoMore => modes.nomore = false,
            PipeKind::Match | PipeKind::Except | PipeKind::Find => {
                self.regex = None;
            }
            _ => (),
        }
    }

    /// Unwind a started stage without producing output. Used when a later
    /// stage in the chain failed to start.
    pub fn stop(&mut self, modes: &mut PipeModes) {
        self.regex = None;
        self.counter = 0;
        self.seen = false;
        if self.kind == PipeKind::NoMore {
            modes.nomore = false;
        }
    }

    fn matches(&self, line: &str) -> bool {
        self.regex.as_ref().map_or(false, |re| re.is_match(line))
    }
}

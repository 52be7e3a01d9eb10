//! Shared error utilities used across the compilation pipeline.
//!
//! Every failure carries the byte offset it was raised at. Rendering is kept
//! separate from construction so the same error can be reported against the
//! source it came from, chibicc style: the offending line followed by a caret.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CompileError {
  /// No tokenization rule matches the byte at `loc`.
  #[snafu(display("{message}"))]
  Lex { loc: usize, message: String },

  /// The parser expected something other than the token at `loc`.
  #[snafu(display("{message}"))]
  Syntax { loc: usize, message: String },

  /// A construct is well-formed but cannot be compiled, e.g. assigning to a
  /// non-variable.
  #[snafu(display("{message}"))]
  Semantic { loc: usize, message: String },
}

impl CompileError {
  pub fn lex(loc: usize, message: impl Into<String>) -> Self {
    Self::Lex {
      loc,
      message: message.into(),
    }
  }

  pub fn syntax(loc: usize, message: impl Into<String>) -> Self {
    Self::Syntax {
      loc,
      message: message.into(),
    }
  }

  pub fn semantic(loc: usize, message: impl Into<String>) -> Self {
    Self::Semantic {
      loc,
      message: message.into(),
    }
  }

  /// Byte offset into the source the error is anchored at.
  pub fn loc(&self) -> usize {
    match self {
      Self::Lex { loc, .. } | Self::Syntax { loc, .. } | Self::Semantic { loc, .. } => *loc,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Lex { message, .. }
      | Self::Syntax { message, .. }
      | Self::Semantic { message, .. } => message,
    }
  }

  /// Render the caret-pointing report for this error against `source`.
  pub fn render(&self, source: &str) -> String {
    render_diagnostic(source, self.loc(), self.message())
  }
}

/// Format a two-line diagnostic: the source line containing `loc`, then a
/// caret under the offending character followed by `message`.
///
/// Offsets past the end of input point one past the last character, which is
/// where the end-of-stream token lives.
pub fn render_diagnostic(source: &str, loc: usize, message: &str) -> String {
  let mut safe_loc = loc.min(source.len());
  while !source.is_char_boundary(safe_loc) {
    safe_loc -= 1;
  }

  let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
  let line_end = source[safe_loc..]
    .find('\n')
    .map_or(source.len(), |i| safe_loc + i);
  let line = source[line_start..line_end].trim_end_matches('\r');
  let column = source[line_start..safe_loc].chars().count();

  format!("{line}\n{}^ {message}", " ".repeat(column))
}

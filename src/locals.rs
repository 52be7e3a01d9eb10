//! Per-function local variable table.
//!
//! Slots are handed out lazily in first-occurrence order. A fresh table is
//! created for every function definition, so names never leak across
//! function boundaries.

use log::trace;

/// Size of one stack slot in bytes.
pub const WORD_SIZE: usize = 8;

/// A named stack slot addressed as `rbp - offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
  pub name: String,
  pub offset: usize,
}

#[derive(Debug, Default, Clone)]
pub struct LocalTable {
  locals: Vec<Local>,
}

impl LocalTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn find(&self, name: &str) -> Option<&Local> {
    self.locals.iter().find(|local| local.name == name)
  }

  /// Return the offset bound to `name`, allocating the next slot on first use.
  pub fn resolve(&mut self, name: &str) -> usize {
    if let Some(local) = self.find(name) {
      return local.offset;
    }

    let offset = (self.locals.len() + 1) * WORD_SIZE;
    trace!("local `{name}` -> rbp-{offset}");
    self.locals.push(Local {
      name: name.to_string(),
      offset,
    });
    offset
  }

  pub fn len(&self) -> usize {
    self.locals.len()
  }

  pub fn is_empty(&self) -> bool {
    self.locals.is_empty()
  }

  /// Bytes the prologue must reserve for this function's locals.
  pub fn frame_size(&self) -> usize {
    self.locals.len() * WORD_SIZE
  }
}

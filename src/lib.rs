//! Crate root: wires together the compilation pipeline.
//!
//! The stages run strictly one after another:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns one AST per function,
//!   resolving variables through a per-function `locals` table.
//! - `codegen` lowers the program into x86-64 Intel-syntax assembly, drawing
//!   jump targets from a `label` allocator.
//! - `error` centralises the error type and caret diagnostics.

pub mod codegen;
pub mod error;
pub mod label;
pub mod locals;
pub mod parser;
pub mod tokenizer;

pub use error::{CompileError, CompileResult, render_diagnostic};

use label::LabelAllocator;

/// State for a single compilation run. Nothing outlives the session, so
/// independent runs never observe each other's labels or locals.
pub struct Session<'a> {
  source: &'a str,
  labels: LabelAllocator,
}

impl<'a> Session<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      labels: LabelAllocator::new(),
    }
  }

  pub fn source(&self) -> &'a str {
    self.source
  }

  /// Run the whole pipeline, returning the complete listing or the first
  /// error encountered.
  pub fn compile(&mut self) -> CompileResult<String> {
    let tokens = tokenizer::tokenize(self.source)?;
    let program = parser::parse(tokens, self.source)?;
    codegen::generate(&program, &mut self.labels)
  }
}

/// Compile a source string into Intel-syntax assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  Session::new(source).compile()
}

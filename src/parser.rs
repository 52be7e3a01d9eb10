//! Recursive-descent parser producing one AST per function definition.
//!
//! The parser mirrors the classic chibicc structure: one helper per grammar
//! rule, each consuming exactly the tokens it recognises. Identifiers are
//! resolved to stack offsets while parsing, through the local table of the
//! function currently being parsed.

use std::mem;

use log::debug;

use crate::error::{CompileError, CompileResult};
use crate::locals::{Local, LocalTable};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};

/// Binary operators understood by the code generator. `>` and `>=` have no
/// variant of their own: the parser swaps their operands onto `Lt` / `Le`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

/// Expression tree. Every expression evaluates to exactly one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  Num {
    value: i64,
  },
  Var {
    name: String,
    offset: usize,
    loc: usize,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Assign {
    lhs: Box<Expr>,
    rhs: Box<Expr>,
    loc: usize,
  },
  Call {
    name: String,
    args: Vec<Expr>,
    loc: usize,
  },
}

impl Expr {
  pub fn number(value: i64) -> Self {
    Self::Num { value }
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assign(lhs: Expr, rhs: Expr, loc: usize) -> Self {
    Self::Assign {
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
      loc,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  Return(Expr),
  If {
    cond: Expr,
    then: Box<Stmt>,
    els: Option<Box<Stmt>>,
  },
  For {
    init: Option<Expr>,
    cond: Option<Expr>,
    inc: Option<Expr>,
    body: Box<Stmt>,
  },
  Block(Vec<Stmt>),
  Expr(Expr),
}

/// A parsed function definition together with its resolved locals.
#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub loc: usize,
  /// Parameters in declaration order; they occupy the first local slots.
  pub params: Vec<Local>,
  pub body: Vec<Stmt>,
  pub locals: LocalTable,
  /// Bytes reserved by the prologue, one word per distinct local.
  pub stack_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
  pub functions: Vec<Function>,
}

/// Parse a whole program from the token stream.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens, source);
  let mut functions = Vec::new();

  while !stream.is_eof() {
    functions.push(parse_function(&mut stream)?);
  }

  debug!("parsed {} function(s)", functions.len());
  Ok(Program { functions })
}

fn parse_function(stream: &mut TokenStream) -> CompileResult<Function> {
  let (name, loc) = stream.get_ident()?;
  stream.locals = LocalTable::new();

  stream.skip("(")?;
  let mut params = Vec::new();
  if !stream.equal(")") {
    loop {
      let (param, param_loc) = stream.get_ident()?;
      if stream.locals.find(&param).is_some() {
        return Err(CompileError::syntax(
          param_loc,
          format!("duplicate parameter `{param}`"),
        ));
      }
      let offset = stream.locals.resolve(&param);
      params.push(Local {
        name: param,
        offset,
      });
      if !stream.equal(",") {
        break;
      }
    }
    stream.skip(")")?;
  }

  stream.skip("{")?;
  let body = parse_compound(stream)?;

  let locals = mem::take(&mut stream.locals);
  let stack_size = locals.frame_size();
  debug!(
    "function `{name}`: {} param(s), {} local(s), frame {stack_size} bytes",
    params.len(),
    locals.len()
  );

  Ok(Function {
    name,
    loc,
    params,
    body,
    locals,
    stack_size,
  })
}

/// Statements up to and including the closing `}`; the opening brace has
/// already been consumed.
fn parse_compound(stream: &mut TokenStream) -> CompileResult<Vec<Stmt>> {
  let mut body = Vec::new();
  while !stream.equal("}") {
    if stream.is_eof() {
      stream.skip("}")?;
    }
    body.push(parse_stmt(stream)?);
  }
  Ok(body)
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  if stream.keyword("return") {
    let expr = parse_expr(stream)?;
    stream.skip(";")?;
    return Ok(Stmt::Return(expr));
  }

  if stream.keyword("if") {
    stream.skip("(")?;
    let cond = parse_expr(stream)?;
    stream.skip(")")?;
    let then = Box::new(parse_stmt(stream)?);
    let els = if stream.keyword("else") {
      Some(Box::new(parse_stmt(stream)?))
    } else {
      None
    };
    return Ok(Stmt::If { cond, then, els });
  }

  if stream.keyword("for") {
    stream.skip("(")?;
    let init = parse_opt_expr(stream, ";")?;
    let cond = parse_opt_expr(stream, ";")?;
    let inc = parse_opt_expr(stream, ")")?;
    let body = Box::new(parse_stmt(stream)?);
    return Ok(Stmt::For {
      init,
      cond,
      inc,
      body,
    });
  }

  if stream.equal("{") {
    return Ok(Stmt::Block(parse_compound(stream)?));
  }

  parse_expr_stmt(stream)
}

/// An optional clause of a `for` header followed by its terminator.
fn parse_opt_expr(stream: &mut TokenStream, terminator: &str) -> CompileResult<Option<Expr>> {
  if stream.equal(terminator) {
    return Ok(None);
  }
  let expr = parse_expr(stream)?;
  stream.skip(terminator)?;
  Ok(Some(expr))
}

fn parse_expr_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let expr = parse_expr(stream)?;
  stream.skip(";")?;
  Ok(Stmt::Expr(expr))
}

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_assign(stream)
}

fn parse_assign(stream: &mut TokenStream) -> CompileResult<Expr> {
  let loc = stream.loc();
  let node = parse_equality(stream)?;

  if stream.equal("=") {
    let rhs = parse_equality(stream)?;
    return Ok(Expr::assign(node, rhs, loc));
  }

  Ok(node)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_relational(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("==") => BinaryOp::Eq,
      Some("!=") => BinaryOp::Ne,
      _ => break,
    };

    stream.advance();
    let rhs = parse_relational(stream)?;
    node = Expr::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_add(stream)?;

  loop {
    // `a > b` is emitted as `b < a`, and `a >= b` as `b <= a`.
    let (op, swapped) = match stream.peek_punctuator() {
      Some("<") => (BinaryOp::Lt, false),
      Some("<=") => (BinaryOp::Le, false),
      Some(">") => (BinaryOp::Lt, true),
      Some(">=") => (BinaryOp::Le, true),
      _ => break,
    };

    stream.advance();
    let rhs = parse_add(stream)?;
    node = if swapped {
      Expr::binary(op, rhs, node)
    } else {
      Expr::binary(op, node, rhs)
    };
  }

  Ok(node)
}

fn parse_add(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_mul(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("+") => BinaryOp::Add,
      Some("-") => BinaryOp::Sub,
      _ => break,
    };

    stream.advance();
    let rhs = parse_mul(stream)?;
    node = Expr::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_mul(stream: &mut TokenStream) -> CompileResult<Expr> {
  let mut node = parse_unary(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("*") => BinaryOp::Mul,
      Some("/") => BinaryOp::Div,
      _ => break,
    };

    stream.advance();
    let rhs = parse_unary(stream)?;
    node = Expr::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_unary(stream: &mut TokenStream) -> CompileResult<Expr> {
  if stream.equal("+") {
    return parse_unary(stream);
  }

  if stream.equal("-") {
    let operand = parse_unary(stream)?;
    return Ok(Expr::binary(BinaryOp::Sub, Expr::number(0), operand));
  }

  parse_primary(stream)
}

fn parse_primary(stream: &mut TokenStream) -> CompileResult<Expr> {
  if stream.equal("(") {
    let node = parse_expr(stream)?;
    stream.skip(")")?;
    return Ok(node);
  }

  if stream.peek().map(|token| token.kind) == Some(TokenKind::Ident) {
    let is_call = stream.next_is("(");
    let (name, loc) = stream.get_ident()?;

    if is_call {
      stream.skip("(")?;
      let args = parse_args(stream)?;
      return Ok(Expr::Call { name, args, loc });
    }

    let offset = stream.locals.resolve(&name);
    return Ok(Expr::Var { name, offset, loc });
  }

  let (value, _) = stream.get_number()?;
  Ok(Expr::number(value))
}

/// Call arguments up to and including the closing `)`.
fn parse_args(stream: &mut TokenStream) -> CompileResult<Vec<Expr>> {
  let mut args = Vec::new();
  if stream.equal(")") {
    return Ok(args);
  }

  loop {
    args.push(parse_assign(stream)?);
    if !stream.equal(",") {
      break;
    }
  }
  stream.skip(")")?;
  Ok(args)
}

/// Lightweight cursor over the token vector, plus the variable table of the
/// function being parsed.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
  locals: LocalTable,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
      locals: LocalTable::new(),
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  /// Whether the token after the current one is the punctuator `op`.
  fn next_is(&self, op: &str) -> bool {
    self.tokens.get(self.pos + 1).is_some_and(|token| {
      token.kind == TokenKind::Punctuator && token_text(token, self.source) == op
    })
  }

  fn advance(&mut self) {
    self.pos += 1;
  }

  /// Offset of the current token, or end of input past the last one.
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn peek_punctuator(&self) -> Option<&'a str> {
    let source = self.source;
    self
      .peek()
      .filter(|token| token.kind == TokenKind::Punctuator)
      .map(|token| token_text(token, source))
  }

  fn consume(&mut self, kind: TokenKind, text: &str) -> bool {
    if let Some(token) = self.peek()
      && token.kind == kind
      && token.len == text.len()
      && token_text(token, self.source) == text
    {
      self.pos += 1;
      return true;
    }
    false
  }

  /// Consume the current token if it matches the provided punctuator.
  fn equal(&mut self, op: &str) -> bool {
    self.consume(TokenKind::Punctuator, op)
  }

  fn keyword(&mut self, word: &str) -> bool {
    self.consume(TokenKind::Keyword, word)
  }

  fn unexpected(&self, expected: &str) -> CompileError {
    let got = describe_token(self.peek(), self.source);
    CompileError::syntax(self.loc(), format!("expected {expected}, but got \"{got}\""))
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.unexpected(&format!("\"{s}\"")))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
    {
      let loc = token.loc;
      let value = token
        .value
        .ok_or_else(|| CompileError::syntax(loc, "internal error: numeric token missing value"))?;
      self.pos += 1;
      return Ok((value, loc));
    }

    Err(self.unexpected("a number"))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = token_text(token, self.source).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((ident, loc));
    }

    Err(self.unexpected("an identifier"))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek().map(|token| token.kind), Some(TokenKind::Eof) | None)
  }
}

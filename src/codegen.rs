//! Code generation: lower the parsed program into x86-64 Intel-syntax assembly.
//!
//! The emitter is a simple stack machine: every expression leaves exactly one
//! value on the stack and every operator pops its operands from it. Locals
//! live in the stack frame and are addressed relative to `rbp`. Output is
//! buffered and only handed back once the whole program compiled.

use std::collections::HashSet;

use log::debug;

use crate::error::{CompileError, CompileResult};
use crate::label::LabelAllocator;
use crate::parser::{BinaryOp, Expr, Function, Program, Stmt};

/// System V integer argument registers, in order.
const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Intel-syntax words that `noprefix` mode never reads as a symbol.
const OPERAND_KEYWORDS: [&str; 30] = [
  "byte", "word", "dword", "fword", "qword", "mmword", "tbyte", "oword", "xmmword", "ymmword",
  "zmmword", "ptr", "offset", "flat", "short", "near", "far", "and", "or", "xor", "not", "mod",
  "shl", "shr", "eq", "ne", "lt", "le", "gt", "ge",
];

const FIXED_REGISTERS: [&str; 48] = [
  "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "eax", "ebx", "ecx", "edx", "esi", "edi",
  "ebp", "esp", "ax", "bx", "cx", "dx", "si", "di", "bp", "sp", "al", "bl", "cl", "dl", "ah", "bh",
  "ch", "dh", "sil", "dil", "bpl", "spl", "rip", "eip", "ip", "cs", "ds", "es", "fs", "gs", "ss",
  "st", "eflags", "rflags",
];

/// Register families written as a prefix plus an index, e.g. `xmm15`.
const NUMBERED_REGISTERS: [(&str, u32); 10] = [
  ("r", 15),
  ("xmm", 31),
  ("ymm", 31),
  ("zmm", 31),
  ("mm", 7),
  ("k", 7),
  ("cr", 15),
  ("dr", 15),
  ("st", 7),
  ("bnd", 3),
];

/// Whether the assembler would read `name` as a register or operand keyword
/// rather than a symbol. Matching is case-insensitive, like the assembler.
fn is_reserved_symbol(name: &str) -> bool {
  let name = name.to_ascii_lowercase();
  let name = name.as_str();
  if OPERAND_KEYWORDS.contains(&name) || FIXED_REGISTERS.contains(&name) {
    return true;
  }

  NUMBERED_REGISTERS.iter().any(|&(prefix, max)| {
    let Some(rest) = name.strip_prefix(prefix) else {
      return false;
    };
    // r8..r15 also come in d/w/b/l sized forms.
    let (digits, lower) = match prefix {
      "r" => (rest.strip_suffix(['d', 'w', 'b', 'l']).unwrap_or(rest), 8),
      _ => (rest, 0),
    };
    let canonical = digits == "0" || !digits.starts_with('0');
    canonical
      && !digits.is_empty()
      && digits.bytes().all(|b| b.is_ascii_digit())
      && digits.parse::<u32>().is_ok_and(|n| (lower..=max).contains(&n))
  })
}

fn check_symbol(name: &str, loc: usize) -> CompileResult<()> {
  if is_reserved_symbol(name) {
    return Err(CompileError::semantic(
      loc,
      format!("`{name}` names a register or assembler keyword and cannot be a function"),
    ));
  }
  Ok(())
}

/// Emit assembly for a whole program.
pub fn generate(program: &Program, labels: &mut LabelAllocator) -> CompileResult<String> {
  let mut asm = String::new();
  asm.push_str(".intel_syntax noprefix\n");

  let mut defined = HashSet::new();
  for func in &program.functions {
    check_symbol(&func.name, func.loc)?;
    if !defined.insert(func.name.as_str()) {
      return Err(CompileError::semantic(
        func.loc,
        format!("redefinition of function `{}`", func.name),
      ));
    }

    let mut emitter = Emitter::new(func, labels);
    emitter.function(func)?;
    debug!(
      "emitted `{}` ({} bytes of assembly)",
      func.name,
      emitter.asm.len()
    );
    asm.push_str(&emitter.asm);
  }

  Ok(asm)
}

/// Per-function emission state.
struct Emitter<'a> {
  asm: String,
  labels: &'a mut LabelAllocator,
  return_label: String,
  func_loc: usize,
}

impl<'a> Emitter<'a> {
  fn new(func: &Function, labels: &'a mut LabelAllocator) -> Self {
    Self {
      asm: String::new(),
      labels,
      return_label: format!(".L.return.{}", func.name),
      func_loc: func.loc,
    }
  }

  fn label(&mut self) -> CompileResult<String> {
    self.labels.allocate().ok_or_else(|| {
      CompileError::semantic(self.func_loc, "too many control-flow labels in one program")
    })
  }

  fn function(&mut self, func: &Function) -> CompileResult<()> {
    if func.params.len() > ARG_REGS.len() {
      return Err(CompileError::semantic(
        func.loc,
        format!("too many parameters (at most {})", ARG_REGS.len()),
      ));
    }

    let name = &func.name;
    self.asm.push_str(&format!(".globl {name}\n"));
    self.asm.push_str(&format!("{name}:\n"));
    self.asm.push_str("    push rbp\n");
    self.asm.push_str("    mov rbp, rsp\n");
    if func.stack_size > 0 {
      self.asm.push_str(&format!("    sub rsp, {}\n", func.stack_size));
    }

    for (param, reg) in func.params.iter().zip(ARG_REGS) {
      self
        .asm
        .push_str(&format!("    mov [rbp-{}], {reg}\n", param.offset));
    }

    for stmt in &func.body {
      self.stmt(stmt)?;
    }

    self.asm.push_str(&format!("{}:\n", self.return_label));
    self.asm.push_str("    mov rsp, rbp\n");
    self.asm.push_str("    pop rbp\n");
    self.asm.push_str("    ret\n");
    Ok(())
  }

  /// Statements leave the stack exactly as they found it.
  fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::Return(expr) => {
        self.expr(expr)?;
        self.asm.push_str("    pop rax\n");
        self.asm.push_str(&format!("    jmp {}\n", self.return_label));
      }
      Stmt::If { cond, then, els } => {
        let label = self.label()?;
        self.expr(cond)?;
        self.asm.push_str("    pop rax\n");
        self.asm.push_str("    cmp rax, 0\n");
        match els {
          Some(els) => {
            self.asm.push_str(&format!("    je .L.else.{label}\n"));
            self.stmt(then)?;
            self.asm.push_str(&format!("    jmp .L.end.{label}\n"));
            self.asm.push_str(&format!(".L.else.{label}:\n"));
            self.stmt(els)?;
          }
          None => {
            self.asm.push_str(&format!("    je .L.end.{label}\n"));
            self.stmt(then)?;
          }
        }
        self.asm.push_str(&format!(".L.end.{label}:\n"));
      }
      Stmt::For {
        init,
        cond,
        inc,
        body,
      } => {
        let label = self.label()?;
        if let Some(init) = init {
          self.discarded(init)?;
        }
        self.asm.push_str(&format!(".L.begin.{label}:\n"));
        if let Some(cond) = cond {
          self.expr(cond)?;
          self.asm.push_str("    pop rax\n");
          self.asm.push_str("    cmp rax, 0\n");
          self.asm.push_str(&format!("    je .L.end.{label}\n"));
        }
        self.stmt(body)?;
        if let Some(inc) = inc {
          self.discarded(inc)?;
        }
        self.asm.push_str(&format!("    jmp .L.begin.{label}\n"));
        self.asm.push_str(&format!(".L.end.{label}:\n"));
      }
      Stmt::Block(body) => {
        for stmt in body {
          self.stmt(stmt)?;
        }
      }
      Stmt::Expr(expr) => self.discarded(expr)?,
    }
    Ok(())
  }

  /// Evaluate an expression for its side effects only.
  fn discarded(&mut self, expr: &Expr) -> CompileResult<()> {
    self.expr(expr)?;
    self.asm.push_str("    add rsp, 8\n");
    Ok(())
  }

  /// Emit stack-based code for a single expression node.
  fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::Num { value } => {
        self.asm.push_str(&format!("    mov rax, {value}\n"));
        self.asm.push_str("    push rax\n");
      }
      Expr::Var { offset, .. } => {
        self.asm.push_str(&format!("    mov rax, [rbp-{offset}]\n"));
        self.asm.push_str("    push rax\n");
      }
      Expr::Assign { lhs, rhs, loc } => {
        self.addr(lhs, *loc)?;
        self.expr(rhs)?;
        self.asm.push_str("    pop rdi\n");
        self.asm.push_str("    pop rax\n");
        self.asm.push_str("    mov [rax], rdi\n");
        self.asm.push_str("    push rdi\n");
      }
      Expr::Call { name, args, loc } => self.call(name, args, *loc)?,
      Expr::Binary { op, lhs, rhs } => {
        self.expr(lhs)?;
        self.expr(rhs)?;
        self.asm.push_str("    pop rdi\n");
        self.asm.push_str("    pop rax\n");
        match op {
          BinaryOp::Add => self.asm.push_str("    add rax, rdi\n"),
          BinaryOp::Sub => self.asm.push_str("    sub rax, rdi\n"),
          BinaryOp::Mul => self.asm.push_str("    imul rax, rdi\n"),
          BinaryOp::Div => {
            self.asm.push_str("    cqo\n");
            self.asm.push_str("    idiv rdi\n");
          }
          BinaryOp::Eq => self.compare("sete"),
          BinaryOp::Ne => self.compare("setne"),
          BinaryOp::Lt => self.compare("setl"),
          BinaryOp::Le => self.compare("setle"),
        }
        self.asm.push_str("    push rax\n");
      }
    }
    Ok(())
  }

  fn compare(&mut self, set: &str) {
    self.asm.push_str("    cmp rax, rdi\n");
    self.asm.push_str(&format!("    {set} al\n"));
    self.asm.push_str("    movzx rax, al\n");
  }

  /// Push the address of an assignment target.
  fn addr(&mut self, expr: &Expr, loc: usize) -> CompileResult<()> {
    match expr {
      Expr::Var { offset, .. } => {
        self.asm.push_str(&format!("    lea rax, [rbp-{offset}]\n"));
        self.asm.push_str("    push rax\n");
        Ok(())
      }
      _ => Err(CompileError::semantic(loc, "not an lvalue")),
    }
  }

  fn call(&mut self, name: &str, args: &[Expr], loc: usize) -> CompileResult<()> {
    if args.len() > ARG_REGS.len() {
      return Err(CompileError::semantic(
        loc,
        format!("too many arguments (at most {})", ARG_REGS.len()),
      ));
    }
    check_symbol(name, loc)?;

    for arg in args {
      self.expr(arg)?;
    }
    for reg in ARG_REGS[..args.len()].iter().rev() {
      self.asm.push_str(&format!("    pop {reg}\n"));
    }

    // rsp is always a multiple of 8 here; pad by one word when it is not
    // 16-byte aligned.
    let label = self.label()?;
    self.asm.push_str("    mov rax, rsp\n");
    self.asm.push_str("    and rax, 15\n");
    self.asm.push_str(&format!("    jnz .L.call.{label}\n"));
    self.asm.push_str("    mov rax, 0\n");
    self.asm.push_str(&format!("    call {name}\n"));
    self.asm.push_str(&format!("    jmp .L.end.{label}\n"));
    self.asm.push_str(&format!(".L.call.{label}:\n"));
    self.asm.push_str("    sub rsp, 8\n");
    self.asm.push_str("    mov rax, 0\n");
    self.asm.push_str(&format!("    call {name}\n"));
    self.asm.push_str("    add rsp, 8\n");
    self.asm.push_str(&format!(".L.end.{label}:\n"));
    self.asm.push_str("    push rax\n");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn compile(source: &str) -> CompileResult<String> {
    let program = parse(tokenize(source)?, source)?;
    generate(&program, &mut LabelAllocator::new())
  }

  fn count(asm: &str, needle: &str) -> usize {
    asm.lines().filter(|line| line.trim() == needle).count()
  }

  #[test]
  fn prologue_reserves_frame_and_spills_params() {
    let asm = compile("add(x,y){return x+y;}").unwrap();
    assert!(asm.starts_with(".intel_syntax noprefix\n.globl add\nadd:\n"));
    assert!(asm.contains("    sub rsp, 16\n"));
    assert!(asm.contains("    mov [rbp-8], rdi\n    mov [rbp-16], rsi\n"));
  }

  #[test]
  fn frame_without_locals_skips_reservation() {
    let asm = compile("main(){return 7;}").unwrap();
    assert!(!asm.contains("sub rsp"));
  }

  #[test]
  fn epilogue_is_emitted_once_per_function() {
    let asm = compile("main(){if(1)return 1;return 2;return 3;}").unwrap();
    assert_eq!(count(&asm, "ret"), 1);
    assert_eq!(count(&asm, ".L.return.main:"), 1);
    assert_eq!(count(&asm, "jmp .L.return.main"), 3);
  }

  #[test]
  fn if_statements_get_distinct_labels() {
    let asm = compile("main(){if(1)a=1; if(0)a=2;else a=3; return a;}").unwrap();
    assert_eq!(count(&asm, ".L.end.AAA:"), 1);
    assert_eq!(count(&asm, ".L.else.AAB:"), 1);
    assert_eq!(count(&asm, ".L.end.AAB:"), 1);
  }

  #[test]
  fn labels_stay_unique_across_functions() {
    let asm = compile("f(){if(1)return 1;return 0;} main(){if(1)return f();return 0;}").unwrap();
    let labels: Vec<_> = asm.lines().filter(|line| line.starts_with(".L.")).collect();
    let unique: HashSet<_> = labels.iter().collect();
    assert_eq!(labels.len(), unique.len());
  }

  #[test]
  fn empty_for_emits_no_exit_test() {
    let asm = compile("main(){for(;;)return 1;}").unwrap();
    assert!(asm.contains(".L.begin.AAA:\n"));
    assert!(!asm.contains("je .L.end.AAA"));
    assert!(asm.contains("    jmp .L.begin.AAA\n.L.end.AAA:\n"));
  }

  #[test]
  fn call_pops_arguments_in_reverse() {
    let asm = compile("main(){return f(1,2,3);}").unwrap();
    assert!(asm.contains("    pop rdx\n    pop rsi\n    pop rdi\n"));
    assert_eq!(count(&asm, "call f"), 2);
    assert!(asm.contains("    and rax, 15\n    jnz .L.call.AAA\n"));
  }

  #[test]
  fn comparison_materializes_zero_or_one() {
    let asm = compile("main(){return 1<2;}").unwrap();
    assert!(asm.contains("    cmp rax, rdi\n    setl al\n    movzx rax, al\n"));
  }

  #[test]
  fn division_sign_extends_before_idiv() {
    let asm = compile("main(){return 7/2;}").unwrap();
    assert!(asm.contains("    cqo\n    idiv rdi\n"));
  }

  #[test]
  fn expression_statements_are_stack_neutral() {
    let asm = compile("main(){1;return 2;}").unwrap();
    assert!(asm.contains("    mov rax, 1\n    push rax\n    add rsp, 8\n"));
  }

  #[test]
  fn assigning_to_non_variable_is_semantic_error() {
    let err = compile("main(){ (1+2) = 3; }").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 8, .. }));
    assert_eq!(err.message(), "not an lvalue");
  }

  #[test]
  fn too_many_arguments_are_rejected() {
    let err = compile("main(){return f(1,2,3,4,5,6,7);}").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 14, .. }));
  }

  #[test]
  fn too_many_parameters_are_rejected() {
    let err = compile("f(a,b,c,d,e,g,h){return 0;}").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 0, .. }));
  }

  #[test]
  fn register_named_function_is_rejected() {
    let err = compile("rdi(){return 5;} main(){return rdi();}").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 0, .. }));
  }

  #[test]
  fn register_named_call_is_rejected() {
    let err = compile("main(){return eax();}").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 14, .. }));
  }

  #[test]
  fn reserved_symbols_cover_registers_and_keywords() {
    for name in [
      "rax", "RDI", "al", "rip", "r8", "r15d", "r9b", "xmm0", "zmm31", "k7", "cr3", "st", "st0",
      "offset", "byte", "qword", "ptr", "shl",
    ] {
      assert!(is_reserved_symbol(name), "{name}");
    }
    for name in [
      "main", "foo", "rdi2", "r7", "r16", "r8x", "xmm32", "rdx_", "offsets", "bytes", "add", "r08",
    ] {
      assert!(!is_reserved_symbol(name), "{name}");
    }
  }

  #[test]
  fn duplicate_function_is_rejected() {
    let err = compile("f(){return 0;} f(){return 1;}").unwrap_err();
    assert!(matches!(err, CompileError::Semantic { loc: 15, .. }));
  }
}

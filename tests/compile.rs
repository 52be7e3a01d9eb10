use mincc::{CompileError, Session, generate_assembly};

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_listing_has_one_symbol_per_function() {
  init_logger();

  let asm = generate_assembly("add(x,y){return x+y;} main(){return add(3,4);}").unwrap();
  let globals: Vec<_> = asm.lines().filter(|line| line.starts_with(".globl")).collect();
  assert_eq!(globals, vec![".globl add", ".globl main"]);
  assert!(asm.lines().any(|line| line == "add:"));
  assert!(asm.lines().any(|line| line == "main:"));
  assert_eq!(asm.lines().next(), Some(".intel_syntax noprefix"));
}

#[test]
fn test_sessions_do_not_share_labels() {
  init_logger();

  let source = "main(){if(1)return 1;return 0;}";
  let first = Session::new(source).compile().unwrap();
  let second = Session::new(source).compile().unwrap();
  assert_eq!(first, second);
  assert!(first.contains(".L.end.AAA:"));
}

#[test]
fn test_many_ifs_never_reuse_a_label() {
  init_logger();

  let body: String = (0..100).map(|i| format!("if(a=={i})a=a+1;")).collect();
  let source = format!("main(){{a=0;{body}return a;}}");
  let asm = generate_assembly(&source).unwrap();
  let mut labels: Vec<_> = asm.lines().filter(|line| line.starts_with(".L.end.")).collect();
  let total = labels.len();
  labels.sort_unstable();
  labels.dedup();
  assert_eq!(total, 100);
  assert_eq!(labels.len(), 100);
}

#[test]
fn test_lex_error_diagnostic() {
  init_logger();

  let source = "1 & 2";
  let err = generate_assembly(source).unwrap_err();
  assert!(matches!(err, CompileError::Lex { loc: 2, .. }));
  assert_eq!(err.render(source), "1 & 2\n  ^ invalid token: '&'");
}

#[test]
fn test_truncated_program_points_past_end() {
  init_logger();

  let source = "main(){return 1+";
  let err = generate_assembly(source).unwrap_err();
  assert_eq!(err.loc(), source.len());
  assert_eq!(
    err.render(source),
    "main(){return 1+\n                ^ expected a number, but got \"EOF\""
  );
}

#[test]
fn test_bare_expression_is_rejected() {
  init_logger();

  let err = generate_assembly("1+").unwrap_err();
  assert!(matches!(err, CompileError::Syntax { loc: 0, .. }));
}

#[test]
fn test_late_semantic_error_yields_no_listing() {
  init_logger();

  let source = "main(){return 0;} broken(){a=1; a+1 = 2;}";
  let err = generate_assembly(source).unwrap_err();
  assert!(matches!(err, CompileError::Semantic { .. }));
  assert_eq!(err.loc(), source.find("a+1").unwrap());
}

#[test]
fn test_keyword_prefixed_identifiers_are_variables() {
  init_logger();

  let asm = generate_assembly("main(){iffy=1;format=2;returned=3;return iffy+format+returned;}")
    .unwrap();
  assert!(asm.contains("    sub rsp, 24\n"));
}

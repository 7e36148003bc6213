//! Rendered diagnostics

use borrowck_tests::{Harness, assign_int, call_stmt, int, render};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use expect_test::expect;
use tml_ast::{FuncDecl, Ty};
use tml_borrow_check::{Algorithm, ErrorKind, explain};

fn move_then_use(h: &Harness) -> FuncDecl {
    let mut b = h.builder();
    h.made(&mut b, "v", false, "List");
    call_stmt(&mut b, "consume", "v");
    call_stmt(&mut b, "print", "v");
    b.finish("main", None, None)
}

fn write_while_borrowed(h: &Harness) -> FuncDecl {
    let mut b = h.builder();
    let one = b.int(1);
    b.let_var("x", true, Some(int()), Some(one));
    let x = b.ident("x");
    let borrow = b.ref_(x);
    b.let_var("r", false, Some(Ty::reference(false, int())), Some(borrow));
    assign_int(&mut b, "x", 10);
    call_stmt(&mut b, "print", "r");
    b.finish("main", None, None)
}

#[test]
fn test_use_after_move_rendering() {
    let h = Harness::new();
    let errors = h.check(Algorithm::Nll, &move_then_use(&h));
    expect![[r#"
        error[B001]: use of moved value: `v`
          primary: 6..7
          4..5: value moved here
          note: move occurs because `v` has a type that does not implement `Copy`
          help: consider using `.duplicate()` to keep a copy before moving
    "#]]
    .assert_eq(&render(&errors));
}

#[test]
fn test_assign_while_borrowed_rendering() {
    let h = Harness::new();
    let errors = h.check(Algorithm::Nll, &write_while_borrowed(&h));
    expect![[r#"
        error[B004]: cannot assign to `x` because it is borrowed
          primary: 10..11
          5..6: `x` is borrowed here
          11..12: borrow later used here
    "#]]
    .assert_eq(&render(&errors));
}

#[test]
fn test_codespan_output_carries_code_and_labels() {
    let h = Harness::new();
    let func = move_then_use(&h);
    let errors = h.check(Algorithm::Polonius, &func);
    assert_eq!(errors.len(), 1);

    let source = "v".repeat(func.span.span.end as usize + 1);
    let mut files = SimpleFiles::new();
    files.add("main.tml", source);
    let diagnostic = errors[0].to_codespan_diagnostic();

    let mut buffer = Vec::new();
    let config = term::Config::default();
    #[allow(deprecated)]
    term::emit(&mut buffer, &config, &files, &diagnostic).unwrap();
    let output = String::from_utf8(buffer).unwrap();

    assert!(output.contains("error[B001]"));
    assert!(output.contains("value moved here"));
    assert!(output.contains("help: consider using `.duplicate()`"));
}

#[test]
fn test_errors_serialize_with_stable_codes() {
    let h = Harness::new();
    let errors = h.check(Algorithm::Nll, &write_while_borrowed(&h));
    let json = serde_json::to_value(&errors).unwrap();
    assert_eq!(json[0]["kind"], "AssignWhileBorrowed");
    assert_eq!(json[0]["primary_message"], "cannot assign to `x` because it is borrowed");
    assert_eq!(json[0]["related"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_every_reported_code_is_explained() {
    let h = Harness::new();
    for func in [move_then_use(&h), write_while_borrowed(&h)] {
        for algorithm in [Algorithm::Nll, Algorithm::Polonius] {
            for error in h.check(algorithm, &func) {
                assert_ne!(error.kind, ErrorKind::InternalInconsistency);
                assert!(explain(error.code()).is_some(), "{} has no explanation", error.code());
            }
        }
    }
}

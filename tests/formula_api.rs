//! Formula compilation through the public API

use defpatch::{
    Bindings, ErrorKind, FormulaCompiler, FormulaError, Object, PatchError, Position, Scope,
    Value, VariableStore, evaluate, evaluate_with,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;

#[rstest]
#[case("2 + 3 * 4", Value::Number(14.0))]
#[case("\"a\" .. \"b\"", Value::from("ab"))]
#[case("\"tab\\there\"", Value::from("tab\there"))]
#[case("\"\\x41\\u0042\"", Value::from("AB"))]
#[case("PI > 3.14 and E < 2.72", Value::Boolean(true))]
#[case("1.5e2", Value::Number(150.0))]
#[case("sqrt(pow(3, 2) + pow(4, 2))", Value::Number(5.0))]
#[case("floor(-1.5) .. \"/\" .. ceiling(-1.5)", Value::from("-2/-1"))]
#[case("type(true)", Value::from("boolean"))]
fn test_evaluate(#[case] formula: &str, #[case] expected: Value) {
    assert_eq!(evaluate(formula).unwrap(), expected);
}

#[test]
fn test_repeat_bound() {
    let ok = evaluate("\"ab\" repeat 1024").unwrap();
    assert_eq!(ok.as_text().map(str::len), Some(2048));
    assert!(matches!(
        evaluate("\"ab\" repeat 1025"),
        Err(FormulaError::RepeatLimit { .. })
    ));
}

#[test]
fn test_bindings_shadow_shared_variables() {
    VariableStore::global().insert("formula_api.scale", Value::Number(3.0));
    assert_eq!(
        evaluate("formula_api.scale * 2").unwrap(),
        Value::Number(6.0)
    );
    let bindings = Bindings::new().with("formula_api.scale", 10.0);
    assert_eq!(
        evaluate_with("formula_api.scale * 2", bindings).unwrap(),
        Value::Number(20.0)
    );
}

#[test]
fn test_private_store_scope() {
    let store = Arc::new(VariableStore::new());
    store.insert("Hull", Value::Record(Arc::new(Object::new("Hull").with("Cost", 40i64))));
    let compiler = FormulaCompiler::new(Scope::new().with_provider(store.clone()));

    let formula = compiler.compile("Hull.Cost / 4").unwrap();
    assert_eq!(formula.evaluate().unwrap(), Value::Number(10.0));
    assert!(matches!(
        compiler.compile("Hull.Cost + Missing"),
        Err(FormulaError::UnresolvedSymbol { .. })
    ));
}

#[test]
fn test_error_kinds() {
    let syntax = evaluate("1 +").unwrap_err();
    let unresolved = evaluate("nobody_defines_this").unwrap_err();
    let runtime = evaluate("\"abc\" * 2").unwrap_err();

    let kind = |error: FormulaError| PatchError::formula(error, "", Position::default()).kind();
    assert_eq!(kind(syntax), ErrorKind::Syntax);
    assert_eq!(kind(unresolved), ErrorKind::UnresolvedSymbol);
    assert_eq!(kind(runtime), ErrorKind::Evaluation);
}

#[test]
fn test_deep_nesting_is_a_syntax_error() {
    let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
    let error = evaluate(&deep).unwrap_err();
    assert_eq!(error, FormulaError::MaxDepthExceeded(128));
    assert_eq!(
        PatchError::formula(error, "", Position::default()).kind(),
        ErrorKind::Syntax
    );
    assert!(evaluate(&("not ".repeat(100_000) + "true")).is_err());
}

use strata::{CompileError, LayerErrorKind, LayeredCompiler, SourceLocation, VerificationState};

fn check(source: &str) -> strata::TypecheckReport {
    LayeredCompiler::default().typecheck_source(source, false, true).unwrap()
}

fn liquid_error(source: &str) -> strata::LayerError {
    let report = check(source);
    assert_eq!(report.state("liquid"), Some(VerificationState::Failure));
    report.failure("liquid").cloned().unwrap()
}

#[test]
fn test_refined_program_verifies() {
    let source = r#"
max : liquid : Int -> Int -> {r:Int | r >= 0}
def max(a, b) {
  if a > b {
    if a > 0 { return a }
    return 0
  }
  if b > 0 { return b }
  return 0
}
limit : liquid : {v:Int | v >= 0}
limit = max(3, 7)
"#;
    let report = check(source);
    assert!(report.success(), "{:?}", report.failures);
    assert!(report.metrics.counters["liquid.solver_queries"] > 0);
}

#[test]
fn test_assignment_violates_refinement() {
    let err = liquid_error("x : liquid : {c:Int | c > 0}\nx = 0\n");

    match err.kind {
        LayerErrorKind::Subtype { expected, actual } => {
            assert_eq!(expected, "{c:Int | c > 0}");
            assert_eq!(actual, "{v:Int | v == 0}");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.location, Some(SourceLocation::new(2, 1)));
}

#[test]
fn test_inferred_argument_violates_parameter() {
    let source = "\
check : liquid : {v:Int | v > 5} -> Bool
def check(n) {
  return n > 10
}
x = 3
ok = check(x)
";
    let err = liquid_error(source);
    assert!(matches!(
        err.kind,
        LayerErrorKind::Subtype { ref expected, ref actual } if expected == "{v:Int | v > 5}" && actual == "{v:Int | v == 3}"
    ));
}

#[test]
fn test_dependent_signature_is_enforced_at_call_sites() {
    let header = "\
between : liquid : {lo:Int | lo >= 0} -> {hi:Int | hi > lo} -> {r:Int | r >= lo && r <= hi}
def between(lo, hi) {
  return lo
}
";
    assert!(check(&format!("{}m = between(1, 4)\n", header)).success());

    let err = liquid_error(&format!("{}m = between(4, 1)\n", header));
    assert!(matches!(err.kind, LayerErrorKind::Subtype { .. }));
    assert_eq!(err.location, Some(SourceLocation::new(5, 16)));
}

#[test]
fn test_forward_reference_in_signature() {
    let err = liquid_error("f : liquid : {a:Int | a < b} -> {b:Int | b > 0} -> Int\n");
    assert!(matches!(
        err.kind,
        LayerErrorKind::FunctionDefinition { ref function, ref variable, argument_idx: 0 }
            if function == "f" && variable == "b"
    ));
}

#[test]
fn test_canonical_name_collision() {
    let err = liquid_error("f : liquid : {a:Int | a > $arg3} -> Int\n");
    assert!(matches!(err.kind, LayerErrorKind::CanonicalNameCollision { ref name } if name == "$arg3"));
}

#[test]
fn test_liquid_and_typecheck_layers_are_independent() {
    let source = "\
n : typecheck : int
p : typecheck : int
n = 3
p : liquid : {v:Int | v > 10}
p = 4
";
    let report = check(source);

    assert_eq!(report.state("types"), Some(VerificationState::Success));
    assert_eq!(report.state("typecheck"), Some(VerificationState::Success));
    assert_eq!(report.state("liquid"), Some(VerificationState::Failure));
    assert_eq!(report.implicit_layers, vec!["types"]);
}

#[test]
fn test_typecheck_failure_blocks_nothing_else() {
    let source = "\
x : types : short
y : typecheck : bool
z : liquid : Int
y = 3
";
    let report = check(source);

    assert_eq!(report.state("typecheck"), Some(VerificationState::Failure));
    assert_eq!(report.state("liquid"), Some(VerificationState::Success));
    assert!(matches!(
        report.failure("typecheck").map(|e| &e.kind),
        Some(LayerErrorKind::TypeMismatch { .. })
    ));
}

#[test]
fn test_strict_mode_stops_at_first_failure() {
    let err = LayeredCompiler::default()
        .typecheck_source("x : liquid : {v:Int | v > 0}\nx = 0 - 1\n", true, true)
        .unwrap_err();

    assert_eq!(err.layer_name(), Some("liquid"));
    assert_eq!(err.location(), Some(SourceLocation::new(2, 1)));
}

#[test]
fn test_parse_errors_are_reported() {
    let err = LayeredCompiler::default().typecheck_source("x = (1 +\n", false, true).unwrap_err();
    assert!(matches!(err, CompileError::Parse(_)));
}

#[test]
fn test_report_serializes_to_json() {
    let report = check("x : liquid : {v:Int | v > 0}\nx = 0\n");
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["states"]["liquid"], "failure");
    assert_eq!(json["failures"][0]["layer"], "liquid");
    assert_eq!(json["failures"][0]["error"]["kind"]["kind"], "Subtype");
}

#[test]
fn test_call_result_does_not_capture_argument_names() {
    let source = "\
inc : liquid : {a:Int | a > 0} -> {r:Int | r > a}
def inc(a) {
  return a + 1
}
r = 5
s : liquid : {v:Int | v > 100}
s = inc(r)
";
    let err = liquid_error(source);
    match err.kind {
        LayerErrorKind::Subtype { expected, actual } => {
            assert_eq!(expected, "{v:Int | v > 100}");
            assert_eq!(actual, "{v:Int | v > r}");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.location, Some(SourceLocation::new(7, 1)));

    let fixed = source.replace("v > 100", "v > 5");
    assert!(check(&fixed).success());
}

#[test]
fn test_parameter_may_share_the_return_binder_name() {
    let source = "\
f : liquid : {a:Int | a > 0} -> {r:Int | r > a}
def f(r) {
  return r + 1
}
";
    let report = check(source);
    assert!(report.success(), "{:?}", report.failures);
}

#[test]
fn test_counterexample_found_beyond_search_window() {
    let source = "\
f : liquid : {a:Int | a > 0} -> {r:Int | r * 2 != 50}
def f(a) {
  return a
}
";
    let err = liquid_error(source);
    assert!(matches!(err.kind, LayerErrorKind::Subtype { .. }));
    assert_eq!(err.location.map(|l| l.line), Some(3));
}

#[test]
fn test_undecidable_obligation_is_not_accepted() {
    let source = "\
sq : liquid : Int -> {r:Int | r >= 0}
def sq(a) {
  return a * a
}
";
    let err = liquid_error(source);
    assert!(matches!(err.kind, LayerErrorKind::Solver { .. }));
}

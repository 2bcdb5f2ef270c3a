use geochron_engine::{
    ContextFlags, ExpressionDefinition, NodeKind, Task, TaskDefinition,
};

fn base_definition() -> TaskDefinition {
    TaskDefinition {
        name: "roundtrip".to_string(),
        normalize_ratio_uncertainties: true,
        nominal_masses: vec!["238".into(), "254".into()],
        ratio_names: vec!["254/238".into()],
        ..TaskDefinition::default()
    }
}

fn with_expressions(expressions: Vec<ExpressionDefinition>) -> Task {
    let mut definition = base_definition();
    definition.expressions = expressions;
    Task::build(definition).unwrap()
}

fn expression(name: &str, formula: &str) -> ExpressionDefinition {
    ExpressionDefinition {
        name: name.to_string(),
        formula: formula.to_string(),
        contexts: ContextFlags::default(),
    }
}

#[test]
fn ln_of_ratio_builds_the_expected_tree() {
    let task = with_expressions(vec![expression("lnRatio", r#"ln(["254/238"])"#)]);
    let compiled = task.expression("lnRatio").unwrap();
    assert_eq!(compiled.parse_report, "Expression parses OK.");

    let registry = task.registry();
    let root = registry.node(compiled.root);
    match &root.kind {
        NodeKind::Function(spec) => assert_eq!(spec.name, "ln"),
        other => panic!("expected the ln function at the root, got {other:?}"),
    }
    assert_eq!(root.children.len(), 1);
    // With the NU switch on, the reference substitutes the ratio tree itself.
    let child = registry.node(root.children[0]);
    assert_eq!(child.name, "254/238");
    assert!(task.is_expression_healthy("lnRatio").unwrap());
}

#[test]
fn undefined_reference_parses_but_is_unhealthy() {
    let task = with_expressions(vec![expression("broken", r#"["NotDefined"] + 1"#)]);
    let compiled = task.expression("broken").unwrap();
    assert_eq!(compiled.parse_report, "Expression parses OK.");
    assert_eq!(task.is_expression_healthy("broken"), Some(false));

    let audit = task.audit();
    assert!(audit.contains("missing expression"), "audit: {audit}");
    assert!(audit.contains("NotDefined"), "audit: {audit}");
}

#[test]
fn unhealthy_expressions_still_evaluate_to_zero_rows() {
    use geochron_engine::{Spot, SpotCollection, Value};

    let task = with_expressions(vec![expression("broken", r#"["NotDefined"] + 1"#)]);
    let mut spot = Spot {
        name: "ref-1".to_string(),
        ..Spot::default()
    };
    spot.total_cps.insert("238".into(), 1000.0);
    spot.total_cps.insert("254".into(), 50.0);
    let spots = SpotCollection {
        reference_materials: vec![spot],
        ..SpotCollection::default()
    };

    let results = task.evaluate(&spots).unwrap();
    let rows = &results.reference_materials.get("broken").unwrap().rows;
    // The missing placeholder contributes {0, 0}; the addition still runs.
    assert_eq!(rows[0][0], Value::Number(1.0));
}

#[test]
fn round_trip_reproduces_postfix_for_the_documented_grammar() {
    let formulas = [
        ("plain", "1 + 2 * 3"),
        ("parens", "(1 + 2) * 3"),
        ("powChain", "4 ^ 3 ^ 2"),
        ("negation", "-3 + 1"),
        ("negPow", "2 ^ -3"),
        ("reference", r#"ln(["254/238"]) / 2"#),
        ("directive", r#"[%"254/238"] - [±"254/238"]"#),
        ("constants", "lambda238 * 1e9"),
        ("logic", r#"if(["254/238"] > 0.05, 1, 0)"#),
        ("compare", "1 + 2 < 3 * 4"),
    ];
    let task = with_expressions(
        formulas
            .iter()
            .map(|(name, formula)| expression(name, formula))
            .collect(),
    );

    for report in task.validate_round_trip() {
        assert!(report.ok, "{}: {}", report.name, report.detail);
    }
}

#[test]
fn parse_failures_produce_a_sentinel_not_an_error() {
    let task = with_expressions(vec![expression("bad", "1 + * 2"), expression("ok", "2")]);
    let compiled = task.expression("bad").unwrap();
    assert!(compiled.parse_report.starts_with("Parse error:"));
    assert_eq!(task.is_expression_healthy("bad"), Some(false));
    // The sibling expression is untouched.
    assert_eq!(task.is_expression_healthy("ok"), Some(true));
}

#[test]
fn dependencies_evaluate_before_their_users() {
    let task = with_expressions(vec![
        expression("unrelated", "1"),
        expression("b", r#"["a"] + 1"#),
        expression("a", r#"ln(["254/238"])"#),
    ]);
    let order = task.evaluation_order();
    let position = |name: &str| {
        order
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .unwrap_or_else(|| panic!("{name} missing from order {order:?}"))
    };
    assert!(position("a") < position("b"), "order: {order:?}");
    // Ratio expressions (ratios of interest) sort ahead of plain users.
    assert!(position("254/238") < position("b"), "order: {order:?}");
}

#[test]
fn cyclic_references_are_rejected_with_a_diagnostic() {
    let mut task = with_expressions(vec![
        expression("a", "1 + 1"),
        expression("b", r#"["a"] * 2"#),
    ]);
    // Editing `a` to use `b` closes the loop.
    let err = task
        .set_expression(expression("a", r#"["b"] * 3"#))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("circular reference"), "{message}");

    // The failed edit rolled back; the original definition still evaluates.
    assert_eq!(task.is_expression_healthy("a"), Some(true));
}

#[test]
fn summary_index_suffix_resolves_against_the_base_expression() {
    let mut definition = base_definition();
    definition.expressions = vec![
        ExpressionDefinition {
            name: "WtdAv".to_string(),
            formula: r#"sqWtdAv(["254/238"])"#.to_string(),
            contexts: ContextFlags {
                summary: true,
                ..ContextFlags::default()
            },
        },
        expression("mswdOfWtdAv", r#"["WtdAv 3"]"#),
    ];
    let task = Task::build(definition).unwrap();
    let compiled = task.expression("mswdOfWtdAv").unwrap();
    let root = task.registry().node(compiled.root);
    match &root.kind {
        NodeKind::SummaryVariable { target, index } => {
            assert_eq!(target, "WtdAv");
            assert_eq!(*index, Some(2));
        }
        other => panic!("expected a summary variable root, got {other:?}"),
    }
}

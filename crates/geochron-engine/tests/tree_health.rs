use geochron_engine::functions::lookup_function;
use geochron_engine::tree::{is_healthy, ExpressionNode, NodeKind};
use geochron_engine::{
    ContextFlags, ExpressionDefinition, NamedExpressionRegistry, Task, TaskDefinition, Value,
};
use proptest::prelude::*;

fn constant_node(value: f64) -> ExpressionNode {
    ExpressionNode::new(NodeKind::Constant(Value::Number(value)))
}

#[test]
fn health_requires_exact_arity() {
    let ln = lookup_function("ln").unwrap();

    // Correct child count: healthy.
    let mut registry = NamedExpressionRegistry::new();
    let child = registry.alloc(constant_node(2.0));
    let mut node = ExpressionNode::named(NodeKind::Function(ln), "ok");
    node.children.push(child);
    let root = registry.alloc(node);
    assert!(is_healthy(&registry, root));

    // Empty operand slot: unhealthy.
    let mut registry = NamedExpressionRegistry::new();
    let starved = registry.alloc(ExpressionNode::named(NodeKind::Function(ln), "starved"));
    assert!(!is_healthy(&registry, starved));
}

#[test]
fn missing_placeholder_poisons_the_whole_tree() {
    let mut registry = NamedExpressionRegistry::new();
    let missing = registry.alloc(ExpressionNode::new(NodeKind::Missing(
        "[\"NotDefined\"]".to_string(),
    )));
    let ok = registry.alloc(constant_node(1.0));
    let mut add = ExpressionNode::new(NodeKind::Operator(
        geochron_engine::functions::OperatorKind::Add,
    ));
    add.children.push(missing);
    add.children.push(ok);
    let root = registry.alloc(add);
    assert!(!is_healthy(&registry, root));
}

proptest! {
    #[test]
    fn wrong_child_counts_are_never_healthy(extra in 0usize..5) {
        let ln = lookup_function("ln").unwrap();
        prop_assume!(extra != ln.arity());

        let mut registry = NamedExpressionRegistry::new();
        let mut node = ExpressionNode::named(NodeKind::Function(ln), "probe");
        for _ in 0..extra {
            let child = registry.alloc(constant_node(1.0));
            node.children.push(child);
        }
        let root = registry.alloc(node);
        prop_assert!(!is_healthy(&registry, root));
    }

    #[test]
    fn generated_formulas_round_trip(formula in formula_strategy()) {
        let definition = TaskDefinition {
            name: "proptest".to_string(),
            normalize_ratio_uncertainties: true,
            nominal_masses: vec!["238".into(), "254".into()],
            ratio_names: vec!["254/238".into()],
            expressions: vec![ExpressionDefinition {
                name: "generated".to_string(),
                formula: formula.clone(),
                contexts: ContextFlags::default(),
            }],
            ..TaskDefinition::default()
        };
        let task = Task::build(definition).unwrap();
        prop_assert_eq!(task.is_expression_healthy("generated"), Some(true));
        for report in task.validate_round_trip() {
            prop_assert!(report.ok, "{}: {} (formula {:?})", report.name, report.detail, formula);
        }
    }
}

fn formula_strategy() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (1u32..1000).prop_map(|n| n.to_string()),
        (1u32..100_000).prop_map(|n| format!("{}", n as f64 / 100.0)),
        Just("lambda238".to_string()),
        Just("uRatio".to_string()),
        Just(r#"["254/238"]"#.to_string()),
        Just(r#"[±"254/238"]"#.to_string()),
        Just(r#"[%"254/238"]"#.to_string()),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (
                inner.clone(),
                inner.clone(),
                prop_oneof![Just("+"), Just("-"), Just("*"), Just("/"), Just("^")]
            )
                .prop_map(|(a, b, op)| format!("({a} {op} {b})")),
            inner.clone().prop_map(|e| format!("-({e})")),
            inner.clone().prop_map(|e| format!("ln({e})")),
            inner.clone().prop_map(|e| format!("sqrt({e})")),
            (inner.clone(), inner).prop_map(|(a, b)| format!("max({a}, {b})")),
        ]
    })
}

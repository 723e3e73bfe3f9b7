//! Property-based tests for the formula compiler.

use proptest::prelude::*;

use procsim_core::expr::{CalcError, EmptyQuery, EvalScope, Evaluator};
use procsim_expr::ExprEvaluator;

/// Random formula text over two variables `a` and `b`.
fn formula() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0u32..100).prop_map(|n| n.to_string()),
        (0u32..100).prop_map(|n| format!("{}.5", n)),
        Just("a".to_string()),
        Just("b".to_string()),
        Just("time".to_string()),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "%", "<", ">=", "=", "&&", "||"]), inner.clone())
                .prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            inner.clone().prop_map(|x| format!("-{x}")),
            inner.clone().prop_map(|x| format!("!{x}")),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| format!("max({x}, {y})")),
            inner.clone().prop_map(|x| format!("abs({x})")),
            (inner.clone(), inner.clone(), inner).prop_map(|(c, x, y)| format!("if({c}, {x}, {y})")),
        ]
    })
}

fn run(e: ExprEvaluator, text: &str, a: f64, b: f64) -> Result<f64, CalcError> {
    let vars = vec!["a".to_string(), "b".to_string()];
    let compiled = e.parse(text, &vars).unwrap();
    let mut scratch = Vec::new();
    let mut scope = EvalScope {
        variables: &[a, b],
        now: 3.0,
        client: None,
        query: &EmptyQuery,
        scratch: &mut scratch,
    };
    let result = compiled.calc(&mut scope);
    assert!(scratch.is_empty());
    result
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Folding constants never changes what a formula evaluates to.
    #[test]
    fn folding_preserves_results(text in formula(), a in -50.0f64..50.0, b in -50.0f64..50.0) {
        let folded = run(ExprEvaluator::new(), &text, a, b);
        let plain = run(ExprEvaluator::without_folding(), &text, a, b);
        match (folded, plain) {
            (Ok(x), Ok(y)) => prop_assert!(x == y || (x.is_nan() && y.is_nan()), "{text}: {x} vs {y}"),
            (Err(x), Err(y)) => prop_assert_eq!(x, y),
            (x, y) => prop_assert!(false, "{text}: {x:?} vs {y:?}"),
        }
    }

    // Arbitrary text never panics the compiler.
    #[test]
    fn arbitrary_text_does_not_panic(text in "[ -~]{0,40}") {
        let _ = ExprEvaluator::new().parse(&text, &["x".to_string()]);
    }
}

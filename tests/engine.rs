use anyhow::bail;

use featureflow::{
    Calculation, Column, DivisionPolicy, Engine, EngineConfig, EngineError, EvaluationContext,
    FeatureStatus, Registry,
};

fn closes() -> Vec<(&'static str, Column)> {
    vec![("close", Column::from(vec![Some(10.0), Some(20.0), None]))]
}

fn double() -> Calculation {
    Calculation::new("double", ["close"], |inputs| Ok(inputs.column("close")?.mul_scalar(2.0)?))
}

fn failing(name: &str, dependency: &str) -> Calculation {
    Calculation::new(name, [dependency], |inputs| {
        bail!("cannot compute {} from {} rows", inputs.feature(), inputs[0].len())
    })
}

fn registry(calculations: Vec<Calculation>) -> Registry {
    let mut registry = Registry::new();
    for calculation in calculations {
        registry.register(calculation).expect("unique names");
    }
    registry
}

#[test]
fn doubling_close_keeps_nulls_in_place() -> anyhow::Result<()> {
    let registry = registry(vec![double()]);

    let evaluation = Engine::new(&registry).run(closes(), &["double"])?;

    let context = evaluation.context();
    assert_eq!(context.len(), 2);
    assert_eq!(context.names().collect::<Vec<_>>(), vec!["close", "double"]);
    assert_eq!(
        context.get("close"),
        Some(&Column::from(vec![Some(10.0), Some(20.0), None]))
    );
    assert_eq!(
        evaluation.column("double"),
        Some(&Column::from(vec![Some(20.0), Some(40.0), None]))
    );
    assert!(evaluation.report().is_clean());

    let shared = context.shared("double").expect("computed");
    assert!(std::sync::Arc::ptr_eq(
        &shared,
        &context.shared("double").expect("computed")
    ));
    assert_eq!(Some(shared.as_ref()), evaluation.column("double"));
    assert!(context.shared("missing").is_none());
    Ok(())
}

#[test]
fn unsatisfiable_ratio_aborts_before_evaluation() {
    let registry = registry(vec![Calculation::new("ratio", ["a", "b"], |inputs| {
        Ok(inputs[0].div(&inputs[1])?)
    })]);

    let error = Engine::new(&registry)
        .run(closes(), &["ratio"])
        .expect_err("a and b are unavailable");

    assert!(matches!(error, EngineError::UnsatisfiableDependency { .. }));
    assert_eq!(error.features(), vec!["a", "b"]);
}

#[test]
fn cyclic_request_aborts_the_run() {
    let registry = registry(vec![
        Calculation::new("f", ["g"], |inputs| Ok(inputs[0].add_scalar(1.0)?)),
        Calculation::new("g", ["f"], |inputs| Ok(inputs[0].sub_scalar(1.0)?)),
    ]);

    let error = Engine::new(&registry)
        .run(closes(), &["f"])
        .expect_err("f and g depend on each other");

    let EngineError::CyclicDependency { cycle } = &error else {
        panic!("expected a cycle, got {error:?}");
    };
    assert!(cycle.iter().any(|name| name == "f"));
    assert!(cycle.iter().any(|name| name == "g"));
}

#[test]
fn failure_is_contained_to_its_branch() -> anyhow::Result<()> {
    let registry = registry(vec![failing("a", "close"), double()]);

    let evaluation = Engine::new(&registry).run(closes(), &["a", "double"])?;

    let report = evaluation.report();
    assert_eq!(report.failed(), vec!["a"]);
    assert_eq!(report.computed(), vec!["double"]);
    assert!(evaluation.column("a").is_none());
    assert!(evaluation.column("double").is_some());
    assert_eq!(
        report.status("a"),
        Some(&FeatureStatus::Failed {
            cause: "cannot compute a from 3 rows".to_string()
        })
    );
    assert_eq!(
        report.errors(),
        vec![EngineError::CalculationFailure {
            feature: "a".into(),
            cause: "cannot compute a from 3 rows".into(),
        }]
    );
    Ok(())
}

#[test]
fn dependents_of_a_failure_are_skipped_transitively() -> anyhow::Result<()> {
    let registry = registry(vec![
        failing("base", "close"),
        Calculation::new("middle", ["base"], |inputs| Ok(inputs[0].clone())),
        Calculation::new("top", ["middle", "close"], |inputs| Ok(inputs[0].add(&inputs[1])?)),
        double(),
    ]);

    let evaluation = Engine::new(&registry).run(closes(), &["top", "double"])?;

    let report = evaluation.report();
    assert_eq!(report.failed(), vec!["base"]);
    assert_eq!(report.skipped(), vec!["middle", "top"]);
    assert_eq!(
        report.status("top"),
        Some(&FeatureStatus::Skipped {
            blocked_by: vec!["middle".into()]
        })
    );
    assert_eq!(evaluation.context().len(), 2);
    assert!(evaluation.column("double").is_some());
    Ok(())
}

#[test]
fn panicking_calculation_is_recorded_as_a_failure() -> anyhow::Result<()> {
    let registry = registry(vec![
        Calculation::new("out_of_range", ["close"], |inputs| Ok(inputs[5].clone())),
        double(),
    ]);

    let evaluation = Engine::new(&registry).run(closes(), &["out_of_range", "double"])?;

    let Some(FeatureStatus::Failed { cause }) = evaluation.report().status("out_of_range") else {
        panic!("out_of_range should have failed");
    };
    assert!(cause.starts_with("calculation panicked"));
    assert!(evaluation.column("double").is_some());
    Ok(())
}

#[test]
fn misaligned_output_is_a_calculation_failure() -> anyhow::Result<()> {
    let registry = registry(vec![Calculation::new("short", ["close"], |_| {
        Ok(Column::from(vec![1.0]))
    })]);

    let evaluation = Engine::new(&registry).run(closes(), &["short"])?;

    assert_eq!(evaluation.report().failed(), vec!["short"]);
    assert!(evaluation.column("short").is_none());
    Ok(())
}

#[test]
fn division_policy_reaches_calculations() -> anyhow::Result<()> {
    let registry = registry(vec![Calculation::new("inverse", ["close"], |inputs| {
        let ones = Column::full(1.0, inputs[0].len());
        Ok(ones.div_with(&inputs[0], inputs.division_policy())?)
    })]);
    let raw = || vec![("close", Column::from(vec![2.0, 0.0]))];

    let lenient = Engine::new(&registry).run(raw(), &["inverse"])?;
    assert_eq!(
        lenient.column("inverse"),
        Some(&Column::from(vec![Some(0.5), None]))
    );

    let strict_config = EngineConfig {
        division_policy: DivisionPolicy::Error,
        ..EngineConfig::default()
    };
    let strict = Engine::with_config(&registry, strict_config).run(raw(), &["inverse"])?;
    assert_eq!(strict.report().failed(), vec!["inverse"]);
    Ok(())
}

#[test]
fn repeated_runs_are_identical() -> anyhow::Result<()> {
    let registry = registry(vec![
        double(),
        Calculation::new("quad", ["double"], |inputs| Ok(inputs[0].mul_scalar(2.0)?)),
    ]);
    let engine = Engine::new(&registry);

    let first = engine.run(closes(), &["quad"])?;
    let second = engine.run(closes(), &["quad"])?;

    let collect = |context: &EvaluationContext| {
        context
            .iter()
            .map(|(name, column)| (name.to_string(), column.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(collect(first.context()), collect(second.context()));
    assert_eq!(first.report(), second.report());
    Ok(())
}

#[test]
fn each_feature_is_computed_once_per_run() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let registry = registry(vec![
        Calculation::new("shared", ["close"], move |inputs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(inputs[0].clone())
        }),
        Calculation::new("left", ["shared"], |inputs| Ok(inputs[0].clone())),
        Calculation::new("right", ["shared"], |inputs| Ok(inputs[0].clone())),
    ]);

    let evaluation = Engine::new(&registry).run(closes(), &["left", "right", "shared"])?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(evaluation.context().len(), 4);
    Ok(())
}

#[test]
fn seeding_rejects_misaligned_and_duplicate_raw_columns() {
    let misaligned = EvaluationContext::seeded(vec![
        ("close", Column::from(vec![1.0, 2.0])),
        ("open", Column::from(vec![1.0])),
    ])
    .expect_err("open is shorter than close");
    assert_eq!(
        misaligned,
        EngineError::MisalignedColumn {
            feature: "open".into(),
            expected: 2,
            actual: 1,
        }
    );

    let duplicate = EvaluationContext::seeded(vec![
        ("close", Column::from(vec![1.0])),
        ("close", Column::from(vec![2.0])),
    ])
    .expect_err("close supplied twice");
    assert!(matches!(duplicate, EngineError::DuplicateFeature { .. }));
}

#[test]
fn registering_a_different_producer_twice_is_rejected() {
    let mut registry = Registry::new();
    let first = double();

    registry.register(first.clone()).expect("first registration");
    registry
        .register(first)
        .expect("re-registering the same producer is a no-op");
    let error = registry
        .register(double())
        .expect_err("a new closure is a different producer");

    assert_eq!(
        error,
        EngineError::DuplicateFeature {
            name: "double".into()
        }
    );
    assert_eq!(registry.len(), 1);
    assert!(matches!(
        registry.lookup("missing"),
        Err(EngineError::UnknownFeature { .. })
    ));
}

#[test]
fn report_serialises_per_feature_status() -> anyhow::Result<()> {
    let registry = registry(vec![failing("a", "close"), double()]);

    let evaluation = Engine::new(&registry).run(closes(), &["double", "a"])?;
    let json: serde_json::Value = serde_json::from_str(&evaluation.report().to_json()?)?;

    assert_eq!(json["outcomes"][0]["feature"], "double");
    assert_eq!(json["outcomes"][0]["status"], "computed");
    assert_eq!(json["outcomes"][1]["status"], "failed");
    Ok(())
}

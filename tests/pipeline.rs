use std::io::Write;

use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use polars::prelude::*;
use tempfile::NamedTempFile;

use featureflow::builtin;
use featureflow::{
    Calculation, CalculationModule, Column, DivisionPolicy, Engine, EngineConfig, EngineError,
    FeatureFamily, ParamKind, RawDataset, Registry, logging,
};

fn floats(column: &Column) -> Vec<Option<f64>> {
    column.floats().expect("float column").to_vec()
}

#[test]
fn csv_to_enriched_frame() -> anyhow::Result<()> {
    logging::init_logging()?;

    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        "date,high,low,close\n2024-01-01,101,99,100\n2024-01-02,103,100,101\n2024-01-03,104,101,102\n2024-01-04,106,102,104\n2024-01-05,105,101,103"
    )?;

    let raw = RawDataset::from_csv(file.path())?;
    assert_eq!(raw.names().collect::<Vec<_>>(), vec!["date", "high", "low", "close"]);
    assert_eq!(
        raw.column("date").and_then(|column| column.values::<NaiveDate>()).map(|days| days[0]),
        Some(NaiveDate::from_ymd_opt(2024, 1, 1))
    );

    let registry = Registry::from_modules([builtin::module()])?;
    let evaluation = Engine::new(&registry).run(
        raw,
        &[
            "typical_price",
            "daily_return_close",
            "moving_average_2_close",
            "z_score_3_close",
        ],
    )?;
    assert!(evaluation.report().is_clean());

    let returns = floats(evaluation.column("daily_return_close").expect("computed"));
    assert_eq!(returns[0], None);
    assert_abs_diff_eq!(returns[2].expect("known"), (102.0 / 101.0) - 1.0, epsilon = 1e-12);

    let averages = floats(evaluation.column("moving_average_2_close").expect("computed"));
    assert_eq!(averages[0], None);
    assert_abs_diff_eq!(averages[1].expect("known"), 100.5, epsilon = 1e-12);
    assert_abs_diff_eq!(averages[4].expect("known"), 103.5, epsilon = 1e-12);

    let typical = floats(evaluation.column("typical_price").expect("computed"));
    assert_abs_diff_eq!(typical[0].expect("known"), 100.0, epsilon = 1e-12);

    let zscores = floats(evaluation.column("z_score_3_close").expect("computed"));
    assert_eq!(&zscores[..2], &[None, None]);
    let window = [100.0_f64, 101.0, 102.0];
    let mean = 101.0;
    let std = (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0).sqrt();
    assert_abs_diff_eq!(zscores[2].expect("known"), (102.0 - mean) / std, epsilon = 1e-12);

    let frame = evaluation.to_frame()?;
    assert_eq!(frame.shape(), (5, 8));
    assert_eq!(frame.column("date")?.dtype(), &DataType::Date);
    let typical_series = frame
        .column("typical_price")?
        .f64()?
        .into_no_null_iter()
        .collect::<Vec<_>>();
    assert_eq!(typical_series.len(), 5);
    assert_eq!(frame.column("daily_return_close")?.null_count(), 1);

    Ok(())
}

#[test]
fn frame_input_keeps_nulls_and_types() -> anyhow::Result<()> {
    let frame = df! {
        "close" => &[Some(10i64), Some(20), None],
        "halted" => &[Some(false), None, Some(true)],
        "ticker" => &["AAPL", "AAPL", "AAPL"],
    }?;

    let raw = RawDataset::from_frame(&frame)?;

    assert_eq!(
        raw.column("close"),
        Some(&Column::from(vec![Some(10.0), Some(20.0), None]))
    );
    assert_eq!(
        raw.column("halted"),
        Some(&Column::from(vec![Some(false), None, Some(true)]))
    );
    assert_eq!(raw.column("ticker"), Some(&Column::from(vec!["AAPL"; 3])));
    Ok(())
}

#[test]
fn custom_modules_shadow_builtin_calculations() -> anyhow::Result<()> {
    let custom = CalculationModule::new("research").with_calculation(Calculation::new(
        "typical_price",
        ["close"],
        |inputs| Ok(inputs[0].clone()),
    ));
    let registry = Registry::from_modules([custom, builtin::module()])?;

    let raw = vec![("close", Column::from(vec![1.0, 2.0]))];
    let evaluation = Engine::new(&registry).run(raw, &["typical_price"])?;

    assert_eq!(
        evaluation.column("typical_price"),
        Some(&Column::from(vec![1.0, 2.0]))
    );
    Ok(())
}

/// Family serving `<base>_<column>` that passes its source column through.
fn passthrough_family(base: &str) -> FeatureFamily {
    FeatureFamily::new(base, [ParamKind::Text], |name, params| {
        Ok(Calculation::new(name, [params[0].to_string()], |inputs| {
            Ok(inputs[0].clone())
        }))
    })
}

#[test]
fn custom_families_shadow_builtin_families() -> anyhow::Result<()> {
    let custom = CalculationModule::new("research").with_family(FeatureFamily::new(
        "moving_average",
        [ParamKind::Integer, ParamKind::Text],
        |name, params| {
            let source = params[1].to_string();
            Ok(Calculation::new(name, [source], |inputs| Ok(inputs[0].mul_scalar(10.0)?)))
        },
    ));
    let registry = Registry::from_modules([custom, builtin::module()])?;

    let raw = vec![("close", Column::from(vec![1.0, 2.0]))];
    let evaluation = Engine::new(&registry).run(raw, &["moving_average_2_close"])?;

    assert_eq!(
        evaluation.column("moving_average_2_close"),
        Some(&Column::from(vec![10.0, 20.0]))
    );
    Ok(())
}

#[test]
fn an_earlier_family_shadows_a_later_plain_calculation() -> anyhow::Result<()> {
    let custom = CalculationModule::new("research").with_family(passthrough_family("typical"));
    let registry = Registry::from_modules([custom, builtin::module()])?;

    assert!(!registry.contains("typical_price"));

    let raw = vec![("price", Column::from(vec![3.0, 4.0]))];
    let evaluation = Engine::new(&registry).run(raw, &["typical_price"])?;

    assert_eq!(
        evaluation.column("typical_price"),
        Some(&Column::from(vec![3.0, 4.0]))
    );
    Ok(())
}

#[test]
fn an_earlier_plain_calculation_wins_over_a_later_family() -> anyhow::Result<()> {
    let custom = CalculationModule::new("research").with_calculation(Calculation::new(
        "daily_return_close",
        ["close"],
        |inputs| Ok(inputs[0].neg()?),
    ));
    let registry = Registry::from_modules([custom, builtin::module()])?;

    let raw = vec![("close", Column::from(vec![1.0, 2.0]))];
    let evaluation = Engine::new(&registry).run(raw, &["daily_return_close"])?;

    assert_eq!(
        evaluation.column("daily_return_close"),
        Some(&Column::from(vec![-1.0, -2.0]))
    );
    Ok(())
}

#[test]
fn raw_column_served_by_a_family_is_a_collision() -> anyhow::Result<()> {
    let registry = Registry::from_modules([builtin::module()])?;
    let raw = vec![
        ("close", Column::from(vec![1.0, 2.0])),
        ("daily_return_close", Column::from(vec![0.0, 1.0])),
    ];

    let error = Engine::new(&registry)
        .run(raw, &["daily_return_close"])
        .expect_err("the builtin family also produces daily_return_close");

    assert_eq!(
        error,
        EngineError::DuplicateFeature {
            name: "daily_return_close".into()
        }
    );
    Ok(())
}

#[test]
fn duplicates_within_one_module_are_rejected() {
    let module = CalculationModule::new("research")
        .with_calculation(Calculation::new("x", ["close"], |inputs| Ok(inputs[0].clone())))
        .with_calculation(Calculation::new("x", ["open"], |inputs| Ok(inputs[0].clone())));

    let error = Registry::from_modules([module]).expect_err("x declared twice");

    assert_eq!(error, EngineError::DuplicateFeature { name: "x".into() });
}

#[test]
fn invalid_family_parameters_abort_the_run() -> anyhow::Result<()> {
    let registry = Registry::from_modules([builtin::module()])?;
    let raw = vec![("close", Column::from(vec![1.0, 2.0]))];

    let error = Engine::new(&registry)
        .run(raw, &["moving_average_0_close"])
        .expect_err("a zero window is invalid");

    assert!(matches!(error, EngineError::InvalidFeatureName { .. }));
    Ok(())
}

#[test]
fn family_member_on_a_missing_source_is_unsatisfiable() -> anyhow::Result<()> {
    let registry = Registry::from_modules([builtin::module()])?;
    let raw = vec![("close", Column::from(vec![1.0, 2.0]))];

    let error = Engine::new(&registry)
        .run(raw, &["daily_return_open"])
        .expect_err("open is not available");

    assert_eq!(error.features(), vec!["open"]);
    Ok(())
}

#[test]
fn engine_config_loads_from_json() -> anyhow::Result<()> {
    let config = EngineConfig::from_json_str(r#"{ "division_policy": "error" }"#)?;
    assert_eq!(config.division_policy, DivisionPolicy::Error);
    assert_eq!(config.log_filter, "info");

    let mut file = NamedTempFile::new()?;
    write!(file, r#"{{ "log_filter": "featureflow=debug" }}"#)?;
    let config = EngineConfig::from_path(file.path())?;
    assert_eq!(config.division_policy, DivisionPolicy::Null);
    assert_eq!(config.log_filter, "featureflow=debug");

    assert!(EngineConfig::from_json_str(r#"{ "division_policy": "zero" }"#).is_err());
    Ok(())
}

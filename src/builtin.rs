//! Calculations shipped with the engine.
//!
//! User modules layered in front of this one take precedence over it.

use anyhow::{anyhow, ensure};

use crate::column::Column;
use crate::naming::{FeatureFamily, ParamKind, ParamValue};
use crate::registry::{Calculation, CalculationModule};

pub const MODULE_NAME: &str = "builtin";

pub fn module() -> CalculationModule {
    CalculationModule::new(MODULE_NAME)
        .with_calculation(typical_price())
        .with_family(daily_return())
        .with_family(moving_average())
        .with_family(z_score())
}

/// `typical_price = (high + low + close) / 3`
pub fn typical_price() -> Calculation {
    Calculation::new("typical_price", ["high", "low", "close"], |inputs| {
        let total = inputs[0].add(&inputs[1])?.add(&inputs[2])?;
        Ok(total.div_scalar(3.0)?)
    })
}

/// `daily_return_<column>`: simple return against the previous row.
pub fn daily_return() -> FeatureFamily {
    FeatureFamily::new("daily_return", [ParamKind::Text], |name, params| {
        let source = text_param(params, 0)?;
        Ok(Calculation::new(name, [source], |inputs| {
            let prices = &inputs[0];
            let ratio = prices.div_with(&prices.shift(1), inputs.division_policy())?;
            Ok(ratio.sub_scalar(1.0)?)
        }))
    })
}

/// `moving_average_<window>_<column>`: trailing arithmetic mean.
pub fn moving_average() -> FeatureFamily {
    FeatureFamily::new(
        "moving_average",
        [ParamKind::Integer, ParamKind::Text],
        |name, params| {
            let window = window_param(params, 0, 1)?;
            let source = text_param(params, 1)?;
            Ok(Calculation::new(name, [source], move |inputs| {
                let values = inputs[0].expect_values::<f64>("moving_average")?;
                Ok(Column::new(rolling(values, window, |window_values| {
                    Some(window_values.iter().sum::<f64>() / window_values.len() as f64)
                })))
            }))
        },
    )
}

/// `z_score_<window>_<column>`: distance from the trailing mean in trailing
/// population standard deviations. Flat windows are null.
pub fn z_score() -> FeatureFamily {
    FeatureFamily::new(
        "z_score",
        [ParamKind::Integer, ParamKind::Text],
        |name, params| {
            let window = window_param(params, 0, 2)?;
            let source = text_param(params, 1)?;
            Ok(Calculation::new(name, [source], move |inputs| {
                let values = inputs[0].expect_values::<f64>("z_score")?;
                Ok(Column::new(rolling(values, window, |window_values| {
                    let len = window_values.len() as f64;
                    let mean = window_values.iter().sum::<f64>() / len;
                    let variance = window_values
                        .iter()
                        .map(|value| (value - mean).powi(2))
                        .sum::<f64>()
                        / len;
                    let std = variance.sqrt();
                    let current = window_values.last()?;
                    (std > f64::EPSILON).then(|| (current - mean) / std)
                })))
            }))
        },
    )
}

/// Apply `reduce` over each trailing window. Rows before the first full
/// window, and windows containing a null, are null.
fn rolling(
    values: &[Option<f64>],
    window: usize,
    reduce: impl Fn(&[f64]) -> Option<f64>,
) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for end in 0..values.len() {
        if end + 1 < window {
            out.push(None);
            continue;
        }
        let known: Option<Vec<f64>> = values[end + 1 - window..=end].iter().copied().collect();
        out.push(known.and_then(|window_values| reduce(&window_values)));
    }
    out
}

fn text_param(params: &[ParamValue], position: usize) -> anyhow::Result<String> {
    params
        .get(position)
        .and_then(ParamValue::as_text)
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("parameter {} must name a source column", position + 1))
}

fn window_param(params: &[ParamValue], position: usize, minimum: i64) -> anyhow::Result<usize> {
    let window = params
        .get(position)
        .and_then(ParamValue::as_integer)
        .ok_or_else(|| anyhow!("parameter {} must be a window length", position + 1))?;
    ensure!(window >= minimum, "window must be at least {minimum}, got {window}");
    Ok(usize::try_from(window)?)
}

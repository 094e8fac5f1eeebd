//! Parameterised feature names.
//!
//! A family such as `moving_average` with parameters `[Integer, Text]` serves
//! every name of the form `moving_average_<window>_<column>`. Names are split
//! on `_`; the longest prefix naming a registered family is the base and the
//! remaining segments are its parameters. When the last parameter is text it
//! absorbs any extra segments, so `moving_average_20_adj_close` binds
//! `[20, "adj_close"]`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::registry::{Calculation, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Integer,
    Number,
    Text,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn parse(raw: &str, kind: ParamKind) -> Option<Self> {
        match kind {
            ParamKind::Integer => raw.parse().ok().map(ParamValue::Integer),
            ParamKind::Number => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(ParamValue::Number),
            ParamKind::Text if raw.is_empty() => None,
            ParamKind::Text => Some(ParamValue::Text(raw.to_string())),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Integers widen to numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(value) => Some(*value as f64),
            ParamValue::Number(value) => Some(*value),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(value) => write!(f, "{value}"),
            ParamValue::Number(value) => write!(f, "{value}"),
            ParamValue::Text(value) => f.write_str(value),
        }
    }
}

/// A parsed feature name: which producer serves it and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSpec {
    pub name: String,
    pub producer: String,
    pub params: Vec<ParamValue>,
}

pub type FamilyBuilder =
    dyn Fn(&str, &[ParamValue]) -> anyhow::Result<Calculation> + Send + Sync;

/// Producer of a whole family of parameterised calculations.
#[derive(Clone)]
pub struct FeatureFamily {
    base: String,
    params: Vec<ParamKind>,
    build: Arc<FamilyBuilder>,
}

impl FeatureFamily {
    /// `build` receives the full feature name and the bound parameters and
    /// must return a calculation producing exactly that name.
    pub fn new<B, P, F>(base: B, params: P, build: F) -> Self
    where
        B: Into<String>,
        P: IntoIterator<Item = ParamKind>,
        F: Fn(&str, &[ParamValue]) -> anyhow::Result<Calculation> + Send + Sync + 'static,
    {
        Self {
            base: base.into(),
            params: params.into_iter().collect(),
            build: Arc::new(build),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub(crate) fn same_family(&self, other: &FeatureFamily) -> bool {
        self.base == other.base
            && self.params == other.params
            && Arc::ptr_eq(&self.build, &other.build)
    }

    /// Check arity and types of the raw name segments following the base.
    pub fn bind(&self, name: &str, segments: &[&str]) -> EngineResult<Vec<ParamValue>> {
        let invalid = |reason: String| EngineError::InvalidFeatureName {
            name: name.to_string(),
            reason,
        };

        let expected = self.params.len();
        let absorbs_tail = self.params.last() == Some(&ParamKind::Text);
        let arity_ok = segments.len() == expected || (absorbs_tail && segments.len() > expected);
        if !arity_ok {
            return Err(invalid(format!(
                "`{}` expects {expected} parameter(s) ({}), got {}",
                self.base,
                self.params
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                segments.len()
            )));
        }

        let mut bound = Vec::with_capacity(expected);
        for (position, kind) in self.params.iter().enumerate() {
            let raw = if position + 1 == expected && absorbs_tail {
                segments[position..].join("_")
            } else {
                segments[position].to_string()
            };
            let value = ParamValue::parse(&raw, *kind).ok_or_else(|| {
                invalid(format!(
                    "parameter {} of `{}` must be {kind}, got `{raw}`",
                    position + 1,
                    self.base
                ))
            })?;
            bound.push(value);
        }

        Ok(bound)
    }

    pub fn instantiate(&self, spec: &FeatureSpec) -> EngineResult<Calculation> {
        let calculation = (self.build)(&spec.name, &spec.params).map_err(|error| {
            EngineError::InvalidFeatureName {
                name: spec.name.clone(),
                reason: format!("{error:#}"),
            }
        })?;

        if calculation.name() != spec.name {
            return Err(EngineError::InvalidFeatureName {
                name: spec.name.clone(),
                reason: format!(
                    "family `{}` built a calculation named `{}`",
                    self.base,
                    calculation.name()
                ),
            });
        }

        Ok(calculation)
    }
}

impl fmt::Debug for FeatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureFamily")
            .field("base", &self.base)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Maps textual feature names onto registered producers.
#[derive(Debug, Clone, Copy)]
pub struct NamingResolver<'r> {
    registry: &'r Registry,
}

impl<'r> NamingResolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Parse `name`, failing when no registered producer serves it.
    pub fn parse(&self, name: &str) -> EngineResult<FeatureSpec> {
        self.try_parse(name)?
            .ok_or_else(|| EngineError::InvalidFeatureName {
                name: name.to_string(),
                reason: "no registered producer".to_string(),
            })
    }

    /// `Ok(None)` when nothing serves `name`; an error when a family matches
    /// but the parameters do not fit it.
    pub fn try_parse(&self, name: &str) -> EngineResult<Option<FeatureSpec>> {
        if name.is_empty() {
            return Err(EngineError::InvalidFeatureName {
                name: String::new(),
                reason: "empty feature name".to_string(),
            });
        }

        if self.registry.contains(name) {
            return Ok(Some(FeatureSpec {
                name: name.to_string(),
                producer: name.to_string(),
                params: Vec::new(),
            }));
        }

        let segments: Vec<&str> = name.split('_').collect();
        for split in (1..=segments.len()).rev() {
            let base = segments[..split].join("_");
            if let Some(family) = self.registry.family(&base) {
                let params = family.bind(name, &segments[split..])?;
                return Ok(Some(FeatureSpec {
                    name: name.to_string(),
                    producer: base,
                    params,
                }));
            }
        }

        Ok(None)
    }

    /// Producer for `name`, instantiating a family member when needed.
    pub fn resolve(&self, name: &str) -> EngineResult<Option<Calculation>> {
        let Some(spec) = self.try_parse(name)? else {
            return Ok(None);
        };

        if spec.params.is_empty()
            && let Ok(calculation) = self.registry.lookup(&spec.producer)
        {
            return Ok(Some(calculation.clone()));
        }

        match self.registry.family(&spec.producer) {
            Some(family) => family.instantiate(&spec).map(Some),
            None => Err(EngineError::UnknownFeature {
                name: spec.producer,
            }),
        }
    }
}

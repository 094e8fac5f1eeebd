use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::column::DType;

/// Failures raised by element-wise column operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("type mismatch in `{operation}`: {left} vs {right}")]
    TypeMismatch {
        operation: &'static str,
        left: DType,
        right: DType,
    },
    #[error("length mismatch: {left} vs {right} rows")]
    LengthMismatch { left: usize, right: usize },
    #[error("null mask has {mask} entries for {values} values")]
    MaskLength { values: usize, mask: usize },
    #[error("division by zero at row {row}")]
    DivisionByZero { row: usize },
}

pub type ColumnResult<T> = Result<T, ColumnError>;

/// A feature that could not be produced, with the features that asked for it.
///
/// `required_by` is empty when the feature was requested directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub feature: String,
    pub required_by: Vec<String>,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.required_by.is_empty() {
            write!(f, "`{}` (requested)", self.feature)
        } else {
            write!(
                f,
                "`{}` (required by {})",
                self.feature,
                quoted(&self.required_by, ", ")
            )
        }
    }
}

/// Errors surfaced by registration, plan building and evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown feature `{name}`")]
    UnknownFeature { name: String },
    #[error("feature `{name}` has more than one producer")]
    DuplicateFeature { name: String },
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("unsatisfiable dependencies: {}", list(.missing))]
    UnsatisfiableDependency { missing: Vec<MissingDependency> },
    #[error("invalid feature name `{name}`: {reason}")]
    InvalidFeatureName { name: String, reason: String },
    #[error("calculation of `{feature}` failed: {cause}")]
    CalculationFailure { feature: String, cause: String },
    #[error("column `{feature}` has {actual} rows, expected {expected}")]
    MisalignedColumn {
        feature: String,
        expected: usize,
        actual: usize,
    },
}

impl EngineError {
    /// Name of every feature the error is attributed to.
    pub fn features(&self) -> Vec<&str> {
        match self {
            Self::UnknownFeature { name }
            | Self::DuplicateFeature { name }
            | Self::InvalidFeatureName { name, .. } => vec![name.as_str()],
            Self::CalculationFailure { feature, .. } | Self::MisalignedColumn { feature, .. } => {
                vec![feature.as_str()]
            }
            Self::CyclicDependency { cycle } => cycle.iter().map(String::as_str).collect(),
            Self::UnsatisfiableDependency { missing } => {
                missing.iter().map(|entry| entry.feature.as_str()).collect()
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

fn quoted(names: &[String], separator: &str) -> String {
    names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(separator)
}

fn list(missing: &[MissingDependency]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

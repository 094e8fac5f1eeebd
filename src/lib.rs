//! featureflow enriches per-security financial datasets with calculated
//! columns. Calculations declare the features they read; the engine discovers
//! the dependency graph, orders evaluation, rejects cyclic or unsatisfiable
//! requests and computes every feature at most once per run.

pub mod builtin;
pub mod column;
pub mod config;
pub mod context;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod logging;
pub mod naming;
pub mod registry;
pub mod resolver;

pub use column::{Column, ColumnData, DType, Element};
pub use config::{ConfigError, DivisionPolicy, EngineConfig};
pub use context::EvaluationContext;
pub use dataset::{DatasetError, RawDataset};
pub use engine::{Engine, Evaluation, EvaluationReport, FeatureOutcome, FeatureStatus};
pub use error::{ColumnError, EngineError, EngineResult, MissingDependency};
pub use naming::{FeatureFamily, FeatureSpec, NamingResolver, ParamKind, ParamValue};
pub use registry::{Calculation, CalculationInputs, CalculationModule, Registry};
pub use resolver::{EvaluationPlan, PlanStep, Resolver};

pub type Result<T> = anyhow::Result<T>;

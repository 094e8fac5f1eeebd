//! Plan execution.
//!
//! Steps run strictly in plan order. A step whose calculation fails is
//! recorded with its cause and produces no column; every step that depends on
//! an unavailable feature is skipped. Independent branches keep running.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use polars::prelude::DataFrame;
use serde::Serialize;

use crate::column::Column;
use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use crate::dataset::{DatasetResult, frame_from_context};
use crate::error::{EngineError, EngineResult};
use crate::logging::log_event;
use crate::registry::{CalculationInputs, Registry};
use crate::resolver::{EvaluationPlan, PlanStep, Resolver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeatureStatus {
    Computed,
    Failed { cause: String },
    /// Not attempted because these dependencies were unavailable.
    Skipped { blocked_by: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureOutcome {
    pub feature: String,
    #[serde(flatten)]
    pub status: FeatureStatus,
}

/// Per-feature status of every planned calculation, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    outcomes: Vec<FeatureOutcome>,
}

impl EvaluationReport {
    pub fn outcomes(&self) -> &[FeatureOutcome] {
        &self.outcomes
    }

    pub fn status(&self, feature: &str) -> Option<&FeatureStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.feature == feature)
            .map(|outcome| &outcome.status)
    }

    pub fn computed(&self) -> Vec<&str> {
        self.matching(|status| matches!(status, FeatureStatus::Computed))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.matching(|status| matches!(status, FeatureStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.matching(|status| matches!(status, FeatureStatus::Skipped { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.status == FeatureStatus::Computed)
    }

    /// Failures as [`EngineError::CalculationFailure`] values.
    pub fn errors(&self) -> Vec<EngineError> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                FeatureStatus::Failed { cause } => Some(EngineError::CalculationFailure {
                    feature: outcome.feature.clone(),
                    cause: cause.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn matching(&self, predicate: impl Fn(&FeatureStatus) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .map(|outcome| outcome.feature.as_str())
            .collect()
    }

    fn push(&mut self, feature: &str, status: FeatureStatus) {
        self.outcomes.push(FeatureOutcome {
            feature: feature.to_string(),
            status,
        });
    }
}

/// Final state of a run: raw and computed columns plus the report.
#[derive(Debug, Clone)]
pub struct Evaluation {
    context: EvaluationContext,
    report: EvaluationReport,
}

impl Evaluation {
    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn report(&self) -> &EvaluationReport {
        &self.report
    }

    pub fn column(&self, feature: &str) -> Option<&Column> {
        self.context.get(feature)
    }

    pub fn into_parts(self) -> (EvaluationContext, EvaluationReport) {
        (self.context, self.report)
    }

    /// The context as a polars frame, one series per feature.
    pub fn to_frame(&self) -> DatasetResult<DataFrame> {
        frame_from_context(&self.context)
    }
}

/// Resolves and evaluates requested features against one registry.
#[derive(Debug, Clone)]
pub struct Engine<'r> {
    registry: &'r Registry,
    config: EngineConfig,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: &'r Registry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan<S: AsRef<str>>(
        &self,
        requested: &[S],
        context: &EvaluationContext,
    ) -> EngineResult<EvaluationPlan> {
        Resolver::new(self.registry).plan(requested, &context.feature_names())
    }

    /// Seed, plan and evaluate in one call. Configuration and structural
    /// errors abort; calculation failures land in the report.
    pub fn run<I, S, R>(&self, raw: I, requested: &[R]) -> EngineResult<Evaluation>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
        R: AsRef<str>,
    {
        let context = EvaluationContext::seeded(raw)?;
        let plan = self.plan(requested, &context)?;
        Ok(self.evaluate(plan, context))
    }

    pub fn evaluate(&self, plan: EvaluationPlan, mut context: EvaluationContext) -> Evaluation {
        let mut report = EvaluationReport::default();
        let mut unavailable: HashSet<String> = HashSet::new();

        for step in plan {
            let feature = step.feature().to_string();

            let mut blocked_by: Vec<String> = Vec::new();
            for dependency in step.dependencies() {
                if unavailable.contains(dependency) && !blocked_by.contains(dependency) {
                    blocked_by.push(dependency.clone());
                }
            }
            if !blocked_by.is_empty() {
                log_event(
                    file!(),
                    "Engine",
                    "evaluate",
                    "engine.skip",
                    line!(),
                    &format!("Skipped `{feature}`: blocked by {}", blocked_by.join(", ")),
                    None,
                );
                unavailable.insert(feature.clone());
                report.push(&feature, FeatureStatus::Skipped { blocked_by });
                continue;
            }

            let stored = self.compute(&step, &context).and_then(|column| {
                context
                    .insert(feature.clone(), column)
                    .map_err(|error| error.to_string())
            });

            match stored {
                Ok(()) => report.push(&feature, FeatureStatus::Computed),
                Err(cause) => {
                    log_event(
                        file!(),
                        "Engine",
                        "evaluate",
                        "engine.calculate",
                        line!(),
                        &format!("Calculation of `{feature}` failed"),
                        Some(&cause),
                    );
                    unavailable.insert(feature.clone());
                    report.push(&feature, FeatureStatus::Failed { cause });
                }
            }
        }

        log_event(
            file!(),
            "Engine",
            "evaluate",
            "engine.finish",
            line!(),
            &format!(
                "Evaluation finished: {} computed, {} failed, {} skipped",
                report.computed().len(),
                report.failed().len(),
                report.skipped().len()
            ),
            None,
        );

        Evaluation { context, report }
    }

    fn compute(&self, step: &PlanStep, context: &EvaluationContext) -> Result<Column, String> {
        let mut columns = Vec::with_capacity(step.dependencies().len());
        for dependency in step.dependencies() {
            let column = context
                .get(dependency)
                .ok_or_else(|| format!("dependency `{dependency}` is missing from the context"))?;
            columns.push(column);
        }

        let inputs = CalculationInputs::new(
            step.feature(),
            step.dependencies(),
            columns,
            context.rows(),
            &self.config,
        );

        match panic::catch_unwind(AssertUnwindSafe(|| step.calculation().evaluate(&inputs))) {
            Ok(Ok(column)) => Ok(column),
            Ok(Err(error)) => Err(format!("{error:#}")),
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("calculation panicked: {detail}")
}

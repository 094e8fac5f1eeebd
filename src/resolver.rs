//! Dependency resolution.
//!
//! The graph is walked depth-first from the requested names in request order,
//! dependencies in declaration order. A feature is appended to the plan once
//! all of its dependencies are, which yields a topological order whose ties
//! follow first-requested, first-discovered order.
//!
//! The walk stops at the first cycle it enters and reports the path that
//! closes it. Missing producers do not stop the walk: every one reachable
//! from the request is collected and reported together.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult, MissingDependency};
use crate::logging::log_event;
use crate::naming::NamingResolver;
use crate::registry::{Calculation, Registry};

/// One feature to compute, with the producer that computes it.
#[derive(Debug, Clone)]
pub struct PlanStep {
    feature: String,
    calculation: Calculation,
}

impl PlanStep {
    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn dependencies(&self) -> &[String] {
        self.calculation.dependencies()
    }

    pub fn calculation(&self) -> &Calculation {
        &self.calculation
    }
}

/// Topologically ordered calculations for one requested output set.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPlan {
    steps: Vec<PlanStep>,
}

impl EvaluationPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn features(&self) -> Vec<&str> {
        self.steps.iter().map(PlanStep::feature).collect()
    }

    pub fn position(&self, feature: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.feature == feature)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl IntoIterator for EvaluationPlan {
    type Item = PlanStep;
    type IntoIter = std::vec::IntoIter<PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
    Missing(usize),
}

struct Walk<'a> {
    raw: &'a HashSet<String>,
    marks: HashMap<String, Mark>,
    path: Vec<String>,
    steps: Vec<PlanStep>,
    missing: Vec<MissingDependency>,
}

impl Walk<'_> {
    fn record_missing(&mut self, name: &str, required_by: Option<&str>) {
        let position = match self.marks.get(name).copied() {
            Some(Mark::Missing(position)) => position,
            _ => {
                self.missing.push(MissingDependency {
                    feature: name.to_string(),
                    required_by: Vec::new(),
                });
                let position = self.missing.len() - 1;
                self.marks.insert(name.to_string(), Mark::Missing(position));
                position
            }
        };

        if let Some(requirer) = required_by {
            let entry = &mut self.missing[position];
            if !entry.required_by.iter().any(|known| known == requirer) {
                entry.required_by.push(requirer.to_string());
            }
        }
    }
}

/// A calculation whose dependencies are being walked.
struct Frame {
    feature: String,
    calculation: Calculation,
    next: usize,
}

/// Builds evaluation plans against a registry.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'r> {
    registry: &'r Registry,
    naming: NamingResolver<'r>,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            naming: NamingResolver::new(registry),
        }
    }

    /// Plan the computation of `requested` given the names already present
    /// as raw inputs. Raw names need no step; repeated names yield one step.
    pub fn plan<S: AsRef<str>>(
        &self,
        requested: &[S],
        raw: &HashSet<String>,
    ) -> EngineResult<EvaluationPlan> {
        let mut walk = Walk {
            raw,
            marks: HashMap::new(),
            path: Vec::new(),
            steps: Vec::new(),
            missing: Vec::new(),
        };

        for name in requested {
            if let Err(error) = self.visit(&mut walk, name.as_ref()) {
                log_event(
                    file!(),
                    "Resolver",
                    "plan",
                    "resolver.plan",
                    line!(),
                    "Dependency resolution failed",
                    Some(&error.to_string()),
                );
                return Err(error);
            }
        }

        if !walk.missing.is_empty() {
            let error = EngineError::UnsatisfiableDependency {
                missing: walk.missing,
            };
            log_event(
                file!(),
                "Resolver",
                "plan",
                "resolver.plan",
                line!(),
                "Dependency resolution failed",
                Some(&error.to_string()),
            );
            return Err(error);
        }

        log_event(
            file!(),
            "Resolver",
            "plan",
            "resolver.plan",
            line!(),
            &format!(
                "Planned {} calculation(s) for {} requested feature(s)",
                walk.steps.len(),
                requested.len()
            ),
            None,
        );

        Ok(EvaluationPlan { steps: walk.steps })
    }

    /// Depth-first walk from `root`. Frames live on an explicit stack, so
    /// the depth of a dependency chain is bounded by memory, not by the call
    /// stack.
    fn visit(&self, walk: &mut Walk<'_>, root: &str) -> EngineResult<()> {
        let mut stack: Vec<Frame> = Vec::new();
        if let Some(frame) = self.enter(walk, root, None)? {
            stack.push(frame);
        }

        while let Some(frame) = stack.last_mut() {
            if let Some(dependency) = frame.calculation.dependencies().get(frame.next).cloned() {
                frame.next += 1;
                let requirer = frame.feature.clone();
                if let Some(child) = self.enter(walk, &dependency, Some(&requirer))? {
                    stack.push(child);
                }
                continue;
            }

            let Some(Frame {
                feature,
                calculation,
                ..
            }) = stack.pop()
            else {
                break;
            };
            walk.path.pop();
            walk.marks.insert(feature.clone(), Mark::Done);
            walk.steps.push(PlanStep {
                feature,
                calculation,
            });
        }

        Ok(())
    }

    /// Classify `name` on first contact. Returns a frame when its
    /// dependencies still have to be walked.
    fn enter(
        &self,
        walk: &mut Walk<'_>,
        name: &str,
        required_by: Option<&str>,
    ) -> EngineResult<Option<Frame>> {
        match walk.marks.get(name).copied() {
            Some(Mark::Done) => return Ok(None),
            Some(Mark::Missing(_)) => {
                walk.record_missing(name, required_by);
                return Ok(None);
            }
            Some(Mark::InProgress) => {
                let start = walk
                    .path
                    .iter()
                    .position(|visited| visited == name)
                    .unwrap_or(0);
                let mut cycle = walk.path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(EngineError::CyclicDependency { cycle });
            }
            None => {}
        }

        if walk.raw.contains(name) {
            if self.produces(name) {
                return Err(EngineError::DuplicateFeature {
                    name: name.to_string(),
                });
            }
            walk.marks.insert(name.to_string(), Mark::Done);
            return Ok(None);
        }

        let Some(calculation) = self.naming.resolve(name)? else {
            walk.record_missing(name, required_by);
            return Ok(None);
        };

        walk.marks.insert(name.to_string(), Mark::InProgress);
        walk.path.push(name.to_string());
        Ok(Some(Frame {
            feature: name.to_string(),
            calculation,
            next: 0,
        }))
    }

    /// Whether a registered calculation or family serves `name`.
    fn produces(&self, name: &str) -> bool {
        self.registry.contains(name) || matches!(self.naming.try_parse(name), Ok(Some(_)))
    }
}

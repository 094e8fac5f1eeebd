//! Calculation registry.
//!
//! Each calculation declares the feature it produces and the ordered list of
//! features it reads. Those names are the whole contract the resolver works
//! from: renaming a dependency changes the dependency graph.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use anyhow::anyhow;

use crate::column::Column;
use crate::config::{DivisionPolicy, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::logging::log_event;
use crate::naming::{FeatureFamily, NamingResolver};

pub type CalculationFn = dyn Fn(&CalculationInputs<'_>) -> anyhow::Result<Column> + Send + Sync;

/// Dependency columns handed to a calculation, in declaration order.
pub struct CalculationInputs<'a> {
    feature: &'a str,
    names: &'a [String],
    columns: Vec<&'a Column>,
    rows: Option<usize>,
    config: &'a EngineConfig,
}

impl<'a> CalculationInputs<'a> {
    pub(crate) fn new(
        feature: &'a str,
        names: &'a [String],
        columns: Vec<&'a Column>,
        rows: Option<usize>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            feature,
            names,
            columns,
            rows,
            config,
        }
    }

    /// Feature being computed.
    pub fn feature(&self) -> &str {
        self.feature
    }

    /// Row count of the evaluation context, unknown while it is empty.
    pub fn rows(&self) -> Option<usize> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&'a Column> {
        self.columns.get(position).copied()
    }

    /// Look a dependency up by name.
    pub fn column(&self, name: &str) -> anyhow::Result<&'a Column> {
        self.names
            .iter()
            .position(|declared| declared == name)
            .and_then(|position| self.get(position))
            .ok_or_else(|| anyhow!("`{}` did not declare dependency `{name}`", self.feature))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Column)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter().copied())
    }

    pub fn division_policy(&self) -> DivisionPolicy {
        self.config.division_policy
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }
}

impl Index<usize> for CalculationInputs<'_> {
    type Output = Column;

    fn index(&self, position: usize) -> &Column {
        self.columns[position]
    }
}

/// A registered producer: feature name, declared dependencies, evaluation.
#[derive(Clone)]
pub struct Calculation {
    name: String,
    dependencies: Vec<String>,
    evaluate: Arc<CalculationFn>,
}

impl Calculation {
    pub fn new<N, D, S, F>(name: N, dependencies: D, evaluate: F) -> Self
    where
        N: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&CalculationInputs<'_>) -> anyhow::Result<Column> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            evaluate: Arc::new(evaluate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn evaluate(&self, inputs: &CalculationInputs<'_>) -> anyhow::Result<Column> {
        (self.evaluate)(inputs)
    }

    /// Clones of one registration are the same producer; anything else is not.
    pub fn same_producer(&self, other: &Calculation) -> bool {
        self.name == other.name
            && self.dependencies == other.dependencies
            && Arc::ptr_eq(&self.evaluate, &other.evaluate)
    }
}

impl fmt::Debug for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculation")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A named bundle of calculations and families, e.g. a user research module.
#[derive(Debug, Clone, Default)]
pub struct CalculationModule {
    name: String,
    calculations: Vec<Calculation>,
    families: Vec<FeatureFamily>,
}

impl CalculationModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_calculation(mut self, calculation: Calculation) -> Self {
        self.calculations.push(calculation);
        self
    }

    pub fn with_family(mut self, family: FeatureFamily) -> Self {
        self.families.push(family);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calculations(&self) -> &[Calculation] {
        &self.calculations
    }

    pub fn families(&self) -> &[FeatureFamily] {
        &self.families
    }
}

/// Feature name -> producer mapping for one run.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    calculations: HashMap<String, Calculation>,
    order: Vec<String>,
    families: HashMap<String, FeatureFamily>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer modules in precedence order: a name served by an earlier module,
    /// through a plain calculation or a family, shadows the same name in
    /// later ones. Within a single module a repeated name is a
    /// [`EngineError::DuplicateFeature`].
    pub fn from_modules<I>(modules: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = CalculationModule>,
    {
        let mut registry = Self::new();

        for module in modules {
            let mut local = Self::new();
            for calculation in module.calculations {
                local.register(calculation)?;
            }
            for family in module.families {
                local.register_family(family)?;
            }

            for name in local.order {
                let Some(calculation) = local.calculations.remove(&name) else {
                    continue;
                };
                if registry.serves(&name) {
                    shadowed("Calculation", &name, &module.name);
                    continue;
                }
                registry.order.push(name.clone());
                registry.calculations.insert(name, calculation);
            }

            let mut families: Vec<FeatureFamily> = local.families.into_values().collect();
            families.sort_by(|left, right| left.base().cmp(right.base()));
            for family in families {
                if registry.families.contains_key(family.base()) {
                    shadowed("Family", family.base(), &module.name);
                    continue;
                }
                registry.families.insert(family.base().to_string(), family);
            }
        }

        Ok(registry)
    }

    /// Register a calculation. Registering a clone of an existing producer is
    /// a no-op; a different producer under the same name is rejected.
    pub fn register(&mut self, calculation: Calculation) -> EngineResult<()> {
        if let Some(existing) = self.calculations.get(calculation.name()) {
            if existing.same_producer(&calculation) {
                return Ok(());
            }
            return Err(EngineError::DuplicateFeature {
                name: calculation.name().to_string(),
            });
        }

        self.order.push(calculation.name().to_string());
        self.calculations
            .insert(calculation.name().to_string(), calculation);
        Ok(())
    }

    pub fn register_family(&mut self, family: FeatureFamily) -> EngineResult<()> {
        if let Some(existing) = self.families.get(family.base()) {
            if existing.same_family(&family) {
                return Ok(());
            }
            return Err(EngineError::DuplicateFeature {
                name: family.base().to_string(),
            });
        }

        self.families.insert(family.base().to_string(), family);
        Ok(())
    }

    /// Whether a calculation or family already serves `name`.
    fn serves(&self, name: &str) -> bool {
        matches!(NamingResolver::new(self).try_parse(name), Ok(Some(_)))
    }

    pub fn lookup(&self, name: &str) -> EngineResult<&Calculation> {
        self.calculations
            .get(name)
            .ok_or_else(|| EngineError::UnknownFeature {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.calculations.contains_key(name)
    }

    pub fn family(&self, base: &str) -> Option<&FeatureFamily> {
        self.families.get(base)
    }

    /// Registered calculation names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.calculations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calculations.is_empty()
    }
}

fn shadowed(kind: &str, name: &str, module: &str) {
    log_event(
        file!(),
        "Registry",
        "from_modules",
        "registry.layer",
        line!(),
        &format!("{kind} `{name}` from module `{module}` is shadowed"),
        None,
    );
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::column::Column;
use crate::error::{EngineError, EngineResult};

/// Run-scoped table of feature name -> column.
///
/// Entries are appended in evaluation order and never replaced, and every
/// entry has the same row count.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    entries: Vec<(String, Arc<Column>)>,
    index: HashMap<String, usize>,
    rows: Option<usize>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context with raw input columns.
    pub fn seeded<I, S>(raw: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut context = Self::new();
        for (name, column) in raw {
            context.insert(name.into(), column)?;
        }
        Ok(context)
    }

    pub(crate) fn insert(&mut self, name: String, column: Column) -> EngineResult<()> {
        if self.index.contains_key(&name) {
            return Err(EngineError::DuplicateFeature { name });
        }

        match self.rows {
            Some(expected) if expected != column.len() => {
                return Err(EngineError::MisalignedColumn {
                    feature: name,
                    expected,
                    actual: column.len(),
                });
            }
            Some(_) => {}
            None => self.rows = Some(column.len()),
        }

        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, Arc::new(column)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index
            .get(name)
            .map(|position| self.entries[*position].1.as_ref())
    }

    /// Shared handle to a column, for readers that outlive the borrow.
    pub fn shared(&self, name: &str) -> Option<Arc<Column>> {
        self.index
            .get(name)
            .map(|position| Arc::clone(&self.entries[*position].1))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rows(&self) -> Option<usize> {
        self.rows
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.entries
            .iter()
            .map(|(name, column)| (name.as_str(), column.as_ref()))
    }

    pub fn feature_names(&self) -> HashSet<String> {
        self.index.keys().cloned().collect()
    }
}

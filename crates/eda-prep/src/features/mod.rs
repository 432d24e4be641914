//! Derived features.
//!
//! A [`FeatureDeriver`] holds an ordered registry of [`Derivation`]s. Each
//! one declares the columns it reads and produces exactly one new column.
//! Derivations run in registration order, so later ones may read the
//! output of earlier ones.

mod builtin;

pub use builtin::{
    Bin, Combine, CombineOp, Comparison, DerivationSpec, Extract, Lookup, Threshold, ThresholdRule,
    Translate,
};

use crate::error::{PrepError, Result};
use crate::types::{ColumnData, ColumnKind, Table};
use tracing::{debug, info};

/// Kind of column a derivation accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Numeric values (codes included)
    Numeric,
    /// Categorical or ordinal labels
    Text,
    Any,
}

impl InputKind {
    pub fn accepts(&self, kind: ColumnKind) -> bool {
        match self {
            Self::Numeric => kind.is_numeric(),
            Self::Text => kind.is_text(),
            Self::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Any => "any kind",
        }
    }
}

/// An input column a derivation depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub column: String,
    pub kind: InputKind,
}

impl Requirement {
    pub fn numeric(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: InputKind::Numeric,
        }
    }

    pub fn text(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: InputKind::Text,
        }
    }

    pub fn any(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: InputKind::Any,
        }
    }
}

/// A named, pure function of a table producing one new column.
pub trait Derivation: Send + Sync {
    /// Name of the produced column.
    fn name(&self) -> &str;

    fn output_kind(&self) -> ColumnKind;

    fn requires(&self) -> Vec<Requirement>;

    /// Compute the new column. Requirements are checked before this is
    /// called.
    fn compute(&self, table: &Table) -> Result<ColumnData>;
}

type DeriveFn = dyn Fn(&Table) -> Result<ColumnData> + Send + Sync;

/// A derivation backed by a closure.
pub struct FnDerivation {
    name: String,
    kind: ColumnKind,
    requires: Vec<Requirement>,
    f: Box<DeriveFn>,
}

impl FnDerivation {
    pub fn new<F>(name: impl Into<String>, kind: ColumnKind, requires: Vec<Requirement>, f: F) -> Self
    where
        F: Fn(&Table) -> Result<ColumnData> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            requires,
            f: Box::new(f),
        }
    }
}

impl Derivation for FnDerivation {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        self.kind
    }

    fn requires(&self) -> Vec<Requirement> {
        self.requires.clone()
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        (self.f)(table)
    }
}

impl std::fmt::Debug for FnDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDerivation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Ordered registry of derivations.
#[derive(Default)]
pub struct FeatureDeriver {
    derivations: Vec<Box<dyn Derivation>>,
}

impl FeatureDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured derivations.
    pub fn from_specs(specs: &[DerivationSpec]) -> Result<Self> {
        let mut deriver = Self::new();
        for spec in specs {
            deriver.register(spec.build()?)?;
        }
        Ok(deriver)
    }

    /// Add a derivation. Output names must be unique within the registry.
    pub fn register(&mut self, derivation: Box<dyn Derivation>) -> Result<()> {
        if self.derivations.iter().any(|d| d.name() == derivation.name()) {
            return Err(PrepError::Schema(format!(
                "Derivation '{}' registered twice",
                derivation.name()
            )));
        }
        self.derivations.push(derivation);
        Ok(())
    }

    pub fn with(mut self, derivation: impl Derivation + 'static) -> Result<Self> {
        self.register(Box::new(derivation))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.derivations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.derivations.is_empty()
    }

    /// Output column names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.derivations.iter().map(|d| d.name()).collect()
    }

    /// Run every derivation in order. Returns the extended table and the
    /// names of the added columns.
    pub fn apply(&self, table: &Table) -> Result<(Table, Vec<String>)> {
        let mut out = table.clone();
        let mut added = Vec::with_capacity(self.derivations.len());

        for derivation in &self.derivations {
            check_requirements(&out, derivation.as_ref())?;
            if out.has_column(derivation.name()) {
                return Err(PrepError::Schema(format!(
                    "Derived column '{}' already exists",
                    derivation.name()
                )));
            }
            let data = derivation.compute(&out)?;
            out.add_column(derivation.name(), data, derivation.output_kind())?;
            debug!("Derived '{}' ({})", derivation.name(), derivation.output_kind());
            added.push(derivation.name().to_string());
        }

        if !added.is_empty() {
            info!("Derived {} feature columns", added.len());
        }
        Ok((out, added))
    }
}

impl std::fmt::Debug for FeatureDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureDeriver")
            .field("derivations", &self.names())
            .finish()
    }
}

fn check_requirements(table: &Table, derivation: &dyn Derivation) -> Result<()> {
    for req in derivation.requires() {
        let satisfied = table.kind(&req.column).is_some_and(|k| req.kind.accepts(k));
        if !satisfied {
            return Err(PrepError::MissingDependency {
                derivation: derivation.name().to_string(),
                column: req.column,
                expected: req.kind.as_str().to_string(),
            });
        }
    }
    Ok(())
}

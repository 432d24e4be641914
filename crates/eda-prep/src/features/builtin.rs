//! Built-in derivations and their configuration form.

use super::{Derivation, Requirement};
use crate::config::ConfigValidationError;
use crate::error::Result;
use crate::types::{ColumnData, ColumnKind, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Family name: everything before the first comma.
static SURNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^[^,]+)").expect("Invalid regex: surname"));

/// Honorific between the comma and the following period ("Braund, Mr. Owen").
static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([^\.]*)\.").expect("Invalid regex: title"));

/// First token, when it is not purely digits ("A/5 21171" → "A/5").
static TICKET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S*[^\d\s]\S*)").expect("Invalid regex: ticket prefix"));

// ============================================================================
// Configuration form
// ============================================================================

/// A derivation as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DerivationSpec {
    /// `left op right + offset`
    Combine {
        name: String,
        left: String,
        right: String,
        op: CombineOp,
        #[serde(default)]
        offset: f64,
    },
    /// Ordered labels from breakpoints
    Bin {
        name: String,
        column: String,
        breaks: Vec<f64>,
        labels: Vec<String>,
        #[serde(default = "default_right")]
        right: bool,
        #[serde(default)]
        include_lowest: bool,
        #[serde(default)]
        unbounded: bool,
    },
    /// Regex capture group
    Extract {
        name: String,
        column: String,
        pattern: String,
        #[serde(default = "default_group")]
        group: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
    /// First matching comparison rule, else `otherwise`
    Threshold {
        name: String,
        column: String,
        rules: Vec<ThresholdRule>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<String>,
    },
    /// Label lookup; unmapped labels pass through
    Translate {
        name: String,
        column: String,
        map: BTreeMap<String, String>,
    },
    /// Label → number lookup; unmapped labels become missing
    Lookup {
        name: String,
        column: String,
        values: BTreeMap<String, f64>,
    },
}

fn default_right() -> bool {
    true
}

fn default_group() -> usize {
    1
}

impl DerivationSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Combine { name, .. }
            | Self::Bin { name, .. }
            | Self::Extract { name, .. }
            | Self::Threshold { name, .. }
            | Self::Translate { name, .. }
            | Self::Lookup { name, .. } => name,
        }
    }

    /// Check the parameters without touching any table.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        let invalid = |reason: String| ConfigValidationError::InvalidDerivation {
            name: self.name().to_string(),
            reason,
        };

        if self.name().is_empty() {
            return Err(invalid("empty output name".into()));
        }

        match self {
            Self::Combine { offset, .. } if !offset.is_finite() => {
                Err(invalid(format!("offset {} is not finite", offset)))
            }
            Self::Bin {
                breaks,
                labels,
                unbounded,
                ..
            } => check_bins(breaks, labels.len(), *unbounded).map_err(invalid),
            Self::Extract { pattern, group, .. } => {
                let regex = Regex::new(pattern).map_err(|e| invalid(e.to_string()))?;
                if *group >= regex.captures_len() {
                    return Err(invalid(format!(
                        "pattern has no capture group {}",
                        group
                    )));
                }
                Ok(())
            }
            Self::Threshold { rules, .. } => check_rules(rules).map_err(invalid),
            Self::Translate { map, .. } if map.is_empty() => Err(invalid("empty map".into())),
            Self::Lookup { values, .. } if values.is_empty() => {
                Err(invalid("empty lookup table".into()))
            }
            _ => Ok(()),
        }
    }

    /// Build the derivation.
    pub fn build(&self) -> Result<Box<dyn Derivation>> {
        self.validate()?;
        let derivation: Box<dyn Derivation> = match self.clone() {
            Self::Combine {
                name,
                left,
                right,
                op,
                offset,
            } => Box::new(Combine::new(name, left, right, op).with_offset(offset)),
            Self::Bin {
                name,
                column,
                breaks,
                labels,
                right,
                include_lowest,
                unbounded,
            } => Box::new(Bin {
                name,
                column,
                breaks,
                labels,
                right,
                include_lowest,
                unbounded,
            }),
            Self::Extract {
                name,
                column,
                pattern,
                group,
                fallback,
            } => {
                let extract = Extract::new(name, column, &pattern, group)?;
                Box::new(match fallback {
                    Some(label) => extract.with_fallback(label),
                    None => extract,
                })
            }
            Self::Threshold {
                name,
                column,
                rules,
                otherwise,
            } => Box::new(Threshold {
                name,
                column,
                rules,
                otherwise,
            }),
            Self::Translate { name, column, map } => Box::new(Translate { name, column, map }),
            Self::Lookup {
                name,
                column,
                values,
            } => Box::new(Lookup {
                name,
                column,
                values,
            }),
        };
        Ok(derivation)
    }
}

fn check_bins(breaks: &[f64], labels: usize, unbounded: bool) -> std::result::Result<(), String> {
    if breaks.is_empty() || breaks.iter().any(|b| !b.is_finite()) {
        return Err("breaks must be finite and non-empty".into());
    }
    if breaks.windows(2).any(|w| w[0] >= w[1]) {
        return Err("breaks must be strictly increasing".into());
    }
    let intervals = if unbounded {
        breaks.len() + 1
    } else {
        breaks.len() - 1
    };
    if intervals == 0 || labels != intervals {
        return Err(format!("{} labels for {} intervals", labels, intervals));
    }
    Ok(())
}

// ============================================================================
// Combine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl CombineOp {
    fn apply(&self, left: f64, right: f64) -> Option<f64> {
        match self {
            Self::Add => Some(left + right),
            Self::Subtract => Some(left - right),
            Self::Multiply => Some(left * right),
            Self::Divide if right == 0.0 => None,
            Self::Divide => Some(left / right),
        }
    }
}

/// Arithmetic combination of two numeric columns. Missing if either input
/// is missing or on division by zero.
#[derive(Debug, Clone)]
pub struct Combine {
    name: String,
    left: String,
    right: String,
    op: CombineOp,
    offset: f64,
}

impl Combine {
    pub fn new(
        name: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
        op: CombineOp,
    ) -> Self {
        Self {
            name: name.into(),
            left: left.into(),
            right: right.into(),
            op,
            offset: 0.0,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }
}

impl Derivation for Combine {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Numeric
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![
            Requirement::numeric(&self.left),
            Requirement::numeric(&self.right),
        ]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        let left = table.numeric(&self.left)?;
        let right = table.numeric(&self.right)?;
        let values = left
            .into_iter()
            .zip(right)
            .map(|(l, r)| match (l, r) {
                (Some(l), Some(r)) => self.op.apply(l, r).map(|v| v + self.offset),
                _ => None,
            })
            .collect();
        Ok(ColumnData::Numeric(values))
    }
}

// ============================================================================
// Bin
// ============================================================================

/// Bins a numeric column into ordered labels.
///
/// Intervals are right-closed `(a, b]` by default, or left-closed `[a, b)`
/// with `right = false`. `include_lowest` closes the outer edge
/// (`[b0, b1]` for right-closed bins). With `unbounded`, the breaks are
/// interior cut points and the outer intervals extend to infinity. Values
/// outside every interval become missing.
#[derive(Debug, Clone)]
pub struct Bin {
    name: String,
    column: String,
    breaks: Vec<f64>,
    labels: Vec<String>,
    right: bool,
    include_lowest: bool,
    unbounded: bool,
}

impl Bin {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        breaks: Vec<f64>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            breaks,
            labels,
            right: true,
            include_lowest: false,
            unbounded: false,
        }
    }

    pub fn left_closed(mut self) -> Self {
        self.right = false;
        self
    }

    pub fn include_lowest(mut self) -> Self {
        self.include_lowest = true;
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.unbounded = true;
        self
    }

    fn edges(&self) -> Vec<f64> {
        if self.unbounded {
            let mut edges = Vec::with_capacity(self.breaks.len() + 2);
            edges.push(f64::NEG_INFINITY);
            edges.extend(&self.breaks);
            edges.push(f64::INFINITY);
            edges
        } else {
            self.breaks.clone()
        }
    }

    fn assign(&self, edges: &[f64], value: f64) -> Option<usize> {
        let last = edges.len().checked_sub(2)?;
        (0..=last).find(|&i| {
            let (lo, hi) = (edges[i], edges[i + 1]);
            if self.right {
                (value > lo || (i == 0 && self.include_lowest && value == lo)) && value <= hi
            } else {
                value >= lo && (value < hi || (i == last && self.include_lowest && value == hi))
            }
        })
    }
}

impl Derivation for Bin {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Ordinal
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::numeric(&self.column)]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        check_bins(&self.breaks, self.labels.len(), self.unbounded).map_err(|reason| {
            ConfigValidationError::InvalidDerivation {
                name: self.name.clone(),
                reason,
            }
        })?;
        let edges = self.edges();
        let values = table
            .numeric(&self.column)?
            .into_iter()
            .map(|v| {
                v.and_then(|v| self.assign(&edges, v))
                    .map(|i| self.labels[i].clone())
            })
            .collect();
        Ok(ColumnData::Text(values))
    }
}

fn check_rules(rules: &[ThresholdRule]) -> std::result::Result<(), String> {
    if rules.is_empty() {
        return Err("no rules".into());
    }
    if let Some(rule) = rules.iter().find(|r| !r.value.is_finite()) {
        return Err(format!("threshold {} is not finite", rule.value));
    }
    Ok(())
}

// ============================================================================
// Threshold
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub op: Comparison,
    pub value: f64,
    pub label: String,
}

impl ThresholdRule {
    pub fn new(op: Comparison, value: f64, label: impl Into<String>) -> Self {
        Self {
            op,
            value,
            label: label.into(),
        }
    }
}

/// Labels a numeric column with the first rule that holds
/// (`h < 35` → "Part-time", `h <= 40` → "Full-time"). Values no rule
/// matches get `otherwise`, or stay missing without it.
#[derive(Debug, Clone)]
pub struct Threshold {
    name: String,
    column: String,
    rules: Vec<ThresholdRule>,
    otherwise: Option<String>,
}

impl Threshold {
    pub fn new(name: impl Into<String>, column: impl Into<String>, rules: Vec<ThresholdRule>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            rules,
            otherwise: None,
        }
    }

    pub fn otherwise(mut self, label: impl Into<String>) -> Self {
        self.otherwise = Some(label.into());
        self
    }

    fn label(&self, value: f64) -> Option<String> {
        self.rules
            .iter()
            .find(|r| r.op.holds(value, r.value))
            .map(|r| r.label.clone())
            .or_else(|| self.otherwise.clone())
    }
}

impl Derivation for Threshold {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Ordinal
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::numeric(&self.column)]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        check_rules(&self.rules).map_err(|reason| ConfigValidationError::InvalidDerivation {
            name: self.name.clone(),
            reason,
        })?;
        let values = table
            .numeric(&self.column)?
            .into_iter()
            .map(|v| v.and_then(|v| self.label(v)))
            .collect();
        Ok(ColumnData::Text(values))
    }
}

// ============================================================================
// Extract
// ============================================================================

/// Regex capture into a new categorical column. Non-matching values become
/// the fallback label, or missing without one.
#[derive(Debug, Clone)]
pub struct Extract {
    name: String,
    column: String,
    regex: Regex,
    group: usize,
    fallback: Option<String>,
}

impl Extract {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        pattern: &str,
        group: usize,
    ) -> Result<Self> {
        Ok(Self::with_regex(name, column, Regex::new(pattern)?, group))
    }

    fn with_regex(
        name: impl Into<String>,
        column: impl Into<String>,
        regex: Regex,
        group: usize,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            regex,
            group,
            fallback: None,
        }
    }

    /// Text before the first comma of a "Surname, Title. Given" name.
    pub fn surname(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::with_regex(name, column, SURNAME.clone(), 1)
    }

    /// Honorific of a "Surname, Title. Given" name.
    pub fn title(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::with_regex(name, column, TITLE.clone(), 1)
    }

    /// Non-numeric first token of a ticket code.
    pub fn ticket_prefix(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::with_regex(name, column, TICKET_PREFIX.clone(), 1)
    }

    pub fn with_fallback(mut self, label: impl Into<String>) -> Self {
        self.fallback = Some(label.into());
        self
    }

    fn extract(&self, value: &str) -> Option<String> {
        self.regex
            .captures(value)
            .and_then(|c| c.get(self.group))
            .map(|m| m.as_str().to_string())
            .or_else(|| self.fallback.clone())
    }
}

impl Derivation for Extract {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Categorical
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::text(&self.column)]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        let values = table
            .text(&self.column)?
            .into_iter()
            .map(|v| v.and_then(|s| self.extract(&s)))
            .collect();
        Ok(ColumnData::Text(values))
    }
}

// ============================================================================
// Translate / Lookup
// ============================================================================

/// Maps labels to a reduced label set. Unmapped labels pass through.
#[derive(Debug, Clone)]
pub struct Translate {
    name: String,
    column: String,
    map: BTreeMap<String, String>,
}

impl Translate {
    pub fn new<I, K, V>(name: impl Into<String>, column: impl Into<String>, map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            column: column.into(),
            map: map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Derivation for Translate {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Categorical
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::text(&self.column)]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        let values = table
            .text(&self.column)?
            .into_iter()
            .map(|v| v.map(|s| self.map.get(&s).cloned().unwrap_or(s)))
            .collect();
        Ok(ColumnData::Text(values))
    }
}

/// Maps labels to numbers. Unmapped labels become missing.
#[derive(Debug, Clone)]
pub struct Lookup {
    name: String,
    column: String,
    values: BTreeMap<String, f64>,
}

impl Lookup {
    pub fn new<I, K>(name: impl Into<String>, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            name: name.into(),
            column: column.into(),
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Derivation for Lookup {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_kind(&self) -> ColumnKind {
        ColumnKind::Numeric
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::text(&self.column)]
    }

    fn compute(&self, table: &Table) -> Result<ColumnData> {
        let values = table
            .text(&self.column)?
            .into_iter()
            .map(|v| v.and_then(|s| self.values.get(&s).copied()))
            .collect();
        Ok(ColumnData::Numeric(values))
    }
}

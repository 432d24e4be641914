//! Categorical label encoding.
//!
//! An [`EncodingMap`] is a bijection between the labels of one column and
//! the codes `0..k`. Maps are immutable: refitting on new data goes through
//! [`EncodingMap::extended_with`], which keeps every assigned code.

use crate::config::EncodingPolicy;
use crate::error::{PrepError, Result};
use crate::types::{ColumnData, ColumnKind, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Label ↔ code table for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEncodingMap", into = "RawEncodingMap")]
pub struct EncodingMap {
    column: String,
    labels: Vec<String>,
    index: HashMap<String, u32>,
    unseen_code: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct RawEncodingMap {
    column: String,
    labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unseen_code: Option<u32>,
}

impl TryFrom<RawEncodingMap> for EncodingMap {
    type Error = PrepError;

    fn try_from(raw: RawEncodingMap) -> Result<Self> {
        let map = Self::from_labels(raw.column, raw.labels)?;
        match raw.unseen_code {
            Some(code) => map.with_unseen_code(code),
            None => Ok(map),
        }
    }
}

impl From<EncodingMap> for RawEncodingMap {
    fn from(map: EncodingMap) -> Self {
        Self {
            column: map.column,
            labels: map.labels,
            unseen_code: map.unseen_code,
        }
    }
}

impl EncodingMap {
    /// Assign codes in first-seen order. Missing values are skipped.
    pub fn fit(column: impl Into<String>, values: &[Option<String>]) -> Self {
        let mut map = Self {
            column: column.into(),
            labels: Vec::new(),
            index: HashMap::new(),
            unseen_code: None,
        };
        for value in values.iter().flatten() {
            map.push(value);
        }
        map
    }

    /// Assign codes in the given label order.
    pub fn from_labels<I, S>(column: impl Into<String>, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let column = column.into();
        let mut map = Self::fit(column.clone(), &[]);
        for label in labels {
            let label = label.into();
            if map.index.contains_key(&label) {
                return Err(PrepError::InvalidConfig(format!(
                    "Label '{}' listed twice for column '{}'",
                    label, column
                )));
            }
            map.push(&label);
        }
        Ok(map)
    }

    /// Return unseen labels as `code` instead of failing.
    ///
    /// The code must lie outside `0..k` so it cannot be confused with a
    /// real label.
    pub fn with_unseen_code(mut self, code: u32) -> Result<Self> {
        if (code as usize) < self.labels.len() {
            return Err(PrepError::InvalidConfig(format!(
                "Unseen code {} for column '{}' collides with label '{}'",
                code, self.column, self.labels[code as usize]
            )));
        }
        self.unseen_code = Some(code);
        Ok(self)
    }

    /// A new map with every label of `values` not yet known appended.
    /// Existing codes are unchanged.
    ///
    /// Fails with `InvalidConfig` when a new label would take the unseen
    /// code.
    pub fn extended_with(&self, values: &[Option<String>]) -> Result<Self> {
        let mut extended = self.clone();
        for value in values.iter().flatten() {
            if !extended.index.contains_key(value) {
                extended.push(value);
            }
        }
        if let Some(code) = extended.unseen_code
            && (code as usize) < extended.labels.len()
        {
            return Err(PrepError::InvalidConfig(format!(
                "Unseen code {} for column '{}' would be taken by label '{}'",
                code, extended.column, extended.labels[code as usize]
            )));
        }
        Ok(extended)
    }

    fn push(&mut self, label: &str) {
        if self.index.contains_key(label) {
            return;
        }
        let code = self.labels.len() as u32;
        self.index.insert(label.to_string(), code);
        self.labels.push(label.to_string());
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn unseen_code(&self) -> Option<u32> {
        self.unseen_code
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Code of a label.
    pub fn encode(&self, value: &str) -> Result<u32> {
        match (self.index.get(value), self.unseen_code) {
            (Some(code), _) => Ok(*code),
            (None, Some(unseen)) => Ok(unseen),
            (None, None) => Err(PrepError::UnknownCategory {
                column: self.column.clone(),
                value: value.to_string(),
            }),
        }
    }

    /// Label of a code.
    pub fn decode(&self, code: u32) -> Result<&str> {
        self.labels
            .get(code as usize)
            .map(String::as_str)
            .ok_or_else(|| PrepError::UnknownCategory {
                column: self.column.clone(),
                value: code.to_string(),
            })
    }
}

/// Fitted encoders of a run, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderSet {
    pub suffix: String,
    pub maps: Vec<EncodingMap>,
}

impl EncoderSet {
    pub fn get(&self, column: &str) -> Option<&EncodingMap> {
        self.maps.iter().find(|m| m.column() == column)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Name of the encoded column for `column`.
    pub fn output_name(&self, column: &str) -> String {
        format!("{}{}", column, self.suffix)
    }
}

/// Encodes text columns into integer code columns.
pub struct CategoricalEncoder;

impl CategoricalEncoder {
    /// Fit one map per `(column, policy)` pair.
    pub fn fit(
        table: &Table,
        columns: &[(String, EncodingPolicy)],
        suffix: &str,
        unseen_code: Option<u32>,
    ) -> Result<EncoderSet> {
        let mut maps = Vec::with_capacity(columns.len());
        for (column, policy) in columns {
            let explicit = match policy {
                EncodingPolicy::None => continue,
                EncodingPolicy::FirstSeen => None,
                EncodingPolicy::Explicit(labels) => Some(labels),
            };
            let kind = table.require(column)?;
            if !kind.is_text() {
                return Err(PrepError::Schema(format!(
                    "Cannot encode {} column '{}'",
                    kind, column
                )));
            }
            let map = match explicit {
                Some(labels) => EncodingMap::from_labels(column.clone(), labels.iter().cloned())?,
                None => EncodingMap::fit(column.clone(), &table.text(column)?),
            };
            let map = match unseen_code {
                Some(code) => map.with_unseen_code(code)?,
                None => map,
            };
            debug!("Fitted {} labels for '{}'", map.len(), column);
            maps.push(map);
        }
        Ok(EncoderSet {
            suffix: suffix.to_string(),
            maps,
        })
    }

    /// Add an encoded column for every map. Originals are kept; missing
    /// values stay missing.
    pub fn transform(table: &Table, encoders: &EncoderSet) -> Result<Table> {
        let mut encoded = table.clone();
        for map in &encoders.maps {
            let values = table.text(map.column())?;
            let codes = values
                .iter()
                .map(|v| v.as_deref().map(|label| map.encode(label)).transpose())
                .collect::<Result<Vec<Option<u32>>>>()?;
            let output = encoders.output_name(map.column());
            encoded.add_column(&output, ColumnData::Codes(codes), ColumnKind::Code)?;
        }
        if !encoders.is_empty() {
            info!("Encoded {} categorical columns", encoders.len());
        }
        Ok(encoded)
    }

    pub fn fit_transform(
        table: &Table,
        columns: &[(String, EncodingPolicy)],
        suffix: &str,
        unseen_code: Option<u32>,
    ) -> Result<(Table, EncoderSet)> {
        let encoders = Self::fit(table, columns, suffix, unseen_code)?;
        let encoded = Self::transform(table, &encoders)?;
        Ok((encoded, encoders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn labels(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_first_seen_codes() {
        let map = EncodingMap::fit("pet", &labels(&["cat", "dog", "cat", "bird"]));
        assert_eq!(map.encode("cat").unwrap(), 0);
        assert_eq!(map.encode("dog").unwrap(), 1);
        assert_eq!(map.encode("bird").unwrap(), 2);
        assert_eq!(map.decode(1).unwrap(), "dog");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_decode_encode_identity() {
        let values = labels(&["S", "C", "Q", "S", "C"]);
        let map = EncodingMap::fit("Embarque", &values);
        for v in values.iter().flatten() {
            assert_eq!(map.decode(map.encode(v).unwrap()).unwrap(), v);
        }
        let mut codes: Vec<u32> = map.labels().iter().map(|l| map.encode(l).unwrap()).collect();
        codes.sort();
        assert_eq!(codes, (0..map.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_unknown_category() {
        let map = EncodingMap::fit("pet", &labels(&["cat"]));
        assert!(matches!(
            map.encode("fish"),
            Err(PrepError::UnknownCategory { .. })
        ));
        assert!(matches!(map.decode(7), Err(PrepError::UnknownCategory { .. })));
    }

    #[test]
    fn test_unseen_code() {
        let map = EncodingMap::fit("pet", &labels(&["cat", "dog"]))
            .with_unseen_code(99)
            .unwrap();
        assert_eq!(map.encode("fish").unwrap(), 99);
        assert!(
            EncodingMap::fit("pet", &labels(&["cat", "dog"]))
                .with_unseen_code(1)
                .is_err()
        );
    }

    #[test]
    fn test_extended_with_keeps_codes() {
        let map = EncodingMap::fit("pet", &labels(&["cat", "dog"]));
        let extended = map.extended_with(&labels(&["bird", "dog", "cat"])).unwrap();
        assert_eq!(extended.encode("cat").unwrap(), 0);
        assert_eq!(extended.encode("dog").unwrap(), 1);
        assert_eq!(extended.encode("bird").unwrap(), 2);
        // original untouched
        assert!(map.encode("bird").is_err());
    }

    #[test]
    fn test_extended_with_rejects_taking_unseen_code() {
        let map = EncodingMap::fit("pet", &labels(&["cat", "dog"]))
            .with_unseen_code(3)
            .unwrap();
        // "bird" gets 2, the unseen code stays free
        let extended = map.extended_with(&labels(&["bird"])).unwrap();
        assert_eq!(extended.unseen_code(), Some(3));
        assert_eq!(extended.encode("fish").unwrap(), 3);

        let err = extended.extended_with(&labels(&["fish"])).unwrap_err();
        assert!(matches!(err, PrepError::InvalidConfig(_)));
    }

    #[test]
    fn test_explicit_labels() {
        let map = EncodingMap::from_labels("Renda", ["Até 50K", "Acima de 50K"]).unwrap();
        assert_eq!(map.encode("Acima de 50K").unwrap(), 1);
        assert!(EncodingMap::from_labels("Renda", ["a", "a"]).is_err());
    }

    #[test]
    fn test_serde_rebuilds_index() {
        let map = EncodingMap::fit("pet", &labels(&["cat", "dog"]));
        let json = serde_json::to_string(&map).unwrap();
        let parsed: EncodingMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.encode("dog").unwrap(), 1);
        assert_eq!(parsed, map);

        let bad = r#"{"column":"pet","labels":["a","a"]}"#;
        assert!(serde_json::from_str::<EncodingMap>(bad).is_err());
    }

    #[test]
    fn test_encoder_adds_code_column() {
        let df = df!["pet" => [Some("cat"), Some("dog"), None, Some("cat")]].unwrap();
        let table = Table::from_frame(df).unwrap();
        let columns = vec![("pet".to_string(), EncodingPolicy::FirstSeen)];
        let (out, encoders) =
            CategoricalEncoder::fit_transform(&table, &columns, "_code", None).unwrap();

        assert!(out.has_column("pet"));
        assert_eq!(out.kind("pet_code"), Some(ColumnKind::Code));
        assert_eq!(
            out.codes("pet_code").unwrap(),
            vec![Some(0), Some(1), None, Some(0)]
        );
        assert_eq!(encoders.get("pet").unwrap().len(), 2);
    }

    #[test]
    fn test_unencoded_policy_is_skipped() {
        let df = df!["pet" => ["cat", "dog"], "x" => [1.0, 2.0]].unwrap();
        let table = Table::from_frame(df).unwrap();
        // a numeric column would be rejected if it were fitted
        let columns = vec![
            ("x".to_string(), EncodingPolicy::None),
            ("pet".to_string(), EncodingPolicy::FirstSeen),
        ];
        let (out, encoders) =
            CategoricalEncoder::fit_transform(&table, &columns, "_code", None).unwrap();

        assert_eq!(encoders.len(), 1);
        assert!(encoders.get("x").is_none());
        assert!(!out.has_column("x_code"));
        assert!(out.has_column("pet_code"));
    }

    #[test]
    fn test_transform_unseen_value_fails() {
        let train = Table::from_frame(df!["pet" => ["cat", "dog"]].unwrap()).unwrap();
        let test = Table::from_frame(df!["pet" => ["cat", "fish"]].unwrap()).unwrap();
        let columns = vec![("pet".to_string(), EncodingPolicy::FirstSeen)];
        let encoders = CategoricalEncoder::fit(&train, &columns, "_code", None).unwrap();
        assert!(matches!(
            CategoricalEncoder::transform(&test, &encoders),
            Err(PrepError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn test_encode_numeric_column_rejected() {
        let table = Table::from_frame(df!["x" => [1.0, 2.0]].unwrap()).unwrap();
        let columns = vec![("x".to_string(), EncodingPolicy::FirstSeen)];
        assert!(matches!(
            CategoricalEncoder::fit(&table, &columns, "_code", None),
            Err(PrepError::Schema(_))
        ));
    }

    #[test]
    fn test_encoded_name_collision() {
        let df = df!["pet" => ["cat"], "pet_code" => ["x"]].unwrap();
        let table = Table::from_frame(df).unwrap();
        let columns = vec![("pet".to_string(), EncodingPolicy::FirstSeen)];
        assert!(matches!(
            CategoricalEncoder::fit_transform(&table, &columns, "_code", None),
            Err(PrepError::Schema(_))
        ));
    }
}

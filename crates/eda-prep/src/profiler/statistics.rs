//! Statistical kernels over column values.

use crate::config::QuantileMethod;
use crate::utils::{mean, quantile_sorted, sorted_present, std_dev};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Count, location and spread of a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

pub(crate) fn describe(column: &str, values: &[Option<f64>]) -> NumericSummary {
    let sorted = sorted_present(values);
    let q = |p| quantile_sorted(&sorted, p, QuantileMethod::Linear);
    NumericSummary {
        column: column.to_string(),
        count: sorted.len(),
        missing: values.len() - sorted.len(),
        mean: mean(values),
        std: std_dev(values, 1),
        min: sorted.first().copied(),
        q25: q(0.25),
        median: q(0.5),
        q75: q(0.75),
        max: sorted.last().copied(),
    }
}

/// Label frequencies, most frequent first. Ties keep first-seen order.
pub(crate) fn value_counts(values: &[Option<String>], exclude: &[String]) -> Vec<(String, usize)> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.iter().flatten() {
        if exclude.iter().any(|e| e == v) {
            continue;
        }
        *counts.entry(v.as_str()).or_insert_with(|| {
            order.push(v.as_str());
            0
        }) += 1;
    }
    let mut result: Vec<(String, usize)> = order
        .into_iter()
        .map(|label| (label.to_string(), counts[label]))
        .collect();
    result.sort_by(|a, b| b.1.cmp(&a.1));
    result
}

/// Pearson correlation over rows where both values are present.
pub(crate) fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    let denom = (var_x * var_y).sqrt();
    (denom > 0.0).then(|| cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let values = [Some(1.0), Some(2.0), None, Some(3.0), Some(4.0)];
        let summary = describe("x", &values);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.mean, Some(2.5));
        assert_eq!(summary.q25, Some(1.75));
        assert_eq!(summary.median, Some(2.5));
        assert_eq!(summary.max, Some(4.0));
        assert!((summary.std.unwrap() - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn test_describe_empty() {
        let summary = describe("x", &[None, None]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, None);
        assert_eq!(summary.min, None);
    }

    #[test]
    fn test_value_counts_order_and_exclusion() {
        let values: Vec<Option<String>> = ["S", "C", "Desconhecido", "S", "Q", "C"]
            .iter()
            .map(|s| Some(s.to_string()))
            .collect();
        let counts = value_counts(&values, &["Desconhecido".to_string()]);
        assert_eq!(
            counts,
            vec![("S".to_string(), 2), ("C".to_string(), 2), ("Q".to_string(), 1)]
        );
    }

    #[test]
    fn test_pearson() {
        let a = [Some(1.0), Some(2.0), Some(3.0), None];
        let b = [Some(2.0), Some(4.0), Some(6.0), Some(1.0)];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        let c = [Some(3.0), Some(2.0), Some(1.0), Some(0.0)];
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[Some(1.0), Some(1.0), Some(1.0), None]), None);
    }
}

//! Shared utilities for the cleaning pipeline.
//!
//! Dtype checks, numeric string parsing, sentinel matching and the small
//! statistics kernels (quantiles, mean, standard deviation) that several
//! stages share.

use crate::config::QuantileMethod;
use polars::prelude::*;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is an integer type.
#[inline]
pub fn is_integer_dtype(dtype: &DataType) -> bool {
    is_numeric_dtype(dtype) && !matches!(dtype, DataType::Float32 | DataType::Float64)
}

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Characters commonly used in numeric formatting that should be stripped.
pub const NUMERIC_FORMAT_CHARS: [char; 6] = [',', '$', '%', '€', '£', ' '];

/// Clean a string for numeric parsing by removing formatting characters.
///
/// ```rust,ignore
/// assert_eq!(clean_numeric_string("$1,234.56"), "1234.56");
/// ```
pub fn clean_numeric_string(s: &str) -> String {
    let mut result = s.trim().to_string();
    for c in NUMERIC_FORMAT_CHARS {
        result = result.replace(c, "");
    }
    result
}

/// Try to parse a string as a finite numeric value.
///
/// `NaN` and infinities are rejected; they are not observations.
pub fn parse_numeric_string(s: &str) -> Option<f64> {
    let cleaned = clean_numeric_string(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Check if a cell value is a missing-value sentinel.
///
/// Blank cells always count as missing. When `trimmed` is set the
/// comparison ignores surrounding whitespace, so `" ?"` matches `"?"`.
pub fn is_sentinel(value: &str, sentinels: &[String], trimmed: bool) -> bool {
    let candidate = if trimmed { value.trim() } else { value };
    if candidate.trim().is_empty() {
        return true;
    }
    sentinels.iter().any(|s| {
        let s = if trimmed { s.trim() } else { s.as_str() };
        s == candidate
    })
}

/// Render a float the way a label should read: integral values without a
/// trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// =============================================================================
// Statistics Kernels
// =============================================================================

/// Collect and sort the non-missing values of a column.
pub fn sorted_present(values: &[Option<f64>]) -> Vec<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    present.sort_by(f64::total_cmp);
    present
}

/// Quantile of an already sorted, non-empty slice.
///
/// `NearestRank` returns the smallest value whose rank covers `p * n`;
/// `Linear` interpolates between the neighbouring order statistics at
/// position `p * (n - 1)`.
pub fn quantile_sorted(sorted: &[f64], p: f64, method: QuantileMethod) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let n = sorted.len();
    match method {
        QuantileMethod::NearestRank => {
            let rank = (p * n as f64).ceil() as usize;
            Some(sorted[rank.clamp(1, n) - 1])
        }
        QuantileMethod::Linear => {
            let pos = p * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
        }
    }
}

/// Mean of the non-missing values.
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Standard deviation of the non-missing values with `ddof` degrees of
/// freedom removed (0 = population, 1 = sample).
pub fn std_dev(values: &[Option<f64>], ddof: usize) -> Option<f64> {
    let m = mean(values)?;
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() <= ddof {
        return None;
    }
    let ss: f64 = present.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (present.len() - ddof) as f64).sqrt())
}

/// Median of the non-missing values (interpolated for even counts).
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let sorted = sorted_present(values);
    quantile_sorted(&sorted, 0.5, QuantileMethod::Linear)
}

/// Most frequent label; ties go to the label seen first.
pub fn string_mode(values: &[Option<String>]) -> Option<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for v in values.iter().flatten() {
        let entry = counts.entry(v.as_str()).or_insert_with(|| {
            order.push(v.as_str());
            0
        });
        *entry += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for label in order {
        let count = counts[label];
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric_dtype() {
        assert!(is_numeric_dtype(&DataType::Int64));
        assert!(is_numeric_dtype(&DataType::Float64));
        assert!(!is_numeric_dtype(&DataType::String));
        assert!(!is_numeric_dtype(&DataType::Boolean));
        assert!(is_integer_dtype(&DataType::UInt32));
        assert!(!is_integer_dtype(&DataType::Float32));
    }

    #[test]
    fn test_clean_numeric_string() {
        assert_eq!(clean_numeric_string("$1,234.56"), "1234.56");
        assert_eq!(clean_numeric_string("  42%  "), "42");
        assert_eq!(clean_numeric_string("€100"), "100");
    }

    #[test]
    fn test_parse_numeric_string() {
        assert_eq!(parse_numeric_string("42"), Some(42.0));
        assert_eq!(parse_numeric_string(" 7.25 "), Some(7.25));
        assert_eq!(parse_numeric_string("-100"), Some(-100.0));
        assert_eq!(parse_numeric_string(""), None);
        assert_eq!(parse_numeric_string("?"), None);
        assert_eq!(parse_numeric_string("NaN"), None);
    }

    #[test]
    fn test_is_sentinel() {
        let sentinels = vec!["?".to_string()];
        assert!(is_sentinel(" ?", &sentinels, true));
        assert!(!is_sentinel(" ?", &sentinels, false));
        assert!(is_sentinel("   ", &sentinels, false));
        assert!(!is_sentinel("Private", &sentinels, true));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-1.0), "-1");
        assert_eq!(format_number(7.25), "7.25");
    }

    #[test]
    fn test_quantile_nearest_rank() {
        let sorted = [1.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 5.0, 100.0];
        assert_eq!(quantile_sorted(&sorted, 0.25, QuantileMethod::NearestRank), Some(2.0));
        assert_eq!(quantile_sorted(&sorted, 0.75, QuantileMethod::NearestRank), Some(4.0));
        assert_eq!(quantile_sorted(&sorted, 0.0, QuantileMethod::NearestRank), Some(1.0));
        assert_eq!(quantile_sorted(&sorted, 1.0, QuantileMethod::NearestRank), Some(100.0));
    }

    #[test]
    fn test_quantile_linear() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&sorted, 0.5, QuantileMethod::Linear), Some(2.5));
        assert_eq!(quantile_sorted(&sorted, 0.25, QuantileMethod::Linear), Some(1.75));
        assert_eq!(quantile_sorted(&[], 0.5, QuantileMethod::Linear), None);
    }

    #[test]
    fn test_mean_and_std() {
        let values = [Some(2.0), None, Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)];
        assert_eq!(mean(&values), Some(5.0));
        assert_eq!(std_dev(&values, 0), Some(2.0));
        assert!(std_dev(&[Some(1.0)], 1).is_none());
        assert!(mean(&[None, None]).is_none());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[Some(1.0), None, Some(3.0), Some(5.0)]), Some(3.0));
        assert_eq!(median(&[Some(1.0), Some(3.0)]), Some(2.0));
    }

    #[test]
    fn test_string_mode_first_seen_tie_break() {
        let values = vec![Some("b".to_string()), Some("a".to_string()), None];
        assert_eq!(string_mode(&values), Some("b".to_string()));

        let values = vec![
            Some("a".to_string()),
            Some("b".to_string()),
            Some("b".to_string()),
        ];
        assert_eq!(string_mode(&values), Some("b".to_string()));
        assert_eq!(string_mode(&[None]), None);
    }
}

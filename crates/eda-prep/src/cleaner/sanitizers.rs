//! Value-level sanitization shared by the normalizer and the missing-value
//! stage.

use crate::utils::is_sentinel;
use std::collections::BTreeMap;

/// Replace mapped labels. Returns the new values and how many cells changed.
pub(crate) fn relabel_values(
    values: Vec<Option<String>>,
    map: &BTreeMap<String, String>,
) -> (Vec<Option<String>>, usize) {
    let mut changed = 0;
    let relabelled = values
        .into_iter()
        .map(|opt| {
            opt.map(|v| match map.get(&v) {
                Some(new) if *new != v => {
                    changed += 1;
                    new.clone()
                }
                _ => v,
            })
        })
        .collect();
    (relabelled, changed)
}

/// Turn sentinel cells into missing values. Returns the new values and how
/// many cells were replaced.
pub(crate) fn null_sentinels(
    values: Vec<Option<String>>,
    sentinels: &[String],
    trimmed: bool,
) -> (Vec<Option<String>>, usize) {
    let mut replaced = 0;
    let cleaned = values
        .into_iter()
        .map(|opt| match opt {
            Some(v) if is_sentinel(&v, sentinels, trimmed) => {
                replaced += 1;
                None
            }
            other => other,
        })
        .collect();
    (cleaned, replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_relabel_values() {
        let map = BTreeMap::from([
            ("Male".to_string(), "Masculino".to_string()),
            ("Female".to_string(), "Feminino".to_string()),
        ]);
        let (out, changed) =
            relabel_values(labels(&[Some("Male"), None, Some("Other"), Some("Female")]), &map);
        assert_eq!(
            out,
            labels(&[Some("Masculino"), None, Some("Other"), Some("Feminino")])
        );
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_relabel_identity_not_counted() {
        let map = BTreeMap::from([("a".to_string(), "a".to_string())]);
        let (_, changed) = relabel_values(labels(&[Some("a")]), &map);
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_null_sentinels() {
        let sentinels = vec!["?".to_string()];
        let (out, replaced) =
            null_sentinels(labels(&[Some(" ?"), Some("Private"), Some(""), None]), &sentinels, true);
        assert_eq!(out, labels(&[None, Some("Private"), None, None]));
        assert_eq!(replaced, 2);
    }
}

//! Effective variable resolution.
//!
//! A script stores default variables; a run may carry overrides. The merge is
//! pure and values are never interpreted here.

use std::collections::BTreeMap;

/// Key/value environment handed to a script process.
pub type Variables = BTreeMap<String, String>;

/// Merge `overrides` on top of `defaults`.
///
/// Same-keyed overrides win, default-only keys are kept and override-only
/// keys are added.
pub fn resolve(defaults: &Variables, overrides: &Variables) -> Variables {
    let mut effective = defaults.clone();
    effective.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn override_replaces_default() {
        let effective = resolve(&vars(&[("FOO", "bar")]), &vars(&[("FOO", "baz")]));
        assert_eq!(effective, vars(&[("FOO", "baz")]));
    }

    #[test]
    fn default_only_keys_are_preserved_and_new_keys_added() {
        let effective = resolve(
            &vars(&[("SOURCE", "rss"), ("LIMIT", "10")]),
            &vars(&[("LIMIT", "50"), ("DRY_RUN", "1")]),
        );
        assert_eq!(
            effective,
            vars(&[("SOURCE", "rss"), ("LIMIT", "50"), ("DRY_RUN", "1")])
        );
    }

    #[test]
    fn empty_values_are_not_validated() {
        let effective = resolve(&vars(&[("A", "x")]), &vars(&[("A", "")]));
        assert_eq!(effective["A"], "");
    }

    #[test]
    fn resolve_is_deterministic() {
        let defaults = vars(&[("A", "1"), ("B", "2")]);
        let overrides = vars(&[("B", "3")]);
        assert_eq!(resolve(&defaults, &overrides), resolve(&defaults, &overrides));
        assert_eq!(defaults["B"], "2", "inputs must not be mutated");
    }
}

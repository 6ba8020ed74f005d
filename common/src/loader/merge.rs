// Merge-by-key helpers for configuration fragments contributed by modules

use crate::errors::ConfigError;
use indexmap::IndexMap;

/// Merge fragments whose keys must be unique across modules.
///
/// `fragments` are `(module, entries)` pairs in module load order. The result
/// keeps that order. A key declared by two modules fails with
/// `ConfigConflict` naming both.
pub fn merge_unique<V>(
    fragments: Vec<(String, IndexMap<String, V>)>,
) -> Result<IndexMap<String, V>, ConfigError> {
    let mut origins: IndexMap<String, String> = IndexMap::new();
    let mut merged = IndexMap::new();

    for (module, entries) in fragments {
        for (key, value) in entries {
            if let Some(first) = origins.get(&key) {
                return Err(ConfigError::ConfigConflict {
                    key,
                    first: first.clone(),
                    second: module,
                });
            }
            origins.insert(key.clone(), module.clone());
            merged.insert(key, value);
        }
    }

    Ok(merged)
}

/// Merge fragments whose keys may repeat across modules. The first
/// declaration fixes the key's position; later ones are folded into it
/// with `extend`.
pub fn merge_extend<V, F>(fragments: Vec<(String, IndexMap<String, V>)>, mut extend: F) -> IndexMap<String, V>
where
    F: FnMut(&mut V, V),
{
    let mut merged: IndexMap<String, V> = IndexMap::new();

    for (_module, entries) in fragments {
        for (key, value) in entries {
            match merged.get_mut(&key) {
                Some(existing) => extend(existing, value),
                None => {
                    merged.insert(key, value);
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(module: &str, keys: &[(&str, i32)]) -> (String, IndexMap<String, i32>) {
        (
            module.to_string(),
            keys.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    #[test]
    fn test_merge_unique_keeps_module_order() {
        let merged = merge_unique(vec![
            fragment("a", &[("z", 1), ("y", 2)]),
            fragment("b", &[("x", 3)]),
        ])
        .unwrap();
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_merge_unique_rejects_duplicates() {
        let err = merge_unique(vec![fragment("a", &[("z", 1)]), fragment("b", &[("z", 2)])])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ConfigConflict {
                key: "z".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            }
        );
    }

    #[test]
    fn test_merge_extend_folds_repeats() {
        let merged = merge_extend(
            vec![fragment("a", &[("z", 1), ("y", 2)]), fragment("b", &[("z", 10)])],
            |existing, incoming| *existing += incoming,
        );
        assert_eq!(merged.get("z"), Some(&11));
        assert_eq!(merged.get_index(0).map(|(k, _)| k.as_str()), Some("z"));
    }
}

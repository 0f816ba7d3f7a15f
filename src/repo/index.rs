//! Index documents
//!
//! - [`IdIndex`]: `id -> summary`, one per project and entity kind
//! - [`InvertedIndex`]: `secondary key -> set of ids`
//!
//! Both serialize as plain JSON objects. An absent document reads as empty.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `id -> summary` map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdIndex<S> {
    entries: BTreeMap<String, S>,
}

impl<S> Default for IdIndex<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S> IdIndex<S> {
    pub fn insert(&mut self, id: impl Into<String>, summary: S) -> Option<S> {
        self.entries.insert(id.into(), summary)
    }

    pub fn remove(&mut self, id: &str) -> Option<S> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&S> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &S)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids whose summary satisfies `predicate`
    pub fn select(&self, mut predicate: impl FnMut(&S) -> bool) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, summary)| predicate(summary))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// `secondary key -> ids` map
///
/// Keys never map to an empty set; removing the last id prunes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvertedIndex {
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl InvertedIndex {
    pub fn add(&mut self, key: impl Into<String>, id: impl Into<String>) {
        self.keys.entry(key.into()).or_default().insert(id.into());
    }

    pub fn remove(&mut self, key: &str, id: &str) -> bool {
        let Some(ids) = self.keys.get_mut(key) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    /// Remove `id` from every key, pruning keys left empty
    pub fn remove_id(&mut self, id: &str) -> usize {
        let mut removed = 0;
        self.keys.retain(|_, ids| {
            if ids.remove(id) {
                removed += 1;
            }
            !ids.is_empty()
        });
        removed
    }

    /// Make `id` appear under exactly `keys`
    ///
    /// Pairs left over from any earlier version of the entity are dropped,
    /// whether or not the caller still knows what that version contained.
    pub fn set_keys<K: AsRef<str>>(&mut self, id: &str, keys: &[K]) {
        self.remove_id(id);
        for key in keys {
            self.add(key.as_ref(), id);
        }
    }

    pub fn ids_for(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.keys.get(key)
    }

    pub fn keys_for(&self, id: &str) -> BTreeSet<String> {
        self.keys
            .iter()
            .filter(|(_, ids)| ids.contains(id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Ids present under every one of `keys`
    pub fn match_all<K: AsRef<str>>(&self, keys: &[K]) -> BTreeSet<String> {
        let mut sets = keys.iter().map(|k| self.keys.get(k.as_ref()));
        let Some(first) = sets.next() else {
            return BTreeSet::new();
        };
        let mut result = first.cloned().unwrap_or_default();
        for set in sets {
            match set {
                Some(ids) => result.retain(|id| ids.contains(id)),
                None => result.clear(),
            }
            if result.is_empty() {
                break;
            }
        }
        result
    }

    /// Ids present under at least one of `keys`
    pub fn match_any<K: AsRef<str>>(&self, keys: &[K]) -> BTreeSet<String> {
        keys.iter()
            .filter_map(|k| self.keys.get(k.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> InvertedIndex {
        let mut index = InvertedIndex::default();
        index.set_keys("t1", &["smoke"]);
        index.set_keys("t2", &["smoke", "regression"]);
        index.set_keys("t3", &["regression"]);
        index
    }

    #[test]
    fn test_match_any_and_all() {
        let index = tags();
        assert_eq!(
            index.match_any(&["smoke"]),
            BTreeSet::from(["t1".to_string(), "t2".to_string()])
        );
        assert_eq!(
            index.match_all(&["smoke", "regression"]),
            BTreeSet::from(["t2".to_string()])
        );
        assert!(index.match_all(&["smoke", "missing"]).is_empty());
        assert!(index.match_all::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_set_keys_drops_stale_pairs() {
        let mut index = tags();
        index.set_keys("t3", &["smoke"]);
        assert_eq!(
            index.ids_for("regression"),
            Some(&BTreeSet::from(["t2".to_string()]))
        );
        assert_eq!(index.keys_for("t3"), BTreeSet::from(["smoke".to_string()]));
    }

    #[test]
    fn test_empty_keys_pruned() {
        let mut index = tags();
        assert_eq!(index.remove_id("t3"), 1);
        assert!(index.remove("regression", "t2"));
        assert!(index.ids_for("regression").is_none());
        assert!(!index.remove("regression", "t2"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let index = tags();
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["smoke"], serde_json::json!(["t1", "t2"]));

        let mut ids: IdIndex<String> = IdIndex::default();
        ids.insert("t1", "Login".to_string());
        assert_eq!(serde_json::to_string(&ids).unwrap(), r#"{"t1":"Login"}"#);
    }
}

use std::collections::HashMap;

use parking_lot::Mutex;

use super::remote::SortedSetStore;
use crate::StoreError;

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    SortedSet(HashMap<String, f64>),
}

/// In-process [`SortedSetStore`] with the key/value and sorted-set semantics
/// of a Redis server. Empty sorted sets disappear, as they do there.
#[derive(Debug, Default)]
pub struct InMemorySortedSetStore {
    entries: Mutex<HashMap<String, Entry>>,
}
impl InMemorySortedSetStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

impl SortedSetStore for InMemorySortedSetStore {
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));
        let Entry::SortedSet(set) = entry else {
            return Err(wrong_type(key));
        };
        set.insert(member.to_string(), score);
        Ok(())
    }

    fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));
        let Entry::SortedSet(set) = entry else {
            return Err(wrong_type(key));
        };
        let score = set.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::SortedSet(set)) => Ok(set.get(member).copied()),
            Some(Entry::Value(_)) => Err(wrong_type(key)),
        }
    }

    fn zrange(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut members: Vec<_> = match self.entries.lock().get(key) {
            None => return Ok(vec![]),
            Some(Entry::SortedSet(set)) => set.iter().map(|(m, s)| (m.clone(), *s)).collect(),
            Some(Entry::Value(_)) => return Err(wrong_type(key)),
        };
        members.sort_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| a.cmp(b)));
        Ok(members)
    }

    fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        match self.entries.lock().get(key) {
            None => Ok(0),
            Some(Entry::SortedSet(set)) => Ok(set.len()),
            Some(Entry::Value(_)) => Err(wrong_type(key)),
        }
    }

    fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let now_empty = match entries.get_mut(key) {
            None => return Ok(()),
            Some(Entry::SortedSet(set)) => {
                set.remove(member);
                set.is_empty()
            }
            Some(Entry::Value(_)) => return Err(wrong_type(key)),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entries.lock().get(key) {
            None => Ok(None),
            Some(Entry::Value(value)) => Ok(Some(value.clone())),
            Some(Entry::SortedSet(_)) => Err(wrong_type(key)),
        }
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.entries.lock();
        let values = keys
            .iter()
            .map(|key| match entries.get(key) {
                Some(Entry::Value(value)) => Some(value.clone()),
                _ => None,
            })
            .collect();
        Ok(values)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::Value(value.to_string()));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().contains_key(key))
    }

    fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_set_orders_by_score_then_member() {
        let store = InMemorySortedSetStore::new();
        store.zadd("z", "b", 1.0).unwrap();
        store.zadd("z", "a", 1.0).unwrap();
        store.zadd("z", "c", 0.5).unwrap();
        let members: Vec<_> = store.zrange("z").unwrap().into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, ["c", "a", "b"]);
        assert_eq!(store.zcard("z").unwrap(), 3);
    }

    #[test]
    fn zincrby_creates_member() {
        let store = InMemorySortedSetStore::new();
        assert_eq!(store.zincrby("z", "m", 2.0).unwrap(), 2.0);
        assert_eq!(store.zincrby("z", "m", 3.0).unwrap(), 5.0);
        assert_eq!(store.zscore("z", "m").unwrap(), Some(5.0));
        assert_eq!(store.zscore("z", "other").unwrap(), None);
    }

    #[test]
    fn empty_sorted_set_is_removed() {
        let store = InMemorySortedSetStore::new();
        store.zadd("z", "m", 1.0).unwrap();
        store.zrem("z", "m").unwrap();
        assert!(!store.exists("z").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let store = InMemorySortedSetStore::new();
        store.set("k", "v").unwrap();
        assert!(matches!(
            store.zadd("k", "m", 1.0),
            Err(StoreError::WrongType { .. })
        ));
        store.zadd("z", "m", 1.0).unwrap();
        assert!(matches!(store.get("z"), Err(StoreError::WrongType { .. })));
    }

    #[test]
    fn mget_returns_one_slot_per_key() {
        let store = InMemorySortedSetStore::new();
        store.set("a", "1").unwrap();
        store.zadd("z", "m", 1.0).unwrap();
        let keys = ["a", "missing", "z"].map(String::from);
        assert_eq!(
            store.mget(&keys).unwrap(),
            vec![Some("1".to_string()), None, None]
        );
    }
}

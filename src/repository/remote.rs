//! Repositories backed by a networked key/value store with sorted sets.
//!
//! Layout for a repository with prefix `p.`:
//!
//! - single metrics: the score of member `p.<name>` in the sorted set
//!   `keys.p` is the value, the string under `p.<name>` is the timestamp;
//! - groups: the sorted set `keys.p` tracks every group key `p.<group>`, the
//!   score of member `p.<group>.<name>` in the sorted set `p.<group>` is the
//!   value and the string under `p.<group>.<name>` is the timestamp.
//!
//! Every operation goes to the store. Increments rely on the store's atomic
//! `zincrby`, there is no client-side locking.

use std::sync::Arc;

use tracing::debug;

use super::{MetricReader, MetricWriter, MultiMetricRepository};
use crate::{
    name::{normalize_prefix, qualify},
    Delta, Error, Metric, Result, StoreError, Time,
};

pub const DEFAULT_METRICS_PREFIX: &str = "metrics.";
pub const DEFAULT_GROUPS_PREFIX: &str = "metrics.groups.";

/// The subset of a Redis-like server the remote repositories need.
pub trait SortedSetStore: Send + Sync {
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    /// Returns the new score. Missing members start at zero.
    fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError>;
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    /// Every member with its score, ordered by score then member.
    fn zrange(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;
    fn zcard(&self, key: &str) -> Result<usize, StoreError>;
    fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// One round trip for all `keys`; the result has one slot per key.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn exists(&self, key: &str) -> Result<bool, StoreError>;
    fn del(&self, key: &str) -> Result<(), StoreError>;
}
impl<S> SortedSetStore for Arc<S>
where
    S: SortedSetStore + ?Sized,
{
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        (**self).zadd(key, member, score)
    }
    fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        (**self).zincrby(key, member, delta)
    }
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        (**self).zscore(key, member)
    }
    fn zrange(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        (**self).zrange(key)
    }
    fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        (**self).zcard(key)
    }
    fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        (**self).zrem(key, member)
    }
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        (**self).mget(keys)
    }
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key)
    }
    fn del(&self, key: &str) -> Result<(), StoreError> {
        (**self).del(key)
    }
}

/// Prefix bookkeeping shared by both repositories.
#[derive(Debug, Clone)]
struct KeySpace {
    prefix: String,
    keys: String,
}
impl KeySpace {
    fn new(prefix: &str, fallback: &str) -> Self {
        let prefix = match normalize_prefix(prefix) {
            prefix if prefix.is_empty() => fallback.to_string(),
            prefix => prefix,
        };
        let keys = format!("keys.{}", prefix.trim_end_matches('.'));
        Self { prefix, keys }
    }

    fn key_for(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn name_for<'a>(&self, key: &'a str) -> Result<&'a str> {
        key.strip_prefix(self.prefix.as_str())
            .ok_or_else(|| Error::InvalidKey {
                key: key.to_string(),
                prefix: self.prefix.clone(),
            })
    }

    /// Rebuilds members of a sorted set from one `mget` of their timestamps.
    /// Members whose timestamp is gone are skipped.
    fn decode_members<S: SortedSetStore>(
        &self,
        store: &S,
        members: Vec<(String, f64)>,
    ) -> Result<Vec<Metric>> {
        let keys: Vec<String> = members.iter().map(|(key, _)| key.clone()).collect();
        let raws = store.mget(&keys)?;
        let mut metrics = Vec::with_capacity(members.len());
        for ((key, score), raw) in members.into_iter().zip(raws) {
            if let Some(metric) = self.decode(&key, raw.as_deref(), Some(score))? {
                metrics.push(metric);
            }
        }
        Ok(metrics)
    }

    fn decode(&self, key: &str, raw: Option<&str>, score: Option<f64>) -> Result<Option<Metric>> {
        let (Some(raw), Some(score)) = (raw, score) else {
            return Ok(None);
        };
        let name = self.name_for(key)?;
        let timestamp: Time = raw.parse().map_err(|_| Error::InvalidTimestamp {
            key: key.to_string(),
            raw: raw.to_string(),
        })?;
        Ok(Some(Metric::at(name, score, timestamp)))
    }
}

#[derive(Debug)]
pub struct RemoteMetricRepository<S> {
    store: S,
    space: KeySpace,
}
impl<S> RemoteMetricRepository<S>
where
    S: SortedSetStore,
{
    pub fn new(store: S) -> Self {
        Self::with_prefix(store, DEFAULT_METRICS_PREFIX)
    }
    /// An empty `prefix` falls back to [`DEFAULT_METRICS_PREFIX`].
    pub fn with_prefix(store: S, prefix: &str) -> Self {
        let space = KeySpace::new(prefix, DEFAULT_METRICS_PREFIX);
        Self { store, space }
    }

    pub fn prefix(&self) -> &str {
        &self.space.prefix
    }
    /// The sorted set holding every metric's value.
    pub fn keys_key(&self) -> &str {
        &self.space.keys
    }
    pub fn store(&self) -> &S {
        &self.store
    }
}
impl<S> MetricReader for RemoteMetricRepository<S>
where
    S: SortedSetStore,
{
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        let key = self.space.key_for(name);
        let raw = self.store.get(&key)?;
        let score = self.store.zscore(&self.space.keys, &key)?;
        self.space.decode(&key, raw.as_deref(), score)
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        let members = self.store.zrange(&self.space.keys)?;
        self.space.decode_members(&self.store, members)
    }
    fn count(&self) -> Result<usize> {
        Ok(self.store.zcard(&self.space.keys)?)
    }
}
impl<S> MetricWriter for RemoteMetricRepository<S>
where
    S: SortedSetStore,
{
    fn set(&self, metric: Metric) -> Result<()> {
        let key = self.space.key_for(&metric.name);
        self.store.zadd(&self.space.keys, &key, metric.value)?;
        self.store.set(&key, &metric.timestamp.to_string())?;
        Ok(())
    }
    fn increment(&self, delta: Delta) -> Result<()> {
        let key = self.space.key_for(&delta.name);
        self.store
            .zincrby(&self.space.keys, &key, delta.value as f64)?;
        self.store.set(&key, &delta.timestamp.to_string())?;
        Ok(())
    }
    fn reset(&self, name: &str) -> Result<()> {
        let key = self.space.key_for(name);
        self.store.zrem(&self.space.keys, &key)?;
        self.store.del(&key)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct RemoteMultiMetricRepository<S> {
    store: S,
    space: KeySpace,
}
impl<S> RemoteMultiMetricRepository<S>
where
    S: SortedSetStore,
{
    pub fn new(store: S) -> Self {
        Self::with_prefix(store, DEFAULT_GROUPS_PREFIX)
    }
    /// An empty `prefix` falls back to [`DEFAULT_GROUPS_PREFIX`].
    pub fn with_prefix(store: S, prefix: &str) -> Self {
        let space = KeySpace::new(prefix, DEFAULT_GROUPS_PREFIX);
        Self { store, space }
    }

    pub fn prefix(&self) -> &str {
        &self.space.prefix
    }
    /// The sorted set tracking group membership.
    pub fn keys_key(&self) -> &str {
        &self.space.keys
    }
    pub fn store(&self) -> &S {
        &self.store
    }

    fn track_membership(&self, group_key: &str) -> Result<()> {
        self.store.zincrby(&self.space.keys, group_key, 0.0)?;
        Ok(())
    }
}
impl<S> MultiMetricRepository for RemoteMultiMetricRepository<S>
where
    S: SortedSetStore,
{
    fn set_group(&self, group: &str, metrics: Vec<Metric>) -> Result<()> {
        let group_key = self.space.key_for(group);
        self.track_membership(&group_key)?;
        for metric in metrics {
            let key = self.space.key_for(&qualify(group, &metric.name));
            self.store.zadd(&group_key, &key, metric.value)?;
            self.store.set(&key, &metric.timestamp.to_string())?;
        }
        Ok(())
    }

    fn increment_group(&self, group: &str, delta: Delta) -> Result<()> {
        let group_key = self.space.key_for(group);
        self.track_membership(&group_key)?;
        let key = self.space.key_for(&qualify(group, &delta.name));
        self.store.zincrby(&group_key, &key, delta.value as f64)?;
        self.store.set(&key, &delta.timestamp.to_string())?;
        Ok(())
    }

    fn find_group(&self, group: &str) -> Result<Vec<Metric>> {
        let group_key = self.space.key_for(group);
        let members = self.store.zrange(&group_key)?;
        self.space.decode_members(&self.store, members)
    }

    fn reset_group(&self, group: &str) -> Result<()> {
        let group_key = self.space.key_for(group);
        if self.store.exists(&group_key)? {
            let members = self.store.zrange(&group_key)?;
            debug!(group, members = members.len(), "resetting metric group");
            for (key, _) in members {
                self.store.del(&key)?;
            }
            self.store.del(&group_key)?;
        }
        self.store.zrem(&self.space.keys, &group_key)?;
        Ok(())
    }

    fn groups(&self) -> Result<Vec<String>> {
        self.store
            .zrange(&self.space.keys)?
            .iter()
            .map(|(key, _)| self.space.name_for(key).map(str::to_string))
            .collect()
    }

    fn count_groups(&self) -> Result<usize> {
        Ok(self.store.zcard(&self.space.keys)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::store::InMemorySortedSetStore;

    fn multi() -> RemoteMultiMetricRepository<Arc<InMemorySortedSetStore>> {
        RemoteMultiMetricRepository::new(Arc::new(InMemorySortedSetStore::new()))
    }

    #[test]
    fn key_layout() {
        let repo = RemoteMetricRepository::with_prefix(InMemorySortedSetStore::new(), "app");
        assert_eq!(repo.prefix(), "app.");
        assert_eq!(repo.keys_key(), "keys.app");
        let repo = RemoteMultiMetricRepository::with_prefix(InMemorySortedSetStore::new(), "");
        assert_eq!(repo.prefix(), DEFAULT_GROUPS_PREFIX);
        assert_eq!(repo.keys_key(), "keys.metrics.groups");
    }

    #[test]
    fn single_metric_round_trip() {
        let repo = RemoteMetricRepository::new(InMemorySortedSetStore::new());
        repo.set(Metric::at("gauge.foo", 1.5, 7)).unwrap();
        assert_eq!(
            repo.find_one("gauge.foo").unwrap(),
            Some(Metric::at("gauge.foo", 1.5, 7))
        );
        assert_eq!(repo.find_one("gauge.bar").unwrap(), None);
        assert_eq!(repo.store().get("metrics.gauge.foo").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn single_metric_increment_and_reset() {
        let repo = RemoteMetricRepository::new(InMemorySortedSetStore::new());
        repo.increment(Delta::at("foo.bar", 2, 1)).unwrap();
        repo.increment(Delta::at("foo.bar", 3, 2)).unwrap();
        repo.set(Metric::at("gauge.x", 1.0, 0)).unwrap();
        assert_eq!(repo.find_one("foo.bar").unwrap().unwrap().value, 5.0);
        assert_eq!(repo.count().unwrap(), 2);
        assert_eq!(repo.find_all().unwrap().len(), 2);

        repo.reset("foo.bar").unwrap();
        assert_eq!(repo.find_one("foo.bar").unwrap(), None);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn group_set_and_find() {
        let repo = multi();
        repo.set_group(
            "foo",
            vec![Metric::at("a", 1.0, 10), Metric::at("foo.b", 2.0, 20)],
        )
        .unwrap();
        let mut metrics = repo.find_group("foo").unwrap();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            metrics,
            vec![Metric::at("foo.a", 1.0, 10), Metric::at("foo.b", 2.0, 20)]
        );
        assert_eq!(repo.groups().unwrap(), ["foo"]);
    }

    #[test]
    fn group_increment_is_cumulative() {
        let repo = multi();
        repo.increment_group("foo", Delta::at("foo.bar", 2, 1)).unwrap();
        repo.increment_group("foo", Delta::at("bar", 3, 5)).unwrap();
        assert_eq!(
            repo.find_group("foo").unwrap(),
            vec![Metric::at("foo.bar", 5.0, 5)]
        );
    }

    #[test]
    fn reset_group_removes_every_member() {
        let repo = multi();
        repo.set_group("foo", vec![Metric::at("a", 1.0, 0), Metric::at("b", 2.0, 0)])
            .unwrap();
        repo.set_group("bar", vec![Metric::at("a", 3.0, 0)]).unwrap();
        assert_eq!(repo.count_groups().unwrap(), 2);

        repo.reset_group("foo").unwrap();
        assert_eq!(repo.count_groups().unwrap(), 1);
        assert!(repo.find_group("foo").unwrap().is_empty());
        let store = repo.store();
        assert_eq!(store.get("metrics.groups.foo.a").unwrap(), None);
        assert_eq!(store.get("metrics.groups.foo.b").unwrap(), None);
        assert!(!store.exists("metrics.groups.foo").unwrap());
        assert_eq!(repo.find_group("bar").unwrap().len(), 1);
    }

    #[test]
    fn reset_unknown_group_is_harmless() {
        let repo = multi();
        repo.reset_group("nope").unwrap();
        assert_eq!(repo.count_groups().unwrap(), 0);
    }

    #[test]
    fn foreign_key_is_rejected() {
        let repo = multi();
        repo.store().zadd(repo.keys_key(), "bogus", 0.0).unwrap();
        let err = repo.groups().unwrap_err();
        assert!(matches!(err, Error::InvalidKey { ref key, .. } if key == "bogus"));
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let repo = RemoteMetricRepository::new(InMemorySortedSetStore::new());
        repo.set(Metric::at("a", 1.0, 0)).unwrap();
        repo.store().set("metrics.a", "yesterday").unwrap();
        assert!(matches!(
            repo.find_one("a"),
            Err(Error::InvalidTimestamp { .. })
        ));
    }

    #[derive(Debug)]
    struct Offline;
    impl SortedSetStore for Offline {
        fn zadd(&self, _: &str, _: &str, _: f64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn zincrby(&self, _: &str, _: &str, _: f64) -> Result<f64, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn zscore(&self, _: &str, _: &str) -> Result<Option<f64>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn zrange(&self, _: &str) -> Result<Vec<(String, f64)>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn zcard(&self, _: &str) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn zrem(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn mget(&self, _: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
        fn del(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn store_failures_surface() {
        let repo = RemoteMultiMetricRepository::new(Offline);
        assert!(matches!(
            repo.count_groups(),
            Err(Error::Store(StoreError::Unavailable(_)))
        ));
    }
}

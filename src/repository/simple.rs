use std::{collections::BTreeMap, ops::Bound};

use parking_lot::{Mutex, RwLock};
use xxhash_rust::xxh3::xxh3_64;

use crate::{name::normalize_prefix, MetricKey};

pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// Name-ordered store with per-key write serialization.
///
/// Writers of the same key are serialized by one of a fixed number of lock
/// stripes chosen from the key hash. Distinct keys only contend when they
/// hash to the same stripe. Readers never take a stripe.
#[derive(Debug)]
pub struct SimpleInMemoryRepository<T> {
    values: RwLock<BTreeMap<MetricKey, T>>,
    locks: StripedLocks,
}
impl<T> SimpleInMemoryRepository<T> {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_LOCK_STRIPES)
    }
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            locks: StripedLocks::new(stripes),
        }
    }

    pub fn stripes(&self) -> usize {
        self.locks.len()
    }
    pub fn count(&self) -> usize {
        self.values.read().len()
    }
    pub fn set(&self, name: impl Into<MetricKey>, value: T) {
        let name = name.into();
        let _guard = self.locks.for_key(&name).lock();
        self.values.write().insert(name, value);
    }
    pub fn remove(&self, name: &str) -> Option<T> {
        let _guard = self.locks.for_key(name).lock();
        self.values.write().remove(name)
    }
}
impl<T> SimpleInMemoryRepository<T>
where
    T: Clone,
{
    /// Read-modify-write of a single key.
    ///
    /// `f` runs while the key's stripe is held, so it must not call back into
    /// this repository.
    pub fn update<F>(&self, name: &str, f: F) -> T
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let _guard = self.locks.for_key(name).lock();
        let current = self.values.read().get(name).cloned();
        let next = f(current.as_ref());
        self.values.write().insert(name.to_string(), next.clone());
        next
    }

    pub fn find_one(&self, name: &str) -> Option<T> {
        self.values.read().get(name).cloned()
    }
    pub fn find_all(&self) -> Vec<T> {
        self.values.read().values().cloned().collect()
    }
    /// Point-in-time copy of every value under the normalized `prefix`.
    pub fn find_all_with_prefix(&self, prefix: &str) -> Vec<T> {
        let prefix = normalize_prefix(prefix);
        let values = self.values.read();
        values
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .collect()
    }
}
impl<T> Default for SimpleInMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct StripedLocks {
    stripes: Box<[Mutex<()>]>,
}
impl StripedLocks {
    fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }
    fn len(&self) -> usize {
        self.stripes.len()
    }
    fn for_key(&self, key: &str) -> &Mutex<()> {
        let hash = xxh3_64(key.as_bytes());
        let index = (hash % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }
}

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::{
    simple::SimpleInMemoryRepository, MetricReader, MetricWriter, MultiMetricRepository,
    PrefixMetricReader,
};
use crate::{name::qualify, Delta, Metric, Result};

#[derive(Debug, Default)]
pub struct InMemoryMetricRepository {
    metrics: SimpleInMemoryRepository<Metric>,
}
impl InMemoryMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            metrics: SimpleInMemoryRepository::with_stripes(stripes),
        }
    }

    pub fn set(&self, metric: Metric) {
        self.metrics.set(metric.name.clone(), metric);
    }
    /// Adds `delta` to the stored value, starting from zero when absent.
    pub fn increment(&self, delta: Delta) -> Metric {
        self.metrics.update(&delta.name, |current| {
            let base = current.map_or(0.0, |metric| metric.value);
            Metric::at(delta.name.clone(), base + delta.value as f64, delta.timestamp)
        })
    }
    pub fn reset(&self, name: &str) {
        self.metrics.remove(name);
    }
    pub fn find_one(&self, name: &str) -> Option<Metric> {
        self.metrics.find_one(name)
    }
    pub fn find_all(&self) -> Vec<Metric> {
        self.metrics.find_all()
    }
    pub fn find_all_with_prefix(&self, prefix: &str) -> Vec<Metric> {
        self.metrics.find_all_with_prefix(prefix)
    }
    pub fn count(&self) -> usize {
        self.metrics.count()
    }
}
impl MetricReader for InMemoryMetricRepository {
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        Ok(InMemoryMetricRepository::find_one(self, name))
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        Ok(InMemoryMetricRepository::find_all(self))
    }
    fn count(&self) -> Result<usize> {
        Ok(InMemoryMetricRepository::count(self))
    }
}
impl PrefixMetricReader for InMemoryMetricRepository {
    fn find_all_with_prefix(&self, prefix: &str) -> Result<Vec<Metric>> {
        Ok(InMemoryMetricRepository::find_all_with_prefix(self, prefix))
    }
}
impl MetricWriter for InMemoryMetricRepository {
    fn set(&self, metric: Metric) -> Result<()> {
        InMemoryMetricRepository::set(self, metric);
        Ok(())
    }
    fn increment(&self, delta: Delta) -> Result<()> {
        InMemoryMetricRepository::increment(self, delta);
        Ok(())
    }
    fn reset(&self, name: &str) -> Result<()> {
        InMemoryMetricRepository::reset(self, name);
        Ok(())
    }
}

/// Groups layered over an [`InMemoryMetricRepository`]: a member of group
/// `g` is stored as `g.<name>`.
#[derive(Debug, Default)]
pub struct InMemoryMultiMetricRepository {
    repository: InMemoryMetricRepository,
    groups: Mutex<BTreeSet<String>>,
}
impl InMemoryMultiMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_repository(repository: InMemoryMetricRepository) -> Self {
        Self {
            repository,
            groups: Mutex::new(BTreeSet::new()),
        }
    }
    pub fn repository(&self) -> &InMemoryMetricRepository {
        &self.repository
    }

    pub fn set_group(&self, group: &str, metrics: impl IntoIterator<Item = Metric>) {
        for metric in metrics {
            let name = qualify(group, &metric.name);
            let metric = if name == metric.name {
                metric
            } else {
                metric.renamed(name)
            };
            self.repository.set(metric);
        }
        self.groups.lock().insert(group.to_string());
    }
    pub fn increment_group(&self, group: &str, delta: Delta) -> Metric {
        let name = qualify(group, &delta.name);
        let delta = if name == delta.name {
            delta
        } else {
            delta.renamed(name)
        };
        let metric = self.repository.increment(delta);
        self.groups.lock().insert(group.to_string());
        metric
    }
    pub fn find_group(&self, group: &str) -> Vec<Metric> {
        self.repository.find_all_with_prefix(group)
    }
    pub fn reset_group(&self, group: &str) {
        for metric in self.find_group(group) {
            self.repository.reset(&metric.name);
        }
        self.groups.lock().remove(group);
    }
    pub fn groups(&self) -> Vec<String> {
        self.groups.lock().iter().cloned().collect()
    }
    pub fn count_groups(&self) -> usize {
        self.groups.lock().len()
    }
}
impl MultiMetricRepository for InMemoryMultiMetricRepository {
    fn set_group(&self, group: &str, metrics: Vec<Metric>) -> Result<()> {
        InMemoryMultiMetricRepository::set_group(self, group, metrics);
        Ok(())
    }
    fn increment_group(&self, group: &str, delta: Delta) -> Result<()> {
        InMemoryMultiMetricRepository::increment_group(self, group, delta);
        Ok(())
    }
    fn find_group(&self, group: &str) -> Result<Vec<Metric>> {
        Ok(InMemoryMultiMetricRepository::find_group(self, group))
    }
    fn reset_group(&self, group: &str) -> Result<()> {
        InMemoryMultiMetricRepository::reset_group(self, group);
        Ok(())
    }
    fn groups(&self) -> Result<Vec<String>> {
        Ok(InMemoryMultiMetricRepository::groups(self))
    }
    fn count_groups(&self) -> Result<usize> {
        Ok(InMemoryMultiMetricRepository::count_groups(self))
    }
}

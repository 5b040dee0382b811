use std::sync::Arc;

use crate::{Delta, Metric, Result};

pub mod in_mem;
pub mod remote;
pub mod simple;
pub mod store;

pub use in_mem::{InMemoryMetricRepository, InMemoryMultiMetricRepository};
pub use remote::{RemoteMetricRepository, RemoteMultiMetricRepository, SortedSetStore};
pub use simple::SimpleInMemoryRepository;
pub use store::InMemorySortedSetStore;

pub trait MetricReader: Send + Sync {
    /// `Ok(None)` when nothing is stored under `name`.
    fn find_one(&self, name: &str) -> Result<Option<Metric>>;
    fn find_all(&self) -> Result<Vec<Metric>>;
    fn count(&self) -> Result<usize>;
}

pub trait PrefixMetricReader: Send + Sync {
    /// `prefix`, `prefix.` and `prefix.*` are equivalent.
    fn find_all_with_prefix(&self, prefix: &str) -> Result<Vec<Metric>>;
}

pub trait MetricWriter: Send + Sync {
    fn set(&self, metric: Metric) -> Result<()>;
    fn increment(&self, delta: Delta) -> Result<()>;
    fn reset(&self, name: &str) -> Result<()>;
}

pub trait MetricRepository: MetricReader + MetricWriter {}
impl<T> MetricRepository for T where T: MetricReader + MetricWriter {}

/// Stores metrics in named groups sharing the `group.` prefix.
pub trait MultiMetricRepository: Send + Sync {
    fn set_group(&self, group: &str, metrics: Vec<Metric>) -> Result<()>;
    fn increment_group(&self, group: &str, delta: Delta) -> Result<()>;
    fn find_group(&self, group: &str) -> Result<Vec<Metric>>;
    fn reset_group(&self, group: &str) -> Result<()>;
    fn groups(&self) -> Result<Vec<String>>;
    fn count_groups(&self) -> Result<usize>;
}

impl<R> MetricReader for Arc<R>
where
    R: MetricReader + ?Sized,
{
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        (**self).find_one(name)
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        (**self).find_all()
    }
    fn count(&self) -> Result<usize> {
        (**self).count()
    }
}
impl<R> PrefixMetricReader for Arc<R>
where
    R: PrefixMetricReader + ?Sized,
{
    fn find_all_with_prefix(&self, prefix: &str) -> Result<Vec<Metric>> {
        (**self).find_all_with_prefix(prefix)
    }
}
impl<W> MetricWriter for Arc<W>
where
    W: MetricWriter + ?Sized,
{
    fn set(&self, metric: Metric) -> Result<()> {
        (**self).set(metric)
    }
    fn increment(&self, delta: Delta) -> Result<()> {
        (**self).increment(delta)
    }
    fn reset(&self, name: &str) -> Result<()> {
        (**self).reset(name)
    }
}
impl<M> MultiMetricRepository for Arc<M>
where
    M: MultiMetricRepository + ?Sized,
{
    fn set_group(&self, group: &str, metrics: Vec<Metric>) -> Result<()> {
        (**self).set_group(group, metrics)
    }
    fn increment_group(&self, group: &str, delta: Delta) -> Result<()> {
        (**self).increment_group(group, delta)
    }
    fn find_group(&self, group: &str) -> Result<Vec<Metric>> {
        (**self).find_group(group)
    }
    fn reset_group(&self, group: &str) -> Result<()> {
        (**self).reset_group(group)
    }
    fn groups(&self) -> Result<Vec<String>> {
        (**self).groups()
    }
    fn count_groups(&self) -> Result<usize> {
        (**self).count_groups()
    }
}

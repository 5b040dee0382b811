//! Instrumentation entry points.
//!
//! Call sites use short names (`"hits"`); the services route them under the
//! conventional prefixes (`"counter.hits"`, `"gauge.hits"`). Writes are
//! fire-and-forget: a failing writer is logged, never reported back.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::{
    buf::{CounterBuffers, GaugeBuffers},
    name::{wrap, MetricKind},
    repository::MetricWriter,
    Delta, Metric, MetricKey,
};

const COUNTER_KINDS: [MetricKind; 2] = [MetricKind::Counter, MetricKind::Meter];
const GAUGE_KINDS: [MetricKind; 3] = [MetricKind::Gauge, MetricKind::Histogram, MetricKind::Timer];

pub trait CounterService: Send + Sync {
    fn increment(&self, name: &str);
    fn decrement(&self, name: &str);
    fn reset(&self, name: &str);
}

pub trait GaugeService: Send + Sync {
    fn submit(&self, name: &str, value: f64);
}

pub fn counter_name(name: &str) -> String {
    wrap(name, MetricKind::Counter, &COUNTER_KINDS)
}

pub fn gauge_name(name: &str) -> String {
    wrap(name, MetricKind::Gauge, &GAUGE_KINDS)
}

/// Per-instance memo of wrapped names, so hot call sites do not allocate.
#[derive(Debug, Default)]
struct NameCache {
    names: DashMap<String, MetricKey>,
}
impl NameCache {
    fn get(&self, name: &str, route: fn(&str) -> String) -> MetricKey {
        if let Some(wrapped) = self.names.get(name) {
            return wrapped.clone();
        }
        self.names
            .entry(name.to_string())
            .or_insert_with(|| route(name))
            .clone()
    }
}

#[derive(Debug)]
pub struct BufferCounterService {
    buffers: Arc<CounterBuffers>,
    names: NameCache,
}
impl BufferCounterService {
    pub fn new(buffers: Arc<CounterBuffers>) -> Self {
        Self {
            buffers,
            names: NameCache::default(),
        }
    }
}
impl CounterService for BufferCounterService {
    fn increment(&self, name: &str) {
        self.buffers.increment(&self.names.get(name, counter_name), 1);
    }
    fn decrement(&self, name: &str) {
        self.buffers.increment(&self.names.get(name, counter_name), -1);
    }
    fn reset(&self, name: &str) {
        self.buffers.reset(&self.names.get(name, counter_name));
    }
}

#[derive(Debug)]
pub struct BufferGaugeService {
    buffers: Arc<GaugeBuffers>,
    names: NameCache,
}
impl BufferGaugeService {
    pub fn new(buffers: Arc<GaugeBuffers>) -> Self {
        Self {
            buffers,
            names: NameCache::default(),
        }
    }
}
impl GaugeService for BufferGaugeService {
    fn submit(&self, name: &str, value: f64) {
        self.buffers.set(&self.names.get(name, gauge_name), value);
    }
}

/// Writes straight into a [`MetricWriter`].
#[derive(Debug)]
pub struct DefaultCounterService<W> {
    writer: W,
}
impl<W: MetricWriter> DefaultCounterService<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    fn apply(&self, name: &str, amount: i64) {
        let name = counter_name(name);
        if let Err(e) = self.writer.increment(Delta::new(name.as_str(), amount)) {
            warn!(error = %e, metric = %name, "failed to increment counter");
        }
    }
}
impl<W: MetricWriter> CounterService for DefaultCounterService<W> {
    fn increment(&self, name: &str) {
        self.apply(name, 1);
    }
    fn decrement(&self, name: &str) {
        self.apply(name, -1);
    }
    fn reset(&self, name: &str) {
        let name = counter_name(name);
        if let Err(e) = self.writer.reset(&name) {
            warn!(error = %e, metric = %name, "failed to reset counter");
        }
    }
}

#[derive(Debug)]
pub struct DefaultGaugeService<W> {
    writer: W,
}
impl<W: MetricWriter> DefaultGaugeService<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}
impl<W: MetricWriter> GaugeService for DefaultGaugeService<W> {
    fn submit(&self, name: &str, value: f64) {
        let name = gauge_name(name);
        if let Err(e) = self.writer.set(Metric::new(name.as_str(), value)) {
            warn!(error = %e, metric = %name, "failed to submit gauge");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        remote::SortedSetStore, InMemoryMetricRepository, RemoteMetricRepository,
    };
    use crate::StoreError;

    #[test]
    fn name_routing() {
        assert_eq!(counter_name("hits"), "counter.hits");
        assert_eq!(counter_name("meter.hits"), "meter.hits");
        assert_eq!(gauge_name("cpu"), "gauge.cpu");
        assert_eq!(gauge_name("timer.req"), "timer.req");
        assert_eq!(gauge_name("histogram.size"), "histogram.size");
        assert_eq!(gauge_name("counter.x"), "gauge.counter.x");
    }

    #[test]
    fn buffer_services_write_buffers() {
        let counters = Arc::new(CounterBuffers::new());
        let gauges = Arc::new(GaugeBuffers::new());
        let counter = BufferCounterService::new(Arc::clone(&counters));
        let gauge = BufferGaugeService::new(Arc::clone(&gauges));

        counter.increment("hits");
        counter.increment("hits");
        counter.decrement("counter.hits");
        gauge.submit("cpu", 0.5);

        assert_eq!(counters.find("counter.hits").unwrap().value, 1.0);
        assert_eq!(gauges.find("gauge.cpu").unwrap().value, 0.5);

        counter.reset("hits");
        assert_eq!(counters.find("counter.hits").unwrap().value, 0.0);
    }

    #[test]
    fn default_services_write_repository() {
        let repo = Arc::new(InMemoryMetricRepository::new());
        let counter = DefaultCounterService::new(Arc::clone(&repo));
        let gauge = DefaultGaugeService::new(Arc::clone(&repo));

        counter.increment("hits");
        counter.increment("hits");
        gauge.submit("timer.req", 12.0);
        assert_eq!(repo.find_one("counter.hits").unwrap().value, 2.0);
        assert_eq!(repo.find_one("timer.req").unwrap().value, 12.0);

        counter.reset("hits");
        assert_eq!(repo.find_one("counter.hits"), None);
    }

    #[derive(Debug)]
    struct Broken;
    impl SortedSetStore for Broken {
        fn zadd(&self, _: &str, _: &str, _: f64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn zincrby(&self, _: &str, _: &str, _: f64) -> Result<f64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn zscore(&self, _: &str, _: &str) -> Result<Option<f64>, StoreError> {
            Ok(None)
        }
        fn zrange(&self, _: &str) -> Result<Vec<(String, f64)>, StoreError> {
            Ok(vec![])
        }
        fn zcard(&self, _: &str) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn zrem(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            Ok(vec![None; keys.len()])
        }
        fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn del(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[test]
    fn writer_failures_are_swallowed() {
        let counter = DefaultCounterService::new(RemoteMetricRepository::new(Broken));
        counter.increment("hits");
        counter.reset("hits");
        let gauge = DefaultGaugeService::new(RemoteMetricRepository::new(Broken));
        gauge.submit("cpu", 1.0);
    }
}

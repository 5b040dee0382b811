use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;

use crate::{
    name::normalize_prefix,
    now,
    repository::{MetricReader, PrefixMetricReader},
    Metric, MetricKey, Result, Time,
};

/// A single mutable cell behind a metric name.
pub trait Buffer: Default + Send + Sync {
    fn timestamp(&self) -> Time;
    fn to_metric(&self, name: &str) -> Metric;
}

#[derive(Debug, Default)]
pub struct CounterBuffer {
    value: AtomicI64,
    timestamp: AtomicU64,
}
impl CounterBuffer {
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
    /// Publishes the value written before it.
    fn touch(&self, time: Time) {
        self.timestamp.store(time, Ordering::Release);
    }
}
impl Buffer for CounterBuffer {
    fn timestamp(&self) -> Time {
        self.timestamp.load(Ordering::Acquire)
    }
    fn to_metric(&self, name: &str) -> Metric {
        let timestamp = self.timestamp();
        Metric::at(name, self.value() as f64, timestamp)
    }
}

/// Holds the bits of an `f64`.
#[derive(Debug, Default)]
pub struct GaugeBuffer {
    value: AtomicU64,
    timestamp: AtomicU64,
}
impl GaugeBuffer {
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
    fn touch(&self, time: Time) {
        self.timestamp.store(time, Ordering::Release);
    }
}
impl Buffer for GaugeBuffer {
    fn timestamp(&self) -> Time {
        self.timestamp.load(Ordering::Acquire)
    }
    fn to_metric(&self, name: &str) -> Metric {
        let timestamp = self.timestamp();
        Metric::at(name, self.value(), timestamp)
    }
}

/// Concurrent name to buffer map. Buffers are created on first write and
/// never removed.
#[derive(Debug)]
pub struct Buffers<B> {
    buffers: DashMap<MetricKey, B>,
}
impl<B: Buffer> Buffers<B> {
    pub fn new() -> Self {
        Self {
            buffers: DashMap::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<Metric> {
        self.buffers.get(name).map(|buffer| buffer.to_metric(name))
    }
    pub fn count(&self) -> usize {
        self.buffers.len()
    }
    /// Visits a snapshot of every buffer whose name passes `predicate`.
    pub fn for_each(&self, mut predicate: impl FnMut(&str) -> bool, mut f: impl FnMut(Metric)) {
        for entry in self.buffers.iter() {
            if predicate(entry.key()) {
                f(entry.value().to_metric(entry.key()));
            }
        }
    }

    fn with(&self, name: &str, f: impl FnOnce(&B)) {
        if let Some(buffer) = self.buffers.get(name) {
            f(&buffer);
            return;
        }
        let buffer = self.buffers.entry(name.to_string()).or_default();
        f(&buffer);
    }
}
impl<B: Buffer> Default for Buffers<B> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CounterBuffers = Buffers<CounterBuffer>;
pub type GaugeBuffers = Buffers<GaugeBuffer>;

impl Buffers<CounterBuffer> {
    pub fn increment(&self, name: &str, delta: i64) {
        self.with(name, |buffer| {
            buffer.add(delta);
            buffer.touch(now());
        });
    }
    pub fn reset(&self, name: &str) {
        self.with(name, |buffer| {
            buffer.reset();
            buffer.touch(now());
        });
    }
}
impl Buffers<GaugeBuffer> {
    pub fn set(&self, name: &str, value: f64) {
        self.with(name, |buffer| {
            buffer.set(value);
            buffer.touch(now());
        });
    }
}

/// Reads counters first, then gauges.
#[derive(Debug, Clone)]
pub struct BufferMetricReader {
    counters: Arc<CounterBuffers>,
    gauges: Arc<GaugeBuffers>,
}
impl BufferMetricReader {
    pub fn new(counters: Arc<CounterBuffers>, gauges: Arc<GaugeBuffers>) -> Self {
        Self { counters, gauges }
    }

    fn collect(&self, mut predicate: impl FnMut(&str) -> bool) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(self.counters.count() + self.gauges.count());
        self.counters
            .for_each(&mut predicate, |metric| metrics.push(metric));
        self.gauges.for_each(predicate, |metric| metrics.push(metric));
        metrics
    }
}
impl MetricReader for BufferMetricReader {
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        Ok(self
            .counters
            .find(name)
            .or_else(|| self.gauges.find(name)))
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        Ok(self.collect(|_| true))
    }
    fn count(&self) -> Result<usize> {
        Ok(self.counters.count() + self.gauges.count())
    }
}
impl PrefixMetricReader for BufferMetricReader {
    fn find_all_with_prefix(&self, prefix: &str) -> Result<Vec<Metric>> {
        let prefix = normalize_prefix(prefix);
        Ok(self.collect(|name| name.starts_with(&prefix)))
    }
}

//! Gauges that also keep running statistics.
//!
//! A rich gauge is exported as a metric group named after the gauge, with one
//! member per statistic (`<name>.val`, `<name>.avg`, ...).

use crate::{
    name::normalize_prefix,
    now,
    repository::{MetricWriter, MultiMetricRepository, SimpleInMemoryRepository},
    Delta, Metric, MetricKey, Result,
};

pub const VAL: &str = "val";
pub const AVG: &str = "avg";
pub const MIN: &str = "min";
pub const MAX: &str = "max";
pub const COUNT: &str = "count";
pub const ALPHA: &str = "alpha";

const NO_ALPHA: f64 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RichGauge {
    name: MetricKey,
    value: f64,
    average: f64,
    min: f64,
    max: f64,
    count: u64,
    alpha: f64,
}
impl RichGauge {
    pub fn new(name: impl Into<MetricKey>) -> Self {
        Self {
            name: name.into(),
            value: 0.0,
            average: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            count: 0,
            alpha: NO_ALPHA,
        }
    }
    pub fn with_value(name: impl Into<MetricKey>, value: f64) -> Self {
        let mut gauge = Self::new(name);
        gauge.set(value);
        gauge
    }
    /// Switches the average to an exponential moving average. Only
    /// `0 < alpha < 1` enables it; anything else keeps the arithmetic mean.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = if alpha > 0.0 && alpha < 1.0 {
            alpha
        } else {
            NO_ALPHA
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value(&self) -> f64 {
        self.value
    }
    pub fn average(&self) -> f64 {
        self.average
    }
    pub fn min(&self) -> f64 {
        self.min
    }
    pub fn max(&self) -> f64 {
        self.max
    }
    pub fn count(&self) -> u64 {
        self.count
    }
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        // The moving average folds in the previous reading, not `value`.
        self.average = if self.alpha > 0.0 && self.count > 0 {
            self.alpha * self.value + (1.0 - self.alpha) * self.average
        } else {
            (self.average * self.count as f64 + value) / (self.count + 1) as f64
        };
        self.count += 1;
        self.value = value;
    }

    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.name)).with_alpha(self.alpha);
    }

    pub fn to_metrics(&self) -> Vec<Metric> {
        let timestamp = now();
        let member = |suffix: &str, value: f64| {
            Metric::at(format!("{}.{suffix}", self.name), value, timestamp)
        };
        vec![
            member(VAL, self.value),
            member(AVG, self.average),
            member(MIN, self.min),
            member(MAX, self.max),
            member(COUNT, self.count as f64),
            member(ALPHA, self.alpha),
        ]
    }

    /// Rebuilds a gauge from the members of its group. Unknown members are
    /// ignored, `None` when nothing belongs to `name`.
    pub fn from_metrics(name: &str, metrics: &[Metric]) -> Option<Self> {
        let prefix = normalize_prefix(name);
        let mut gauge = Self::new(name);
        let mut seen = false;
        for metric in metrics {
            let Some(suffix) = metric.name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let field = match suffix {
                VAL => &mut gauge.value,
                AVG => &mut gauge.average,
                MIN => &mut gauge.min,
                MAX => &mut gauge.max,
                ALPHA => &mut gauge.alpha,
                COUNT => {
                    gauge.count = metric.value.max(0.0) as u64;
                    seen = true;
                    continue;
                }
                _ => continue,
            };
            *field = metric.value;
            seen = true;
        }
        seen.then_some(gauge)
    }
}

pub trait RichGaugeReader: Send + Sync {
    fn find_one(&self, name: &str) -> Result<Option<RichGauge>>;
    fn find_all(&self) -> Result<Vec<RichGauge>>;
    fn count(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct InMemoryRichGaugeRepository {
    gauges: SimpleInMemoryRepository<RichGauge>,
}
impl InMemoryRichGaugeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metric: &Metric) -> RichGauge {
        self.gauges.update(&metric.name, |current| {
            let mut gauge = current
                .cloned()
                .unwrap_or_else(|| RichGauge::new(metric.name.as_str()));
            gauge.set(metric.value);
            gauge
        })
    }
    pub fn reset(&self, name: &str) {
        self.gauges.remove(name);
    }
}
impl RichGaugeReader for InMemoryRichGaugeRepository {
    fn find_one(&self, name: &str) -> Result<Option<RichGauge>> {
        Ok(self.gauges.find_one(name))
    }
    fn find_all(&self) -> Result<Vec<RichGauge>> {
        Ok(self.gauges.find_all())
    }
    fn count(&self) -> Result<usize> {
        Ok(self.gauges.count())
    }
}
/// Gauges only take readings; an increment is recorded as a reading of the
/// current value plus the delta.
impl MetricWriter for InMemoryRichGaugeRepository {
    fn set(&self, metric: Metric) -> Result<()> {
        InMemoryRichGaugeRepository::set(self, &metric);
        Ok(())
    }
    fn increment(&self, delta: Delta) -> Result<()> {
        self.gauges.update(&delta.name, |current| {
            let mut gauge = current
                .cloned()
                .unwrap_or_else(|| RichGauge::new(delta.name.as_str()));
            let value = gauge.value() + delta.value as f64;
            gauge.set(value);
            gauge
        });
        Ok(())
    }
    fn reset(&self, name: &str) -> Result<()> {
        InMemoryRichGaugeRepository::reset(self, name);
        Ok(())
    }
}

/// Reads rich gauges back from the groups written by
/// [`crate::exporter::RichGaugeExporter`].
#[derive(Debug)]
pub struct MultiMetricRichGaugeReader<M> {
    repository: M,
}
impl<M> MultiMetricRichGaugeReader<M>
where
    M: MultiMetricRepository,
{
    pub fn new(repository: M) -> Self {
        Self { repository }
    }
}
impl<M> RichGaugeReader for MultiMetricRichGaugeReader<M>
where
    M: MultiMetricRepository,
{
    fn find_one(&self, name: &str) -> Result<Option<RichGauge>> {
        let metrics = self.repository.find_group(name)?;
        Ok(RichGauge::from_metrics(name, &metrics))
    }
    fn find_all(&self) -> Result<Vec<RichGauge>> {
        let mut gauges = vec![];
        for group in self.repository.groups()? {
            if let Some(gauge) = self.find_one(&group)? {
                gauges.push(gauge);
            }
        }
        Ok(gauges)
    }
    fn count(&self) -> Result<usize> {
        self.repository.count_groups()
    }
}

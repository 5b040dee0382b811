use std::{
    collections::{BTreeMap, HashMap},
    io,
    time::Duration,
};

use anyhow::Context;
use tokio::{sync::oneshot, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    codec::{decode_frame, encode_frame, Sample, MAX_FRAME_SAMPLES},
    name::simple_match,
    now,
    repository::{MetricReader, MetricWriter, MultiMetricRepository, PrefixMetricReader},
    rich_gauge::RichGaugeReader,
    Delta, Metric, Time,
};

pub trait Exporter {
    fn export(&mut self) -> anyhow::Result<()>;
}
impl<E: Exporter + ?Sized> Exporter for Box<E> {
    fn export(&mut self) -> anyhow::Result<()> {
        (**self).export()
    }
}

/// Runs `exporter` once and logs a failure instead of returning it.
pub fn export_quietly<E: Exporter + ?Sized>(exporter: &mut E) {
    if let Err(e) = exporter.export() {
        warn!(error = %e, "metric export failed");
    }
}

/// Decides which timestamps are new enough to export.
#[derive(Debug, Clone, Default)]
pub struct TimestampFilter {
    earliest: Time,
    latest: Option<Time>,
    ignore: bool,
}
impl TimestampFilter {
    pub fn new(earliest: Time, ignore: bool) -> Self {
        Self {
            earliest,
            latest: None,
            ignore,
        }
    }
    pub fn accepts(&self, timestamp: Time) -> bool {
        if self.ignore {
            return true;
        }
        timestamp >= self.earliest && self.latest.is_none_or(|latest| timestamp >= latest)
    }
    /// Records that everything up to `time` has been exported.
    pub fn mark(&mut self, time: Time) {
        self.latest = Some(time);
    }
}

/// Include and exclude globs. No includes means "everything".
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}
impl NameFilter {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self { includes, excludes }
    }
    pub fn accepts(&self, name: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|p| simple_match(p, name));
        included && !self.excludes.iter().any(|p| simple_match(p, name))
    }
}

/// Copies metrics from a reader into a writer.
#[derive(Debug)]
pub struct MetricCopyExporter<R, W> {
    reader: R,
    writer: W,
    names: NameFilter,
    timestamps: TimestampFilter,
    send_counter_deltas: bool,
    counts: HashMap<String, i64>,
}
impl<R, W> MetricCopyExporter<R, W>
where
    R: MetricReader,
    W: MetricWriter,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            names: NameFilter::default(),
            timestamps: TimestampFilter::default(),
            send_counter_deltas: false,
            counts: HashMap::new(),
        }
    }
    pub fn with_names(mut self, names: NameFilter) -> Self {
        self.names = names;
        self
    }
    pub fn with_timestamps(mut self, timestamps: TimestampFilter) -> Self {
        self.timestamps = timestamps;
        self
    }
    /// Send `counter.*` metrics as increments of the change since the last
    /// export instead of absolute values.
    pub fn with_counter_deltas(mut self, enabled: bool) -> Self {
        self.send_counter_deltas = enabled;
        self
    }

    /// The change since the last count the writer accepted.
    fn delta(&self, metric: &Metric) -> Delta {
        let previous = self.counts.get(&metric.name).copied().unwrap_or(0);
        Delta::at(
            metric.name.as_str(),
            metric.value as i64 - previous,
            metric.timestamp,
        )
    }
}
impl<R, W> Exporter for MetricCopyExporter<R, W>
where
    R: MetricReader,
    W: MetricWriter,
{
    fn export(&mut self) -> anyhow::Result<()> {
        let started = now();
        let metrics = self.reader.find_all().context("failed to read metrics")?;
        let mut copied = 0;
        for metric in metrics {
            if !self.names.accepts(&metric.name) || !self.timestamps.accepts(metric.timestamp) {
                continue;
            }
            if self.send_counter_deltas && metric.name.starts_with("counter.") {
                let delta = self.delta(&metric);
                self.writer.increment(delta)?;
                self.counts.insert(metric.name, metric.value as i64);
            } else {
                self.writer.set(metric)?;
            }
            copied += 1;
        }
        self.timestamps.mark(started);
        debug!(copied, "copied metrics");
        Ok(())
    }
}

/// Copies everything under each prefix into a group of the same name.
#[derive(Debug)]
pub struct PrefixMetricGroupExporter<R, M> {
    reader: R,
    writer: M,
    groups: Vec<String>,
    timestamps: TimestampFilter,
}
impl<R, M> PrefixMetricGroupExporter<R, M>
where
    R: PrefixMetricReader,
    M: MultiMetricRepository,
{
    pub fn new(reader: R, writer: M, groups: Vec<String>) -> Self {
        Self {
            reader,
            writer,
            groups,
            timestamps: TimestampFilter::default(),
        }
    }
    pub fn with_timestamps(mut self, timestamps: TimestampFilter) -> Self {
        self.timestamps = timestamps;
        self
    }
}
impl<R, M> Exporter for PrefixMetricGroupExporter<R, M>
where
    R: PrefixMetricReader,
    M: MultiMetricRepository,
{
    fn export(&mut self) -> anyhow::Result<()> {
        let started = now();
        for group in &self.groups {
            let metrics: Vec<_> = self
                .reader
                .find_all_with_prefix(group)?
                .into_iter()
                .filter(|metric| self.timestamps.accepts(metric.timestamp))
                .collect();
            if metrics.is_empty() {
                continue;
            }
            self.writer
                .set_group(group, metrics)
                .with_context(|| format!("failed to write group {group}"))?;
        }
        self.timestamps.mark(started);
        Ok(())
    }
}

/// Writes every rich gauge as a group named after the gauge.
#[derive(Debug)]
pub struct RichGaugeExporter<G, M> {
    reader: G,
    writer: M,
}
impl<G, M> RichGaugeExporter<G, M>
where
    G: RichGaugeReader,
    M: MultiMetricRepository,
{
    pub fn new(reader: G, writer: M) -> Self {
        Self { reader, writer }
    }
}
impl<G, M> Exporter for RichGaugeExporter<G, M>
where
    G: RichGaugeReader,
    M: MultiMetricRepository,
{
    fn export(&mut self) -> anyhow::Result<()> {
        for gauge in self.reader.find_all()? {
            self.writer.set_group(gauge.name(), gauge.to_metrics())?;
        }
        Ok(())
    }
}

/// Ships frames to a collector with a blocking HTTP POST per export.
#[derive(Debug)]
pub struct HttpExporter<R> {
    reader: R,
    client: ureq::Agent,
    url: String,
    buf: Vec<u8>,
    names: NameFilter,
    timestamps: TimestampFilter,
}
impl<R> HttpExporter<R>
where
    R: MetricReader,
{
    pub fn new(reader: R, url: String, timeout: Duration) -> Self {
        let client = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            reader,
            client,
            url,
            buf: vec![],
            names: NameFilter::default(),
            timestamps: TimestampFilter::default(),
        }
    }
    pub fn with_names(mut self, names: NameFilter) -> Self {
        self.names = names;
        self
    }
}
impl<R> Exporter for HttpExporter<R>
where
    R: MetricReader,
{
    /// Blocking I/O. Metrics stay pending until a POST succeeds.
    fn export(&mut self) -> anyhow::Result<()> {
        let started = now();
        let mut series: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        for metric in self.reader.find_all()? {
            if self.names.accepts(&metric.name) && self.timestamps.accepts(metric.timestamp) {
                let sample = Sample::from(&metric);
                series.entry(metric.name).or_default().push(sample);
            }
        }
        if series.is_empty() {
            return Ok(());
        }
        self.buf.clear();
        for (name, samples) in &series {
            for chunk in samples.chunks(MAX_FRAME_SAMPLES) {
                encode_frame(&mut self.buf, name, chunk)
                    .with_context(|| format!("failed to encode {name}"))?;
            }
        }
        self.client
            .post(&self.url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&self.buf)
            .with_context(|| format!("failed to post metrics to {}", self.url))?;
        self.timestamps.mark(started);
        debug!(series = series.len(), bytes = self.buf.len(), "posted metrics");
        Ok(())
    }
}

/// Runs several exporters in turn. One failing exporter does not stop the
/// others.
#[derive(Default)]
pub struct MetricExporters {
    exporters: Vec<(String, Box<dyn Exporter + Send>)>,
}
impl MetricExporters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, name: impl Into<String>, exporter: impl Exporter + Send + 'static) {
        self.exporters.push((name.into(), Box::new(exporter)));
    }
    pub fn len(&self) -> usize {
        self.exporters.len()
    }
    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}
impl Exporter for MetricExporters {
    fn export(&mut self) -> anyhow::Result<()> {
        for (name, exporter) in &mut self.exporters {
            if let Err(e) = exporter.export() {
                warn!(exporter = %name, error = %e, "metric export failed");
            }
        }
        Ok(())
    }
}
impl core::fmt::Debug for MetricExporters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<_> = self.exporters.iter().map(|(name, _)| name).collect();
        f.debug_struct("MetricExporters")
            .field("exporters", &names)
            .finish()
    }
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Calls `exporter` every `interval` on the blocking pool until `shutdown`
/// fires or its sender is dropped, then exports one last time. A zero
/// `interval` is raised to one millisecond.
pub fn spawn_scheduled<E>(
    mut exporter: E,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()>
where
    E: Exporter + Send + 'static,
{
    let interval = if interval.is_zero() {
        warn!("zero export interval, using {MIN_INTERVAL:?}");
        MIN_INTERVAL
    } else {
        interval
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => break,
            }
            let task = tokio::task::spawn_blocking(move || {
                export_quietly(&mut exporter);
                exporter
            });
            exporter = match task.await {
                Ok(exporter) => exporter,
                Err(e) => {
                    warn!(error = %e, "metric export task aborted");
                    return;
                }
            };
        }
        let task = tokio::task::spawn_blocking(move || export_quietly(&mut exporter));
        if let Err(e) = task.await {
            warn!(error = %e, "final metric export aborted");
        }
    })
}

/// Reads frames until the stream ends and writes every sample into
/// `writer`. Returns the number of samples read.
///
/// Writer failures are logged and skipped; only a malformed stream is an
/// error.
pub async fn decode_copy<R, W>(rdr: &mut R, writer: &W) -> io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
    W: MetricWriter + ?Sized,
{
    let mut key = String::new();
    let mut samples = vec![];
    let mut read = 0;
    while decode_frame(rdr, &mut key, &mut samples).await? {
        for sample in &samples {
            let metric = Metric::at(key.as_str(), sample.value, sample.time);
            if let Err(e) = writer.set(metric) {
                warn!(error = %e, metric = %key, "failed to store ingested metric");
            }
        }
        read += samples.len();
        tokio::task::yield_now().await;
    }
    Ok(read)
}

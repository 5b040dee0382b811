//! Read-only view that folds raw metric names into canonical ones.
//!
//! Raw names such as `host1.app.counter.hits` and `host2.app.counter.hits`
//! are rewritten by a [`KeyPattern`] into `aggregate.counter.hits` and
//! combined: counters are summed, anything else keeps the latest value.

use std::collections::{btree_map::Entry, BTreeMap};

use crate::{
    name::{normalize_prefix, SEPARATOR},
    repository::MetricReader,
    Metric, Result,
};

pub const DEFAULT_KEY_PATTERN: &str = "d.d.k.d";
pub const DEFAULT_AGGREGATE_PREFIX: &str = "aggregate.";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// `k`
    Key,
    /// `d`
    Discard,
    Literal(String),
}

/// Dot-separated segment classifier: `k` keeps the raw segment, `d` drops
/// it, any other token must match the raw segment exactly. Raw segments
/// past the end of the pattern are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    segments: Vec<Segment>,
}
impl KeyPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split(SEPARATOR)
            .filter(|token| !token.is_empty())
            .map(|token| match token {
                "k" => Segment::Key,
                "d" => Segment::Discard,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// `None` when `name` is shorter than the pattern or a literal does not
    /// match.
    pub fn source_key(&self, name: &str) -> Option<String> {
        let raw: Vec<&str> = name.split(SEPARATOR).collect();
        if raw.len() < self.segments.len() {
            return None;
        }
        let mut kept = Vec::with_capacity(raw.len());
        for (segment, value) in self.segments.iter().zip(&raw) {
            match segment {
                Segment::Key => kept.push(*value),
                Segment::Discard => {}
                Segment::Literal(literal) if literal.as_str() == *value => {}
                Segment::Literal(_) => return None,
            }
        }
        kept.extend(&raw[self.segments.len()..]);
        if kept.is_empty() {
            return None;
        }
        Some(kept.join("."))
    }
}
impl Default for KeyPattern {
    fn default() -> Self {
        Self::parse(DEFAULT_KEY_PATTERN)
    }
}

fn is_counter(key: &str) -> bool {
    key.split(SEPARATOR).any(|segment| segment == "counter")
}

#[derive(Debug)]
pub struct AggregateMetricReader<R> {
    source: R,
    pattern: KeyPattern,
    prefix: String,
}
impl<R> AggregateMetricReader<R>
where
    R: MetricReader,
{
    pub fn new(source: R) -> Self {
        Self {
            source,
            pattern: KeyPattern::default(),
            prefix: DEFAULT_AGGREGATE_PREFIX.to_string(),
        }
    }
    pub fn with_key_pattern(mut self, pattern: &str) -> Self {
        self.pattern = KeyPattern::parse(pattern);
        self
    }
    /// The prefix of every aggregate name. Normalized to end with `.`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    /// Ties on timestamp keep whichever raw metric the source yielded first.
    fn aggregate(&self, only: Option<&str>) -> Result<BTreeMap<String, Metric>> {
        let mut result: BTreeMap<String, Metric> = BTreeMap::new();
        for metric in self.source.find_all()? {
            let Some(key) = self.pattern.source_key(&metric.name) else {
                continue;
            };
            if only.is_some_and(|only| only != key) {
                continue;
            }
            let name = format!("{}{key}", self.prefix);
            match result.entry(name) {
                Entry::Vacant(slot) => {
                    let aggregate = metric.renamed(slot.key().as_str());
                    slot.insert(aggregate);
                }
                Entry::Occupied(mut slot) => {
                    let aggregate = slot.get_mut();
                    if is_counter(&key) {
                        aggregate.value += metric.value;
                        aggregate.timestamp = aggregate.timestamp.max(metric.timestamp);
                    } else if aggregate.timestamp < metric.timestamp {
                        *aggregate = metric.renamed(aggregate.name.as_str());
                    }
                }
            }
        }
        Ok(result)
    }
}
impl<R> MetricReader for AggregateMetricReader<R>
where
    R: MetricReader,
{
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        let Some(key) = name.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };
        Ok(self.aggregate(Some(key))?.remove(name))
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        Ok(self.aggregate(None)?.into_values().collect())
    }
    fn count(&self) -> Result<usize> {
        Ok(self.aggregate(None)?.len())
    }
}

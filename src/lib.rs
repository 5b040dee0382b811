use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod buf;
pub mod codec;
pub mod composite;
pub mod config;
pub mod error;
pub mod exporter;
pub mod name;
pub mod repository;
pub mod rich_gauge;
pub mod service;

pub use error::{Error, Result, StoreError};

pub type MetricKey = String;
/// Milliseconds since the Unix epoch.
pub type Time = u64;

pub fn now() -> Time {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// A named observation. Never mutated in place; the builder-style methods
/// return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: MetricKey,
    pub value: f64,
    pub timestamp: Time,
}
impl Metric {
    pub fn new(name: impl Into<MetricKey>, value: f64) -> Self {
        Self::at(name, value, now())
    }
    pub fn at(name: impl Into<MetricKey>, value: f64, timestamp: Time) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }

    pub fn increment(&self, amount: i64) -> Self {
        Self::new(self.name.clone(), self.value + amount as f64)
    }
    pub fn set(&self, value: f64) -> Self {
        Self::new(self.name.clone(), value)
    }
    pub fn renamed(&self, name: impl Into<MetricKey>) -> Self {
        Self::at(name, self.value, self.timestamp)
    }
}

/// A signed adjustment to a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub name: MetricKey,
    pub value: i64,
    pub timestamp: Time,
}
impl Delta {
    pub fn new(name: impl Into<MetricKey>, value: i64) -> Self {
        Self::at(name, value, now())
    }
    pub fn at(name: impl Into<MetricKey>, value: i64, timestamp: Time) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }
    pub fn renamed(&self, name: impl Into<MetricKey>) -> Self {
        Self::at(name, self.value, self.timestamp)
    }
}

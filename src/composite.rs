use crate::{repository::MetricReader, Metric, Result};

/// Several readers seen as one. Lookups stop at the first reader holding the
/// name.
pub struct CompositeMetricReader {
    readers: Vec<Box<dyn MetricReader>>,
}
impl CompositeMetricReader {
    pub fn new(readers: Vec<Box<dyn MetricReader>>) -> Self {
        Self { readers }
    }
    pub fn push(&mut self, reader: impl MetricReader + 'static) {
        self.readers.push(Box::new(reader));
    }
}
impl MetricReader for CompositeMetricReader {
    fn find_one(&self, name: &str) -> Result<Option<Metric>> {
        for reader in &self.readers {
            if let Some(metric) = reader.find_one(name)? {
                return Ok(Some(metric));
            }
        }
        Ok(None)
    }
    fn find_all(&self) -> Result<Vec<Metric>> {
        let mut metrics = vec![];
        for reader in &self.readers {
            metrics.extend(reader.find_all()?);
        }
        Ok(metrics)
    }
    fn count(&self) -> Result<usize> {
        self.readers.iter().map(|reader| reader.count()).sum()
    }
}
impl core::fmt::Debug for CompositeMetricReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompositeMetricReader")
            .field("readers", &self.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        buf::{BufferMetricReader, CounterBuffers, GaugeBuffers},
        repository::InMemoryMetricRepository,
    };

    #[test]
    fn first_reader_wins() {
        let first = InMemoryMetricRepository::new();
        first.set(Metric::at("gauge.a", 1.0, 0));
        let second = InMemoryMetricRepository::new();
        second.set(Metric::at("gauge.a", 2.0, 0));
        second.set(Metric::at("gauge.b", 3.0, 0));

        let first: Box<dyn MetricReader> = Box::new(first);
        let mut reader = CompositeMetricReader::new(vec![first]);
        reader.push(second);

        assert_eq!(reader.find_one("gauge.a").unwrap().unwrap().value, 1.0);
        assert_eq!(reader.find_one("gauge.b").unwrap().unwrap().value, 3.0);
        assert_eq!(reader.find_one("gauge.c").unwrap(), None);
        assert_eq!(reader.find_all().unwrap().len(), 3);
        assert_eq!(reader.count().unwrap(), 3);
    }

    #[test]
    fn mixes_buffers_and_repositories() {
        let counters = Arc::new(CounterBuffers::new());
        counters.increment("counter.hits", 4);
        let buffers = BufferMetricReader::new(counters, Arc::new(GaugeBuffers::new()));
        let repo = Arc::new(InMemoryMetricRepository::new());
        repo.set(Metric::at("gauge.cpu", 0.5, 0));

        let reader = CompositeMetricReader::new(vec![
            Box::new(buffers) as Box<dyn MetricReader>,
            Box::new(repo),
        ]);
        assert_eq!(reader.find_one("counter.hits").unwrap().unwrap().value, 4.0);
        assert_eq!(reader.find_one("gauge.cpu").unwrap().unwrap().value, 0.5);
    }
}

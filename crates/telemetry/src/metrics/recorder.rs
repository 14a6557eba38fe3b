use std::time::Instant;

use opentelemetry::{Key, KeyValue, Value, metrics::Histogram};

/// Measures the time from its creation to [`Recorder::record`] and reports
/// it, in milliseconds, to a histogram.
///
/// ```rust,ignore
/// let mut recorder = Recorder::new(ADMISSION_DURATION);
/// recorder.push_attribute("category", "auth");
/// decide().await;
/// recorder.record();
/// ```
pub struct Recorder {
    start: Instant,
    histogram: Histogram<f64>,
    attributes: Vec<KeyValue>,
}

impl Recorder {
    /// Start timing for the named histogram.
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram: super::meter().f64_histogram(name).with_unit("ms").build(),
            attributes: Vec::new(),
        }
    }

    /// Attach an attribute to the measurement.
    pub fn push_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.attributes.push(KeyValue::new(key, value));
    }

    /// Report the elapsed time.
    pub fn record(self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.histogram.record(elapsed_ms, &self.attributes);
    }
}

use telemetry::{Counter, KeyValue};

/// Instruments of the admission pipeline.
pub(crate) struct AdmissionMetrics {
    decisions: Counter<u64>,
}

impl AdmissionMetrics {
    pub(crate) fn new() -> Self {
        let decisions = telemetry::metrics::meter()
            .u64_counter(telemetry::metrics::ADMISSION_DECISIONS)
            .with_description("Admission decisions by outcome and category")
            .build();

        Self { decisions }
    }

    pub(crate) fn record(&self, decision: &'static str, category: &str) {
        let attributes = [
            KeyValue::new("decision", decision),
            KeyValue::new("category", category.to_string()),
        ];

        self.decisions.add(1, &attributes);
    }
}

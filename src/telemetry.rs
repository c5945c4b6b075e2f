use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    error_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    chat_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {}", e))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("brain_tumor_api");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let error_counter = meter
            .u64_counter("request_errors_total")
            .with_description("Total number of failed requests by error kind")
            .build();

        // CPU inference of a 299x299 image sits in the tens to hundreds of ms.
        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(generate_boundaries((10, 100, 300, 1000, 5000)))
            .with_description("Duration of preprocessing and inference in milliseconds")
            .build();

        let chat_duration = meter
            .u64_histogram("chat_duration_ms")
            .with_boundaries(generate_boundaries((100, 1000, 3000, 10000, 30000)))
            .with_description("Duration of remote chat completions in milliseconds")
            .build();

        Ok(Metrics {
            request_counter,
            error_counter,
            prediction_duration,
            chat_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_error(&self, route: &str, kind: &str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("kind", kind.to_string()),
        ];
        self.error_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_chat_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.chat_duration.record(duration_ms, &attributes);
    }
}

/// Histogram boundaries: fine steps for the fast range, coarser steps for the tail.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let step = |from: i32, to: i32, buckets: i32| ((to - from) / buckets).max(1) as usize;

    let first_part = (parts.0..=parts.1).step_by(step(parts.0, parts.1, 9));
    let middle_part = (parts.1..=parts.2).step_by(step(parts.1, parts.2, 4));
    let end_part = (parts.2..=parts.3).step_by(step(parts.2, parts.3, 7));
    let tail_part = (parts.3..=parts.4).step_by(step(parts.3, parts.4, 4));

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

//! Test helpers shared by unit tests.

use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records the `code` label of every `chainchat_errors_total` increment and
/// the name of every described counter.
///
/// Install with `metrics::with_local_recorder`.
#[derive(Default)]
pub struct CapturingRecorder {
    codes: Arc<Mutex<Vec<String>>>,
    described: Mutex<Vec<String>>,
}

impl CapturingRecorder {
    pub fn error_codes(&self) -> Vec<String> {
        self.codes.lock().clone()
    }

    pub fn described_counters(&self) -> Vec<String> {
        self.described.lock().clone()
    }
}

struct CodeCounter {
    code: String,
    codes: Arc<Mutex<Vec<String>>>,
}

impl CounterFn for CodeCounter {
    fn increment(&self, _value: u64) {
        self.codes.lock().push(self.code.clone());
    }

    fn absolute(&self, _value: u64) {}
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.described.lock().push(key.as_str().to_string());
    }

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        if key.name() != "chainchat_errors_total" {
            return Counter::noop();
        }
        let code = key
            .labels()
            .find(|label| label.key() == "code")
            .map(|label| label.value().to_string())
            .unwrap_or_default();
        Counter::from_arc(Arc::new(CodeCounter {
            code,
            codes: self.codes.clone(),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use lazy_static::lazy_static;

pub const LEDGERS_FETCHED: &str = "ledgers_fetched";
pub const LEDGERS_SAVED: &str = "ledgers_saved";
pub const LEDGERS_SKIPPED: &str = "ledgers_skipped";
pub const FETCH_FAILURES: &str = "fetch_failures";
pub const VALIDATION_FAILURES: &str = "validation_failures";
pub const CHAIN_BREAKS: &str = "chain_breaks";
pub const AUDIT_CHECKED: &str = "audit_checked";

pub const LAST_INDEX: &str = "last_index";
pub const VALIDATED_INDEX: &str = "validated_index";

/// Metrics registry (simple, Prometheus-style)
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    gauges: Arc<Mutex<HashMap<String, f64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    pub fn add_counter(&self, name: &str, by: u64) {
        let mut counters = self.counters.lock();
        *counters.entry(name.to_string()).or_insert(0) += by;
    }

    pub fn set_gauge(&self, name: &str, val: f64) {
        self.gauges.lock().insert(name.to_string(), val);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> (HashMap<String, u64>, HashMap<String, f64>) {
        (self.counters.lock().clone(), self.gauges.lock().clone())
    }

    /// Render in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let (counters, gauges) = self.snapshot();
        let mut names: Vec<_> = counters.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            out.push_str(&format!("{} {}\n", name, counters[name]));
        }
        let mut names: Vec<_> = gauges.keys().collect();
        names.sort();
        for name in names {
            out.push_str(&format!("{} {}\n", name, gauges[name]));
        }
        out
    }
}

lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

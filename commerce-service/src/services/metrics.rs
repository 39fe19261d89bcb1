use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process. Later calls (several
/// apps in one test binary) reuse the first handle.
pub fn init_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_otp_request(outcome: &'static str) {
    metrics::counter!("otp_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_order_created(outcome: &'static str) {
    metrics::counter!("orders_created_total", "outcome" => outcome).increment(1);
}

pub fn record_payment_callback(outcome: &'static str) {
    metrics::counter!("payment_callbacks_total", "outcome" => outcome).increment(1);
}

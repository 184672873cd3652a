use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use ripple_domain::digest::DigestReport;
use ripple_domain::fanout::FanoutReport;
use ripple_domain::notifications::RouteReport;

const JOBS_PROCESSED_TOTAL: &str = "ripple_worker_jobs_processed_total";
const JOBS_PROCESSING_DURATION_MS: &str = "ripple_worker_job_processing_duration_ms";
const QUEUE_READY_GAUGE: &str = "ripple_worker_queue_ready_total";
const QUEUE_DELAYED_GAUGE: &str = "ripple_worker_queue_delayed_total";
const QUEUE_PROCESSING_GAUGE: &str = "ripple_worker_queue_processing_total";
const QUEUE_LAG_GAUGE: &str = "ripple_worker_queue_lag_ms";
const FANOUT_ROWS_TOTAL: &str = "ripple_worker_fanout_rows_total";
const NOTIFICATIONS_ROUTED_TOTAL: &str = "ripple_worker_notifications_routed_total";
const DIGESTS_EMITTED_TOTAL: &str = "ripple_worker_digests_emitted_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_job_processed(job_type: &str, result: &str, duration_ms: f64) {
    counter!(
        JOBS_PROCESSED_TOTAL,
        "job_type" => job_type.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    histogram!(
        JOBS_PROCESSING_DURATION_MS,
        "job_type" => job_type.to_string()
    )
    .record(duration_ms);
}

pub fn register_fanout(report: &FanoutReport) {
    counter!(FANOUT_ROWS_TOTAL, "outcome" => "written").increment(report.entries_written as u64);
    counter!(FANOUT_ROWS_TOTAL, "outcome" => "duplicate").increment(report.duplicates as u64);
    counter!(FANOUT_ROWS_TOTAL, "outcome" => "skipped_disabled")
        .increment(report.skipped_disabled as u64);
    counter!(FANOUT_ROWS_TOTAL, "outcome" => "failed").increment(report.failed as u64);
}

pub fn register_routing(report: &RouteReport) {
    counter!(NOTIFICATIONS_ROUTED_TOTAL, "outcome" => "sent_immediate")
        .increment(report.sent_immediate as u64);
    counter!(NOTIFICATIONS_ROUTED_TOTAL, "outcome" => "queued_digest")
        .increment(report.queued_digest as u64);
    counter!(NOTIFICATIONS_ROUTED_TOTAL, "outcome" => "duplicate")
        .increment(report.duplicates as u64);
    counter!(NOTIFICATIONS_ROUTED_TOTAL, "outcome" => "send_failure")
        .increment(report.send_failures as u64);
}

pub fn register_digest_sweep(report: &DigestReport) {
    counter!(DIGESTS_EMITTED_TOTAL, "outcome" => "emitted").increment(report.digests_emitted as u64);
    counter!(DIGESTS_EMITTED_TOTAL, "outcome" => "folded")
        .increment(report.notifications_folded as u64);
    counter!(DIGESTS_EMITTED_TOTAL, "outcome" => "failed").increment(report.failures as u64);
}

pub fn set_queue_depth_gauge(ready: u64, delayed: u64, processing: u64) {
    gauge!(QUEUE_READY_GAUGE).set(ready as f64);
    gauge!(QUEUE_DELAYED_GAUGE).set(delayed as f64);
    gauge!(QUEUE_PROCESSING_GAUGE).set(processing as f64);
}

pub fn set_queue_lag_ms(lag_ms: i64) {
    gauge!(QUEUE_LAG_GAUGE).set(lag_ms.max(0) as f64);
}

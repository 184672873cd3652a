mod observability;

use std::sync::Arc;
use std::time::{Duration, Instant};

use ripple_domain::digest::DigestScheduler;
use ripple_domain::fanout::FanoutEngine;
use ripple_domain::jobs::{
    DigestSweepPayload, FanoutActivityPayload, JobDefaults, RouteNotificationsPayload,
    backoff_ms, digest_sweep_job_id, new_job, now_ms,
};
use ripple_domain::notifications::NotificationRouter;
use ripple_domain::ports::jobs::{JobEnvelope, JobQueue, JobType};
use ripple_domain::preferences::PreferenceService;
use ripple_infra::config::AppConfig;
use ripple_infra::jobs::RedisJobQueue;
use ripple_infra::logging::init_tracing;
use ripple_infra::repositories::{
    InMemoryActivityRepository, InMemoryFeedCacheRepository, InMemoryFollowGraph,
    InMemoryNotificationRepository, InMemoryPreferenceRepository, TracingChannelSink,
};
use tracing::{error, info, warn};

struct Engine {
    fanout: FanoutEngine,
    router: NotificationRouter,
    digest: DigestScheduler,
}

/// Repositories for the `memory` backend are process-local; a shared
/// relational backend plugs the same ports for multi-process deployments.
fn build_engine(config: &AppConfig) -> Engine {
    let activity_repo = Arc::new(InMemoryActivityRepository::new());
    let follows = Arc::new(InMemoryFollowGraph::new());
    let preference_repo = Arc::new(InMemoryPreferenceRepository::new());
    let feed_cache = Arc::new(InMemoryFeedCacheRepository::new());
    let notification_repo = Arc::new(InMemoryNotificationRepository::new());
    let sink = Arc::new(TracingChannelSink);
    let preferences = PreferenceService::new(preference_repo);

    let fanout = FanoutEngine::new(
        activity_repo.clone(),
        follows.clone(),
        preferences.clone(),
        feed_cache,
    )
    .with_limits(config.fanout_page_size, config.fanout_concurrency);
    let router = NotificationRouter::new(
        activity_repo,
        follows,
        preferences.clone(),
        notification_repo.clone(),
        sink.clone(),
    )
    .with_follower_page_size(config.fanout_page_size);
    let digest = DigestScheduler::new(notification_repo, preferences, sink);

    Engine {
        fanout,
        router,
        digest,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let queue = Arc::new(
        RedisJobQueue::connect_with_prefix(&config.redis_url, config.worker_queue_prefix.clone())
            .await
            .map_err(|err| anyhow::anyhow!("job queue connect failed: {err}"))?,
    );
    let engine = build_engine(&config);

    // Jobs orphaned in processing by a previous crash go back to ready.
    match queue.requeue_processing(config.worker_promote_batch).await {
        Ok(requeued) if requeued > 0 => info!(requeued, "requeued orphaned jobs"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "failed to requeue orphaned jobs"),
    }

    spawn_digest_ticker(queue.clone(), &config);
    spawn_queue_gauges(queue.clone());

    info!("worker started");
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = run_one_cycle(&config, queue.as_ref(), &engine, poll_interval) => {}
        }
    }
    info!("worker shutdown");

    Ok(())
}

async fn run_one_cycle(
    config: &AppConfig,
    queue: &RedisJobQueue,
    engine: &Engine,
    poll_interval: Duration,
) {
    if let Err(err) = queue
        .promote_due(now_ms(), config.worker_promote_batch)
        .await
    {
        warn!(error = %err, "failed to promote delayed jobs");
    }

    let job = match queue.dequeue(poll_interval).await {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "dequeue failed");
            tokio::time::sleep(poll_interval).await;
            return;
        }
    };

    let started = Instant::now();
    let job_type = job.job_type.as_str();
    match process_job(engine, &job).await {
        Ok(()) => {
            observability::register_job_processed(
                job_type,
                "success",
                started.elapsed().as_millis() as f64,
            );
            if let Err(err) = queue.ack(&job.job_id).await {
                warn!(job_id = job.job_id, error = %err, "ack failed");
            }
        }
        Err(err) => {
            retry_or_drop(config, queue, job, &err).await;
            observability::register_job_processed(
                job_type,
                "error",
                started.elapsed().as_millis() as f64,
            );
        }
    }
}

async fn process_job(engine: &Engine, job: &JobEnvelope) -> anyhow::Result<()> {
    match job.job_type {
        JobType::FanoutActivity => {
            let payload: FanoutActivityPayload = serde_json::from_value(job.payload.clone())?;
            let report = engine.fanout.fan_out(&payload.activity_id).await?;
            observability::register_fanout(&report);
            // Idempotent inserts make the retry safe for already-written rows.
            if report.is_partial() {
                anyhow::bail!("fan-out wrote {} rows, {} failed", report.entries_written, report.failed);
            }
            Ok(())
        }
        JobType::RouteNotifications => {
            let payload: RouteNotificationsPayload = serde_json::from_value(job.payload.clone())?;
            let report = engine.router.route(&payload.activity_id).await?;
            observability::register_routing(&report);
            if report.is_partial() {
                anyhow::bail!("routing created {} rows, {} failed", report.created, report.failed);
            }
            Ok(())
        }
        JobType::DigestSweep => {
            let report = engine.digest.run_once(now_ms()).await?;
            observability::register_digest_sweep(&report);
            if report.failures > 0 {
                // Unfolded rows stay queued and surface again next sweep;
                // no retry needed for the sweep itself.
                warn!(failures = report.failures, "digest sweep left rows queued");
            }
            Ok(())
        }
    }
}

async fn retry_or_drop(
    config: &AppConfig,
    queue: &RedisJobQueue,
    job: JobEnvelope,
    cause: &anyhow::Error,
) {
    if job.attempt >= job.max_attempts {
        error!(
            job_id = job.job_id,
            job_type = job.job_type.as_str(),
            attempt = job.attempt,
            error = %cause,
            "job exhausted retries; dropping"
        );
        if let Err(err) = queue.ack(&job.job_id).await {
            warn!(job_id = job.job_id, error = %err, "ack of exhausted job failed");
        }
        return;
    }

    let delay = backoff_ms(
        config.worker_backoff_base_ms,
        job.attempt,
        config.worker_backoff_max_ms,
    );
    let next_attempt = job.next_attempt();
    let mut retry = job.with_run_at(now_ms() + delay as i64);
    retry.attempt = next_attempt;
    warn!(
        job_id = retry.job_id,
        job_type = retry.job_type.as_str(),
        attempt = retry.attempt,
        delay_ms = delay,
        error = %cause,
        "job failed; scheduling retry"
    );
    if let Err(err) = queue.restore_processing_with_retry_delay(&retry).await {
        error!(job_id = retry.job_id, error = %err, "failed to schedule retry");
    }
}

/// Periodic digest trigger. `enqueue_if_absent` keyed on the sweep slot
/// keeps redundant workers from stacking duplicate sweeps.
fn spawn_digest_ticker(queue: Arc<RedisJobQueue>, config: &AppConfig) {
    let interval_ms = config.digest_sweep_interval_ms.max(1_000);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let slot_ms = (now_ms() / interval_ms as i64) * interval_ms as i64;
            let job = new_job(
                digest_sweep_job_id(slot_ms),
                JobType::DigestSweep,
                serde_json::json!(DigestSweepPayload { scheduled_ms: slot_ms }),
                digest_sweep_job_id(slot_ms),
                digest_sweep_job_id(slot_ms),
                JobDefaults::default(),
            );
            match queue.enqueue_if_absent(&job, interval_ms).await {
                Ok(true) => info!(slot_ms, "digest sweep enqueued"),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "failed to enqueue digest sweep"),
            }
        }
    });
}

fn spawn_queue_gauges(queue: Arc<RedisJobQueue>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            match queue.metrics_snapshot().await {
                Ok(snapshot) => {
                    observability::set_queue_depth_gauge(
                        snapshot.ready,
                        snapshot.delayed,
                        snapshot.processing,
                    );
                    let lag_ms = snapshot
                        .oldest_delayed_ms
                        .map(|oldest| now_ms() - oldest)
                        .unwrap_or(0);
                    observability::set_queue_lag_ms(lag_ms);
                }
                Err(err) => warn!(error = %err, "queue metrics snapshot failed"),
            }
        }
    });
}

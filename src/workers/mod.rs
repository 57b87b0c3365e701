#![allow(dead_code)]

mod optimizer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::db::DatabaseProxy;
use crate::engine::PersonalizationEngine;

static WORKER_LEADER: AtomicBool = AtomicBool::new(false);

pub fn is_worker_leader() -> bool {
    WORKER_LEADER.load(Ordering::Relaxed)
}

fn set_worker_leader(val: bool) {
    WORKER_LEADER.store(val, Ordering::Relaxed);
}

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    db_proxy: Arc<DatabaseProxy>,
    engine: Arc<PersonalizationEngine>,
}

impl WorkerManager {
    pub async fn new(
        db_proxy: Arc<DatabaseProxy>,
        engine: Arc<PersonalizationEngine>,
    ) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            db_proxy,
            engine,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let leader = std::env::var("WORKER_LEADER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        if !leader {
            info!("WORKER_LEADER not set, skipping worker startup");
            return Ok(());
        }

        set_worker_leader(true);
        info!("Starting workers (leader mode)");

        let enable_optimizer = std::env::var("ENABLE_OPTIMIZER_WORKER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let scheduler = self.scheduler.lock().await;

        if enable_optimizer {
            let schedule = std::env::var("OPTIMIZER_SCHEDULE")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string());
            let db = Arc::clone(&self.db_proxy);
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(&schedule, move |_uuid, _lock| {
                let db = Arc::clone(&db);
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = optimizer::run_optimizer_cycle(db, engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Optimizer worker error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "Optimizer worker scheduled");
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        if !is_worker_leader() {
            return;
        }

        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        set_worker_leader(false);
        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

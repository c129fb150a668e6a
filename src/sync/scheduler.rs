use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::commands::imports::{
    create_import, fail_import, get_import, mark_stuck_imports, pending_import_ids, process_import,
};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::{ImportCreated, ImportRecord, ImportUpload};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Background import pipeline: one consumer drains the job queue while a
/// second task sweeps imports stuck in PROCESSING.
#[derive(Clone)]
pub struct ImportScheduler {
    db: Arc<Database>,
    config: AppConfig,
    queue: mpsc::UnboundedSender<String>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl ImportScheduler {
    pub fn new(db: Arc<Database>, config: AppConfig) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            db,
            config,
            queue,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start the consumer and reconciler. PENDING imports left over from a
    /// previous run are queued again first.
    pub async fn start(&self) -> Result<()> {
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            log::warn!("Import scheduler already started");
            return Ok(());
        };

        log::info!("Starting import scheduler...");

        let pending = pending_import_ids(&self.db)?;
        if !pending.is_empty() {
            log::info!("Redelivering {} pending imports", pending.len());
        }
        for id in pending {
            self.enqueue(id);
        }

        let db = self.db.clone();
        let consumer = tokio::spawn(async move {
            while let Some(import_id) = receiver.recv().await {
                Self::run_job(&db, import_id).await;
            }
            log::info!("Import queue closed");
        });

        let db = self.db.clone();
        let timeout = self.config.stuck_import_timeout;
        let every = self.config.reconcile_interval;
        let reconciler = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = mark_stuck_imports(&db, timeout) {
                    log::error!("Stuck import sweep failed: {}", e);
                }
            }
        });

        let mut tasks = self.tasks.write().await;
        tasks.push(consumer);
        tasks.push(reconciler);
        Ok(())
    }

    /// Accept an upload and queue it. Returns as soon as the PENDING record exists.
    pub async fn submit(&self, user_id: &str, upload: ImportUpload) -> Result<ImportCreated> {
        let created = create_import(&self.db, user_id, &upload, self.config.max_upload_bytes)?;
        self.enqueue(created.id.clone());
        Ok(created)
    }

    fn enqueue(&self, import_id: String) {
        if let Err(e) = self.queue.send(import_id) {
            // Still PENDING in the database; picked up on the next start
            log::warn!("Import queue is closed, {} stays pending", e.0);
        }
    }

    async fn run_job(db: &Arc<Database>, import_id: String) {
        let worker_db = db.clone();
        let worker_id = import_id.clone();
        let outcome = tokio::task::spawn_blocking(move || process_import(&worker_db, &worker_id)).await;

        match outcome {
            Ok(Ok(record)) => {
                log::debug!("Import {} finished as {}", record.id, record.status.as_str());
            }
            Ok(Err(e)) => {
                log::error!("Could not record outcome of import {}: {}", import_id, e);
            }
            Err(join_err) => {
                log::error!("Import worker for {} crashed: {}", import_id, join_err);
                let message = format!("Import worker crashed: {}", join_err);
                if let Err(e) = fail_import(db, &import_id, &message) {
                    log::error!("Could not mark import {} as failed: {}", import_id, e);
                }
            }
        }
    }

    /// Poll until the import reaches DONE or ERROR
    pub async fn wait_for_import(
        &self,
        user_id: &str,
        import_id: &str,
        timeout: Duration,
    ) -> Result<ImportRecord> {
        let wait = async {
            loop {
                let record = get_import(&self.db, user_id, import_id)?;
                if record.status.is_terminal() {
                    return Ok(record);
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            JournalError::Validation(format!(
                "Import {} did not finish within {:?}",
                import_id, timeout
            ))
        })?
    }

    /// Run the stuck-import sweep once
    pub fn reconcile(&self) -> Result<usize> {
        mark_stuck_imports(&self.db, self.config.stuck_import_timeout)
    }

    /// Abort the background tasks. Queued jobs stay PENDING.
    pub async fn stop(&self) {
        log::info!("Stopping import scheduler...");
        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

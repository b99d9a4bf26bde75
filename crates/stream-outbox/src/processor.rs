//! Batch processor: buffers operations and drives delivery.
//!
//! Callers enqueue through [`BatchProcessor::save`] / [`BatchProcessor::delete`].
//! A background task ticks every `tick_interval`; each tick either delivers
//! the accumulated batches or, when there are none, checks the current batch
//! for rotation and persists it. Delivered batches older than the retention
//! window are purged on every tick.

use crate::batch::Batch;
use crate::error::{OutboxError, OutboxResult};
use crate::events::{AcceptAll, RecordValidator, StreamEvent, StreamObserver};
use crate::operation::{Operation, OperationKey, Record};
use crate::pending::{fetch_pending_resources, PendingResources};
use crate::rotation::RotationPolicy;
use crate::sender::{DataSender, DeliveryOutcome};
use crate::store::BatchStore;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stream_auth::{AuthSession, Credentials, ReqwestTransport};
use stream_config_and_utils::{Config, Paths};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scheduler and rotation settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub policy: RotationPolicy,
    pub tick_interval: Duration,
    pub sent_retention: Duration,
    /// Model kinds refused by `save` and `delete`.
    pub blocked_model_kinds: Vec<String>,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: RotationPolicy::from_config(config),
            tick_interval: config.tick_interval(),
            sent_retention: config.sent_retention(),
            blocked_model_kinds: config.blocked_model_kinds.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Running,
}

struct CurrentBatch {
    batch: Batch,
    /// Hash of what `current.pbt` holds on disk.
    persisted_hash: Option<String>,
}

struct Worker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// State shared between the caller-facing handle and the scheduler task.
struct ProcessorCore {
    config: ProcessorConfig,
    store: BatchStore,
    sender: DataSender,
    multi_tenant: bool,
    current: Mutex<CurrentBatch>,
    /// Serializes ticks and flushes.
    tick_lock: tokio::sync::Mutex<()>,
    validator: RwLock<Arc<dyn RecordValidator>>,
    observer: RwLock<Option<Arc<dyn StreamObserver>>>,
    events: broadcast::Sender<StreamEvent>,
}

/// Durable outbox for record mutations.
///
/// Operations survive restarts: the current batch is reloaded from disk on
/// construction and accumulated batches are picked up by the first tick.
pub struct BatchProcessor {
    core: Arc<ProcessorCore>,
    worker: Mutex<Option<Worker>>,
}

impl BatchProcessor {
    /// Create a processor over `paths`, recovering any current batch left
    /// on disk. The scheduler is not started.
    pub fn new(config: ProcessorConfig, paths: Paths, session: Arc<AuthSession>) -> OutboxResult<Self> {
        paths.ensure_dirs()?;
        let store = BatchStore::new(paths);
        let batch = store.load_current()?;
        let persisted_hash = store
            .paths()
            .current_batch_file()
            .exists()
            .then(|| batch.content_hash());

        let multi_tenant = session.credentials().is_multi_tenant();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            core: Arc::new(ProcessorCore {
                config,
                store,
                sender: DataSender::new(session),
                multi_tenant,
                current: Mutex::new(CurrentBatch {
                    batch,
                    persisted_hash,
                }),
                tick_lock: tokio::sync::Mutex::new(()),
                validator: RwLock::new(Arc::new(AcceptAll)),
                observer: RwLock::new(None),
                events,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Build a processor talking to `config.api_url` over HTTP.
    pub fn connect(config: &Config, paths: Paths, credentials: Credentials) -> OutboxResult<Self> {
        credentials.validate()?;
        let transport = ReqwestTransport::new(config.api_url()?.as_str(), config.request_timeout())?;
        let session = Arc::new(AuthSession::new(Arc::new(transport), credentials));
        Self::new(ProcessorConfig::from_config(config), paths, session)
    }

    pub fn set_validator(&self, validator: Arc<dyn RecordValidator>) {
        *self.core.validator.write() = validator;
    }

    pub fn set_observer(&self, observer: Arc<dyn StreamObserver>) {
        *self.core.observer.write() = Some(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.core.events.subscribe()
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        self.core.sender.session()
    }

    pub fn store(&self) -> &BatchStore {
        &self.core.store
    }

    pub fn state(&self) -> ProcessorState {
        match self.worker.lock().as_ref() {
            Some(worker) if !worker.handle.is_finished() => ProcessorState::Running,
            _ => ProcessorState::Stopped,
        }
    }

    /// Operations waiting in the current batch.
    pub fn pending_operations(&self) -> usize {
        self.core.current.lock().batch.len()
    }

    /// Queue a full-record upsert.
    ///
    /// Returns `Ok(false)` when an observer cancelled the save.
    pub fn save(&self, record: &Record, tenant_id: Option<&str>) -> OutboxResult<bool> {
        let core = &self.core;
        core.check_model_kind(&record.model_kind)?;
        let tenant_id = core.resolve_tenant(tenant_id)?;

        if let Some(observer) = core.observer() {
            if !observer.before_save(record, tenant_id.as_deref()) {
                debug!(model_kind = %record.model_kind, "Save cancelled by observer");
                return Ok(false);
            }
        }

        let validator = core.validator.read().clone();
        validator.validate(record).map_err(OutboxError::Validation)?;

        core.enqueue(Operation::update(record, tenant_id))?;
        Ok(true)
    }

    /// Queue a removal of the record with `record`'s id.
    ///
    /// Returns `Ok(false)` when an observer cancelled the delete.
    pub fn delete(&self, record: &Record, tenant_id: Option<&str>) -> OutboxResult<bool> {
        let core = &self.core;
        core.check_model_kind(&record.model_kind)?;
        let Some(id) = record.id() else {
            return Err(OutboxError::Validation(format!(
                "{} record has no id to delete",
                record.model_kind
            )));
        };
        let tenant_id = core.resolve_tenant(tenant_id)?;

        if let Some(observer) = core.observer() {
            if !observer.before_delete(record, tenant_id.as_deref()) {
                debug!(model_kind = %record.model_kind, id = %id, "Delete cancelled by observer");
                return Ok(false);
            }
        }

        core.enqueue(Operation::delete(record.model_kind.clone(), id, tenant_id))?;
        Ok(true)
    }

    /// Save each record in turn, stopping at the first error.
    ///
    /// Returns how many records were queued.
    pub fn save_all(&self, records: &[Record], tenant_id: Option<&str>) -> OutboxResult<usize> {
        let mut queued = 0;
        for record in records {
            if self.save(record, tenant_id)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Delete each record in turn, stopping at the first error.
    pub fn delete_all(&self, records: &[Record], tenant_id: Option<&str>) -> OutboxResult<usize> {
        let mut queued = 0;
        for record in records {
            if self.delete(record, tenant_id)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Spawn the scheduler on the current tokio runtime.
    pub fn start(&self) -> OutboxResult<()> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(OutboxError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(core.run(stop_rx));
        *worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stop the scheduler, waiting for an in-flight tick to finish.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(Worker { stop_tx, handle }) = worker else {
            return;
        };
        let _ = stop_tx.send(());
        if let Err(e) = handle.await {
            warn!(error = %e, "Batch processor task ended abnormally");
        }
    }

    /// Rotate the current batch and deliver everything accumulated.
    ///
    /// The scheduler is paused for the duration and resumed afterwards if it
    /// was running, whatever the outcome.
    pub async fn flush(&self) -> OutboxResult<()> {
        let was_running = self.state() == ProcessorState::Running;
        self.stop().await;

        let result = self.core.drain().await;
        if let Err(e) = &result {
            warn!(error = %e, "Flush did not complete");
        }

        if was_running {
            self.start()?;
        }
        result
    }

    /// Run a single tick on the caller's task.
    pub async fn tick(&self) -> OutboxResult<()> {
        self.core.tick().await
    }

    /// Fetch the records the server is waiting for.
    pub async fn get_pending_resources(&self) -> OutboxResult<Vec<PendingResources>> {
        fetch_pending_resources(self.core.sender.session()).await
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.stop_tx.send(());
        }
    }
}

impl ProcessorCore {
    fn observer(&self) -> Option<Arc<dyn StreamObserver>> {
        self.observer.read().clone()
    }

    fn check_model_kind(&self, model_kind: &str) -> OutboxResult<()> {
        if model_kind.trim().is_empty() {
            return Err(OutboxError::Validation("model kind is required".into()));
        }
        if self
            .config
            .blocked_model_kinds
            .iter()
            .any(|blocked| blocked == model_kind)
        {
            return Err(OutboxError::Validation(format!(
                "model kind {model_kind} cannot be streamed"
            )));
        }
        Ok(())
    }

    /// Tenant attached to a new operation. Required in multi-tenant mode,
    /// dropped otherwise.
    fn resolve_tenant(&self, tenant_id: Option<&str>) -> OutboxResult<Option<String>> {
        let tenant_id = tenant_id.map(str::trim).filter(|t| !t.is_empty());
        if !self.multi_tenant {
            return Ok(None);
        }
        match tenant_id {
            Some(tenant_id) => Ok(Some(tenant_id.to_string())),
            None => Err(OutboxError::Validation(
                "tenant id is required in multi-tenant mode".into(),
            )),
        }
    }

    /// Push `op` into the current batch, rotating once it is full.
    fn enqueue(&self, op: Operation) -> OutboxResult<()> {
        let mut current = self.current.lock();
        current.batch.push(op);
        if let Some(reason) = self.config.policy.is_full(&current.batch) {
            debug!(reason = %reason, "Current batch full");
            self.rotate(&mut current)?;
        }
        Ok(())
    }

    /// Move the current batch to `accumulated/` and start a new one.
    /// An empty batch only has its clock restarted.
    fn rotate(&self, current: &mut CurrentBatch) -> OutboxResult<Option<PathBuf>> {
        if current.batch.is_empty() {
            current.batch.reset();
            return Ok(None);
        }

        let path = self.store.accumulate(&mut current.batch)?;
        info!(
            batch = %current.batch.filename(),
            operations = current.batch.len(),
            "Rotated current batch"
        );

        current.batch.reset();
        self.store.save_current(&current.batch)?;
        current.persisted_hash = Some(current.batch.content_hash());
        Ok(Some(path))
    }

    fn watch_current_batch(&self) -> OutboxResult<()> {
        let mut current = self.current.lock();
        if let Some(reason) = self.config.policy.expiry(&current.batch, Utc::now()) {
            debug!(reason = %reason, operations = current.batch.len(), "Current batch expired");
            self.rotate(&mut current)?;
            return Ok(());
        }

        let hash = current.batch.content_hash();
        if current.persisted_hash.as_deref() != Some(hash.as_str()) {
            self.store.save_current(&current.batch)?;
            current.persisted_hash = Some(hash);
        }
        Ok(())
    }

    async fn run(self: Arc<Self>, mut stop_rx: oneshot::Receiver<()>) {
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            "Batch processor started"
        );

        loop {
            if let Err(e) = self.tick().await {
                self.report(&e);
            }

            tokio::select! {
                _ = &mut stop_rx => break,
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        info!("Batch processor stopped");
    }

    async fn tick(&self) -> OutboxResult<()> {
        let _guard = self.tick_lock.lock().await;

        let delivery = match self.store.has_accumulated() {
            Ok(true) => self.send_accumulated().await,
            Ok(false) => self.watch_current_batch(),
            Err(e) => Err(e),
        };
        let retention = self
            .store
            .purge_sent(Utc::now(), self.config.sent_retention)
            .map(|_| ());

        delivery.and(retention)
    }

    async fn drain(&self) -> OutboxResult<()> {
        let _guard = self.tick_lock.lock().await;

        {
            let mut current = self.current.lock();
            if !current.batch.is_empty() {
                self.rotate(&mut current)?;
            }
        }
        self.send_accumulated().await
    }

    /// Deliver accumulated batches in order.
    ///
    /// Stops at the first error, leaving that batch and the ones after it in
    /// place, and after the first partial failure, whose priority batch is
    /// picked up by the next pass.
    async fn send_accumulated(&self) -> OutboxResult<()> {
        for path in self.store.list_accumulated()? {
            let batch = Batch::load_from_file(&path)?;
            if batch.is_empty() {
                debug!(batch = %batch.filename(), "Archiving empty batch without sending");
                self.store.mark_sent(&batch)?;
                continue;
            }

            let outcome = self.sender.send(&batch).await?;
            let partial = match &outcome {
                DeliveryOutcome::Delivered { .. } => {
                    self.store.mark_sent(&batch)?;
                    false
                }
                DeliveryOutcome::PartialFailure { failed, .. } => {
                    self.requeue_failures(&batch, failed)?;
                    true
                }
            };

            info!(
                batch = %batch.filename(),
                operations = batch.len(),
                partial,
                "Batch sent"
            );
            self.publish(StreamEvent::BatchSent {
                batch: batch.filename(),
                operations: batch.len(),
                priority: batch.is_priority(),
                status: 200,
                response: outcome.response().clone(),
            });

            if partial {
                break;
            }
        }
        Ok(())
    }

    /// Write the failed operations to a new priority batch, then archive
    /// the original.
    ///
    /// Operations are stored without a tenant in single-tenant mode, so a
    /// tenant echoed by the server is ignored there.
    fn requeue_failures(&self, batch: &Batch, failed: &[OperationKey]) -> OutboxResult<()> {
        let reported: Vec<OperationKey> = if self.multi_tenant {
            failed.to_vec()
        } else {
            failed.iter().cloned().map(OperationKey::without_tenant).collect()
        };

        let operations = batch.find(&reported);
        if operations.is_empty() {
            warn!(
                batch = %batch.filename(),
                reported = reported.len(),
                "Reported failures match no operation in the batch"
            );
            self.publish(StreamEvent::UnmatchedFailures {
                batch: batch.filename(),
                reported,
            });
        } else {
            let mut retry = Batch::with_items(operations, true);
            self.store.accumulate(&mut retry)?;
            warn!(
                batch = %batch.filename(),
                retry = %retry.filename(),
                failed = retry.len(),
                "Requeued failed operations as priority batch"
            );
        }
        self.store.mark_sent(batch)?;
        Ok(())
    }

    fn report(&self, err: &OutboxError) {
        error!(error = %err, class = ?err.class(), retryable = err.is_retryable(), "Batch processor tick failed");
        self.publish(StreamEvent::Error {
            class: err.class(),
            message: err.to_string(),
        });
    }

    fn publish(&self, event: StreamEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stream_auth::{AuthResult, HttpRequest, HttpResponse, HttpTransport};
    use tempfile::TempDir;

    /// Transport that must never be reached.
    struct Offline;

    #[async_trait::async_trait]
    impl HttpTransport for Offline {
        async fn execute(&self, _request: &HttpRequest) -> AuthResult<HttpResponse> {
            Ok(HttpResponse::new(503, json!("offline")))
        }
    }

    fn processor(tenant: Option<&str>, config: ProcessorConfig) -> (TempDir, BatchProcessor) {
        let tmp = TempDir::new().unwrap();
        let credentials = Credentials::new("token", "secret", tenant.map(str::to_string));
        let session = Arc::new(AuthSession::new(Arc::new(Offline), credentials));
        let processor =
            BatchProcessor::new(config, Paths::with_base_dir(tmp.path().to_path_buf()), session)
                .unwrap();
        (tmp, processor)
    }

    fn record(id: &str) -> Record {
        Record::new("PRODUTO", json!({ "id": id, "descricao": "Cafe" }))
    }

    struct Veto;

    impl StreamObserver for Veto {
        fn before_save(&self, _record: &Record, _tenant_id: Option<&str>) -> bool {
            false
        }
    }

    struct RequireName;

    impl RecordValidator for RequireName {
        fn validate(&self, record: &Record) -> Result<(), String> {
            record
                .data
                .get("nome")
                .map(|_| ())
                .ok_or_else(|| "nome is required".to_string())
        }
    }

    #[test]
    fn blocked_model_kind_is_rejected() {
        let (_tmp, processor) = processor(Some("t1"), ProcessorConfig::default());
        let err = processor
            .save(&Record::new("ASSINANTE", json!({ "id": "1" })), None)
            .unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
        assert_eq!(processor.pending_operations(), 0);
    }

    #[test]
    fn multi_tenant_requires_tenant() {
        let (_tmp, processor) = processor(None, ProcessorConfig::default());
        assert!(matches!(
            processor.save(&record("1"), None),
            Err(OutboxError::Validation(_))
        ));
        assert!(processor.save(&record("1"), Some("t1")).unwrap());
    }

    #[test]
    fn single_tenant_ignores_operation_tenant() {
        let (_tmp, processor) = processor(Some("t1"), ProcessorConfig::default());
        processor.save(&record("1"), Some("other")).unwrap();

        let current = processor.core.current.lock();
        assert_eq!(current.batch.items()[0].tenant_id(), None);
    }

    #[test]
    fn delete_requires_an_id() {
        let (_tmp, processor) = processor(Some("t1"), ProcessorConfig::default());
        let err = processor
            .delete(&Record::new("PRODUTO", json!({ "descricao": "x" })), None)
            .unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
    }

    #[test]
    fn observer_can_cancel_and_validator_can_reject() {
        let (_tmp, processor) = processor(Some("t1"), ProcessorConfig::default());

        processor.set_validator(Arc::new(RequireName));
        assert!(matches!(
            processor.save(&record("1"), None),
            Err(OutboxError::Validation(msg)) if msg == "nome is required"
        ));

        processor.set_observer(Arc::new(Veto));
        assert!(!processor.save(&record("1"), None).unwrap());
        // deletes are not vetoed by this observer
        assert!(processor.delete(&record("1"), None).unwrap());
        assert_eq!(processor.pending_operations(), 1);
    }

    #[test]
    fn save_all_and_delete_all_count_queued_records() {
        let (_tmp, processor) = processor(Some("t1"), ProcessorConfig::default());
        let records = vec![record("1"), record("2"), record("3")];

        assert_eq!(processor.save_all(&records, None).unwrap(), 3);
        assert_eq!(processor.delete_all(&records[..2], None).unwrap(), 2);
        assert_eq!(processor.pending_operations(), 3);
    }

    #[test]
    fn full_batch_rotates_on_enqueue() {
        let mut config = ProcessorConfig::default();
        config.policy.max_count = 2;
        let (_tmp, processor) = processor(Some("t1"), config);

        processor.save(&record("1"), None).unwrap();
        processor.save(&record("2"), None).unwrap();
        processor.save(&record("3"), None).unwrap();

        let accumulated = processor.store().list_accumulated().unwrap();
        assert_eq!(accumulated.len(), 1);
        let rotated = Batch::load_from_file(&accumulated[0]).unwrap();
        let ids: Vec<_> = rotated.items().iter().filter_map(Operation::id).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(processor.pending_operations(), 1);
    }

    #[tokio::test]
    async fn tick_persists_current_batch_only_when_changed() {
        let (tmp, processor) = processor(Some("t1"), ProcessorConfig::default());
        let current_file = tmp.path().join("current.pbt");

        processor.save(&record("1"), None).unwrap();
        processor.tick().await.unwrap();
        assert!(current_file.exists());

        std::fs::remove_file(&current_file).unwrap();
        processor.tick().await.unwrap();
        assert!(!current_file.exists(), "unchanged batch must not be rewritten");

        processor.save(&record("2"), None).unwrap();
        processor.tick().await.unwrap();
        assert!(current_file.exists());
    }

    #[tokio::test]
    async fn current_batch_is_recovered_after_restart() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::with_base_dir(tmp.path().to_path_buf());
        let session = || {
            Arc::new(AuthSession::new(
                Arc::new(Offline),
                Credentials::new("token", "secret", Some("t1".into())),
            ))
        };

        {
            let processor =
                BatchProcessor::new(ProcessorConfig::default(), paths.clone(), session()).unwrap();
            processor.save(&record("1"), None).unwrap();
            processor.tick().await.unwrap();
        }

        let processor = BatchProcessor::new(ProcessorConfig::default(), paths, session()).unwrap();
        assert_eq!(processor.pending_operations(), 1);
    }

    #[tokio::test]
    async fn expired_empty_batch_only_restarts_its_clock() {
        let mut config = ProcessorConfig::default();
        config.policy.max_age = Duration::ZERO;
        let (_tmp, processor) = processor(Some("t1"), config);

        processor.tick().await.unwrap();
        assert!(!processor.store().has_accumulated().unwrap());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_stop_is_idempotent() {
        let mut config = ProcessorConfig::default();
        config.tick_interval = Duration::from_millis(10);
        let (_tmp, processor) = processor(Some("t1"), config);

        processor.start().unwrap();
        assert_eq!(processor.state(), ProcessorState::Running);
        assert!(matches!(processor.start(), Err(OutboxError::AlreadyRunning)));

        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
        processor.stop().await;
    }
}

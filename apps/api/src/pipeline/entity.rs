//! Stage runner for one entity kind.
//!
//! Every run holds the entity's advisory lock and a cancellation flag for its
//! whole duration. Each completed stage is persisted before the next starts,
//! so a failure or cancellation always leaves the last completed state on
//! record. A run whose future is dropped still gives both back, and a run
//! whose lease is lost is cancelled at the next stage boundary.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archive::{document_key, DocumentArchive};
use crate::embedding::EmbeddingIndexer;
use crate::extraction::fields::FieldExtractor;
use crate::extraction::text::{self, DocumentFormat};
use crate::models::{Document, EntityKind, EntityRecord, StructuredFields};
use crate::pipeline::cancel::{CancelFlag, CancelRegistry};
use crate::pipeline::error::{PipelineError, StageFailure};
use crate::pipeline::lock::{EntityLock, LockLease};
use crate::pipeline::state::Stage;
use crate::storage::{EntityStore, MatchStore};

pub struct EntityPipeline<F: StructuredFields> {
    store: Arc<dyn EntityStore<F>>,
    matches: Arc<dyn MatchStore>,
    archive: Arc<dyn DocumentArchive>,
    locks: Arc<dyn EntityLock>,
    fields: Arc<FieldExtractor>,
    indexer: Arc<EmbeddingIndexer>,
    cancels: CancelRegistry,
}

impl<F: StructuredFields> EntityPipeline<F> {
    pub fn new(
        store: Arc<dyn EntityStore<F>>,
        matches: Arc<dyn MatchStore>,
        archive: Arc<dyn DocumentArchive>,
        locks: Arc<dyn EntityLock>,
        fields: Arc<FieldExtractor>,
        indexer: Arc<EmbeddingIndexer>,
    ) -> Self {
        Self {
            store,
            matches,
            archive,
            locks,
            fields,
            indexer,
            cancels: CancelRegistry::default(),
        }
    }

    fn failure(id: Uuid, stage: Option<Stage>, error: PipelineError) -> StageFailure {
        StageFailure::new(F::KIND, id, stage, error)
    }

    /// Ingests a document and drives it to `Ready`.
    ///
    /// The entity id defaults to the document fingerprint. Re-ingesting the
    /// same document is a no-op once `Ready` and a resume otherwise. A
    /// different document under an existing id starts a new revision and
    /// drops every stored match touching the entity.
    pub async fn ingest(
        &self,
        document: Document,
        entity_id: Option<Uuid>,
    ) -> Result<EntityRecord<F>, StageFailure> {
        let mime_type = text::normalize_mime(&document.mime_type);
        let fingerprint = F::KIND.fingerprint(&mime_type, &document.bytes);
        let id = entity_id.unwrap_or(fingerprint);

        // Reject before anything is recorded.
        DocumentFormat::from_mime(&mime_type).map_err(|e| Self::failure(id, None, e))?;

        self.locked(id, |flag| async move {
            self.ingest_locked(document, mime_type, fingerprint, id, &flag)
                .await
        })
        .await
    }

    /// Resumes a failed or interrupted entity from its last completed stage,
    /// reading the source document back from the archive if needed.
    pub async fn resume(&self, id: Uuid) -> Result<EntityRecord<F>, StageFailure> {
        self.locked(id, |flag| async move {
            let record = self
                .store
                .latest(id)
                .await
                .map_err(|e| Self::failure(id, None, e))?
                .ok_or_else(|| {
                    Self::failure(
                        id,
                        None,
                        PipelineError::NotFound {
                            kind: F::KIND,
                            entity_id: id,
                        },
                    )
                })?;
            self.continue_from_resume_point(record, None, &flag).await
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<EntityRecord<F>, PipelineError> {
        self.store
            .latest(id)
            .await?
            .ok_or(PipelineError::NotFound {
                kind: F::KIND,
                entity_id: id,
            })
    }

    pub async fn list(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        self.store.list().await
    }

    pub async fn list_ready(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        self.store.list_ready().await
    }

    /// Requests cancellation of the in-flight run, if any.
    pub fn cancel(&self, id: Uuid) -> bool {
        let cancelled = self.cancels.cancel(id);
        if cancelled {
            info!("{} {} cancellation requested", F::KIND, id);
        }
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        self.cancels.cancel_all()
    }

    /// Runs `work` under the entity lock with a registered cancellation flag.
    async fn locked<'a, W, Fut>(
        &'a self,
        id: Uuid,
        work: W,
    ) -> Result<EntityRecord<F>, StageFailure>
    where
        W: FnOnce(CancelFlag) -> Fut,
        Fut: std::future::Future<Output = Result<EntityRecord<F>, StageFailure>> + 'a,
    {
        let lease = self
            .locks
            .acquire(F::KIND, id)
            .await
            .map_err(|e| Self::failure(id, None, e))?;
        let flag = self.cancels.register(id);
        let watchdog = spawn_renewal(self.locks.clone(), &lease, flag.clone());
        let guard = RunGuard {
            cancels: &self.cancels,
            locks: self.locks.clone(),
            flag: flag.clone(),
            lease: Some(lease),
            watchdog,
        };

        let result = work(flag).await;

        guard.finish().await;
        result
    }

    async fn ingest_locked(
        &self,
        document: Document,
        mime_type: String,
        fingerprint: Uuid,
        id: Uuid,
        flag: &CancelFlag,
    ) -> Result<EntityRecord<F>, StageFailure> {
        let existing = self
            .store
            .latest(id)
            .await
            .map_err(|e| Self::failure(id, None, e))?;

        let revision = match existing {
            Some(record) if record.fingerprint == fingerprint => {
                if record.state.is_ready() {
                    info!(
                        "{} {} r{} unchanged and ready, nothing to do",
                        F::KIND,
                        id,
                        record.revision
                    );
                    return Ok(record);
                }
                return self
                    .continue_from_resume_point(record, Some(document.bytes), flag)
                    .await;
            }
            Some(record) => {
                self.drop_stale_matches(id)
                    .await
                    .map_err(|e| Self::failure(id, None, e))?;
                info!(
                    "{} {} superseded: r{} → r{}",
                    F::KIND,
                    id,
                    record.revision,
                    record.revision + 1
                );
                record.revision + 1
            }
            None => 1,
        };

        let key = document_key(F::KIND, id, revision);
        self.archive
            .put(&key, &document)
            .await
            .map_err(|e| Self::failure(id, None, e))?;

        let record = EntityRecord::uploaded(
            id,
            revision,
            fingerprint,
            mime_type,
            document.filename.clone(),
            key,
        );
        self.store
            .save(&record)
            .await
            .map_err(|e| Self::failure(id, None, e))?;
        info!("{} {} r{} uploaded", F::KIND, id, revision);

        self.drive(record, Some(document.bytes), flag).await
    }

    async fn continue_from_resume_point(
        &self,
        mut record: EntityRecord<F>,
        bytes: Option<Bytes>,
        flag: &CancelFlag,
    ) -> Result<EntityRecord<F>, StageFailure> {
        if record.state.is_ready() {
            return Ok(record);
        }
        let resume_point = record.state.resume_point();
        if resume_point != record.state {
            info!(
                "{} {} resuming from {}",
                F::KIND,
                record.id,
                resume_point.label()
            );
            record.state = resume_point;
            record.updated_at = Utc::now();
            self.store
                .save(&record)
                .await
                .map_err(|e| Self::failure(record.id, None, e))?;
        }
        self.drive(record, bytes, flag).await
    }

    async fn drop_stale_matches(&self, id: Uuid) -> Result<(), PipelineError> {
        let deleted = match F::KIND {
            EntityKind::Job => self.matches.delete_for_job(id).await?,
            EntityKind::Candidate => self.matches.delete_for_candidate(id).await?,
        };
        if deleted > 0 {
            info!("dropped {} stale match result(s) for {} {}", deleted, F::KIND, id);
        }
        Ok(())
    }

    /// Runs the remaining stages in order, persisting after each one.
    async fn drive(
        &self,
        mut record: EntityRecord<F>,
        mut bytes: Option<Bytes>,
        flag: &CancelFlag,
    ) -> Result<EntityRecord<F>, StageFailure> {
        let id = record.id;

        while let Some(stage) = record.state.next_stage() {
            if flag.is_cancelled() {
                info!(
                    "{} {} cancelled before {}, left at {}",
                    F::KIND,
                    id,
                    stage,
                    record.state.label()
                );
                return Err(Self::failure(id, Some(stage), PipelineError::Cancelled));
            }

            match self.run_stage(stage, &mut record, &mut bytes).await {
                Ok(()) => {
                    record.state = record
                        .state
                        .advance(stage)
                        .map_err(|e| Self::failure(id, Some(stage), e.into()))?;
                    record.updated_at = Utc::now();
                    self.store
                        .save(&record)
                        .await
                        .map_err(|e| Self::failure(id, Some(stage), e))?;
                    info!(
                        "{} {} r{}: {} complete → {}",
                        F::KIND,
                        id,
                        record.revision,
                        stage,
                        record.state.label()
                    );
                }
                Err(e) => {
                    warn!("{} {} failed at {}: {}", F::KIND, id, stage, e);
                    if let Ok(failed) = record.state.fail(stage, e.to_string(), e.is_transient()) {
                        record.state = failed;
                        record.updated_at = Utc::now();
                        if let Err(save_err) = self.store.save(&record).await {
                            error!(
                                "could not record failure of {} {}: {}",
                                F::KIND,
                                id,
                                save_err
                            );
                        }
                    }
                    return Err(Self::failure(id, Some(stage), e));
                }
            }
        }

        Ok(record)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        record: &mut EntityRecord<F>,
        bytes: &mut Option<Bytes>,
    ) -> Result<(), PipelineError> {
        let entity_id = record.id;
        let incomplete = |missing: &'static str| PipelineError::IncompleteRecord {
            kind: F::KIND,
            entity_id,
            missing,
        };

        match stage {
            Stage::TextExtraction => {
                if record.raw_text.is_some() {
                    return Ok(());
                }
                let source = match bytes.take() {
                    Some(b) => b,
                    None => self.archive.get(&record.document_key).await?,
                };
                let text = text::extract_blocking(source, record.mime_type.clone()).await?;
                record.raw_text = Some(text);
            }
            Stage::FieldExtraction => {
                if record.fields.is_some() {
                    return Ok(());
                }
                let raw_text = record.raw_text.as_deref().ok_or_else(|| incomplete("raw text"))?;
                let fields = self.fields.extract_fields::<F>(raw_text).await?;
                record.fields = Some(fields);
            }
            Stage::Embedding => {
                if record.embedding.is_some() {
                    return Ok(());
                }
                let fields = record
                    .fields
                    .as_ref()
                    .ok_or_else(|| incomplete("structured fields"))?;
                let vector = self.indexer.embed(&fields.embedding_text()).await?;
                record.embedding = Some(vector);
            }
            Stage::Indexing => {
                let vector = record
                    .embedding
                    .as_deref()
                    .ok_or_else(|| incomplete("embedding"))?;
                let metadata = json!({
                    "kind": F::KIND,
                    "revision": record.revision,
                    "fingerprint": record.fingerprint,
                });
                self.indexer
                    .upsert(F::KIND, record.id, vector, &metadata)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Keeps a held lease alive until aborted. Cancels the run if the lease is
/// reported lost.
fn spawn_renewal(
    locks: Arc<dyn EntityLock>,
    lease: &LockLease,
    flag: CancelFlag,
) -> Option<JoinHandle<()>> {
    let every = locks.renew_interval()?;
    let (kind, id, token) = (lease.kind, lease.entity_id, lease.token());
    Some(tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            match locks.renew(kind, id, token).await {
                Ok(true) => {}
                Ok(false) => {
                    error!("lease on {} {} was lost, cancelling the run", kind, id);
                    flag.cancel();
                    break;
                }
                Err(e) => warn!("failed to renew lease on {} {}: {}", kind, id, e),
            }
        }
    }))
}

/// Owns what a run holds. Dropping it without [`RunGuard::finish`], as when
/// the caller's future is dropped mid-stage, still clears the flag and hands
/// the lease back from a background task.
struct RunGuard<'a> {
    cancels: &'a CancelRegistry,
    locks: Arc<dyn EntityLock>,
    flag: CancelFlag,
    lease: Option<LockLease>,
    watchdog: Option<JoinHandle<()>>,
}

impl RunGuard<'_> {
    async fn finish(mut self) {
        if let Some(lease) = self.stop() {
            release_lease(self.locks.as_ref(), lease).await;
        }
    }

    fn stop(&mut self) -> Option<LockLease> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        let lease = self.lease.take()?;
        self.cancels.finish(lease.entity_id, &self.flag);
        Some(lease)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let Some(lease) = self.stop() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let locks = self.locks.clone();
                runtime.spawn(async move { release_lease(locks.as_ref(), lease).await });
            }
            Err(_) => warn!(
                "run on {} {} dropped outside a runtime, lease left to expire",
                lease.kind, lease.entity_id
            ),
        }
    }
}

async fn release_lease(locks: &dyn EntityLock, lease: LockLease) {
    let (kind, id) = (lease.kind, lease.entity_id);
    if let Err(e) = locks.release(lease).await {
        warn!("failed to release lock on {} {}: {}", kind, id, e);
    }
}

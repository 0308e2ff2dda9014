//! In-memory fakes for every capability, plus a wired-up orchestrator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, RwLock, Semaphore};
use uuid::Uuid;

use crate::archive::DocumentArchive;
use crate::embedding::memory::InMemoryVectorStore;
use crate::embedding::{CapabilityError, EmbeddingProvider};
use crate::llm_client::{CompletionProvider, CompletionRequest, LlmError};
use crate::models::{
    CandidateFields, Document, EntityKind, EntityRecord, JobFields, MatchResult, StructuredFields,
};
use crate::pipeline::error::PipelineError;
use crate::pipeline::lock::{EntityLock, InProcessLocks, LockLease};
use crate::pipeline::{Capabilities, Orchestrator, PipelineSettings};
use crate::retry::RetryPolicy;
use crate::storage::{EntityStore, MatchStore};

pub const JOB_JSON: &str = r#"{"title": "Data Engineer", "summary": "Owns the warehouse", "required_skills": ["Python", "SQL"], "preferred_skills": ["Docker"], "min_experience_years": 3, "qualifications": ["BSc Computer Science"]}"#;

pub const CANDIDATE_JSON: &str = r#"{"name": "Ada Lovelace", "email": "ada@example.com", "skills": ["python", "docker"], "experience_years": 5, "qualifications": []}"#;

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
    }
}

pub fn text_document(text: &str) -> Document {
    Document::new(Bytes::copy_from_slice(text.as_bytes()), "text/plain")
}

// ──── Stores ────────────────────────────────────────────────────────────────

pub struct MemoryEntityStore<F> {
    revisions: RwLock<HashMap<Uuid, Vec<EntityRecord<F>>>>,
}

impl<F> Default for MemoryEntityStore<F> {
    fn default() -> Self {
        Self {
            revisions: RwLock::new(HashMap::new()),
        }
    }
}

impl<F: StructuredFields> MemoryEntityStore<F> {
    pub async fn revision_count(&self, id: Uuid) -> usize {
        self.revisions.read().await.get(&id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl<F: StructuredFields> EntityStore<F> for MemoryEntityStore<F> {
    async fn latest(&self, id: Uuid) -> Result<Option<EntityRecord<F>>, PipelineError> {
        Ok(self
            .revisions
            .read()
            .await
            .get(&id)
            .and_then(|revs| revs.last().cloned()))
    }

    async fn save(&self, record: &EntityRecord<F>) -> Result<(), PipelineError> {
        let mut revisions = self.revisions.write().await;
        let revs = revisions.entry(record.id).or_default();
        match revs.iter_mut().find(|r| r.revision == record.revision) {
            Some(existing) => *existing = record.clone(),
            None => revs.push(record.clone()),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        let mut latest: Vec<EntityRecord<F>> = self
            .revisions
            .read()
            .await
            .values()
            .filter_map(|revs| revs.last().cloned())
            .collect();
        latest.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(latest)
    }

    async fn list_ready(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        let mut ready: Vec<EntityRecord<F>> = self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.state.is_ready())
            .collect();
        ready.sort_by_key(|r| r.id);
        Ok(ready)
    }
}

#[derive(Default)]
pub struct MemoryMatchStore {
    by_job: RwLock<HashMap<Uuid, Vec<MatchResult>>>,
}

impl MemoryMatchStore {
    pub async fn total(&self) -> usize {
        self.by_job.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn replace_for_job(
        &self,
        job_id: Uuid,
        results: &[MatchResult],
    ) -> Result<(), PipelineError> {
        self.by_job.write().await.insert(job_id, results.to_vec());
        Ok(())
    }

    async fn for_job(&self, job_id: Uuid) -> Result<Vec<MatchResult>, PipelineError> {
        let mut results = self
            .by_job
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        results.sort_by_key(|r| r.rank);
        Ok(results)
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, PipelineError> {
        Ok(self
            .by_job
            .write()
            .await
            .remove(&job_id)
            .map_or(0, |v| v.len() as u64))
    }

    async fn delete_for_candidate(&self, candidate_id: Uuid) -> Result<u64, PipelineError> {
        let mut deleted = 0;
        for results in self.by_job.write().await.values_mut() {
            let before = results.len();
            results.retain(|r| r.candidate_id != candidate_id);
            if results.len() < before {
                deleted += (before - results.len()) as u64;
                results.sort_by_key(|r| r.rank);
                for (position, result) in results.iter_mut().enumerate() {
                    result.rank = position as u32 + 1;
                }
            }
        }
        Ok(deleted)
    }
}

#[derive(Default)]
pub struct MemoryArchive {
    objects: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl DocumentArchive for MemoryArchive {
    async fn put(&self, key: &str, document: &Document) -> Result<(), PipelineError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), document.bytes.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, PipelineError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Archive(format!("no object at {key}")))
    }
}

// ──── LLM ───────────────────────────────────────────────────────────────────

/// Scripted completion provider. Responses are routed by the `title` of the
/// request schema; queued responses are served first, then the default.
#[derive(Default)]
pub struct FakeLlm {
    queued: Mutex<HashMap<String, VecDeque<String>>>,
    defaults: Mutex<HashMap<String, String>>,
    calls: AtomicU32,
    failures_remaining: AtomicU32,
    rejections_remaining: AtomicU32,
    last_prompt: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, schema_title: &str, raw: &str) {
        self.queued
            .lock()
            .unwrap()
            .entry(schema_title.to_string())
            .or_default()
            .push_back(raw.to_string());
    }

    pub fn set_default(&self, schema_title: &str, raw: &str) {
        self.defaults
            .lock()
            .unwrap()
            .insert(schema_title.to_string(), raw.to_string());
    }

    /// The next `n` calls fail as if the LLM client had exhausted its retries.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls fail with a non-retryable 404, as for an unknown model.
    pub fn reject_next(&self, n: u32) {
        self.rejections_remaining.store(n, Ordering::SeqCst);
    }

    /// Blocks every call until a permit is added to the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a call has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    fn next_response(&self, title: &str) -> Option<String> {
        if let Some(raw) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(title)
            .and_then(VecDeque::pop_front)
        {
            return Some(raw);
        }
        self.defaults.lock().unwrap().get(title).cloned()
    }
}

#[async_trait]
impl CompletionProvider for FakeLlm {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(request.prompt.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _permit = gate.acquire().await;
        }

        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LlmError::Unavailable {
                attempts: 3,
                reason: "connection refused".to_string(),
            });
        }
        if take_one(&self.rejections_remaining) {
            return Err(LlmError::Api {
                status: 404,
                message: "model not found".to_string(),
            });
        }

        let title = request.response_schema["title"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.next_response(&title).ok_or(LlmError::EmptyContent)
    }
}

// ──── Embeddings ────────────────────────────────────────────────────────────

/// Deterministic hashed bag-of-words embedder.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicU32,
    failures_remaining: AtomicU32,
    rejections_remaining: AtomicU32,
}

impl FakeEmbedder {
    pub const DIMENSION: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls fail with a 503.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls fail with a non-retryable 404.
    pub fn reject_next(&self, n: u32) {
        self.rejections_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; Self::DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                });
            vector[(hash % Self::DIMENSION as u64) as usize] += 1.0;
        }
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CapabilityError::Api {
                status: 503,
                message: "model loading".to_string(),
            });
        }
        if take_one(&self.rejections_remaining) {
            return Err(CapabilityError::Api {
                status: 404,
                message: "model \"nomic-embed-text\" not found".to_string(),
            });
        }
        Ok(Self::vector_for(text))
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ──── Locks ─────────────────────────────────────────────────────────────────

/// In-process locks that ask for renewal every `interval`, like an expiring
/// lease would. Counts renewals and can be told the lease is gone.
pub struct ExpiringLocks {
    inner: InProcessLocks,
    interval: Duration,
    renewals: AtomicU32,
    lost: AtomicBool,
}

impl ExpiringLocks {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: InProcessLocks::new(Duration::from_millis(50)),
            interval,
            renewals: AtomicU32::new(0),
            lost: AtomicBool::new(false),
        }
    }

    pub fn renewals(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Every later renewal reports the lease as taken over.
    pub fn lose_leases(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityLock for ExpiringLocks {
    async fn acquire(&self, kind: EntityKind, entity_id: Uuid) -> Result<LockLease, PipelineError> {
        self.inner.acquire(kind, entity_id).await
    }

    async fn renew(&self, _: EntityKind, _: Uuid, _: Uuid) -> Result<bool, PipelineError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(!self.lost.load(Ordering::SeqCst))
    }

    async fn release(&self, lease: LockLease) -> Result<(), PipelineError> {
        self.inner.release(lease).await
    }

    fn renew_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

// ──── Harness ───────────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<FakeLlm>,
    pub embedder: Arc<FakeEmbedder>,
    pub jobs: Arc<MemoryEntityStore<JobFields>>,
    pub candidates: Arc<MemoryEntityStore<CandidateFields>>,
    pub matches: Arc<MemoryMatchStore>,
}

/// Orchestrator over in-memory fakes, with valid default LLM responses for
/// both entity kinds.
pub fn harness() -> Harness {
    harness_with_locks(Arc::new(InProcessLocks::new(Duration::from_millis(50))))
}

pub fn harness_with_locks(locks: Arc<dyn EntityLock>) -> Harness {
    let llm = Arc::new(FakeLlm::new());
    llm.set_default("JobFields", JOB_JSON);
    llm.set_default("CandidateFields", CANDIDATE_JSON);
    let embedder = Arc::new(FakeEmbedder::new());
    let jobs = Arc::new(MemoryEntityStore::<JobFields>::default());
    let candidates = Arc::new(MemoryEntityStore::<CandidateFields>::default());
    let matches = Arc::new(MemoryMatchStore::default());

    let caps = Capabilities {
        jobs: jobs.clone(),
        candidates: candidates.clone(),
        matches: matches.clone(),
        llm: llm.clone(),
        embedder: embedder.clone(),
        vectors: Arc::new(InMemoryVectorStore::new()),
        archive: Arc::new(MemoryArchive::default()),
        locks,
    };
    let settings = PipelineSettings {
        retry: fast_retry(),
        ..PipelineSettings::default()
    };

    Harness {
        orchestrator: Arc::new(Orchestrator::new(caps, settings)),
        llm,
        embedder,
        jobs,
        candidates,
        matches,
    }
}

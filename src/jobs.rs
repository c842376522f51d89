// src/jobs.rs
//! # Job store & worker
//!
//! The pipeline consumes an abstract job store: create, claim (atomic and
//! exclusive), update, and fire-and-forget progress writes. An in-memory
//! implementation backs tests and the demo binary; production wires a real
//! database behind the same trait.
//!
//! The worker claims a bounded batch and processes claimed jobs concurrently
//! with per-job failure isolation: one job's failure must never abort the
//! others in the batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::completion::DynCompletionClient;
use crate::config::PipelineConfig;
use crate::fact::Source;
use crate::flights::FlightDataApi;
use crate::import_data::{ConfidenceMap, ImportData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub current_section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    pub sections_completed: usize,
    pub total_sections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobRecord {
    pub id: Uuid,
    pub org_id: String,
    pub status: JobStatus,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ImportData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_map: Option<ConfidenceMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ImportProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One atomic write of extraction results and/or status.
#[derive(Debug, Clone, Default)]
pub struct ExtractedUpdate {
    pub extracted: Option<ImportData>,
    pub confidence_map: Option<ConfidenceMap>,
    pub status: Option<JobStatus>,
    pub error_message: Option<String>,
}

/// Abstract job store. All mutations are atomic single-call writes; the
/// pipeline never does read-modify-write across stages.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_import_job(&self, org_id: &str, sources: Vec<Source>) -> Result<Uuid>;

    /// Claim up to `limit` queued jobs, flipping them to `Processing`.
    /// Must be exclusive across concurrent callers: two workers never claim
    /// the same job id.
    async fn claim_pending_import_jobs(&self, limit: usize) -> Result<Vec<ImportJobRecord>>;

    async fn update_import_job_extracted(&self, job_id: Uuid, update: ExtractedUpdate)
        -> Result<()>;

    async fn get_import_job_by_id(&self, job_id: Uuid) -> Result<Option<ImportJobRecord>>;

    /// Fire-and-forget safe: callers ignore failures here.
    async fn update_progress(&self, job_id: Uuid, progress: ImportProgress) -> Result<()>;
}

pub type DynJobStore = Arc<dyn JobStore>;

// ------------------------------------------------------------
// Routing decision
// ------------------------------------------------------------

fn is_non_text_mime(source: &Source) -> bool {
    source
        .mime_type
        .as_deref()
        .map(|m| !m.starts_with("text/"))
        .unwrap_or(false)
}

/// Background-vs-synchronous routing: background when forced, when there are
/// more than `background_max_sources` sources, when any source is non-text
/// MIME, or when the total word count exceeds `background_max_words`.
pub fn should_process_in_background(
    forced: bool,
    sources: &[Source],
    cfg: &PipelineConfig,
) -> bool {
    if forced {
        return true;
    }
    if sources.len() > cfg.background_max_sources {
        return true;
    }
    if sources.iter().any(is_non_text_mime) {
        return true;
    }
    let total_words: usize = sources
        .iter()
        .map(|s| s.text.split_whitespace().count())
        .sum();
    total_words > cfg.background_max_words
}

// ------------------------------------------------------------
// In-memory store
// ------------------------------------------------------------

/// Mutex-guarded store for tests and the demo binary. Claim semantics match
/// the trait contract: queued jobs flip to `Processing` under one lock, so
/// concurrent claimers partition the queue.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ImportJobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_import_job(&self, org_id: &str, sources: Vec<Source>) -> Result<Uuid> {
        let now = Utc::now();
        let record = ImportJobRecord {
            id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            status: JobStatus::Queued,
            sources,
            extracted: None,
            confidence_map: None,
            error_message: None,
            progress: None,
            created_at: now,
            updated_at: now,
        };
        let id = record.id;
        self.jobs.lock().expect("poisoned job store").insert(id, record);
        Ok(id)
    }

    async fn claim_pending_import_jobs(&self, limit: usize) -> Result<Vec<ImportJobRecord>> {
        let mut jobs = self.jobs.lock().expect("poisoned job store");
        let mut queued: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| (j.created_at, j.id))
            .collect();
        queued.sort();
        let queued: Vec<Uuid> = queued.into_iter().take(limit).map(|(_, id)| id).collect();

        let mut claimed = Vec::with_capacity(queued.len());
        for id in queued {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.updated_at = Utc::now();
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn update_import_job_extracted(
        &self,
        job_id: Uuid,
        update: ExtractedUpdate,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("poisoned job store");
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("unknown job {job_id}"))?;
        if let Some(extracted) = update.extracted {
            job.extracted = Some(extracted);
        }
        if let Some(map) = update.confidence_map {
            job.confidence_map = Some(map);
        }
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(message) = update.error_message {
            job.error_message = Some(message);
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_import_job_by_id(&self, job_id: Uuid) -> Result<Option<ImportJobRecord>> {
        Ok(self
            .jobs
            .lock()
            .expect("poisoned job store")
            .get(&job_id)
            .cloned())
    }

    async fn update_progress(&self, job_id: Uuid, progress: ImportProgress) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("poisoned job store");
        if let Some(job) = jobs.get_mut(&job_id) {
            job.progress = Some(progress);
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ------------------------------------------------------------
// Worker
// ------------------------------------------------------------

pub struct ImportWorker {
    pub store: DynJobStore,
    pub completion: DynCompletionClient,
    pub flight_api: Arc<dyn FlightDataApi>,
    pub cfg: PipelineConfig,
}

impl ImportWorker {
    /// Claim one batch and process every claimed job to a terminal status.
    /// Returns the number of jobs processed.
    pub async fn run_once(self: &Arc<Self>) -> usize {
        let claimed = match self
            .store
            .claim_pending_import_jobs(self.cfg.worker_batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = ?e, "claiming import jobs failed");
                return 0;
            }
        };
        if claimed.is_empty() {
            return 0;
        }
        let count = claimed.len();
        tracing::info!(count, "claimed import jobs");

        // All-settled semantics: each job runs in its own task and writes its
        // own terminal status; a failure (or panic) in one never aborts the rest.
        let handles: Vec<(Uuid, JoinHandle<()>)> = claimed
            .into_iter()
            .map(|job| {
                let worker = Arc::clone(self);
                let job_id = job.id;
                let handle = tokio::spawn(async move {
                    worker.process_job(job).await;
                });
                (job_id, handle)
            })
            .collect();
        for (job_id, handle) in handles {
            if let Err(e) = handle.await {
                counter!("import_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = ?e, "import job task panicked");
                let update = ExtractedUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some(format!("job task panicked: {e}")),
                    ..Default::default()
                };
                if let Err(e) = self.store.update_import_job_extracted(job_id, update).await {
                    tracing::error!(job_id = %job_id, error = ?e, "persisting panic outcome failed");
                }
            }
        }
        count
    }

    /// Per-job failure boundary: any error inside the pipeline run lands the
    /// job in `Failed` with the message persisted. This is the only job-fatal,
    /// user-visible failure mode.
    async fn process_job(&self, job: ImportJobRecord) {
        let job_id = job.id;
        let outcome = crate::orchestrator::run_import(
            self.completion.as_ref(),
            self.flight_api.as_ref(),
            self.store.as_ref(),
            &job,
            &self.cfg,
        )
        .await;

        let update = match outcome {
            Ok((extracted, confidence_map)) => {
                tracing::info!(job_id = %job_id, "import job completed");
                ExtractedUpdate {
                    extracted: Some(extracted),
                    confidence_map: Some(confidence_map),
                    status: Some(JobStatus::Completed),
                    error_message: None,
                }
            }
            Err(e) => {
                counter!("import_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job_id, error = ?e, "import job failed");
                ExtractedUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        if let Err(e) = self.store.update_import_job_extracted(job_id, update).await {
            tracing::error!(job_id = %job_id, error = ?e, "persisting job outcome failed");
        }
    }

    /// Poll loop for long-lived deployments.
    pub fn spawn_polling(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let processed = self.run_once().await;
                if processed > 0 {
                    tracing::debug!(processed, "worker tick");
                }
            }
        })
    }
}

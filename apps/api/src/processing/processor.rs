use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::buckets::service as buckets;
use crate::config::ChunkingSettings;
use crate::documents::service::{self as documents, NewDocument};
use crate::errors::AppError;
use crate::jobs::service::{self as jobs, EventLevel};
use crate::models::document::{DocumentRow, DocumentStatus};
use crate::models::job::{JobRow, JobStatus, SourceType};
use crate::processing::chunker::{chunk_text, settings_for_job};
use crate::processing::embedder::Embedder;
use crate::processing::extract::{effective_content_type, extract_text};
use crate::processing::runner::JobExecutor;
use crate::storage::{normalize_prefix, object_url, ObjectStore, S3Settings, StoreFactory};

const EMBED_BATCH_SIZE: usize = 32;

/// One unit of work in a job run.
enum WorkItem {
    /// An object under the job's S3 prefix, not yet downloaded.
    Object {
        store: Arc<dyn ObjectStore>,
        key: String,
    },
    /// A document row that already exists (direct uploads).
    Document(DocumentRow),
}

/// What a run does with a downloaded S3 object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectPlan {
    /// This job already holds the processed content.
    Unchanged(Uuid),
    /// Another job processed identical content. Recorded as `SKIPPED` on this
    /// job's own row when it has one.
    Skip { previous: Uuid, reuse: Option<Uuid> },
    Process { reuse: Option<Uuid> },
}

/// `duplicate` is the tenant's processed row with the same location and hash;
/// `own` is the row this job created for the location on an earlier run.
/// A job keeps at most one row per location across re-runs.
fn plan_object(
    job_id: Uuid,
    hash: &str,
    duplicate: Option<&DocumentRow>,
    own: Option<&DocumentRow>,
) -> ObjectPlan {
    if let Some(own) = own.filter(|d| {
        d.status() == DocumentStatus::Processed && d.content_hash == hash
    }) {
        return ObjectPlan::Unchanged(own.id);
    }
    let reuse = own.map(|d| d.id);
    match duplicate {
        Some(previous) if previous.job_id == Some(job_id) => ObjectPlan::Unchanged(previous.id),
        Some(previous) => ObjectPlan::Skip {
            previous: previous.id,
            reuse,
        },
        None => ObjectPlan::Process { reuse },
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    /// Final status and error message for a run that was not cancelled.
    pub fn outcome(&self) -> (JobStatus, Option<String>) {
        if self.failed == 0 {
            (JobStatus::Completed, None)
        } else {
            (
                JobStatus::Failed,
                Some(format!(
                    "{} of {} documents failed to process",
                    self.failed, self.total
                )),
            )
        }
    }
}

/// Downloads, extracts, chunks and embeds the documents of a job.
#[derive(Clone)]
pub struct Processor {
    db: PgPool,
    stores: StoreFactory,
    uploads: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingSettings,
}

impl Processor {
    pub fn new(
        db: PgPool,
        stores: StoreFactory,
        uploads: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingSettings,
    ) -> Self {
        Self {
            db,
            stores,
            uploads,
            embedder,
            chunking,
        }
    }

    /// Runs a job that has already been claimed into `PROCESSING`.
    /// Unexpected errors fail the job with the error text.
    pub async fn process_job(&self, job_id: Uuid) {
        match self.run(job_id).await {
            Ok(summary) => info!(
                "Job {job_id} finished: {} processed, {} skipped, {} failed{}",
                summary.processed,
                summary.skipped,
                summary.failed,
                if summary.cancelled { " (cancelled)" } else { "" }
            ),
            Err(e) => {
                error!("Job {job_id} failed: {e}");
                let message = e.to_string();
                let finished =
                    jobs::finish(&self.db, job_id, JobStatus::Failed, Some(message.as_str())).await;
                if let Err(e) = finished {
                    error!("Could not mark job {job_id} as failed: {e}");
                }
                self.event(job_id, EventLevel::Error, &format!("Job failed: {message}"))
                    .await;
            }
        }
    }

    async fn event(&self, job_id: Uuid, level: EventLevel, message: &str) {
        if let Err(e) = jobs::record_event(&self.db, job_id, level, message).await {
            warn!("Could not record event for job {job_id}: {e}");
        }
    }

    async fn run(&self, job_id: Uuid) -> Result<RunSummary, AppError> {
        let job = jobs::get(&self.db, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;
        if job.status() != JobStatus::Processing {
            warn!("Job {job_id} is {} and will not be processed", job.status);
            return Ok(RunSummary {
                cancelled: true,
                ..Default::default()
            });
        }

        let chunking =
            settings_for_job(job.config.as_ref(), self.chunking).map_err(AppError::Validation)?;
        let work = self.collect_work(&job).await?;

        let mut summary = RunSummary {
            total: work.len(),
            ..Default::default()
        };
        self.event(
            job_id,
            EventLevel::Info,
            &format!("Processing started with {} document(s)", work.len()),
        )
        .await;
        if work.is_empty() {
            self.event(job_id, EventLevel::Warn, "No documents found at the job source")
                .await;
        }

        for item in work {
            if jobs::current_status(&self.db, job_id).await? != Some(JobStatus::Processing) {
                summary.cancelled = true;
                break;
            }
            match item {
                WorkItem::Object { store, key } => {
                    self.handle_object(&job, store.as_ref(), &key, chunking, &mut summary)
                        .await?
                }
                WorkItem::Document(doc) => {
                    let data =
                        documents::read_content(&self.db, &self.stores, &self.uploads, &doc).await;
                    match data {
                        Ok(data) => self.handle_document(&job, &doc, data, chunking, &mut summary).await?,
                        Err(e) => {
                            self.fail_document(&job, &doc, &e.to_string(), &mut summary)
                                .await?
                        }
                    }
                }
            }
        }

        if summary.cancelled {
            self.event(
                job_id,
                EventLevel::Warn,
                &format!(
                    "Job cancelled after {} of {} document(s)",
                    summary.processed + summary.skipped + summary.failed,
                    summary.total
                ),
            )
            .await;
            return Ok(summary);
        }

        let (status, message) = summary.outcome();
        if jobs::finish(&self.db, job_id, status, message.as_deref()).await? {
            let level = if status == JobStatus::Completed {
                EventLevel::Info
            } else {
                EventLevel::Error
            };
            self.event(
                job_id,
                level,
                &format!(
                    "Job {}: {} processed, {} skipped, {} failed",
                    status.as_str(),
                    summary.processed,
                    summary.skipped,
                    summary.failed
                ),
            )
            .await;
        } else {
            // Cancelled between the last document and the final write.
            summary.cancelled = true;
        }
        Ok(summary)
    }

    async fn collect_work(&self, job: &JobRow) -> Result<Vec<WorkItem>, AppError> {
        let bucket = match job.source_type() {
            Some(SourceType::Upload) => {
                let docs = documents::list_for_job(&self.db, job.tenant_id, job.id).await?;
                return Ok(docs.into_iter().map(WorkItem::Document).collect());
            }
            Some(SourceType::S3) => {
                let bucket_id = job.s3_bucket_config_id.ok_or_else(|| {
                    AppError::Validation(
                        "The job's S3 bucket configuration no longer exists".to_string(),
                    )
                })?;
                buckets::get(&self.db, job.tenant_id, bucket_id).await?
            }
            None => buckets::get_default(&self.db, job.tenant_id).await?,
        };

        let store = self.stores.for_bucket(&bucket).await;
        let prefix = normalize_prefix(&job.source_location);
        let objects = store.list(&prefix).await?;
        let settings = S3Settings::from_bucket_config(&bucket, self.stores.defaults());
        info!(
            "Job {} found {} object(s) under {}",
            job.id,
            objects.len(),
            object_url(&settings, &prefix)
        );
        Ok(objects
            .into_iter()
            .map(|o| WorkItem::Object {
                store: store.clone(),
                key: o.key,
            })
            .collect())
    }

    async fn handle_object(
        &self,
        job: &JobRow,
        store: &dyn ObjectStore,
        key: &str,
        chunking: ChunkingSettings,
        summary: &mut RunSummary,
    ) -> Result<(), AppError> {
        let data = match store.get(key).await {
            Ok(data) => data,
            Err(e) => {
                summary.failed += 1;
                self.event(job.id, EventLevel::Error, &format!("Could not download {key}: {e}"))
                    .await;
                return Ok(());
            }
        };

        let location = store.location(key);
        let hash = documents::content_hash(&data);
        let size = i64::try_from(data.len()).unwrap_or(i64::MAX);
        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let content_type = effective_content_type(None, &filename);

        let own = documents::find_job_document(&self.db, job.id, &location).await?;
        let duplicate =
            documents::find_processed_duplicate(&self.db, job.tenant_id, &location, &hash).await?;

        let reuse = match plan_object(job.id, &hash, duplicate.as_ref(), own.as_ref()) {
            ObjectPlan::Unchanged(previous) => {
                summary.skipped += 1;
                self.event(
                    job.id,
                    EventLevel::Info,
                    &format!("Skipped {key}: unchanged since document {previous}"),
                )
                .await;
                return Ok(());
            }
            ObjectPlan::Skip { previous, reuse } => {
                match reuse {
                    Some(id) => {
                        documents::refresh_content(&self.db, id, size, &hash).await?;
                        documents::set_status(&self.db, id, DocumentStatus::Skipped, None).await?;
                    }
                    None => {
                        documents::insert_document(
                            &self.db,
                            &NewDocument {
                                tenant_id: job.tenant_id,
                                job_id: Some(job.id),
                                uploaded_by: None,
                                filename: &filename,
                                file_path: &location,
                                file_size: size,
                                content_type: Some(content_type.as_str()),
                                content_hash: &hash,
                                status: DocumentStatus::Skipped,
                            },
                        )
                        .await?;
                    }
                }
                summary.skipped += 1;
                self.event(
                    job.id,
                    EventLevel::Info,
                    &format!("Skipped {key}: unchanged since document {previous}"),
                )
                .await;
                return Ok(());
            }
            ObjectPlan::Process { reuse } => reuse,
        };

        let doc = match reuse {
            Some(id) => documents::refresh_content(&self.db, id, size, &hash).await?,
            None => {
                documents::insert_document(
                    &self.db,
                    &NewDocument {
                        tenant_id: job.tenant_id,
                        job_id: Some(job.id),
                        uploaded_by: None,
                        filename: &filename,
                        file_path: &location,
                        file_size: size,
                        content_type: Some(content_type.as_str()),
                        content_hash: &hash,
                        status: DocumentStatus::Pending,
                    },
                )
                .await?
            }
        };

        self.handle_document(job, &doc, data, chunking, summary).await
    }

    async fn handle_document(
        &self,
        job: &JobRow,
        doc: &DocumentRow,
        data: Bytes,
        chunking: ChunkingSettings,
        summary: &mut RunSummary,
    ) -> Result<(), AppError> {
        match self.embed_document(doc, data, chunking).await {
            Ok(chunks) => {
                documents::set_status(&self.db, doc.id, DocumentStatus::Processed, None).await?;
                summary.processed += 1;
                self.event(
                    job.id,
                    EventLevel::Info,
                    &format!("Processed {} into {chunks} chunk(s)", doc.filename),
                )
                .await;
                Ok(())
            }
            Err(reason) => self.fail_document(job, doc, &reason, summary).await,
        }
    }

    async fn fail_document(
        &self,
        job: &JobRow,
        doc: &DocumentRow,
        reason: &str,
        summary: &mut RunSummary,
    ) -> Result<(), AppError> {
        documents::set_status(&self.db, doc.id, DocumentStatus::Failed, Some(reason)).await?;
        summary.failed += 1;
        self.event(
            job.id,
            EventLevel::Error,
            &format!("Failed to process {}: {reason}", doc.filename),
        )
        .await;
        Ok(())
    }

    /// Extracts, chunks, embeds and stores one document; returns the chunk count.
    async fn embed_document(
        &self,
        doc: &DocumentRow,
        data: Bytes,
        chunking: ChunkingSettings,
    ) -> Result<usize, String> {
        let content_type = effective_content_type(doc.content_type.as_deref(), &doc.filename);
        let filename = doc.filename.clone();
        let text = tokio::task::spawn_blocking(move || {
            extract_text(&data, Some(content_type.as_str()), &filename)
        })
        .await
        .map_err(|e| format!("text extraction aborted: {e}"))?
        .map_err(|e| e.to_string())?;

        let chunks = chunk_text(&text, chunking);
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let embedded = self.embedder.embed(batch).await.map_err(|e| e.to_string())?;
            vectors.extend(embedded);
        }

        store_chunks(&self.db, doc.id, &chunks, &vectors)
            .await
            .map_err(|e| format!("could not store chunks: {e}"))?;
        Ok(chunks.len())
    }
}

#[async_trait]
impl JobExecutor for Processor {
    async fn execute(&self, job_id: Uuid) {
        self.process_job(job_id).await;
    }
}

/// Replaces a document's chunks.
async fn store_chunks(
    pool: &PgPool,
    document_id: Uuid,
    chunks: &[String],
    vectors: &[Vec<f32>],
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    for (index, (content, embedding)) in chunks.iter().zip(vectors).enumerate() {
        sqlx::query(
            r#"
            INSERT INTO document_chunks (id, document_id, chunk_index, content, embedding)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(index as i32)
        .bind(content)
        .bind(embedding)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::AbortHandle;
use tracing::info;
use uuid::Uuid;

use crate::coach::ConversationRegistry;
use crate::config::LimitsConfig;
use crate::pipeline::{PipelineHandle, PipelineProgress, PipelineStage};

/// One pipeline run as seen by the upload surface.
#[derive(Clone, Debug)]
pub struct UploadJob {
    pub id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub started_at: DateTime<Utc>,
    pub progress: watch::Receiver<PipelineProgress>,
    abort: AbortHandle,
}

impl UploadJob {
    pub fn new(handle: &PipelineHandle, file_name: String, size: u64) -> Self {
        Self {
            id: handle.job_id,
            file_name,
            size,
            started_at: Utc::now(),
            progress: handle.progress.clone(),
            abort: handle.abort_handle(),
        }
    }

    pub fn current(&self) -> PipelineProgress {
        self.progress.borrow().clone()
    }

    /// The run finished without completing (cancelled or aborted).
    pub fn is_abandoned(&self) -> bool {
        self.current().stage != PipelineStage::Completed && self.progress.has_changed().is_err()
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, UploadJob>>>,
}

impl JobRegistry {
    pub async fn insert(&self, job: UploadJob) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: &Uuid) -> Option<UploadJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Aborts the run and forgets the job. Returns false for unknown ids.
    pub async fn cancel(&self, id: &Uuid) -> bool {
        match self.jobs.write().await.remove(id) {
            Some(job) => {
                job.abort.abort();
                info!("[jobs] 🛑 Cancelled upload {} ({})", job.id, job.file_name);
                true
            }
            None => false,
        }
    }

    /// Drops jobs that completed more than `max_age` ago and jobs whose run
    /// ended without completing.
    pub async fn reap(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();

        jobs.retain(|_, job| {
            if job.is_abandoned() {
                return false;
            }
            match job.current().completed_at {
                // Clock skew (negative age) keeps the job.
                Some(completed_at) => (now - completed_at)
                    .to_std()
                    .map_or(true, |age| age <= max_age),
                None => true,
            }
        });

        let removed = before - jobs.len();
        if removed > 0 {
            info!("[jobs] ✅ Reaped {} finished upload job(s)", removed);
        }
        removed
    }
}

/// Start a background task that periodically prunes finished jobs and idle
/// conversations
pub fn start_reaper_task(
    jobs: JobRegistry,
    conversations: ConversationRegistry,
    limits: &LimitsConfig,
) -> tokio::task::JoinHandle<()> {
    let max_age = Duration::from_secs(limits.job_retention_seconds);
    let max_idle = Duration::from_secs(limits.conversation_retention_seconds);
    let reap_interval = Duration::from_secs(limits.job_reap_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "[jobs] 🧹 Starting job reaper (interval: {:.1} min, retention: {:.1} min)",
            reap_interval.as_secs_f64() / 60.0,
            max_age.as_secs_f64() / 60.0
        );

        loop {
            interval.tick().await;

            jobs.reap(max_age).await;
            conversations.reap(max_idle).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::{Pipeline, UploadedFile};
    use crate::store::VideoStore;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(VideoStore::in_memory("jobs-test")),
            PipelineConfig {
                seed: Some(1),
                ..PipelineConfig::default()
            },
        )
    }

    fn file() -> UploadedFile {
        UploadedFile {
            name: "game.mp4".to_string(),
            size: 1024,
            mime_type: "video/mp4".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_jobs_are_kept_until_retention_expires() {
        let registry = JobRegistry::default();
        let handle = pipeline().start(file());
        let id = handle.job_id;
        registry.insert(UploadJob::new(&handle, "game.mp4".to_string(), 1024)).await;

        handle.wait().await.unwrap();
        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.current().stage, PipelineStage::Completed);
        assert!(!job.is_abandoned());

        assert_eq!(registry.reap(Duration::from_secs(600)).await, 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.reap(Duration::ZERO).await, 1);
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn running_jobs_are_kept() {
        let registry = JobRegistry::default();
        let handle = pipeline().start(file());
        registry.insert(UploadJob::new(&handle, "game.mp4".to_string(), 1024)).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.reap(Duration::ZERO).await, 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_and_forgets() {
        let registry = JobRegistry::default();
        let handle = pipeline().start(file());
        let id = handle.job_id;
        let job = UploadJob::new(&handle, "game.mp4".to_string(), 1024);
        registry.insert(job.clone()).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.cancel(&id).await);
        assert!(!registry.cancel(&id).await);
        assert!(handle.wait().await.is_none());
        assert!(job.is_abandoned());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_jobs_are_reaped() {
        let registry = JobRegistry::default();
        let handle = pipeline().start(file());
        registry.insert(UploadJob::new(&handle, "game.mp4".to_string(), 1024)).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
        assert!(handle.wait().await.is_none());
        assert_eq!(registry.reap(Duration::from_secs(600)).await, 1);
    }
}

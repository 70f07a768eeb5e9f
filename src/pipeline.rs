//! Simulated upload + analysis pipeline.
//!
//! A run walks `Idle -> Uploading -> Processing -> Completed`. Stage advances
//! are driven by timers today; the [`StageMachine`] itself knows nothing about
//! time, so a real backend can drive it from network completions instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analytics::{synthesize, SynthesisProfile};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::models::Video;
use crate::store::VideoStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Idle,
    Uploading,
    Processing,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineProgress {
    pub stage: PipelineStage,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// File descriptor handed over by the upload boundary.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Precondition for starting a run.
pub fn validate_upload(file: &UploadedFile, max_file_size: u64) -> Result<()> {
    if !file.mime_type.starts_with("video/") {
        return Err(Error::InvalidUpload(
            "Only video files are allowed".to_string(),
        ));
    }
    if file.name.trim().is_empty() {
        return Err(Error::InvalidUpload("File name is required".to_string()));
    }
    if file.size > max_file_size {
        return Err(Error::UploadTooLarge {
            max_mb: max_file_size / 1024 / 1024,
        });
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct StageMachine {
    stage: PipelineStage,
    percent: u8,
    upload_step: u8,
    midpoint: u8,
    processing_step: u8,
    upload_interval: Duration,
    processing_interval: Duration,
    video_id: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl StageMachine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            stage: PipelineStage::Idle,
            percent: 0,
            upload_step: config.upload_step.max(1),
            midpoint: config.midpoint.clamp(1, 100),
            processing_step: config.processing_step.max(1),
            upload_interval: config.upload_interval(),
            processing_interval: config.processing_interval(),
            video_id: None,
            completed_at: None,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn start(&mut self) {
        if self.stage == PipelineStage::Idle {
            self.stage = PipelineStage::Uploading;
            self.percent = 0;
        }
    }

    /// How long to wait before the next tick, or `None` once the run is ready
    /// to complete (or has not started / already completed).
    pub fn next_delay(&self) -> Option<Duration> {
        match self.stage {
            PipelineStage::Uploading => Some(self.upload_interval),
            PipelineStage::Processing if self.percent < 100 => Some(self.processing_interval),
            _ => None,
        }
    }

    pub fn tick(&mut self) {
        match self.stage {
            PipelineStage::Uploading => {
                self.percent = self.percent.saturating_add(self.upload_step).min(self.midpoint);
                if self.percent >= self.midpoint {
                    self.stage = PipelineStage::Processing;
                }
            }
            PipelineStage::Processing => {
                self.percent = self.percent.saturating_add(self.processing_step).min(100);
            }
            PipelineStage::Idle | PipelineStage::Completed => {}
        }
    }

    /// Moves a fully processed run to `Completed`. Returns false if the run
    /// was not ready.
    pub fn complete(&mut self, video_id: String) -> bool {
        if self.stage != PipelineStage::Processing || self.percent < 100 {
            return false;
        }
        self.stage = PipelineStage::Completed;
        self.video_id = Some(video_id);
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn progress(&self) -> PipelineProgress {
        PipelineProgress {
            stage: self.stage,
            percent: self.percent,
            video_id: self.video_id.clone(),
            completed_at: self.completed_at,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<VideoStore>,
    config: Arc<PipelineConfig>,
    permits: Arc<Semaphore>,
    rng: Arc<Mutex<fastrand::Rng>>,
}

impl Pipeline {
    pub fn new(store: Arc<VideoStore>, config: PipelineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            store,
            permits: Arc::new(Semaphore::new(config.concurrent_runs())),
            config: Arc::new(config),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Spawns a run in the background.
    pub fn start(&self, file: UploadedFile) -> PipelineHandle {
        let job_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(StageMachine::new(&self.config).progress());
        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.run(file, tx).await });

        PipelineHandle {
            job_id,
            progress: rx,
            task,
        }
    }

    /// Drives one run to completion and inserts the resulting video.
    pub async fn run(&self, file: UploadedFile, progress: watch::Sender<PipelineProgress>) -> Video {
        let mut machine = StageMachine::new(&self.config);

        // Semaphore is never closed, so acquire only fails after shutdown.
        let _permit = self.permits.acquire().await.ok();

        let start_time = Instant::now();
        machine.start();
        progress.send_replace(machine.progress());
        info!(
            "[pipeline] ⏫ Uploading {} ({:.2} MB)",
            file.name,
            file.size as f64 / 1024.0 / 1024.0
        );

        let mut stage = machine.stage();
        while let Some(delay) = machine.next_delay() {
            tokio::time::sleep(delay).await;
            machine.tick();
            if machine.stage() != stage {
                stage = machine.stage();
                info!("[pipeline] ⚙️  Processing {} ({}%)", file.name, machine.percent());
            }
            debug!("[pipeline] {} {:?} {}%", file.name, stage, machine.percent());
            progress.send_replace(machine.progress());
        }

        let profile = SynthesisProfile::new(self.config.total_shots, self.config.made_probability);
        let analytics = synthesize(&mut self.fork_rng(), &profile);
        let video = Video::completed(file.name, analytics, profile.footage_length());

        self.store.add_video(video.clone());
        machine.complete(video.id.clone());
        progress.send_replace(machine.progress());

        info!(
            "[pipeline] ✅ Completed {} as {} in {:.2}s",
            video.name,
            video.id,
            start_time.elapsed().as_secs_f64()
        );
        video
    }

    fn fork_rng(&self) -> fastrand::Rng {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fork()
    }
}

pub struct PipelineHandle {
    pub job_id: Uuid,
    pub progress: watch::Receiver<PipelineProgress>,
    task: JoinHandle<Video>,
}

impl PipelineHandle {
    pub fn current(&self) -> PipelineProgress {
        self.progress.borrow().clone()
    }

    /// Aborts an in-flight run. A cancelled run never inserts a video.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Resolves to the inserted video, or `None` if the run was cancelled.
    pub async fn wait(self) -> Option<Video> {
        self.task.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<VideoStore> {
        Arc::new(VideoStore::in_memory("pipeline-test"))
    }

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            size: 12 * 1024 * 1024,
            mime_type: "video/mp4".to_string(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            seed: Some(5),
            max_concurrent_runs: Some(4),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn machine_walks_stages_in_order() {
        let mut machine = StageMachine::new(&PipelineConfig::default());
        assert_eq!(machine.next_delay(), None);
        machine.start();

        let mut seen = vec![(machine.stage(), machine.percent())];
        while machine.next_delay().is_some() {
            machine.tick();
            seen.push((machine.stage(), machine.percent()));
        }

        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(seen.first(), Some(&(PipelineStage::Uploading, 0)));
        assert_eq!(seen.last(), Some(&(PipelineStage::Processing, 100)));
        let first_processing = seen.iter().position(|s| s.0 == PipelineStage::Processing).unwrap();
        assert_eq!(seen[first_processing].1, 60);
        assert!(seen[first_processing..]
            .iter()
            .all(|s| s.0 == PipelineStage::Processing));

        assert!(machine.complete("v".to_string()));
        assert_eq!(machine.stage(), PipelineStage::Completed);
        assert_eq!(machine.next_delay(), None);
        machine.tick();
        assert_eq!(machine.percent(), 100);
    }

    #[test]
    fn machine_refuses_early_completion() {
        let mut machine = StageMachine::new(&PipelineConfig::default());
        assert!(!machine.complete("v".to_string()));
        machine.start();
        machine.tick();
        assert!(!machine.complete("v".to_string()));
        assert_eq!(machine.stage(), PipelineStage::Uploading);
    }

    #[test]
    fn degenerate_steps_still_terminate() {
        let config = PipelineConfig {
            upload_step: 0,
            processing_step: 0,
            midpoint: 0,
            ..PipelineConfig::default()
        };
        let mut machine = StageMachine::new(&config);
        machine.start();
        let mut ticks = 0;
        while machine.next_delay().is_some() {
            machine.tick();
            ticks += 1;
            assert!(ticks <= 100);
        }
        assert_eq!(machine.percent(), 100);
    }

    #[test]
    fn upload_validation() {
        assert!(validate_upload(&file("a.mp4"), u64::MAX).is_ok());

        let mut image = file("a.png");
        image.mime_type = "image/png".to_string();
        assert!(matches!(
            validate_upload(&image, u64::MAX),
            Err(Error::InvalidUpload(_))
        ));

        assert!(matches!(
            validate_upload(&file("a.mp4"), 1024),
            Err(Error::UploadTooLarge { .. })
        ));

        assert!(matches!(
            validate_upload(&file("  "), u64::MAX),
            Err(Error::InvalidUpload(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_adds_exactly_one_completed_video() {
        let store = store();
        let pipeline = Pipeline::new(store.clone(), config());

        let handle = pipeline.start(file("game.mp4"));
        let video = handle.wait().await.unwrap();

        assert_eq!(store.len(), 2);
        let stored = store.get(&video.id).unwrap();
        assert!(stored.is_ready());
        assert_eq!(stored.name, "game.mp4");
        let analytics = stored.analytics.unwrap();
        assert_eq!(analytics.total_shots, 24);
        assert_eq!(analytics.made + analytics.missed, analytics.total_shots);
        assert!(analytics.player_paths.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn observed_progress_is_monotone() {
        let store = store();
        let pipeline = Pipeline::new(store.clone(), config());
        let handle = pipeline.start(file("game.mp4"));

        let mut rx = handle.progress.clone();
        let watcher = tokio::spawn(async move {
            let mut seen = vec![rx.borrow_and_update().clone()];
            while rx.changed().await.is_ok() {
                seen.push(rx.borrow_and_update().clone());
            }
            seen
        });

        let video = handle.wait().await.unwrap();
        let seen = watcher.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(seen.iter().all(|p| p.percent <= 100));
        let last = seen.last().unwrap();
        assert_eq!(last.stage, PipelineStage::Completed);
        assert_eq!(last.percent, 100);
        assert_eq!(last.video_id.as_deref(), Some(video.id.as_str()));
        assert!(last.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn store_stays_untouched_until_completion() {
        let store = store();
        let pipeline = Pipeline::new(store.clone(), config());
        let handle = pipeline.start(file("game.mp4"));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(handle.current().stage, PipelineStage::Processing);
        assert_eq!(store.len(), 1);

        handle.wait().await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_inserts_nothing() {
        let store = store();
        let pipeline = Pipeline::new(store.clone(), config());
        let handle = pipeline.start(file("game.mp4"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(handle.current().stage, PipelineStage::Uploading);
        handle.cancel();
        assert!(handle.wait().await.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_queue_behind_the_concurrency_limit() {
        let store = store();
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                max_concurrent_runs: Some(1),
                ..config()
            },
        );

        let first = pipeline.start(file("first.mp4"));
        let second = pipeline.start(file("second.mp4"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(first.current().stage, PipelineStage::Uploading);
        assert_eq!(second.current().stage, PipelineStage::Idle);

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_pipelines_agree() {
        let a = Pipeline::new(store(), config()).start(file("a.mp4")).wait().await.unwrap();
        let b = Pipeline::new(store(), config()).start(file("b.mp4")).wait().await.unwrap();
        assert_eq!(a.analytics, b.analytics);
        assert_ne!(a.id, b.id);
    }
}

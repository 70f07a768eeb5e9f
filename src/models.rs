use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::coach::{ChatMessage, CoachResponder, ConversationRegistry};
use crate::config::Config;
use crate::jobs::JobRegistry;
use crate::pipeline::Pipeline;
use crate::store::{StoreEvent, Subscription, VideoStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Processing,
    Completed,
}

/// One uploaded footage item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub name: String,
    pub upload_date: DateTime<Utc>,
    pub status: VideoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<VideoAnalytics>,
}

impl Video {
    /// A freshly created record that has not been analyzed yet.
    pub fn processing(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            upload_date: Utc::now(),
            status: VideoStatus::Processing,
            thumbnail: None,
            duration: None,
            analytics: None,
        }
    }

    /// A record with its analytics attached in one step.
    pub fn completed(name: impl Into<String>, analytics: VideoAnalytics, duration: f64) -> Self {
        Self {
            status: VideoStatus::Completed,
            duration: Some(duration),
            analytics: Some(analytics),
            ..Self::processing(name)
        }
    }

    /// Status as consumers should read it: no analytics means still processing.
    pub fn effective_status(&self) -> VideoStatus {
        match self.analytics {
            Some(_) => self.status,
            None => VideoStatus::Processing,
        }
    }

    /// Analytics and coach actions are only allowed on ready videos.
    pub fn is_ready(&self) -> bool {
        self.effective_status() == VideoStatus::Completed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotType {
    Made,
    Missed,
}

/// Normalized court coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourtPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: String,
    /// Seconds into the footage.
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: ShotType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CourtPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub time: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPath {
    pub player_id: String,
    pub player_name: String,
    pub color: String,
    pub points: Vec<PathPoint>,
}

/// Display-only stat cell. Synthesized bins only use `Count` and `Text`;
/// `Number` keeps fractional cells from stored snapshots intact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(u32),
    Number(f64),
    Text(String),
}

pub type StatBin = BTreeMap<String, StatValue>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatBins {
    pub overall: StatBin,
    pub first_half: StatBin,
    pub second_half: StatBin,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnalytics {
    pub total_shots: u32,
    pub made: u32,
    pub missed: u32,
    pub accuracy: f64,
    pub shots: Vec<Shot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_paths: Option<Vec<PlayerPath>>,
    pub stats: StatBins,
}

impl VideoAnalytics {
    pub fn shots_of(&self, kind: ShotType) -> impl Iterator<Item = &Shot> {
        self.shots.iter().filter(move |shot| shot.kind == kind)
    }
}

/// Partial update for a stored video. Identity, upload date and analytics are
/// not patchable.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VideoPatch {
    pub name: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub status: Option<VideoStatus>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VideoStore>,
    pub pipeline: Pipeline,
    pub coach: CoachResponder,
    pub jobs: JobRegistry,
    pub conversations: ConversationRegistry,
    pub events: broadcast::Sender<StoreEvent>,
    pub config: Config,
    // Keeps the store -> broadcast bridge attached for the lifetime of the state.
    _store_feed: Arc<Subscription>,
}

impl AppState {
    pub fn new(store: Arc<VideoStore>, config: Config) -> Self {
        let (events, _) = broadcast::channel(64);
        let feed = events.clone();
        let store_feed = store.subscribe(move |event| {
            // No receivers is fine; nobody is streaming events right now.
            let _ = feed.send(event.clone());
        });

        Self {
            pipeline: Pipeline::new(store.clone(), config.pipeline.clone()),
            coach: CoachResponder::new(config.coach.reply_delay()),
            jobs: JobRegistry::default(),
            conversations: ConversationRegistry::default(),
            events,
            store,
            config,
            _store_feed: Arc::new(store_feed),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub file_name: String,
    pub size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub video_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResponse {
    pub selected_video_id: Option<String>,
    pub video: Option<Video>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct PromptsResponse {
    pub prompts: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_cells_keep_their_shape() {
        let bin: StatBin =
            serde_json::from_str(r#"{"Assists": 8, "Pace": 98.5, "Field Goal %": "62.5%"}"#).unwrap();
        assert_eq!(bin["Assists"], StatValue::Count(8));
        assert_eq!(bin["Pace"], StatValue::Number(98.5));
        assert_eq!(bin["Field Goal %"], StatValue::Text("62.5%".to_string()));
        assert_eq!(
            serde_json::to_string(&bin).unwrap(),
            r#"{"Assists":8,"Field Goal %":"62.5%","Pace":98.5}"#
        );
    }

    #[test]
    fn patch_rejects_analytics() {
        assert!(serde_json::from_str::<VideoPatch>(r#"{"name": "a.mp4"}"#).is_ok());
        assert!(serde_json::from_str::<VideoPatch>(r#"{"analytics": null}"#).is_err());
    }
}

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    coach::{ChatMessage, CoachResponder, Conversation, SUGGESTED_PROMPTS},
    error::{Error, Result},
    jobs::UploadJob,
    models::{
        AppState, ChatRequest, ConversationResponse, PromptsResponse, SelectionRequest,
        SelectionResponse, UploadResponse, Video, VideoAnalytics, VideoPatch,
    },
    pipeline::{validate_upload, PipelineProgress, UploadedFile},
};

/// `Json` whose rejections are reported as crate errors.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

fn multipart_error(max_file_size: u64) -> impl Fn(multer::Error) -> Error {
    move |e| match e {
        multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
            Error::UploadTooLarge {
                max_mb: max_file_size / 1024 / 1024,
            }
        }
        other => {
            error!("Multipart parsing error: {}", other);
            Error::Multipart(other.to_string())
        }
    }
}

/// Accept a video upload and start its pipeline run
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let start_time = Instant::now();
    let max_file_size = state.config.max_file_size;

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Multipart("Missing Content-Type header".to_string()))?;

    let boundary = multer::parse_boundary(content_type).map_err(|e| {
        error!("Failed to parse boundary: {}", e);
        Error::Multipart(e.to_string())
    })?;

    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().per_field(max_file_size));
    let mut multipart = multer::Multipart::with_constraints(
        request.into_body().into_data_stream(),
        boundary,
        constraints,
    );

    let mut upload: Option<UploadedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(multipart_error(max_file_size))?
    {
        if field.name() != Some("file") {
            // Drain non-file fields
            while field
                .chunk()
                .await
                .map_err(multipart_error(max_file_size))?
                .is_some()
            {}
            continue;
        }

        let mut file = UploadedFile {
            name: field.file_name().unwrap_or("video.mp4").to_string(),
            size: 0,
            mime_type: field
                .content_type()
                .map(|mime| mime.essence_str().to_string())
                .unwrap_or_default(),
        };

        // Reject non-video payloads before reading them
        validate_upload(&file, max_file_size).map_err(|e| {
            warn!("[POST /upload] ❌ Rejected {} ({}): {}", file.name, file.mime_type, e);
            e
        })?;

        // The simulated pipeline only needs the size; payload bytes are discarded
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(multipart_error(max_file_size))?
        {
            file.size += chunk.len() as u64;
        }

        upload = Some(file);
    }

    let file = upload.ok_or_else(|| Error::InvalidUpload("No file uploaded".to_string()))?;
    validate_upload(&file, max_file_size)?;

    let handle = state.pipeline.start(file.clone());
    let job_id = handle.job_id;
    state
        .jobs
        .insert(UploadJob::new(&handle, file.name.clone(), file.size))
        .await;

    info!("[POST /upload] 📁 File: {} ({})", file.name, file.mime_type);
    info!(
        "[POST /upload] 📦 Size: {:.2} MB ({} bytes)",
        file.size as f64 / 1024.0 / 1024.0,
        file.size
    );
    info!(
        "[POST /upload] ✅ ACCEPTED - Job ID: {} in {:.2}s",
        job_id,
        start_time.elapsed().as_secs_f64()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id,
            file_name: file.name,
            size: file.size,
        }),
    ))
}

pub async fn upload_status_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<PipelineProgress>> {
    let job = state
        .jobs
        .get(&job_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Upload {}", job_id)))?;
    Ok(Json(job.current()))
}

/// Stream pipeline progress until the run completes
pub async fn upload_events_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let job = state
        .jobs
        .get(&job_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Upload {}", job_id)))?;

    let events = stream::unfold(Some((job.progress, true)), |cursor| async move {
        let (mut rx, first) = cursor?;
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let progress = rx.borrow_and_update().clone();
        let next = match progress.stage {
            crate::pipeline::PipelineStage::Completed => None,
            _ => Some((rx, false)),
        };
        Some((Event::default().event("progress").json_data(&progress), next))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn cancel_upload_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.jobs.cancel(&job_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!("Upload {}", job_id)))
    }
}

pub async fn list_videos_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Video>> {
    Json(state.store.videos())
}

pub async fn get_video_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Video>> {
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Video {}", id)))
}

/// Unknown ids are a no-op, reported as 204
pub async fn update_video_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<VideoPatch>,
) -> Response {
    match state.store.update_video(&id, patch) {
        Some(video) => Json(video).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn delete_video_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.store.delete_video(&id) {
        info!("[DELETE /videos] 🗑️  Video {} has been removed", id);
    }
    StatusCode::NO_CONTENT
}

pub async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VideoAnalytics>> {
    let video = state
        .store
        .get(&id)
        .ok_or_else(|| Error::NotFound(format!("Video {}", id)))?;
    match video.analytics {
        Some(analytics) if video.is_ready() => Ok(Json(analytics)),
        _ => Err(Error::NotReady(id)),
    }
}

fn selection(state: &AppState) -> SelectionResponse {
    SelectionResponse {
        selected_video_id: state.store.selected_video_id(),
        video: state.store.selected_video(),
    }
}

pub async fn get_selection_handler(State(state): State<Arc<AppState>>) -> Json<SelectionResponse> {
    Json(selection(&state))
}

/// Only existing videos can be selected from the outside
pub async fn select_video_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<SelectionRequest>,
) -> Result<Json<SelectionResponse>> {
    if let Some(id) = &request.video_id {
        if state.store.get(id).is_none() {
            return Err(Error::NotFound(format!("Video {}", id)));
        }
    }
    state.store.select_video(request.video_id);
    Ok(Json(selection(&state)))
}

/// Stream store change notifications
pub async fn store_events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let events = stream::unfold(state.events.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    return Some((Event::default().event("store").json_data(&event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[GET /events] Subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn prompts_handler() -> Json<PromptsResponse> {
    Json(PromptsResponse {
        prompts: SUGGESTED_PROMPTS.to_vec(),
    })
}

pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ConversationResponse>) {
    let id = state.conversations.create().await;
    info!("[POST /coach/conversations] 💬 Started conversation {}", id);

    (
        StatusCode::CREATED,
        Json(ConversationResponse {
            id,
            messages: Vec::new(),
        }),
    )
}

async fn conversation(state: &AppState, id: &Uuid) -> Result<Arc<RwLock<Conversation>>> {
    state
        .conversations
        .get(id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Conversation {}", id)))
}

pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>> {
    let conversation = conversation(&state, &id).await?;
    let messages = conversation.read().await.messages().to_vec();
    Ok(Json(ConversationResponse { id, messages }))
}

pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.conversations.remove(&id).await {
        info!("[DELETE /coach/conversations] 🗑️  Conversation {} closed", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!("Conversation {}", id)))
    }
}

/// Ask the coach about the selected video
pub async fn ask_coach_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Json<ChatMessage>> {
    CoachResponder::validate(&request.content)?;
    if state.store.is_empty() {
        return Err(Error::NoVideos);
    }
    let conversation = conversation(&state, &id).await?;

    let context = state
        .store
        .selected_video()
        .filter(Video::is_ready)
        .map(|video| video.id);

    let reply = state
        .coach
        .ask(conversation, &request.content, context)
        .await?;
    Ok(Json(reply))
}

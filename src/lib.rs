use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod analytics;
pub mod coach;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod system_info;

pub use crate::error::{Error, Result};

use handlers::{
    analytics_handler, ask_coach_handler, cancel_upload_handler, create_conversation_handler,
    delete_conversation_handler, delete_video_handler, get_conversation_handler,
    get_selection_handler, get_video_handler, list_videos_handler, prompts_handler,
    select_video_handler, store_events_handler, update_video_handler, upload_events_handler,
    upload_handler, upload_status_handler,
};
use models::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route(
            "/uploads/:job_id",
            get(upload_status_handler).delete(cancel_upload_handler),
        )
        .route("/uploads/:job_id/events", get(upload_events_handler))
        .route("/videos", get(list_videos_handler))
        .route(
            "/videos/:id",
            get(get_video_handler)
                .patch(update_video_handler)
                .delete(delete_video_handler),
        )
        .route("/videos/:id/analytics", get(analytics_handler))
        .route(
            "/selection",
            get(get_selection_handler).put(select_video_handler),
        )
        .route("/events", get(store_events_handler))
        .route("/coach/prompts", get(prompts_handler))
        .route("/coach/conversations", post(create_conversation_handler))
        .route(
            "/coach/conversations/:id",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/coach/conversations/:id/messages", post(ask_coach_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

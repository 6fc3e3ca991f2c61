use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use crates::{
    application::video_lists::VideoListUseCase, payments::youtube_client::YoutubeSearchClient,
};
use serde::Deserialize;

use crate::{
    axum_http::{
        error_responses::AppError,
        http_serve::{Infrastructure, contention_settings},
    },
    config::config_model::DotEnvyConfig,
};

#[derive(Debug, Deserialize)]
pub struct VideoListQuery {
    q: String,
}

pub fn routes(config: Arc<DotEnvyConfig>, infra: &Infrastructure) -> Router {
    let usecase = VideoListUseCase::new(
        Arc::clone(&infra.cache_store),
        Arc::new(YoutubeSearchClient::new(
            config.lookups.youtube_api_key.clone(),
        )),
        infra.idempotency_guard(),
        contention_settings(&config),
        Duration::from_secs(config.lookups.video_cache_ttl_secs),
    );

    Router::new()
        .route("/", get(list_videos))
        .with_state(Arc::new(usecase))
}

pub async fn list_videos(
    State(usecase): State<Arc<VideoListUseCase>>,
    Query(query): Query<VideoListQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(usecase.list(&query.q).await?))
}

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use crates::{
    application::word_lookup::WordLookupUseCase, infra::db::repositories::words::WordPostgres,
    payments::dictionary_client::DictionaryApiClient,
};

use crate::{
    axum_http::{
        error_responses::AppError,
        http_serve::{Infrastructure, contention_settings},
    },
    config::config_model::DotEnvyConfig,
};

pub fn routes(config: Arc<DotEnvyConfig>, infra: &Infrastructure) -> Result<Router> {
    let dictionary = DictionaryApiClient::new(&config.lookups.dictionary_base_url)?;
    let usecase = WordLookupUseCase::new(
        Arc::new(WordPostgres::new(Arc::clone(&infra.db_pool))),
        Arc::new(dictionary),
        infra.idempotency_guard(),
        contention_settings(&config),
    );

    Ok(Router::new()
        .route("/:word", get(lookup_word))
        .with_state(Arc::new(usecase)))
}

pub async fn lookup_word(
    State(usecase): State<Arc<WordLookupUseCase>>,
    Path(word): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(usecase.lookup(&word).await?))
}

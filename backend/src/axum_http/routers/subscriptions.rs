use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use crates::{
    application::subscriptions::SubscriptionUseCase,
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::subscriptions::SubscriptionPostgres,
    },
};

use crate::{auth::AuthUser, axum_http::error_responses::AppError};

pub fn routes(db_pool: Arc<PgPoolSquad>) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let subscription_usecase = SubscriptionUseCase::new(Arc::new(subscription_repository));

    Router::new()
        .route("/current", get(current_subscription))
        .with_state(Arc::new(subscription_usecase))
}

pub async fn current_subscription(
    State(subscription_usecase): State<Arc<SubscriptionUseCase>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let current = subscription_usecase
        .current_subscription(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))?;

    Ok(Json(current))
}

use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::repositories::app_users::AppUserRepository,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad, schema::app_users, unit_of_work::run_blocking,
    },
};

pub struct AppUserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl AppUserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl AppUserRepository for AppUserPostgres {
    async fn find_email(&self, account_id: Uuid) -> Result<Option<String>> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let email = app_users::table
                .find(account_id)
                .select(app_users::email)
                .first::<Option<String>>(conn)
                .optional()?;
            Ok(email.flatten())
        })
        .await
    }
}

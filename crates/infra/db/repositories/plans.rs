use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad, schema::plans, unit_of_work::run_blocking,
    },
};
use domain::{entities::plans::PlanEntity, repositories::plans::PlanRepository};

pub struct PlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepository for PlanPostgres {
    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = plans::table
                .filter(plans::id.eq(plan_id))
                .filter(plans::is_active.eq(true))
                .select(PlanEntity::as_select())
                .first::<PlanEntity>(conn)
                .optional()?;
            Ok(result)
        })
        .await
    }
}

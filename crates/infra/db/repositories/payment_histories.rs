use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::payment_histories,
        unit_of_work::{TxOutcome, run_in_transaction},
    },
};
use domain::{
    entities::payment_histories::InsertPaymentHistoryEntity,
    repositories::payment_histories::PaymentHistoryRepository,
};

pub struct PaymentHistoryPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentHistoryPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentHistoryRepository for PaymentHistoryPostgres {
    async fn append(&self, history: InsertPaymentHistoryEntity) -> Result<Uuid> {
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let id = insert_into(payment_histories::table)
                .values(&history)
                .returning(payment_histories::id)
                .get_result::<Uuid>(conn)?;
            Ok(TxOutcome::Commit(id))
        })
        .await
    }
}

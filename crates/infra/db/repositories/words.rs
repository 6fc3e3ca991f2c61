use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into, prelude::*};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::words,
        unit_of_work::{TxOutcome, run_blocking, run_in_transaction},
    },
};
use domain::{
    entities::words::{InsertWordEntity, WordEntity},
    repositories::words::WordRepository,
};

pub struct WordPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WordPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WordRepository for WordPostgres {
    async fn find_by_text(&self, text: &str) -> Result<Option<WordEntity>> {
        let text = text.to_string();
        run_blocking(Arc::clone(&self.db_pool), move |conn| {
            let result = words::table
                .filter(words::text.eq(text))
                .select(WordEntity::as_select())
                .first::<WordEntity>(conn)
                .optional()?;
            Ok(result)
        })
        .await
    }

    async fn insert(&self, word: InsertWordEntity) -> Result<WordEntity> {
        run_in_transaction(Arc::clone(&self.db_pool), move |conn| {
            let inserted = insert_into(words::table)
                .values(&word)
                .on_conflict(words::text)
                .do_nothing()
                .returning(WordEntity::as_returning())
                .get_result::<WordEntity>(conn)
                .optional()?;

            let stored = match inserted {
                Some(stored) => stored,
                None => words::table
                    .filter(words::text.eq(&word.text))
                    .select(WordEntity::as_select())
                    .first::<WordEntity>(conn)?,
            };

            Ok(TxOutcome::Commit(stored))
        })
        .await
    }
}

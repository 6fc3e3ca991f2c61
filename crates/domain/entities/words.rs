use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::words;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = words)]
pub struct WordEntity {
    pub id: Uuid,
    pub text: String,
    pub definition: String,
    pub phonetic: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = words)]
pub struct InsertWordEntity {
    pub text: String,
    pub definition: String,
    pub phonetic: Option<String>,
}

pub mod postgres_connection;
pub mod schema;
pub mod unit_of_work;

pub mod db;
pub mod kv;

pub mod app_users;
pub mod cache_store;
pub mod dictionary;
pub mod lock_store;
pub mod mail;
pub mod payment_gateway;
pub mod payment_histories;
pub mod payments;
pub mod plans;
pub mod subscriptions;
pub mod video_search;
pub mod words;

pub mod app_users;
pub mod payment_histories;
pub mod payments;
pub mod plans;
pub mod subscriptions;
pub mod words;

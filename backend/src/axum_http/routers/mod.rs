pub mod payments;
pub mod subscriptions;
pub mod videos;
pub mod words;

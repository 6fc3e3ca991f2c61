pub mod application;
pub mod concurrency;
pub mod domain;
pub mod events;
pub mod infra;
pub mod observability;
pub mod payments;
pub mod resilience;

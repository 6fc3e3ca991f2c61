pub mod retry_runner;
pub mod schedule_loop;
pub mod trigger;

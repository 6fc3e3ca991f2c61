pub mod payments;
pub mod subscriptions;
pub mod video_lists;
pub mod word_lookup;

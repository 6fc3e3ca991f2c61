pub mod dictionary_client;
pub mod gateway_client;
pub mod mail_client;
pub mod youtube_client;

pub mod assistant;
pub mod catalog;
pub mod chat_stream;
pub mod client;
pub mod config;
pub mod message;
pub mod session;
pub mod stream_router;

//! Polychat is a multi-user, multi-model chat session engine for
//! Azure-hosted OpenAI deployments.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns per-user session state, the model clients (streamed
//!   chat, vision, image generation), the assistant-run stream router,
//!   and configuration/preset persistence.
//! - [`api`] defines the wire payloads exchanged with the remote
//!   deployments, including the assistant-run event bodies.
//! - [`utils`] holds endpoint URL construction and the optional
//!   transcript logger.
//!
//! The binary crate (`src/main.rs`) provides a line-oriented terminal
//! front-end that authenticates a user and drives the session engine,
//! standing in for a web UI: it renders snapshot streams, assistant
//! events, and degraded failure diagnostics inline.

pub mod api;
pub mod core;
pub mod utils;

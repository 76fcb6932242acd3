//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, session identity, WebSocket
//! connection setup, HTTP API wrappers, and the completion-tracking
//! and result-collection protocol used to fetch one job's outputs.

pub mod api;
pub mod client;
pub mod collector;
pub mod history;
pub mod job;
pub mod messages;
pub mod session;
pub mod tracker;

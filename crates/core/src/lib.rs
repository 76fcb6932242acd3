//! Core domain types and local persistence for `comfydl`.
//!
//! Holds the artifact output mapping and its merge rule, the artifact
//! file naming convention, PNG persistence, and ffmpeg-based video
//! assembly. Nothing in here talks to the network.

pub mod error;
pub mod ffmpeg;
pub mod naming;
pub mod outputs;
pub mod persist;
pub mod types;

pub use error::CoreError;

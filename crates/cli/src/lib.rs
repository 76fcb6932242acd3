//! `comfydl` library crate.
//!
//! Re-exports the CLI definition, configuration, and download pipeline
//! for integration testing. The binary entrypoint lives in `main.rs`.

pub mod cli;
pub mod config;
pub mod pipeline;

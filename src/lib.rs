//! Reelgen - prompt-to-video generation service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod assets;
pub mod backend;
pub mod config;
pub mod maintenance;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod recovery;
pub mod server;
pub mod storage;
pub mod webhook;

//! deckhand: per-deck slide renderer supervision, preview proxying, builds and cover capture.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod runtime;

//! Infrastructure adapters and runtime bootstrap.

pub mod browser;
pub mod catalog;
pub mod error;
pub mod http;
pub mod presentations;
pub mod telemetry;

//! Application services: locking, builds, screenshots and the catalog seam.

pub mod build;
pub mod catalog;
pub mod error;
pub mod locks;
pub mod screenshot;

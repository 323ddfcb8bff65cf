//! An offline-capable, versioned HTTP response cache.
//!
//! The crate sits between clients and an origin server, classifying each
//! request into a caching strategy and serving it from versioned partitions,
//! the network, or a fallback.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

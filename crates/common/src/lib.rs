//! Common types shared across the RDMA portal crates.

#![warn(clippy::pedantic)]

/// Module for transport identity handles
pub mod types;

/// Module for common configuration
pub mod config;

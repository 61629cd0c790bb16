//! Core domain: hosts, routing, bounded execution, and aggregation.
//!
//! # Architecture
//!
//! ```text
//! host id → HostRegistry → URI → HostProviderRouter → provider
//!         → run_bounded (forked worker) → Aggregation → response
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Public and unlisted host listings
//! - [`router`] - URI to provider dispatch
//! - [`executor`] - Resource-limited worker processes
//! - [`aggregation`] - Post-query result transforms
//! - [`context`] - Application context tying the above together
//! - [`config`] - Configuration file model
//! - [`models`] - Request and response records
//! - [`error`] - Structured error types

pub mod aggregation;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod models;
pub mod registry;
pub mod router;

//! Motif Studio - graph-query server over pluggable host-graph backends.
//!
//! This crate provides the core library functionality for Motif Studio.

pub mod cli;
pub mod core;
pub mod graph;
pub mod providers;
pub mod server;

//! STAKER — Fixed-fraction leveraged futures wallet bot
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod strategy;
pub mod venue;
pub mod engine;

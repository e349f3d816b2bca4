//! Breakout scanner: window breakouts over a cached equity universe.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod storage;
pub mod engine;
pub mod dashboard;

//! db-warden - a read-only SQL gateway with a tiered natural-language query front end.
//!
//! This library exposes the core modules for use by the `warden` binary and
//! integration tests.

pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod safety;
pub mod session;
pub mod tools;

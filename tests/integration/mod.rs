//! Integration tests for db-warden.

pub mod mysql_test;
pub mod orchestrator_test;
pub mod persistence_test;
pub mod server_test;

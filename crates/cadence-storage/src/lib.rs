//! Cadence Storage - Database persistence
//!
//! This crate provides the transactional persistence layer for Cadence:
//! connection pool management, entity models and one repository per
//! aggregate.

pub mod db;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use models::*;
pub use repository::*;

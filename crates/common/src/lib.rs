//! Shared building blocks of the notification gateway: configuration, error
//! taxonomy, domain types, the cache abstraction and the database pool.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

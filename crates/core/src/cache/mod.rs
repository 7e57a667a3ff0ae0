//! SQLite-backed cache store registry.
//!
//! This module provides persistent, named cache stores mapping GET requests
//! to responses, using SQLite with async access via tokio-rusqlite. It supports:
//!
//! - Request-identity keys (SHA-256 over method and URL)
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Store creation, listing, deletion and cross-store lookup

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod stores;

pub use crate::Error;

pub use connection::CacheDb;
pub use stores::CacheStore;

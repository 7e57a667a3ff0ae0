//! Core types and shared functionality for stash.
//!
//! This crate provides:
//! - Cache store registry with SQLite backend
//! - Request/response model
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use cache::{CacheDb, CacheStore};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use model::{Destination, Request, Response, ResponseSource};

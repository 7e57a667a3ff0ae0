//! Client side of stash.
//!
//! This crate provides the network fetch pipeline and the request-interception
//! engine (classification, caching strategies, lifecycle) used by the server.

pub mod engine;
pub mod fetch;

#[cfg(test)]
mod testing;

pub use engine::{
    CachePolicy, ClientNotice, ControlMessage, DispatchResult, Engine, FetchOutcome, PassThrough, Route, WorkerEvent,
    WorkerState,
};
pub use fetch::{FetchConfig, FetchOptions, Fetcher, HttpFetcher};

//! MCP tool implementations.
//!
//! This module contains all tools exposed by the stash server.

pub mod fetch;
pub mod message;
pub mod stores;

pub use fetch::StashFetchParams;
pub use message::StashMessageParams;
pub use stores::StashStoresParams;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use http::{HeaderMap, HeaderValue, StatusCode, header};
    use stash_client::fetch::{FetchOptions, Fetcher};
    use stash_client::{Engine, WorkerState};
    use stash_core::{AppConfig, CacheDb, Error, Request, Response};

    use crate::handler::STDIO_CLIENT;

    /// Fetcher for a host with no connectivity.
    pub(crate) struct OfflineFetcher;

    impl OfflineFetcher {
        pub(crate) fn cached(body: &'static str) -> Response {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Response::new(StatusCode::OK, headers, body)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for OfflineFetcher {
        async fn fetch(&self, request: &Request, _options: FetchOptions) -> Result<Response, Error> {
            Err(Error::Network(format!("{}: network unreachable", request.url())))
        }
    }

    /// An activated engine with the stdio client registered and nothing cached.
    pub(crate) async fn engine() -> (Engine, CacheDb) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let engine = Engine::new(AppConfig::default(), db.clone(), Arc::new(OfflineFetcher)).unwrap();
        engine.register_client(STDIO_CLIENT).await;
        assert_eq!(engine.install().await.unwrap(), WorkerState::Activated);
        (engine, db)
    }
}

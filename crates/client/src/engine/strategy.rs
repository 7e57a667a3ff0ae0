//! Strategy executors.
//!
//! Each policy from the classifier maps to one executor here. Executors only
//! talk to the network through [`Fetcher`] and to storage through
//! [`CacheDb`]; failures they cannot recover from are returned to the
//! fallback chain in [`Engine`](super::Engine).

use std::sync::Arc;
use std::time::Duration;

use stash_core::{CacheDb, CacheStore, Error, Request, Response};

use super::classify::CachePolicy;
use crate::fetch::{AbortController, FetchOptions, Fetcher};

/// Runs caching strategies against a store registry and a fetcher.
#[derive(Clone)]
pub struct Strategies {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    fresh_timeout: Duration,
}

impl Strategies {
    pub fn new(db: CacheDb, fetcher: Arc<dyn Fetcher>, fresh_timeout: Duration) -> Self {
        Self { db, fetcher, fresh_timeout }
    }

    /// Execute the strategy for `policy`.
    pub async fn execute(&self, request: &Request, policy: &CachePolicy) -> Result<Response, Error> {
        match policy {
            CachePolicy::FreshOnly => self.fresh_only(request).await,
            CachePolicy::NetworkFirst { store } => self.network_first(request, store).await,
            CachePolicy::CacheFirst { store } => self.cache_first(request, store).await,
        }
    }

    /// Fetch bypassing HTTP caches within the fresh deadline. The response is
    /// never stored; on timeout or network failure the most recent cached copy
    /// from any store stands in.
    pub async fn fresh_only(&self, request: &Request) -> Result<Response, Error> {
        tracing::debug!(url = %request.url(), "fetching fresh (never cache)");

        let controller = AbortController::new();
        let deadline = controller.abort_after(self.fresh_timeout);
        let result = self
            .fetcher
            .fetch(request, FetchOptions::no_store().with_signal(controller.signal()))
            .await;
        drop(deadline);

        match result {
            Ok(response) => Ok(response),
            Err(err) if err.is_fetch_failure() => match self.db.match_any(request).await {
                Ok(Some(cached)) => {
                    tracing::info!(url = %request.url(), error = %err, "fetch failed, serving stale cache");
                    Ok(cached)
                }
                Ok(None) => Err(err),
                Err(e) => {
                    tracing::warn!(url = %request.url(), error = %e, "stale cache lookup failed");
                    Err(err)
                }
            },
            Err(err) => Err(err),
        }
    }

    /// Network first; a 2xx is copied into `store`. A non-2xx answer is
    /// returned as is, without consulting the store.
    pub async fn network_first(&self, request: &Request, store: &str) -> Result<Response, Error> {
        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) if response.is_success() => {
                let store = self.db.open_store(store).await?;
                self.store_copy(&store, request, &response).await;
                Ok(response)
            }
            Ok(response) => {
                tracing::debug!(
                    url = %request.url(),
                    status = response.status().as_u16(),
                    "origin answered with an error status, passing it through"
                );
                Ok(response)
            }
            Err(err) if err.is_fetch_failure() => {
                let cached = match self.db.open_store(store).await {
                    Ok(store) => self.db.match_in(&store, request).await,
                    Err(e) => Err(e),
                };
                match cached {
                    Ok(Some(cached)) => {
                        tracing::info!(url = %request.url(), "network failed, serving from cache");
                        Ok(cached)
                    }
                    Ok(None) => Err(err),
                    Err(e) => {
                        tracing::warn!(url = %request.url(), error = %e, "cache lookup failed");
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Cache first. A hit is returned immediately and refreshed by a detached
    /// task; a miss goes to the network and stores a 2xx.
    pub async fn cache_first(&self, request: &Request, store: &str) -> Result<Response, Error> {
        let store = self.db.open_store(store).await?;

        if let Some(cached) = self.db.match_in(&store, request).await? {
            tracing::debug!(url = %request.url(), store = store.name(), "cache hit");
            self.revalidate_in_background(store, request.clone());
            return Ok(cached);
        }

        tracing::debug!(url = %request.url(), store = store.name(), "cache miss");
        let response = self.fetcher.fetch(request, FetchOptions::default()).await?;
        if response.is_success() {
            self.store_copy(&store, request, &response).await;
        }
        Ok(response)
    }

    /// Write a duplicate of `response`; a failed write never fails the request.
    async fn store_copy(&self, store: &CacheStore, request: &Request, response: &Response) {
        if let Err(e) = self.db.put(store, request, response.duplicate()).await {
            tracing::warn!(url = %request.url(), store = store.name(), error = %e, "failed to write cache entry");
        }
    }

    /// Refetch and overwrite the entry without anyone awaiting the outcome.
    fn revalidate_in_background(&self, store: CacheStore, request: Request) {
        let db = self.db.clone();
        let fetcher = Arc::clone(&self.fetcher);

        tokio::spawn(async move {
            match fetcher.fetch(&request, FetchOptions::default()).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = db.put(&store, &request, response).await {
                        tracing::debug!(url = %request.url(), error = %e, "background cache update failed");
                    }
                }
                Ok(response) => tracing::debug!(
                    url = %request.url(),
                    status = response.status().as_u16(),
                    "background cache update skipped"
                ),
                Err(e) => tracing::debug!(url = %request.url(), error = %e, "background cache update failed"),
            }
        });
    }
}

//! The request-interception engine.
//!
//! [`Engine`] owns the store registry, the fetcher and the compiled routing
//! table. Every event enters through [`Engine::dispatch`]:
//!
//! - `Install` / `Activate` drive the lifecycle (see [`lifecycle`]).
//! - `Fetch` classifies the request, runs its strategy, annotates the result
//!   and, on failure, walks the fallback chain: any cached copy, then an
//!   offline notice for navigations, then the error itself.
//! - `Message` handles a control message from a page.

pub mod annotate;
pub mod classify;
pub mod control;
pub mod lifecycle;
pub mod strategy;

use std::collections::HashMap;
use std::sync::Arc;

use stash_core::{AppConfig, CacheDb, ConfigError, Error, Request, Response};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use url::Url;

pub use annotate::{AlternateLocation, ONION_LOCATION};
pub use classify::{BypassReason, CachePolicy, Route, RoutingTable};
pub use control::ControlMessage;
pub use lifecycle::{ClientNotice, WorkerState};
pub use strategy::Strategies;

use crate::fetch::Fetcher;

const NOTICE_CAPACITY: usize = 16;

/// Event delivered to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message { client: String, message: ControlMessage },
}

/// Why the engine did not answer a fetch itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassThrough {
    Excluded(BypassReason),
    /// The worker is not active yet and does not control requests.
    Inactive(WorkerState),
}

/// Result of a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The engine answered.
    Respond(Response),
    /// The caller should perform a plain network fetch.
    PassThrough(PassThrough),
}

/// Result of [`Engine::dispatch`].
#[derive(Debug)]
pub enum DispatchResult {
    Lifecycle(WorkerState),
    Fetch(FetchOutcome),
    Message { accepted: bool },
}

struct Inner {
    config: Arc<AppConfig>,
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    routes: RoutingTable,
    strategies: Strategies,
    alternate: AlternateLocation,
    origin: Url,
    state: watch::Sender<WorkerState>,
    /// Held for the duration of an install or activate phase.
    lifecycle: Mutex<()>,
    /// Registered clients and whether this worker controls them.
    clients: RwLock<HashMap<String, bool>>,
    notices: broadcast::Sender<ClientNotice>,
}

/// Handle to the worker. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Build a worker in the `Parsed` state.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the origin or an external-cache pattern does not parse.
    pub fn new(config: AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;
        let routes = RoutingTable::from_config(&config)?;
        let strategies = Strategies::new(db.clone(), Arc::clone(&fetcher), config.fresh_timeout());
        let alternate = AlternateLocation::from_config(&config);
        let (state, _) = watch::channel(WorkerState::Parsed);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                db,
                fetcher,
                routes,
                strategies,
                alternate,
                origin,
                state,
                lifecycle: Mutex::new(()),
                clients: RwLock::new(HashMap::new()),
                notices,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &CacheDb {
        &self.inner.db
    }

    /// The fetcher strategies use; also serves pass-through requests.
    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.inner.fetcher
    }

    /// Site origin that relative targets resolve against.
    pub fn origin(&self) -> &Url {
        &self.inner.origin
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.inner.routes
    }

    /// Single entry point for all worker events.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<DispatchResult, Error> {
        match event {
            WorkerEvent::Install => self.install().await.map(DispatchResult::Lifecycle),
            WorkerEvent::Activate => self.activate().await.map(DispatchResult::Lifecycle),
            WorkerEvent::Fetch(request) => self.handle_fetch(&request).await.map(DispatchResult::Fetch),
            WorkerEvent::Message { client, message } => {
                let accepted = self.handle_message(&client, message).await?;
                Ok(DispatchResult::Message { accepted })
            }
        }
    }

    /// Answer a fetch event.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, Error> {
        let state = self.state();
        if state != WorkerState::Activated {
            tracing::debug!(url = %request.url(), state = %state, "worker not active, passing through");
            return Ok(FetchOutcome::PassThrough(PassThrough::Inactive(state)));
        }

        let policy = match self.inner.routes.classify(request) {
            Route::Bypass(reason) => {
                tracing::debug!(url = %request.url(), %reason, "passing through");
                return Ok(FetchOutcome::PassThrough(PassThrough::Excluded(reason)));
            }
            Route::Handle(policy) => policy,
        };
        tracing::debug!(url = %request.url(), policy = policy.name(), "handling request");

        match self.inner.strategies.execute(request, &policy).await {
            Ok(response) => Ok(FetchOutcome::Respond(self.inner.alternate.apply(response, request.url()))),
            Err(err) => self.recover(request, err).await.map(FetchOutcome::Respond),
        }
    }

    /// Fallback chain for a failed strategy.
    async fn recover(&self, request: &Request, err: Error) -> Result<Response, Error> {
        tracing::warn!(url = %request.url(), error = %err, "fetch handling failed");

        match self.inner.db.match_any(request).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(url = %request.url(), error = %e, "fallback cache lookup failed"),
        }

        if request.is_navigation() {
            return Ok(Response::offline_notice(&self.inner.config.app_name));
        }

        Err(err)
    }
}

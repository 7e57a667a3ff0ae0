//! Worker lifecycle: install, activate, client control.
//!
//! ```text
//! Parsed → Installing → Installed → Activating → Activated
//!               └──────────────────────────────────┴→ Redundant
//! ```
//!
//! Transitions are published on a watch channel only after the async work of
//! the phase has completed. Phases hold the lifecycle lock for their whole
//! duration, so a concurrent `install` waits for the running one and then
//! reports the state it reached.

use std::fmt;

use futures_util::future::join_all;
use serde::Serialize;
use stash_core::{CacheStore, Error, Request};

use super::Engine;
use crate::fetch::FetchOptions;

/// Position of the worker in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting for activation.
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notices pushed to every subscribed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientNotice {
    UpdateAvailable { version: String, message: String },
}

impl Engine {
    pub fn state(&self) -> WorkerState {
        *self.inner.state.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<WorkerState> {
        self.inner.state.subscribe()
    }

    /// Receive client notices sent from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ClientNotice> {
        self.inner.notices.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.inner.state.send_replace(next);
        tracing::info!(from = %previous, to = %next, version = %self.inner.config.cache_version, "worker state");
    }

    /// Install this version: pre-populate the static store, announce the
    /// update if an older version's stores exist, then activate right away
    /// when configured to skip waiting.
    ///
    /// Only runs from `Parsed`; in any other state it returns the current state.
    pub async fn install(&self) -> Result<WorkerState, Error> {
        let _phase = self.inner.lifecycle.lock().await;
        if self.state() != WorkerState::Parsed {
            tracing::debug!(state = %self.state(), "install ignored");
            return Ok(self.state());
        }
        self.transition(WorkerState::Installing);

        let result = async {
            let superseded = self.superseded_stores().await?;
            let store = self.inner.db.open_store(self.inner.routes.static_store()).await?;
            Ok::<_, Error>((superseded, store))
        }
        .await;

        let (superseded, store) = match result {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(error = %e, "install failed");
                self.transition(WorkerState::Redundant);
                return Err(e);
            }
        };

        match self.precache(&store).await {
            Ok(count) => tracing::info!(store = store.name(), count, "cached static assets"),
            Err(e) => tracing::error!(store = store.name(), error = %e, "failed to cache static assets"),
        }

        self.transition(WorkerState::Installed);

        if !superseded.is_empty() {
            self.notify_update();
        }

        if self.inner.config.skip_waiting_on_install {
            return self.activate_locked().await;
        }
        Ok(self.state())
    }

    /// Fetch every manifest path and write them as one batch. A single
    /// failure or non-2xx answer aborts the whole population.
    async fn precache(&self, store: &CacheStore) -> Result<usize, Error> {
        let requests = self
            .inner
            .config
            .precache_paths()
            .into_iter()
            .map(|path| {
                self.inner
                    .origin
                    .join(path)
                    .map(Request::get)
                    .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = requests.iter().map(|request| self.inner.fetcher.fetch(request, FetchOptions::default()));
        let responses = join_all(fetches).await;

        let mut entries = Vec::with_capacity(requests.len());
        for (request, response) in requests.into_iter().zip(responses) {
            let response = response?;
            if !response.is_success() {
                return Err(Error::Network(format!(
                    "{}: precache answered {}",
                    request.url(),
                    response.status()
                )));
            }
            entries.push((request, response));
        }

        self.inner.db.put_all(store, entries).await
    }

    /// Activate: drop every store of this namespace that belongs to another
    /// version, then take control of all registered clients.
    ///
    /// Returns the resulting state; a no-op unless installed or already active.
    pub async fn activate(&self) -> Result<WorkerState, Error> {
        let _phase = self.inner.lifecycle.lock().await;
        self.activate_locked().await
    }

    async fn activate_locked(&self) -> Result<WorkerState, Error> {
        match self.state() {
            WorkerState::Installed => {}
            state => {
                tracing::debug!(state = %state, "activate ignored");
                return Ok(state);
            }
        }
        self.transition(WorkerState::Activating);

        let deleted = match self.delete_superseded().await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!(error = %e, "activation failed");
                self.transition(WorkerState::Redundant);
                return Err(e);
            }
        };
        if !deleted.is_empty() {
            tracing::info!(stores = ?deleted, "deleted old caches");
        }

        let claimed = self.claim().await;
        tracing::debug!(claimed, "claimed clients");

        self.transition(WorkerState::Activated);
        Ok(WorkerState::Activated)
    }

    /// Leave the waiting phase immediately. No-op outside `Installed`.
    pub async fn skip_waiting(&self) -> Result<WorkerState, Error> {
        self.activate().await
    }

    /// Stores in this application's namespace that the current version does not use.
    pub async fn superseded_stores(&self) -> Result<Vec<String>, Error> {
        let prefix = self.inner.config.namespace_prefix();
        let current = [self.inner.routes.static_store(), self.inner.routes.dynamic_store()];
        Ok(self
            .inner
            .db
            .store_names()
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && !current.contains(&name.as_str()))
            .collect())
    }

    async fn delete_superseded(&self) -> Result<Vec<String>, Error> {
        let mut deleted = Vec::new();
        for name in self.superseded_stores().await? {
            if self.inner.db.delete_store(&name).await? {
                tracing::info!(store = %name, "deleting old cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    fn notify_update(&self) {
        let notice = ClientNotice::UpdateAvailable {
            version: self.inner.config.cache_version.clone(),
            message: format!(
                "A new version of {} is available. Refresh to update.",
                self.inner.config.app_name.to_uppercase()
            ),
        };
        match self.inner.notices.send(notice) {
            Ok(receivers) => tracing::info!(receivers, "new version available"),
            Err(_) => tracing::debug!("new version available, no subscribers"),
        }
    }

    /// Make a client known to the worker. It is not controlled until claimed.
    pub async fn register_client(&self, id: impl Into<String>) {
        self.inner.clients.write().await.entry(id.into()).or_insert(false);
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.inner.clients.read().await.contains_key(id)
    }

    pub async fn is_controlled(&self, id: &str) -> bool {
        self.inner.clients.read().await.get(id).copied().unwrap_or(false)
    }

    /// Take control of every registered client; returns how many were newly claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.inner.clients.write().await;
        let mut claimed = 0;
        for controlled in clients.values_mut() {
            if !*controlled {
                *controlled = true;
                claimed += 1;
            }
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine, engine_with};
    use crate::testing::ScriptedFetcher;
    use stash_core::{AppConfig, CacheDb};

    const SITE: &str = "https://wraven.org";

    fn script_manifest(fetcher: &ScriptedFetcher, config: &AppConfig) {
        for path in &config.static_assets {
            fetcher.respond(&format!("{SITE}{path}"), 200, "text/plain", "asset");
        }
    }

    #[tokio::test]
    async fn test_install_precaches_manifest_and_activates() {
        let config = AppConfig::default();
        let fetcher = ScriptedFetcher::new();
        script_manifest(&fetcher, &config);
        let (engine, db) = engine_with(config.clone(), fetcher.clone()).await;

        assert_eq!(engine.install().await.unwrap(), WorkerState::Activated);

        let urls = db.store_urls(&config.static_store_name()).await.unwrap();
        assert_eq!(urls.len(), 6);
        assert!(urls.contains(&format!("{SITE}/manifest.json")));
        assert!(!urls.contains(&format!("{SITE}/")));
        assert!(!urls.contains(&format!("{SITE}/styles.css")));
        assert_eq!(fetcher.calls(&format!("{SITE}/index.html")), 0);
    }

    #[tokio::test]
    async fn test_install_excludes_never_cache_from_manifest() {
        let config = AppConfig {
            app_name: "app".into(),
            cache_version: "1".into(),
            static_assets: vec!["/".into(), "/styles.css".into()],
            never_cache: vec!["/".into()],
            ..Default::default()
        };
        let fetcher = ScriptedFetcher::new();
        fetcher.respond(&format!("{SITE}/"), 200, "text/html", "<html>");
        fetcher.respond(&format!("{SITE}/styles.css"), 200, "text/css", "body{}");
        let (engine, db) = engine_with(config, fetcher).await;

        engine.install().await.unwrap();

        assert_eq!(db.store_urls("app-static-v1").await.unwrap(), vec![format!("{SITE}/styles.css")]);
    }

    #[tokio::test]
    async fn test_install_population_is_all_or_nothing() {
        let config = AppConfig::default();
        let fetcher = ScriptedFetcher::new();
        script_manifest(&fetcher, &config);
        fetcher.respond(&format!("{SITE}/imgs/og-image.png"), 404, "text/plain", "missing");
        let (engine, db) = engine_with(config.clone(), fetcher).await;

        assert_eq!(engine.install().await.unwrap(), WorkerState::Activated);
        assert!(db.has_store(&config.static_store_name()).await.unwrap());
        assert_eq!(db.entry_count(&config.static_store_name()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_install_waits_without_skip_waiting() {
        let config = AppConfig { skip_waiting_on_install: false, ..Default::default() };
        let (engine, _db) = engine_with(config, ScriptedFetcher::new()).await;

        assert_eq!(engine.install().await.unwrap(), WorkerState::Installed);
        assert_eq!(engine.skip_waiting().await.unwrap(), WorkerState::Activated);
        assert_eq!(engine.skip_waiting().await.unwrap(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_install_runs_once() {
        let (engine, _db, _fetcher) = engine().await;
        engine.install().await.unwrap();
        assert_eq!(engine.install().await.unwrap(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_concurrent_installs_wait_for_the_running_one() {
        let config = AppConfig::default();
        let fetcher = ScriptedFetcher::new();
        script_manifest(&fetcher, &config);
        let (engine, _db) = engine_with(config, fetcher.clone()).await;

        let (first, second) = tokio::join!(engine.install(), engine.install());
        assert_eq!(first.unwrap(), WorkerState::Activated);
        assert_eq!(second.unwrap(), WorkerState::Activated);
        assert_eq!(fetcher.calls(&format!("{SITE}/manifest.json")), 1);
    }

    #[tokio::test]
    async fn test_skip_waiting_during_install_sees_installed() {
        let config = AppConfig { skip_waiting_on_install: false, ..Default::default() };
        let (engine, _db) = engine_with(config, ScriptedFetcher::new()).await;

        let (installed, skipped) = tokio::join!(engine.install(), engine.skip_waiting());
        assert_eq!(installed.unwrap(), WorkerState::Installed);
        assert_eq!(skipped.unwrap(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_activate_deletes_superseded_versions() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for name in ["app-static-v1", "app-dynamic-v1", "app-dynamic-v2", "other-static-v1"] {
            db.open_store(name).await.unwrap();
        }
        let config = AppConfig { app_name: "app".into(), cache_version: "2".into(), ..Default::default() };
        let engine = Engine::new(config, db.clone(), ScriptedFetcher::new()).unwrap();

        engine.install().await.unwrap();

        let mut names = db.store_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["app-dynamic-v2", "app-static-v2", "other-static-v1"]);
    }

    #[tokio::test]
    async fn test_activate_before_install_is_ignored() {
        let (engine, _db, _fetcher) = engine().await;
        assert_eq!(engine.activate().await.unwrap(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_activation_claims_registered_clients() {
        let config = AppConfig { skip_waiting_on_install: false, ..Default::default() };
        let (engine, _db) = engine_with(config, ScriptedFetcher::new()).await;
        engine.register_client("tab-1").await;
        engine.register_client("tab-2").await;

        engine.install().await.unwrap();
        assert!(engine.is_registered("tab-1").await);
        assert!(!engine.is_controlled("tab-1").await);

        engine.activate().await.unwrap();
        assert!(engine.is_controlled("tab-1").await);
        assert!(engine.is_controlled("tab-2").await);
        assert!(!engine.is_controlled("tab-3").await);
    }

    #[tokio::test]
    async fn test_update_notice_when_older_version_present() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store("wraven-static-v0.9.0").await.unwrap();
        let engine = Engine::new(AppConfig::default(), db, ScriptedFetcher::new()).unwrap();
        let mut notices = engine.subscribe();

        engine.install().await.unwrap();

        let notice = notices.try_recv().unwrap();
        assert_eq!(
            notice,
            ClientNotice::UpdateAvailable {
                version: "1.0.0".into(),
                message: "A new version of WRAVEN is available. Refresh to update.".into(),
            }
        );
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "UPDATE_AVAILABLE");
    }

    #[tokio::test]
    async fn test_no_update_notice_on_first_install() {
        let (engine, _db, _fetcher) = engine().await;
        let mut notices = engine.subscribe();
        engine.install().await.unwrap();
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_state_sees_activation() {
        let (engine, _db, _fetcher) = engine().await;
        let mut states = engine.watch_state();
        assert_eq!(*states.borrow(), WorkerState::Parsed);

        engine.install().await.unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), WorkerState::Activated);
    }
}

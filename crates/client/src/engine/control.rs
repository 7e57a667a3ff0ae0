//! Control messages from pages.

use stash_core::Error;

use super::Engine;

/// Message a page may post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Delete every store in the application namespace, all versions.
    ClearCache,
}

impl ControlMessage {
    /// Build a message from the `type` field a page posts. Unknown types are `None`.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "SKIP_WAITING" => Some(ControlMessage::SkipWaiting),
            "CLEAR_CACHE" => Some(ControlMessage::ClearCache),
            _ => {
                tracing::debug!(kind, "ignoring unrecognized message");
                None
            }
        }
    }
}

impl Engine {
    /// Post a message without waiting for it to be handled.
    pub fn post_message(&self, client: impl Into<String>, message: ControlMessage) {
        let engine = self.clone();
        let client = client.into();
        tokio::spawn(async move {
            if let Err(e) = engine.handle_message(&client, message).await {
                tracing::warn!(client = %client, ?message, error = %e, "control message failed");
            }
        });
    }

    /// Handle a message and wait for its effects.
    ///
    /// Returns false when the sender is not a registered client and the
    /// message was ignored.
    pub async fn handle_message(&self, client: &str, message: ControlMessage) -> Result<bool, Error> {
        if !self.is_registered(client).await {
            tracing::debug!(client, ?message, "ignoring message from unknown client");
            return Ok(false);
        }

        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting().await?;
            }
            ControlMessage::ClearCache => {
                let cleared = self.clear_app_stores().await?;
                tracing::info!(count = cleared.len(), stores = ?cleared, "cleared caches");
            }
        }
        Ok(true)
    }

    /// Delete every store whose name carries this application's prefix.
    pub async fn clear_app_stores(&self) -> Result<Vec<String>, Error> {
        let prefix = self.inner.config.namespace_prefix();
        let mut cleared = Vec::new();
        for name in self.inner.db.store_names().await? {
            if name.starts_with(&prefix) && self.inner.db.delete_store(&name).await? {
                cleared.push(name);
            }
        }
        Ok(cleared)
    }
}

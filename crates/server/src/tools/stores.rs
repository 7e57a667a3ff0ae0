//! stash_stores tool implementation.
//!
//! Reports the worker state and every cache store with its entry count.

use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::Engine;
use stash_core::Error;

/// Parameters for the stash_stores tool (none).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StashStoresParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoreSummary {
    pub name: String,
    pub entries: u64,
    /// Whether the current version routes requests into this store.
    pub current: bool,
}

/// Output from the stash_stores tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashStoresOutput {
    pub state: String,
    pub version: String,
    pub stores: Vec<StoreSummary>,
}

/// Implementation of the stash_stores tool.
pub async fn stores_impl(engine: &Engine, _params: StashStoresParams) -> Result<CallToolResult, McpError> {
    let routes = engine.routes();
    let mut stores = Vec::new();
    for name in engine.db().store_names().await? {
        let entries = engine.db().entry_count(&name).await?;
        let current = name == routes.static_store() || name == routes.dynamic_store();
        stores.push(StoreSummary { name, entries, current });
    }

    let output = StashStoresOutput {
        state: engine.state().to_string(),
        version: engine.config().cache_version.clone(),
        stores,
    };
    let json =
        serde_json::to_string_pretty(&output).map_err(|e| Error::InvalidInput(format!("Failed to serialize: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

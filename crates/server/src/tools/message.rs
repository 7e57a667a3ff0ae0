//! stash_message tool implementation.
//!
//! Posts a control message to the worker. Handling is fire-and-forget; the
//! tool only reports whether the message type was recognized.

use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::{ControlMessage, Engine};
use stash_core::Error;

/// Parameters for the stash_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashMessageParams {
    /// Message type: "SKIP_WAITING" or "CLEAR_CACHE".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Output from the stash_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashMessageOutput {
    /// False when the type is unknown and the message was ignored.
    pub accepted: bool,
}

/// Implementation of the stash_message tool.
pub async fn message_impl(engine: &Engine, client: &str, params: StashMessageParams) -> Result<CallToolResult, McpError> {
    let accepted = match ControlMessage::from_type(params.kind.trim()) {
        Some(message) => {
            engine.post_message(client, message);
            true
        }
        None => {
            tracing::debug!(kind = %params.kind, "ignoring unknown message type");
            false
        }
    };

    let output = StashMessageOutput { accepted };
    let json =
        serde_json::to_string_pretty(&output).map_err(|e| Error::InvalidInput(format!("Failed to serialize: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

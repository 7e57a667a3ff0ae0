//! Tool input errors for the stash server.
//!
//! Engine failures already map through `stash_core::Error`; these cover
//! arguments that never reach the engine.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use stash_client::fetch::UrlError;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The fetch target could not be resolved to a URL.
    #[error("INVALID_URL: {0}")]
    InvalidTarget(#[from] UrlError),

    /// The method is not a valid HTTP token.
    #[error("INVALID_INPUT: invalid method {0:?}")]
    InvalidMethod(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        McpError { code: ErrorCode(-32602), message: err.to_string().into(), data: None }
    }
}

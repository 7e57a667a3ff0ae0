//! stash_fetch tool implementation.
//!
//! Runs a fetch event through the engine. Requests the engine does not
//! handle are performed as a plain network fetch.

use http::Method;
use rmcp::{ErrorData as McpError, model::*};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::fetch::{FetchOptions, resolve};
use stash_client::{DispatchResult, Engine, FetchOutcome, PassThrough, WorkerEvent};
use stash_core::{Destination, Error, Request, Response, ResponseSource};

use crate::error::ToolError;

/// Input parameters for stash_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashFetchParams {
    /// Absolute URL, or a path starting with `/` resolved against the site origin.
    pub url: String,

    /// HTTP method (default: GET). Anything but GET passes through the engine.
    #[serde(default)]
    pub method: Option<String>,

    /// Treat the request as a page navigation. Inferred from the URL when omitted.
    #[serde(default)]
    pub navigate: Option<bool>,
}

/// Output structure for stash_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashFetchOutput {
    pub url: String,
    pub status: u16,
    /// Response headers as `[name, value]` pairs.
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub source: ResponseSource,
    /// Whether the engine stayed out of the way.
    pub passed_through: bool,
    /// Why the request passed through, if it did.
    pub pass_reason: Option<String>,
}

impl StashFetchOutput {
    fn new(url: String, response: Response, pass_reason: Option<String>) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        Self {
            url,
            status: response.status().as_u16(),
            headers,
            body: response.text().into_owned(),
            source: response.source(),
            passed_through: pass_reason.is_some(),
            pass_reason,
        }
    }
}

fn build_request(engine: &Engine, params: &StashFetchParams) -> Result<Request, ToolError> {
    let url = resolve(&params.url, engine.origin())?;
    let method = match params.method.as_deref() {
        None => Method::GET,
        Some(m) => {
            Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| ToolError::InvalidMethod(m.into()))?
        }
    };
    let destination = match params.navigate {
        Some(true) => Destination::Document,
        Some(false) => Destination::Subresource,
        None => Destination::infer(&url),
    };
    Ok(Request::new(method, url, destination))
}

/// Implementation of the stash_fetch tool.
pub async fn fetch_impl(engine: &Engine, params: StashFetchParams) -> Result<CallToolResult, McpError> {
    let request = build_request(engine, &params)?;
    let url = request.url().to_string();

    let (response, pass_reason) = match engine.dispatch(WorkerEvent::Fetch(request.clone())).await? {
        DispatchResult::Fetch(FetchOutcome::Respond(response)) => (response, None),
        DispatchResult::Fetch(FetchOutcome::PassThrough(reason)) => {
            let reason = match reason {
                PassThrough::Excluded(bypass) => bypass.to_string(),
                PassThrough::Inactive(state) => format!("worker is {state}"),
            };
            let response = engine.fetcher().fetch(&request, FetchOptions::default()).await?;
            (response, Some(reason))
        }
        other => return Err(Error::InvalidInput(format!("unexpected dispatch result: {other:?}")).into()),
    };

    let output = StashFetchOutput::new(url, response, pass_reason);
    let json =
        serde_json::to_string_pretty(&output).map_err(|e| Error::InvalidInput(format!("Failed to serialize: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

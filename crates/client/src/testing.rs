//! Scripted [`Fetcher`] for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, HeaderValue, StatusCode, header};
use stash_core::{Error, Request, Response};

use crate::fetch::{CacheMode, FetchOptions, Fetcher};

#[derive(Clone)]
enum Reply {
    Ok { status: u16, content_type: &'static str, body: &'static str },
    Offline,
    Hang,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, Reply>,
    calls: HashMap<String, Vec<CacheMode>>,
}

/// Answers by exact URL. Unscripted URLs behave as offline.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<Script>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ok(body: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        Response::new(StatusCode::OK, headers, body)
    }

    fn set(&self, url: &str, reply: Reply) {
        self.script.lock().unwrap().replies.insert(url.to_string(), reply);
    }

    pub fn respond(&self, url: &str, status: u16, content_type: &'static str, body: &'static str) {
        self.set(url, Reply::Ok { status, content_type, body });
    }

    pub fn offline(&self, url: &str) {
        self.set(url, Reply::Offline);
    }

    /// Never answers; only an abort signal ends the fetch.
    pub fn hang(&self, url: &str) {
        self.set(url, Reply::Hang);
    }

    pub fn go_offline(&self) {
        let mut script = self.script.lock().unwrap();
        for reply in script.replies.values_mut() {
            *reply = Reply::Offline;
        }
    }

    pub fn calls(&self, url: &str) -> usize {
        self.script.lock().unwrap().calls.get(url).map_or(0, Vec::len)
    }

    pub fn cache_modes(&self, url: &str) -> Vec<CacheMode> {
        self.script.lock().unwrap().calls.get(url).cloned().unwrap_or_default()
    }

    pub async fn wait_for_calls(&self, url: &str, n: usize) {
        for _ in 0..200 {
            if self.calls(url) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{url} was fetched {} times, expected {n}", self.calls(url));
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> Result<Response, Error> {
        let url = request.url().as_str().to_string();
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.calls.entry(url.clone()).or_default().push(options.cache);
            script.replies.get(&url).cloned().unwrap_or(Reply::Offline)
        };

        match reply {
            Reply::Ok { status, content_type, body } => {
                let mut headers = HeaderMap::new();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                Ok(Response::new(StatusCode::from_u16(status).unwrap(), headers, body))
            }
            Reply::Offline => Err(Error::Network(format!("{url}: connection refused"))),
            Reply::Hang => {
                match options.signal {
                    Some(signal) => signal.aborted().await,
                    None => std::future::pending::<()>().await,
                }
                Err(Error::Timeout(format!("{url}: aborted at deadline")))
            }
        }
    }
}

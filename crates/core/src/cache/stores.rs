//! Named cache stores of Request → Response.
//!
//! A store is a row in `cache_stores`; its entries live in `cache_entries`
//! keyed by `(store, request key)` and are dropped with the store. Writes are
//! upserts, so the last writer wins and entries are never merged.

use bytes::Bytes;
use chrono::SecondsFormat;
use http::{Method, StatusCode};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

use super::connection::CacheDb;
use super::hash::request_key;
use crate::Error;
use crate::model::{Request, Response, ResponseSource, decode_headers, encode_headers};

/// Handle to an opened store. Obtained from [`CacheDb::open_store`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheStore {
    name: String,
}

impl CacheStore {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Raw columns of a stored entry, decoded outside the connection thread.
type EntryRow = (i64, String, Vec<u8>);

fn decode_entry((status, headers_json, body): EntryRow) -> Result<Response, Error> {
    let status = u16::try_from(status)
        .ok()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .ok_or_else(|| Error::CorruptEntry(format!("invalid status {status}")))?;
    let headers = decode_headers(&headers_json)?;
    Ok(Response::from_parts(status, headers, Bytes::from(body), ResponseSource::Cache))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn ensure_store(tx: &rusqlite::Transaction<'_>, name: &str, created_at: &str) -> Result<(), Error> {
    tx.execute(
        "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?1, ?2)",
        params![name, created_at],
    )?;
    Ok(())
}

/// An entry encoded on the caller's side, ready to be written on the connection thread.
struct PendingEntry {
    key_hash: String,
    method: String,
    url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
    stored_at: String,
}

impl PendingEntry {
    /// Encode a pair, or `None` if it must not be cached (non-GET or non-2xx).
    fn new(store: &CacheStore, request: &Request, response: Response) -> Result<Option<Self>, Error> {
        if *request.method() != Method::GET || !response.is_success() {
            tracing::debug!(
                store = store.name(),
                url = %request.url(),
                status = response.status().as_u16(),
                "not caching response"
            );
            return Ok(None);
        }

        let headers_json = encode_headers(response.headers())?;
        let status = i64::from(response.status().as_u16());
        let (_, _, body, _) = response.into_parts();
        Ok(Some(Self {
            key_hash: request_key(request.method(), request.url()),
            method: request.method().as_str().to_string(),
            url: request.url().to_string(),
            status,
            headers_json,
            body: body.to_vec(),
            stored_at: now(),
        }))
    }

    fn upsert(&self, tx: &rusqlite::Transaction<'_>, store: &str) -> Result<(), Error> {
        tx.execute(
            "INSERT INTO cache_entries (store, key_hash, method, url, status, headers_json, body, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(store, key_hash) DO UPDATE SET
                method = excluded.method,
                url = excluded.url,
                status = excluded.status,
                headers_json = excluded.headers_json,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![store, self.key_hash, self.method, self.url, self.status, self.headers_json, self.body, self.stored_at],
        )?;
        Ok(())
    }
}

impl CacheDb {
    /// Open a store by name, creating it if absent.
    pub async fn open_store(&self, name: &str) -> Result<CacheStore, Error> {
        let name = name.to_string();
        let created_at = now();
        let store_name = name.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?1, ?2)",
                    params![store_name, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
        Ok(CacheStore { name })
    }

    /// Whether a store with this name exists.
    pub async fn has_store(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists =
                    conn.query_row("SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?1)", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of all stores, in creation order.
    pub async fn store_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM cache_stores ORDER BY created_at, rowid")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a store and every entry in it.
    ///
    /// Returns false if no such store existed.
    pub async fn delete_store(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM cache_stores WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Write a response into a store, replacing any previous entry for the request.
    ///
    /// Consumes the response; callers that also return it must hand over a
    /// [`Response::duplicate`]. Only GET requests with a 2xx response are
    /// stored; anything else is a no-op that returns false.
    pub async fn put(&self, store: &CacheStore, request: &Request, response: Response) -> Result<bool, Error> {
        let Some(row) = PendingEntry::new(store, request, response)? else {
            return Ok(false);
        };
        let store_name = store.name.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_store(&tx, &store_name, &row.stored_at)?;
                row.upsert(&tx, &store_name)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(true)
    }

    /// Write several entries in one transaction: either all of them land or none do.
    ///
    /// Returns the number of entries written. Pairs that `put` would skip are skipped.
    pub async fn put_all(&self, store: &CacheStore, entries: Vec<(Request, Response)>) -> Result<usize, Error> {
        let mut rows = Vec::with_capacity(entries.len());
        for (request, response) in entries {
            if let Some(row) = PendingEntry::new(store, &request, response)? {
                rows.push(row);
            }
        }
        let store_name = store.name.clone();
        let created_at = now();

        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                ensure_store(&tx, &store_name, &created_at)?;
                for row in &rows {
                    row.upsert(&tx, &store_name)?;
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Look a request up in a single store.
    pub async fn match_in(&self, store: &CacheStore, request: &Request) -> Result<Option<Response>, Error> {
        let store_name = store.name.clone();
        let key_hash = request_key(request.method(), request.url());
        let row = self
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let row = conn
                    .query_row(
                        "SELECT status, headers_json, body FROM cache_entries WHERE store = ?1 AND key_hash = ?2",
                        params![store_name, key_hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        row.map(decode_entry).transpose()
    }

    /// Look a request up across every store, preferring the most recently stored entry.
    pub async fn match_any(&self, request: &Request) -> Result<Option<Response>, Error> {
        let key_hash = request_key(request.method(), request.url());
        let row = self
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let row = conn
                    .query_row(
                        "SELECT status, headers_json, body FROM cache_entries
                        WHERE key_hash = ?1
                        ORDER BY stored_at DESC, rowid DESC
                        LIMIT 1",
                        params![key_hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        row.map(decode_entry).transpose()
    }

    /// Number of entries in a store (0 if the store does not exist).
    pub async fn entry_count(&self, name: &str) -> Result<u64, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM cache_entries WHERE store = ?1", params![name], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// URLs stored in a store, sorted.
    pub async fn store_urls(&self, name: &str) -> Result<Vec<String>, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM cache_entries WHERE store = ?1 ORDER BY url")?;
                let urls = stmt
                    .query_map(params![name], |row| row.get(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, header};
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn response(status: u16, body: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        Response::new(StatusCode::from_u16(status).unwrap(), headers, body)
    }

    #[tokio::test]
    async fn test_open_store_is_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_store("app-static-v1").await.unwrap();
        db.open_store("app-static-v1").await.unwrap();
        db.open_store("app-dynamic-v1").await.unwrap();

        assert_eq!(db.store_names().await.unwrap(), vec!["app-static-v1", "app-dynamic-v1"]);
        assert!(db.has_store("app-static-v1").await.unwrap());
        assert!(!db.has_store("app-static-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-static-v1").await.unwrap();
        let req = get("https://wraven.org/imgs/widelogo.png");

        assert!(db.put(&store, &req, response(200, "png")).await.unwrap());

        let hit = db.match_in(&store, &req).await.unwrap().unwrap();
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(hit.text(), "png");
        assert_eq!(hit.content_type(), Some("text/css"));
        assert_eq!(hit.source(), ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_match_returns_header_bytes_unchanged() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-dynamic-v1").await.unwrap();
        let req = get("https://wraven.org/menu");
        let mut headers = HeaderMap::new();
        headers.insert("x-latin", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        db.put(&store, &req, Response::new(StatusCode::OK, headers, "menu")).await.unwrap();

        let hit = db.match_any(&req).await.unwrap().unwrap();
        assert_eq!(hit.headers().get("x-latin").unwrap().as_bytes(), b"caf\xe9");
    }

    #[tokio::test]
    async fn test_put_rejects_non_success() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-dynamic-v1").await.unwrap();
        let req = get("https://wraven.org/api");

        assert!(!db.put(&store, &req, response(500, "boom")).await.unwrap());
        assert!(!db.put(&store, &req, response(404, "gone")).await.unwrap());
        assert!(db.match_in(&store, &req).await.unwrap().is_none());
        assert_eq!(db.entry_count("app-dynamic-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-dynamic-v1").await.unwrap();
        let req = Request::new(
            Method::POST,
            Url::parse("https://wraven.org/form").unwrap(),
            crate::model::Destination::Subresource,
        );

        assert!(!db.put(&store, &req, response(200, "ok")).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-dynamic-v1").await.unwrap();
        let req = get("https://fonts.googleapis.com/css?family=Inter");

        db.put(&store, &req, response(200, "old")).await.unwrap();
        db.put(&store, &req, response(200, "new")).await.unwrap();

        assert_eq!(db.entry_count("app-dynamic-v1").await.unwrap(), 1);
        assert_eq!(db.match_in(&store, &req).await.unwrap().unwrap().text(), "new");
    }

    #[tokio::test]
    async fn test_match_in_is_scoped_to_store() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let statics = db.open_store("app-static-v1").await.unwrap();
        let dynamics = db.open_store("app-dynamic-v1").await.unwrap();
        let req = get("https://wraven.org/manifest.json");

        db.put(&statics, &req, response(200, "{}")).await.unwrap();

        assert!(db.match_in(&dynamics, &req).await.unwrap().is_none());
        assert!(db.match_any(&req).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_match_any_prefers_latest() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let older = db.open_store("app-dynamic-v1").await.unwrap();
        let newer = db.open_store("app-static-v1").await.unwrap();
        let req = get("https://wraven.org/imgs/og-image.png");

        db.put(&older, &req, response(200, "first")).await.unwrap();
        db.put(&newer, &req, response(200, "second")).await.unwrap();

        assert_eq!(db.match_any(&req).await.unwrap().unwrap().text(), "second");
    }

    #[tokio::test]
    async fn test_delete_store_cascades() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-static-v1").await.unwrap();
        let req = get("https://wraven.org/manifest.json");
        db.put(&store, &req, response(200, "{}")).await.unwrap();

        assert!(db.delete_store("app-static-v1").await.unwrap());
        assert!(!db.delete_store("app-static-v1").await.unwrap());
        assert!(db.match_any(&req).await.unwrap().is_none());
        assert_eq!(db.entry_count("app-static-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_all_writes_batch() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-static-v1").await.unwrap();
        let entries = vec![
            (get("https://wraven.org/styles.css"), response(200, "a")),
            (get("https://wraven.org/manifest.json"), response(200, "b")),
            (get("https://wraven.org/missing"), response(404, "c")),
        ];

        assert_eq!(db.put_all(&store, entries).await.unwrap(), 2);
        assert_eq!(db.entry_count("app-static-v1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_urls() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = db.open_store("app-static-v1").await.unwrap();
        db.put(&store, &get("https://wraven.org/styles.css"), response(200, "a")).await.unwrap();
        db.put(&store, &get("https://wraven.org/manifest.json"), response(200, "b")).await.unwrap();

        assert_eq!(
            db.store_urls("app-static-v1").await.unwrap(),
            vec!["https://wraven.org/manifest.json", "https://wraven.org/styles.css"]
        );
    }
}

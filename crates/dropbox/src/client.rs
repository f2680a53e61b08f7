//! Dropbox v2 HTTP client.
//!
//! RPC endpoints take JSON bodies; content endpoints carry their arguments
//! in the `Dropbox-API-Arg` header and the file bytes in the body. The
//! access token is expected to be valid.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RANGE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use stowaway_storage::BoxFuture;
use tracing::debug;

use crate::{DropboxApi, DropboxError, Entry, ListFolderPage, UploadCursor};

const DEFAULT_API_URL: &str = "https://api.dropboxapi.com/2";
const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const API_ARG: &str = "Dropbox-API-Arg";

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_summary: String,
}

#[derive(Deserialize)]
struct MetadataWrapper {
    metadata: Entry,
}

#[derive(Deserialize)]
struct SessionStart {
    session_id: String,
}

/// Dropbox API client.
pub struct HttpDropboxClient {
    http: reqwest::Client,
    api_url: String,
    content_url: String,
}

impl HttpDropboxClient {
    pub fn new(access_token: &str) -> Result<Self, DropboxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| DropboxError::InvalidToken)?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
            content_url: DEFAULT_CONTENT_URL.to_string(),
        })
    }

    /// Points the client at another server.
    pub fn with_base_urls(mut self, api_url: String, content_url: String) -> Self {
        self.api_url = api_url;
        self.content_url = content_url;
        self
    }

    async fn check(resp: Response) -> Result<Response, DropboxError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, DropboxError> {
        let bytes = Self::check(resp).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn rpc<T: DeserializeOwned>(&self, endpoint: &str, args: Value) -> Result<T, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/{endpoint}", self.api_url))
            .json(&args)
            .send()
            .await?;
        Self::json(resp).await
    }

    fn content(&self, endpoint: &str, args: &Value) -> RequestBuilder {
        self.http
            .post(format!("{}/{endpoint}", self.content_url))
            .header(API_ARG, header_safe_json(args))
    }

    fn upload_request(&self, endpoint: &str, args: &Value, data: Vec<u8>) -> RequestBuilder {
        self.content(endpoint, args)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
    }
}

/// Maps an error response to a [`DropboxError`] using its `error_summary`.
fn api_error(status: StatusCode, body: &str) -> DropboxError {
    if status == StatusCode::UNAUTHORIZED {
        return DropboxError::InvalidToken;
    }
    let summary = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error_summary)
        .unwrap_or_else(|_| body.to_string());
    if status == StatusCode::CONFLICT {
        if summary.starts_with("lookup_failed/") {
            return DropboxError::SessionExpired(summary);
        }
        if summary.contains("not_found") {
            return DropboxError::NotFound(summary);
        }
    }
    DropboxError::Api {
        status: status.as_u16(),
        summary,
    }
}

/// Serializes `value` for an HTTP header, escaping everything outside
/// printable ASCII as `\uXXXX`.
fn header_safe_json(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() && c != '\x7f' {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Upload responses omit the `.tag` field.
fn tagged(mut entry: Entry, tag: &str) -> Entry {
    if entry.tag.is_empty() {
        entry.tag = tag.to_string();
    }
    entry
}

impl DropboxApi for HttpDropboxClient {
    fn get_metadata<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<Entry>, DropboxError>> {
        Box::pin(async move {
            match self.rpc("files/get_metadata", json!({ "path": path })).await {
                Ok(entry) => Ok(Some(entry)),
                Err(DropboxError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        Box::pin(async move {
            let wrapper: MetadataWrapper = self
                .rpc(
                    "files/create_folder_v2",
                    json!({ "path": path, "autorename": false }),
                )
                .await?;
            Ok(tagged(wrapper.metadata, "folder"))
        })
    }

    fn upload<'a>(
        &'a self,
        path: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        Box::pin(async move {
            let args = json!({ "path": path, "mode": "overwrite", "mute": true });
            let resp = self.upload_request("files/upload", &args, content).send().await?;
            Ok(tagged(Self::json(resp).await?, "file"))
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), DropboxError>> {
        Box::pin(async move {
            let _: Value = self.rpc("files/delete_v2", json!({ "path": path })).await?;
            Ok(())
        })
    }

    fn move_path<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        Box::pin(async move {
            let wrapper: MetadataWrapper = self
                .rpc(
                    "files/move_v2",
                    json!({ "from_path": from, "to_path": to, "autorename": false }),
                )
                .await?;
            Ok(wrapper.metadata)
        })
    }

    fn list_folder<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>> {
        Box::pin(async move {
            self.rpc(
                "files/list_folder",
                json!({ "path": path, "recursive": false }),
            )
            .await
        })
    }

    fn list_folder_continue<'a>(
        &'a self,
        cursor: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>> {
        Box::pin(async move {
            self.rpc("files/list_folder/continue", json!({ "cursor": cursor }))
                .await
        })
    }

    fn session_start<'a>(&'a self, data: Vec<u8>) -> BoxFuture<'a, Result<String, DropboxError>> {
        Box::pin(async move {
            let len = data.len();
            let resp = self
                .upload_request("files/upload_session/start", &json!({ "close": false }), data)
                .send()
                .await?;
            let started: SessionStart = Self::json(resp).await?;
            debug!(session = %started.session_id, len, "opened dropbox upload session");
            Ok(started.session_id)
        })
    }

    fn session_append<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), DropboxError>> {
        Box::pin(async move {
            let args = json!({ "cursor": cursor, "close": false });
            let resp = self
                .upload_request("files/upload_session/append_v2", &args, data)
                .send()
                .await?;
            Self::check(resp).await?;
            Ok(())
        })
    }

    fn session_finish<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        Box::pin(async move {
            let args = json!({
                "cursor": cursor,
                "commit": { "path": path, "mode": "overwrite", "mute": true },
            });
            let resp = self
                .upload_request("files/upload_session/finish", &args, data)
                .send()
                .await?;
            Ok(tagged(Self::json(resp).await?, "file"))
        })
    }

    fn download<'a>(
        &'a self,
        path: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DropboxError>> {
        Box::pin(async move {
            let mut req = self.content("files/download", &json!({ "path": path }));
            if let Some((first, last)) = range {
                req = req.header(RANGE, format!("bytes={first}-{last}"));
            }
            let resp = Self::check(req.send().await?).await?;
            Ok(resp.bytes().await?.to_vec())
        })
    }
}

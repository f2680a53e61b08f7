//! Drive v3 REST client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication. The
//! token is expected to be valid; refreshing it is the caller's job.

use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION, RANGE};
use reqwest::{Response, StatusCode};
use serde_json::json;
use stowaway_storage::BoxFuture;
use tracing::debug;

use crate::{ChunkOutcome, DriveApi, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,mimeType,size,parents,createdTime,modifiedTime,md5Checksum";
const MULTIPART_BOUNDARY: &str = "stowaway-part-boundary";

/// Drive API client.
pub struct HttpDriveClient {
    http: reqwest::Client,
    base_url: String,
    upload_url: String,
}

impl HttpDriveClient {
    /// Creates a new client with an already-refreshed access token.
    pub fn new(access_token: &str) -> Result<Self, DriveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| DriveError::InvalidToken)?,
        );

        // 308 is Drive's "resume incomplete", not a redirect.
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
        })
    }

    /// Points the client at another server.
    pub fn with_base_urls(mut self, base_url: String, upload_url: String) -> Self {
        self.base_url = base_url;
        self.upload_url = upload_url;
        self
    }

    async fn check(resp: Response) -> Result<Response, DriveError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DriveError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, DriveError> {
        let bytes = Self::check(resp).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn query_files(
        &self,
        q: String,
        page_token: Option<String>,
    ) -> Result<FileList, DriveError> {
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut params = vec![
            ("q", q),
            ("fields", fields),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
            ("orderBy", "name".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let resp = self
            .http
            .get(format!("{}/files", self.base_url))
            .query(&params)
            .send()
            .await?;
        Self::json(resp).await
    }

    /// Interprets the response to a resumable chunk or status query.
    async fn chunk_outcome(uri: &str, resp: Response) -> Result<ChunkOutcome, DriveError> {
        match resp.status() {
            StatusCode::PERMANENT_REDIRECT => {
                let confirmed = resp
                    .headers()
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .map(parse_range_end)
                    .transpose()?
                    .map_or(0, |last| last + 1);
                Ok(ChunkOutcome::Incomplete { confirmed })
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(DriveError::SessionExpired(uri.to_string()))
            }
            _ => Ok(ChunkOutcome::Complete(Self::json(resp).await?)),
        }
    }
}

/// Parses the last byte index from a `bytes=0-N` range header.
fn parse_range_end(value: &str) -> Result<u64, DriveError> {
    value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.parse().ok())
        .ok_or_else(|| DriveError::Protocol(format!("bad Range header: {value}")))
}

/// Quotes a value for a Drive search query.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn content_range(offset: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {offset}-{}/{total}", offset + len - 1)
    }
}

fn multipart_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--").as_bytes());
    body
}

impl DriveApi for HttpDriveClient {
    fn get_file<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(format!("{}/files/{id}", self.base_url))
                .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                .send()
                .await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            Ok(Some(Self::json(resp).await?))
        })
    }

    fn find_child<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        folders_only: bool,
    ) -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>> {
        Box::pin(async move {
            let mut q = format!(
                "name = {} and {} in parents and trashed = false",
                quote(name),
                quote(parent_id)
            );
            if folders_only {
                q.push_str(&format!(" and mimeType = {}", quote(FOLDER_MIME_TYPE)));
            }
            let list = self.query_files(q, None).await?;
            Ok(list.files.into_iter().find(|f| f.name == name))
        })
    }

    fn list_children<'a>(
        &'a self,
        parent_id: &'a str,
        page_token: Option<String>,
    ) -> BoxFuture<'a, Result<FileList, DriveError>> {
        Box::pin(async move {
            let q = format!("{} in parents and trashed = false", quote(parent_id));
            self.query_files(q, page_token).await
        })
    }

    fn create_folder<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/files", self.base_url))
                .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                .json(&json!({
                    "name": name,
                    "mimeType": FOLDER_MIME_TYPE,
                    "parents": [parent_id],
                }))
                .send()
                .await?;
            Self::json(resp).await
        })
    }

    fn create_file<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        Box::pin(async move {
            let metadata = json!({ "name": name, "parents": [parent_id] });
            let resp = self
                .http
                .post(format!("{}/files", self.upload_url))
                .query(&[
                    ("uploadType", "multipart"),
                    ("fields", FILE_FIELDS),
                    ("supportsAllDrives", "true"),
                ])
                .header(
                    CONTENT_TYPE,
                    format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(multipart_body(&metadata, &content))
                .send()
                .await?;
            Self::json(resp).await
        })
    }

    fn delete_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .delete(format!("{}/files/{id}", self.base_url))
                .query(&[("supportsAllDrives", "true")])
                .send()
                .await?;
            Self::check(resp).await?;
            Ok(())
        })
    }

    fn move_file<'a>(
        &'a self,
        id: &'a str,
        old_parent: &'a str,
        new_parent: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .patch(format!("{}/files/{id}", self.base_url))
                .query(&[
                    ("addParents", new_parent),
                    ("removeParents", old_parent),
                    ("fields", FILE_FIELDS),
                    ("supportsAllDrives", "true"),
                ])
                .json(&json!({ "name": new_name }))
                .send()
                .await?;
            Self::json(resp).await
        })
    }

    fn start_resumable<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<String, DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/files", self.upload_url))
                .query(&[
                    ("uploadType", "resumable"),
                    ("fields", FILE_FIELDS),
                    ("supportsAllDrives", "true"),
                ])
                .header("X-Upload-Content-Type", "application/octet-stream")
                .header("X-Upload-Content-Length", total_size.to_string())
                .json(&json!({ "name": name, "parents": [parent_id] }))
                .send()
                .await?;
            let resp = Self::check(resp).await?;
            let uri = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| DriveError::Protocol("resumable session without Location".into()))?;
            debug!(name, total_size, "drive resumable session created");
            Ok(uri.to_string())
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        uri: &'a str,
        offset: u64,
        data: Vec<u8>,
        total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>> {
        Box::pin(async move {
            let range = content_range(offset, data.len() as u64, total_size);
            let resp = self
                .http
                .put(uri)
                .header(CONTENT_RANGE, range)
                .body(data)
                .send()
                .await?;
            Self::chunk_outcome(uri, resp).await
        })
    }

    fn query_status<'a>(
        &'a self,
        uri: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>> {
        Box::pin(async move {
            let resp = self
                .http
                .put(uri)
                .header(CONTENT_RANGE, format!("bytes */{total_size}"))
                .body(Vec::new())
                .send()
                .await?;
            Self::chunk_outcome(uri, resp).await
        })
    }

    fn download<'a>(
        &'a self,
        id: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DriveError>> {
        Box::pin(async move {
            let mut req = self
                .http
                .get(format!("{}/files/{id}", self.base_url))
                .query(&[("alt", "media"), ("acknowledgeAbuse", "true")]);
            if let Some((first, last)) = range {
                req = req.header(RANGE, format!("bytes={first}-{last}"));
            }
            let resp = Self::check(req.send().await?).await?;
            Ok(resp.bytes().await?.to_vec())
        })
    }
}

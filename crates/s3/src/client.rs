//! HTTP implementation of [`S3Api`] using `reqwest` and SigV4.

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderMap, HeaderValue, LAST_MODIFIED, RANGE};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use stowaway_storage::{BoxFuture, CompletedPart};
use tracing::debug;

use crate::api::{ListPage, MultipartPage, ObjectMeta, S3Api};
use crate::signing::{self, Credentials, SigningRequest};
use crate::{S3Error, xml};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct S3ClientConfig {
    /// Service endpoint, e.g. `https://s3.eu-west-1.amazonaws.com`.
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Address the bucket in the path instead of the host name.
    #[serde(default)]
    pub path_style: bool,
}

/// S3 REST client.
pub struct HttpS3Client {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    path_style: bool,
    creds: Credentials,
}

/// A buffered response.
struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpS3Client {
    pub fn new(config: S3ClientConfig) -> Result<Self, S3Error> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| S3Error::Config(format!("endpoint {}: {e}", config.endpoint)))?;
        if endpoint.host_str().is_none() {
            return Err(S3Error::Config(format!(
                "endpoint {} has no host",
                config.endpoint
            )));
        }
        if config.bucket.is_empty() {
            return Err(S3Error::Config("bucket must not be empty".into()));
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint,
            bucket: config.bucket,
            path_style: config.path_style,
            creds: Credentials {
                access_key: config.access_key,
                secret_key: config.secret_key,
                region: config.region,
            },
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        let host = match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        if self.path_style {
            host
        } else {
            format!("{}.{host}", self.bucket)
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        let key = signing::encode_key(key);
        if self.path_style {
            format!("/{}/{key}", signing::uri_encode(&self.bucket))
        } else {
            format!("/{key}")
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, S3Error> {
        let host = self.host();
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = signing::sha256_hex(&body);
        let signed = signing::sign(
            &self.creds,
            &SigningRequest {
                method: method.as_str(),
                canonical_uri: &canonical_uri,
                query,
                host: &host,
                payload_hash: &payload_hash,
            },
            Utc::now(),
        )?;

        let mut url = format!("{}://{host}{canonical_uri}", self.endpoint.scheme());
        let qs = signing::canonical_query(query);
        if !qs.is_empty() {
            url.push('?');
            url.push_str(&qs);
        }

        debug!(%method, key, "s3 request");
        let resp = self
            .http
            .request(method, &url)
            .headers(headers)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Sends a request and maps non-success statuses to [`S3Error::Api`].
    async fn send_ok(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Response, S3Error> {
        let resp = self.send(method, key, query, headers, body).await?;
        if !resp.status.is_success() {
            return Err(api_error(&resp));
        }
        Ok(resp)
    }
}

fn api_error(resp: &Response) -> S3Error {
    let text = String::from_utf8_lossy(&resp.body);
    let (code, message) = match xml::parse_error(&text) {
        Some(e) => (e.code, e.message),
        None => (
            resp.status.canonical_reason().unwrap_or("Unknown").to_string(),
            text.into_owned(),
        ),
    };
    S3Error::Api {
        status: resp.status.as_u16(),
        code,
        message,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn body_text(resp: &Response) -> String {
    String::from_utf8_lossy(&resp.body).into_owned()
}

fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl S3Api for HttpS3Client {
    fn head_object<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<ObjectMeta>, S3Error>> {
        Box::pin(async move {
            let resp = self
                .send(Method::HEAD, key, &[], HeaderMap::new(), Vec::new())
                .await?;
            if resp.status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status.is_success() {
                return Err(api_error(&resp));
            }
            let size = header_str(&resp.headers, CONTENT_LENGTH)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let last_modified = header_str(&resp.headers, LAST_MODIFIED)
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|t| t.with_timezone(&Utc));
            Ok(Some(ObjectMeta {
                key: key.to_string(),
                size,
                last_modified,
                etag: header_str(&resp.headers, ETAG).map(str::to_string),
            }))
        })
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        Box::pin(async move {
            let resp = self
                .send_ok(Method::PUT, key, &[], HeaderMap::new(), body)
                .await?;
            Ok(header_str(&resp.headers, ETAG).unwrap_or_default().to_string())
        })
    }

    fn get_object<'a>(
        &'a self,
        key: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, S3Error>> {
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            if let Some((first, last)) = range {
                let value = format!("bytes={first}-{last}")
                    .parse::<HeaderValue>()
                    .map_err(|_| S3Error::Config("invalid range".into()))?;
                headers.insert(RANGE, value);
            }
            let resp = self
                .send_ok(Method::GET, key, &[], headers, Vec::new())
                .await?;
            Ok(resp.body)
        })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), S3Error>> {
        Box::pin(async move {
            self.send_ok(Method::DELETE, key, &[], HeaderMap::new(), Vec::new())
                .await?;
            Ok(())
        })
    }

    fn copy_object<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            let source = format!("/{}/{}", self.bucket, signing::encode_key(from));
            headers.insert(
                "x-amz-copy-source",
                source
                    .parse::<HeaderValue>()
                    .map_err(|_| S3Error::Config(format!("invalid copy source {from}")))?,
            );
            let resp = self
                .send_ok(Method::PUT, to, &[], headers, Vec::new())
                .await?;
            // CopyObject can fail after a 200 status line.
            let text = body_text(&resp);
            if let Some(err) = xml::parse_error(&text) {
                return Err(S3Error::Api {
                    status: resp.status.as_u16(),
                    code: err.code,
                    message: err.message,
                });
            }
            Ok(())
        })
    }

    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        continuation: Option<String>,
    ) -> BoxFuture<'a, Result<ListPage, S3Error>> {
        Box::pin(async move {
            let mut query = q(&[("list-type", "2"), ("prefix", prefix)]);
            if let Some(d) = delimiter {
                query.push(("delimiter".into(), d.into()));
            }
            if let Some(token) = continuation {
                query.push(("continuation-token".into(), token));
            }
            let resp = self
                .send_ok(Method::GET, "", &query, HeaderMap::new(), Vec::new())
                .await?;
            xml::parse_list_objects(&body_text(&resp))
        })
    }

    fn create_multipart_upload<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        Box::pin(async move {
            let resp = self
                .send_ok(Method::POST, key, &q(&[("uploads", "")]), HeaderMap::new(), Vec::new())
                .await?;
            xml::parse_upload_id(&body_text(&resp))
        })
    }

    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        Box::pin(async move {
            let part = part_number.to_string();
            let query = q(&[("partNumber", &part), ("uploadId", upload_id)]);
            let resp = self
                .send_ok(Method::PUT, key, &query, HeaderMap::new(), body)
                .await?;
            header_str(&resp.headers, ETAG)
                .map(str::to_string)
                .ok_or_else(|| S3Error::Api {
                    status: resp.status.as_u16(),
                    code: "MissingETag".into(),
                    message: format!("no ETag for part {part_number}"),
                })
        })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        Box::pin(async move {
            let body = xml::complete_body(parts)?.into_bytes();
            let resp = self
                .send_ok(Method::POST, key, &q(&[("uploadId", upload_id)]), HeaderMap::new(), body)
                .await?;
            let text = body_text(&resp);
            if let Some(err) = xml::parse_error(&text) {
                return Err(S3Error::Api {
                    status: resp.status.as_u16(),
                    code: err.code,
                    message: err.message,
                });
            }
            Ok(())
        })
    }

    fn abort_multipart_upload<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        Box::pin(async move {
            self.send_ok(Method::DELETE, key, &q(&[("uploadId", upload_id)]), HeaderMap::new(), Vec::new())
                .await?;
            Ok(())
        })
    }

    fn list_multipart_uploads<'a>(
        &'a self,
        prefix: &'a str,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
    ) -> BoxFuture<'a, Result<MultipartPage, S3Error>> {
        Box::pin(async move {
            let mut query = q(&[("uploads", ""), ("prefix", prefix)]);
            if let Some(m) = key_marker {
                query.push(("key-marker".into(), m));
            }
            if let Some(m) = upload_id_marker {
                query.push(("upload-id-marker".into(), m));
            }
            let resp = self
                .send_ok(Method::GET, "", &query, HeaderMap::new(), Vec::new())
                .await?;
            xml::parse_multipart_uploads(&body_text(&resp))
        })
    }
}

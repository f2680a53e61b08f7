//! XML request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowaway_storage::CompletedPart;

use crate::S3Error;
use crate::api::{ListPage, MultipartPage, MultipartUpload, ObjectMeta};

#[derive(Debug, Deserialize)]
#[serde(rename = "Error")]
pub(crate) struct ErrorXml {
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ContentsXml {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "LastModified", default)]
    last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrefixXml {
    #[serde(rename = "Prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "ListBucketResult")]
struct ListBucketResultXml {
    #[serde(rename = "Contents", default)]
    contents: Vec<ContentsXml>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<PrefixXml>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
struct InitiateMultipartUploadResultXml {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadXml {
    #[serde(rename = "Part")]
    parts: Vec<PartXml>,
}

#[derive(Debug, Serialize)]
struct PartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
struct UploadXml {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "UploadId")]
    upload_id: String,
    #[serde(rename = "Initiated")]
    initiated: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "ListMultipartUploadsResult")]
struct ListMultipartUploadsResultXml {
    #[serde(rename = "Upload", default)]
    uploads: Vec<UploadXml>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextKeyMarker", default)]
    next_key_marker: Option<String>,
    #[serde(rename = "NextUploadIdMarker", default)]
    next_upload_id_marker: Option<String>,
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub(crate) fn parse_error(body: &str) -> Option<ErrorXml> {
    quick_xml::de::from_str(body).ok()
}

pub(crate) fn parse_list_objects(body: &str) -> Result<ListPage, S3Error> {
    let xml: ListBucketResultXml = quick_xml::de::from_str(body)?;
    Ok(ListPage {
        objects: xml
            .contents
            .into_iter()
            .map(|c| ObjectMeta {
                last_modified: c.last_modified.as_deref().and_then(parse_time),
                key: c.key,
                size: c.size,
                etag: c.etag,
            })
            .collect(),
        common_prefixes: xml.common_prefixes.into_iter().map(|p| p.prefix).collect(),
        next_token: xml
            .next_continuation_token
            .filter(|_| xml.is_truncated),
    })
}

pub(crate) fn parse_upload_id(body: &str) -> Result<String, S3Error> {
    let xml: InitiateMultipartUploadResultXml = quick_xml::de::from_str(body)?;
    Ok(xml.upload_id)
}

pub(crate) fn complete_body(parts: &[CompletedPart]) -> Result<String, S3Error> {
    let xml = CompleteMultipartUploadXml {
        parts: parts
            .iter()
            .map(|p| PartXml {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect(),
    };
    Ok(quick_xml::se::to_string(&xml)?)
}

pub(crate) fn parse_multipart_uploads(body: &str) -> Result<MultipartPage, S3Error> {
    let xml: ListMultipartUploadsResultXml = quick_xml::de::from_str(body)?;
    let truncated = xml.is_truncated;
    Ok(MultipartPage {
        uploads: xml
            .uploads
            .into_iter()
            .filter_map(|u| {
                Some(MultipartUpload {
                    initiated: parse_time(&u.initiated)?,
                    key: u.key,
                    upload_id: u.upload_id,
                })
            })
            .collect(),
        next_key_marker: xml.next_key_marker.filter(|_| truncated),
        next_upload_id_marker: xml.next_upload_id_marker.filter(|_| truncated),
    })
}

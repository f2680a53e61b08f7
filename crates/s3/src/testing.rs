//! In-memory [`S3Api`] used by the adapter tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use stowaway_storage::{BoxFuture, CompletedPart};

use crate::S3Error;
use crate::api::{ListPage, MultipartPage, MultipartUpload, ObjectMeta, S3Api};

pub(crate) struct PendingUpload {
    pub key: String,
    pub initiated: DateTime<Utc>,
    pub parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct MemoryS3 {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub uploads: Mutex<HashMap<String, PendingUpload>>,
    pub put_calls: AtomicUsize,
    pub part_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub next_id: AtomicUsize,
    /// 1-based index of the part call to reject with a 503; 0 for none.
    pub fail_part_call: AtomicUsize,
    /// Reject the next commit with a 503, leaving the upload open.
    pub fail_next_complete: AtomicBool,
    /// Page size for listings, to exercise continuation tokens.
    pub page_size: usize,
}

fn no_such_upload(id: &str) -> S3Error {
    S3Error::Api {
        status: 404,
        code: "NoSuchUpload".into(),
        message: format!("upload {id} does not exist"),
    }
}

fn slow_down() -> S3Error {
    S3Error::Api {
        status: 503,
        code: "SlowDown".into(),
        message: "please reduce your request rate".into(),
    }
}

impl MemoryS3 {
    pub fn new() -> Self {
        Self {
            page_size: 2,
            ..Self::default()
        }
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn insert_upload(&self, id: &str, key: &str, initiated: DateTime<Utc>) {
        self.uploads.lock().unwrap().insert(
            id.to_string(),
            PendingUpload {
                key: key.to_string(),
                initiated,
                parts: BTreeMap::new(),
            },
        );
    }

    pub fn drop_upload(&self, id: &str) {
        self.uploads.lock().unwrap().remove(id);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl S3Api for MemoryS3 {
    fn head_object<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<ObjectMeta>, S3Error>> {
        let meta = self.object(key).map(|data| ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: Some(Utc::now()),
            etag: None,
        });
        Box::pin(async move { Ok(meta) })
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Box::pin(async { Ok("\"etag\"".to_string()) })
    }

    fn get_object<'a>(
        &'a self,
        key: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, S3Error>> {
        let result = match self.object(key) {
            None => Err(S3Error::Api {
                status: 404,
                code: "NoSuchKey".into(),
                message: key.to_string(),
            }),
            Some(data) => Ok(match range {
                None => data,
                Some((first, last)) => {
                    let end = ((last + 1) as usize).min(data.len());
                    data[(first as usize).min(end)..end].to_vec()
                }
            }),
        };
        Box::pin(async move { result })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), S3Error>> {
        self.objects.lock().unwrap().remove(key);
        Box::pin(async { Ok(()) })
    }

    fn copy_object<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        let result = match self.object(from) {
            Some(data) => {
                self.objects.lock().unwrap().insert(to.to_string(), data);
                Ok(())
            }
            None => Err(S3Error::Api {
                status: 404,
                code: "NoSuchKey".into(),
                message: from.to_string(),
            }),
        };
        Box::pin(async move { result })
    }

    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        continuation: Option<String>,
    ) -> BoxFuture<'a, Result<ListPage, S3Error>> {
        let objects = self.objects.lock().unwrap();
        let mut entries: Vec<(String, Option<u64>)> = Vec::new();
        for (key, data) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match delimiter.and_then(|d| rest.find(d).map(|i| (i, d.len()))) {
                Some((i, len)) => {
                    let cp = format!("{prefix}{}", &rest[..i + len]);
                    if entries.last().map(|(k, _)| k) != Some(&cp) {
                        entries.push((cp, None));
                    }
                }
                None => entries.push((key.clone(), Some(data.len() as u64))),
            }
        }
        let start: usize = continuation.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(entries.len());
        let mut page = ListPage::default();
        for (key, size) in &entries[start.min(end)..end] {
            match size {
                Some(size) => page.objects.push(ObjectMeta {
                    key: key.clone(),
                    size: *size,
                    last_modified: None,
                    etag: None,
                }),
                None => page.common_prefixes.push(key.clone()),
            }
        }
        if end < entries.len() {
            page.next_token = Some(end.to_string());
        }
        Box::pin(async move { Ok(page) })
    }

    fn create_multipart_upload<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert_upload(&id, key, Utc::now());
        Box::pin(async move { Ok(id) })
    }

    fn upload_part<'a>(
        &'a self,
        _key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, S3Error>> {
        let call = self.part_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_part_call.load(Ordering::SeqCst) == call {
            return Box::pin(async { Err(slow_down()) });
        }
        let result = match self.uploads.lock().unwrap().get_mut(upload_id) {
            Some(upload) => {
                upload.parts.insert(part_number, body);
                Ok(format!("\"part-{part_number}\""))
            }
            None => Err(no_such_upload(upload_id)),
        };
        Box::pin(async move { result })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_complete.swap(false, Ordering::SeqCst) {
            return Box::pin(async { Err(slow_down()) });
        }
        let result = match self.uploads.lock().unwrap().remove(upload_id) {
            Some(upload) => {
                let mut data = Vec::new();
                for part in parts {
                    if let Some(bytes) = upload.parts.get(&part.part_number) {
                        data.extend_from_slice(bytes);
                    }
                }
                self.objects.lock().unwrap().insert(key.to_string(), data);
                Ok(())
            }
            None => Err(no_such_upload(upload_id)),
        };
        Box::pin(async move { result })
    }

    fn abort_multipart_upload<'a>(
        &'a self,
        _key: &'a str,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), S3Error>> {
        self.drop_upload(upload_id);
        Box::pin(async { Ok(()) })
    }

    fn list_multipart_uploads<'a>(
        &'a self,
        prefix: &'a str,
        key_marker: Option<String>,
        _upload_id_marker: Option<String>,
    ) -> BoxFuture<'a, Result<MultipartPage, S3Error>> {
        let uploads = self.uploads.lock().unwrap();
        let mut all: Vec<MultipartUpload> = uploads
            .iter()
            .filter(|(_, u)| u.key.starts_with(prefix))
            .map(|(id, u)| MultipartUpload {
                key: u.key.clone(),
                upload_id: id.clone(),
                initiated: u.initiated,
            })
            .collect();
        all.sort_by(|a, b| a.upload_id.cmp(&b.upload_id));
        let start: usize = key_marker.and_then(|m| m.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let more = end < all.len();
        let page = MultipartPage {
            uploads: all[start.min(end)..end].to_vec(),
            next_key_marker: more.then(|| end.to_string()),
            next_upload_id_marker: more.then(|| "marker".to_string()),
        };
        Box::pin(async move { Ok(page) })
    }
}

//! In-memory [`DriveApi`] used by the adapter tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use stowaway_storage::BoxFuture;

use crate::{ChunkOutcome, DriveApi, DriveError, DriveFile, FOLDER_MIME_TYPE, FileList};

struct Session {
    parent: String,
    name: String,
    total: u64,
    data: Vec<u8>,
}

pub(crate) struct MemoryDrive {
    files: Mutex<HashMap<String, (DriveFile, Vec<u8>)>>,
    sessions: Mutex<HashMap<String, Session>>,
    next_id: AtomicUsize,
    /// Accept the next chunk but report a transport failure.
    pub fail_next_chunk: AtomicBool,
    /// 1-based index of the chunk call to reject before storing its bytes;
    /// 0 for none.
    pub fail_chunk_call: AtomicUsize,
    /// Reject the next status query with a 503.
    pub fail_next_status: AtomicBool,
    pub create_folder_calls: AtomicUsize,
    pub find_calls: AtomicUsize,
    pub chunk_calls: AtomicUsize,
}

impl MemoryDrive {
    pub fn new() -> Self {
        let root = DriveFile {
            id: "root".into(),
            name: "My Drive".into(),
            mime_type: FOLDER_MIME_TYPE.into(),
            ..DriveFile::default()
        };
        let mut files = HashMap::new();
        files.insert("root".to_string(), (root, Vec::new()));
        Self {
            files: Mutex::new(files),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            fail_next_chunk: AtomicBool::new(false),
            fail_chunk_call: AtomicUsize::new(0),
            fail_next_status: AtomicBool::new(false),
            create_folder_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            chunk_calls: AtomicUsize::new(0),
        }
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn insert(&self, parent: &str, name: &str, mime: &str, content: Vec<u8>) -> DriveFile {
        let file = DriveFile {
            id: self.id("f"),
            name: name.to_string(),
            mime_type: mime.to_string(),
            size: (mime != FOLDER_MIME_TYPE).then_some(content.len() as u64),
            parents: vec![parent.to_string()],
            ..DriveFile::default()
        };
        self.files
            .lock()
            .unwrap()
            .insert(file.id.clone(), (file.clone(), content));
        file
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(id).map(|(_, c)| c.clone())
    }

    pub fn children(&self, parent: &str) -> Vec<DriveFile> {
        let mut out: Vec<DriveFile> = self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|(f, _)| f.parents.iter().any(|p| p == parent))
            .map(|(f, _)| f.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn expire(&self, uri: &str) {
        self.sessions.lock().unwrap().remove(uri);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn remove_tree(&self, id: &str) {
        for child in self.children(id) {
            self.remove_tree(&child.id);
        }
        self.files.lock().unwrap().remove(id);
    }
}

impl DriveApi for MemoryDrive {
    fn get_file<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>> {
        let file = self.files.lock().unwrap().get(id).map(|(f, _)| f.clone());
        Box::pin(async move { Ok(file) })
    }

    fn find_child<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        folders_only: bool,
    ) -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let found = self
            .children(parent_id)
            .into_iter()
            .find(|f| f.name == name && (!folders_only || f.is_folder()));
        Box::pin(async move { Ok(found) })
    }

    fn list_children<'a>(
        &'a self,
        parent_id: &'a str,
        page_token: Option<String>,
    ) -> BoxFuture<'a, Result<FileList, DriveError>> {
        let all = self.children(parent_id);
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + 2).min(all.len());
        let list = FileList {
            files: all[start.min(end)..end].to_vec(),
            next_page_token: (end < all.len()).then(|| end.to_string()),
        };
        Box::pin(async move { Ok(list) })
    }

    fn create_folder<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        self.create_folder_calls.fetch_add(1, Ordering::SeqCst);
        let file = self.insert(parent_id, name, FOLDER_MIME_TYPE, Vec::new());
        Box::pin(async move { Ok(file) })
    }

    fn create_file<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        let file = self.insert(parent_id, name, "application/octet-stream", content);
        Box::pin(async move { Ok(file) })
    }

    fn delete_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriveError>> {
        self.remove_tree(id);
        Box::pin(async { Ok(()) })
    }

    fn move_file<'a>(
        &'a self,
        id: &'a str,
        _old_parent: &'a str,
        new_parent: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>> {
        let result = match self.files.lock().unwrap().get_mut(id) {
            Some((file, _)) => {
                file.name = new_name.to_string();
                file.parents = vec![new_parent.to_string()];
                Ok(file.clone())
            }
            None => Err(DriveError::Api {
                status: 404,
                body: format!("file {id} not found"),
            }),
        };
        Box::pin(async move { result })
    }

    fn start_resumable<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<String, DriveError>> {
        let uri = format!("https://upload.test/{}", self.id("session"));
        self.sessions.lock().unwrap().insert(
            uri.clone(),
            Session {
                parent: parent_id.to_string(),
                name: name.to_string(),
                total: total_size,
                data: Vec::new(),
            },
        );
        Box::pin(async move { Ok(uri) })
    }

    fn upload_chunk<'a>(
        &'a self,
        uri: &'a str,
        offset: u64,
        data: Vec<u8>,
        _total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>> {
        let call = self.chunk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_chunk_call.load(Ordering::SeqCst) == call {
            return Box::pin(async {
                Err(DriveError::Api {
                    status: 503,
                    body: "backend error".into(),
                })
            });
        }
        let result = (|| {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(uri)
                .ok_or_else(|| DriveError::SessionExpired(uri.to_string()))?;
            if offset != session.data.len() as u64 {
                return Err(DriveError::Api {
                    status: 400,
                    body: format!("expected offset {}", session.data.len()),
                });
            }
            session.data.extend_from_slice(&data);
            if self.fail_next_chunk.swap(false, Ordering::SeqCst) {
                return Err(DriveError::Api {
                    status: 503,
                    body: "backend error".into(),
                });
            }
            if session.data.len() as u64 >= session.total {
                let Some(done) = sessions.remove(uri) else {
                    unreachable!()
                };
                drop(sessions);
                let file = self.insert(&done.parent, &done.name, "application/zip", done.data);
                return Ok(ChunkOutcome::Complete(file));
            }
            Ok(ChunkOutcome::Incomplete {
                confirmed: session.data.len() as u64,
            })
        })();
        Box::pin(async move { result })
    }

    fn query_status<'a>(
        &'a self,
        uri: &'a str,
        _total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>> {
        if self.fail_next_status.swap(false, Ordering::SeqCst) {
            return Box::pin(async {
                Err(DriveError::Api {
                    status: 503,
                    body: "backend error".into(),
                })
            });
        }
        let result = match self.sessions.lock().unwrap().get(uri) {
            Some(session) => Ok(ChunkOutcome::Incomplete {
                confirmed: session.data.len() as u64,
            }),
            None => Err(DriveError::SessionExpired(uri.to_string())),
        };
        Box::pin(async move { result })
    }

    fn download<'a>(
        &'a self,
        id: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DriveError>> {
        let result = match self.content(id) {
            None => Err(DriveError::Api {
                status: 404,
                body: format!("file {id} not found"),
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
}

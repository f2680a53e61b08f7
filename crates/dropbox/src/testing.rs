//! In-memory [`DropboxApi`] used by the adapter tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use stowaway_storage::BoxFuture;

use crate::{DropboxApi, DropboxError, Entry, ListFolderPage, UploadCursor};

const PAGE_SIZE: usize = 2;

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    folders: BTreeSet<String>,
}

impl Tree {
    fn parent(path: &str) -> &str {
        path.rsplit_once('/').map_or("", |(p, _)| p)
    }

    fn name(path: &str) -> &str {
        path.rsplit_once('/').map_or(path, |(_, n)| n)
    }

    fn add_folders(&mut self, path: &str) {
        let mut current = Self::parent(path).to_string();
        let mut missing = Vec::new();
        while !current.is_empty() && !self.folders.contains(&current) {
            missing.push(current.clone());
            current = Self::parent(&current).to_string();
        }
        self.folders.extend(missing);
    }

    fn entry(&self, path: &str) -> Option<Entry> {
        if let Some(data) = self.files.get(path) {
            return Some(Entry {
                tag: "file".into(),
                name: Self::name(path).to_string(),
                id: Some(format!("id:{path}")),
                path_display: Some(path.to_string()),
                size: Some(data.len() as u64),
                ..Entry::default()
            });
        }
        (path.is_empty() || self.folders.contains(path)).then(|| Entry {
            tag: "folder".into(),
            name: Self::name(path).to_string(),
            path_display: Some(path.to_string()),
            ..Entry::default()
        })
    }

    fn children(&self, path: &str) -> Vec<Entry> {
        self.folders
            .iter()
            .chain(self.files.keys())
            .filter(|p| Self::parent(p) == path)
            .filter_map(|p| self.entry(p))
            .collect()
    }

    fn descendants(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        self.folders
            .iter()
            .chain(self.files.keys())
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn remove(&mut self, path: &str) {
        for p in self.descendants(path) {
            self.files.remove(&p);
            self.folders.remove(&p);
        }
        self.files.remove(path);
        self.folders.remove(path);
    }
}

pub(crate) struct MemoryDropbox {
    tree: Mutex<Tree>,
    sessions: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub append_calls: AtomicUsize,
    pub finish_calls: AtomicUsize,
    /// Reject the next append with a 503 before storing its bytes.
    pub fail_next_append: AtomicBool,
}

impl MemoryDropbox {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            upload_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            append_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
            fail_next_append: AtomicBool::new(false),
        }
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().files.get(path).cloned()
    }

    pub fn expire(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn write(&self, path: &str, data: Vec<u8>) -> Entry {
        let mut tree = self.tree.lock().unwrap();
        tree.add_folders(path);
        tree.files.insert(path.to_string(), data);
        let mut entry = tree.entry(path).unwrap();
        // Upload responses carry no tag.
        entry.tag = String::new();
        entry
    }

    fn append(&self, cursor: &UploadCursor, data: &[u8]) -> Result<(), DropboxError> {
        let mut sessions = self.sessions.lock().unwrap();
        let buf = sessions.get_mut(&cursor.session_id).ok_or_else(|| {
            DropboxError::SessionExpired("lookup_failed/not_found/".into())
        })?;
        if buf.len() as u64 != cursor.offset {
            return Err(DropboxError::SessionExpired(format!(
                "lookup_failed/incorrect_offset/ correct_offset={}",
                buf.len()
            )));
        }
        buf.extend_from_slice(data);
        Ok(())
    }

    fn page(&self, path: &str, start: usize) -> ListFolderPage {
        let all = self.tree.lock().unwrap().children(path);
        let end = (start + PAGE_SIZE).min(all.len());
        ListFolderPage {
            entries: all[start.min(end)..end].to_vec(),
            cursor: format!("{path}|{end}"),
            has_more: end < all.len(),
        }
    }
}

impl DropboxApi for MemoryDropbox {
    fn get_metadata<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<Entry>, DropboxError>> {
        let entry = self.tree.lock().unwrap().entry(path);
        Box::pin(async move { Ok(entry) })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        let result = {
            let mut tree = self.tree.lock().unwrap();
            if tree.entry(path).is_some() {
                Err(DropboxError::Api {
                    status: 409,
                    summary: "path/conflict/folder/".into(),
                })
            } else {
                tree.add_folders(path);
                tree.folders.insert(path.to_string());
                Ok(tree.entry(path).unwrap())
            }
        };
        Box::pin(async move { result })
    }

    fn upload<'a>(
        &'a self,
        path: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.write(path, content);
        Box::pin(async move { Ok(entry) })
    }

    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), DropboxError>> {
        let result = {
            let mut tree = self.tree.lock().unwrap();
            if tree.entry(path).is_none() {
                Err(DropboxError::NotFound(format!("path_lookup/not_found/ {path}")))
            } else {
                tree.remove(path);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn move_path<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        let result = {
            let mut tree = self.tree.lock().unwrap();
            match tree.entry(from) {
                None => Err(DropboxError::NotFound(format!("from_lookup/not_found/ {from}"))),
                Some(_) => {
                    let mut moved: Vec<String> = tree.descendants(from);
                    moved.push(from.to_string());
                    tree.add_folders(to);
                    for old in moved {
                        let new = format!("{to}{}", &old[from.len()..]);
                        if let Some(data) = tree.files.remove(&old) {
                            tree.files.insert(new, data);
                        } else if tree.folders.remove(&old) {
                            tree.folders.insert(new);
                        }
                    }
                    Ok(tree.entry(to).unwrap())
                }
            }
        };
        Box::pin(async move { result })
    }

    fn list_folder<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>> {
        let entry = self.tree.lock().unwrap().entry(path);
        let result = match entry {
            Some(e) if e.is_folder() => Ok(()),
            _ => Err(DropboxError::NotFound(format!("path/not_found/ {path}"))),
        }
        .map(|()| self.page(path, 0));
        Box::pin(async move { result })
    }

    fn list_folder_continue<'a>(
        &'a self,
        cursor: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>> {
        let (path, start) = cursor.rsplit_once('|').unwrap();
        let page = self.page(path, start.parse().unwrap());
        Box::pin(async move { Ok(page) })
    }

    fn session_start<'a>(&'a self, data: Vec<u8>) -> BoxFuture<'a, Result<String, DropboxError>> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().unwrap().insert(id.clone(), data);
        Box::pin(async move { Ok(id) })
    }

    fn session_append<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), DropboxError>> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail_next_append.swap(false, Ordering::SeqCst) {
            Err(DropboxError::Api {
                status: 503,
                summary: "too_many_write_operations/".into(),
            })
        } else {
            self.append(cursor, &data)
        };
        Box::pin(async move { result })
    }

    fn session_finish<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.append(cursor, &data).map(|()| {
            let content = self
                .sessions
                .lock()
                .unwrap()
                .remove(&cursor.session_id)
                .unwrap_or_default();
            self.write(path, content)
        });
        Box::pin(async move { result })
    }

    fn download<'a>(
        &'a self,
        path: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DropboxError>> {
        let result = match self.content(path) {
            None => Err(DropboxError::NotFound(format!("path/not_found/ {path}"))),
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

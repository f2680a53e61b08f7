//! End-to-end tick scenarios against a scripted in-memory adapter.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use stowaway_storage::{
    BoxFuture, ChunkRequest, LocalAdapter, MIB, PathInfo, SessionBag, SessionState,
    StorageAdapter, StorageError, session_key,
};
use stowaway_transfer::{
    ChunkConfig, ChunkingManager, Direction, IteratorPosition, MemoryStore, StateStore,
    TickStatus,
};

#[derive(Default)]
struct Script {
    sources: HashMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    remote: HashMap<String, Vec<u8>>,
    created_dirs: Vec<String>,
    /// `(source, offset)` of every copy call.
    calls: Vec<(String, u64)>,
    commits: HashMap<String, usize>,
    fail_calls: HashSet<usize>,
    expire_calls: HashSet<usize>,
    /// Calls that store their bytes but fail the final commit.
    commit_fail_calls: HashSet<usize>,
}

/// Serves as both the local source and the remote destination.
///
/// Uploads follow the same session rules as the real providers: a cursor
/// entry per file, `Complete` after the commit, and `SessionExpired` when a
/// resume arrives without a session. A cursor ahead of the requested offset
/// is reported back as progress instead of restarting the file.
#[derive(Default)]
struct ScriptedAdapter {
    script: Mutex<Script>,
}

impl ScriptedAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn add_source(&self, path: &str, size: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();
        self.script
            .lock()
            .unwrap()
            .sources
            .insert(path.to_string(), data.clone());
        data
    }

    fn add_dir(&self, path: &str) {
        self.script.lock().unwrap().dirs.insert(path.to_string());
    }

    fn remove_source(&self, path: &str) {
        self.script.lock().unwrap().sources.remove(path);
    }

    fn fail_call(&self, index: usize) {
        self.script.lock().unwrap().fail_calls.insert(index);
    }

    fn expire_call(&self, index: usize) {
        self.script.lock().unwrap().expire_calls.insert(index);
    }

    fn fail_commit_on_call(&self, index: usize) {
        self.script.lock().unwrap().commit_fail_calls.insert(index);
    }

    fn heal(&self) {
        let mut s = self.script.lock().unwrap();
        s.fail_calls.clear();
        s.expire_calls.clear();
        s.commit_fail_calls.clear();
    }

    fn calls(&self) -> Vec<(String, u64)> {
        self.script.lock().unwrap().calls.clone()
    }

    fn remote(&self, path: &str) -> Option<Vec<u8>> {
        self.script.lock().unwrap().remote.get(path).cloned()
    }

    fn commits(&self, path: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .commits
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn created_dirs(&self) -> Vec<String> {
        self.script.lock().unwrap().created_dirs.clone()
    }

    fn upload(
        &self,
        source: &str,
        dest: &str,
        request: ChunkRequest,
        session: &mut SessionBag,
    ) -> Result<u64, StorageError> {
        let mut s = self.script.lock().unwrap();
        let index = s.calls.len();
        s.calls.push((source.to_string(), request.offset));
        if s.fail_calls.contains(&index) {
            return Err(StorageError::provider("scripted", "simulated network error"));
        }
        let key = session_key(source, dest);
        if s.expire_calls.contains(&index) {
            session.remove(&key);
            return Err(StorageError::SessionExpired("cursor rejected".into()));
        }
        let data = s
            .sources
            .get(source)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        let size = data.len() as u64;
        let offset = request.offset;
        if session.is_complete(&key) {
            return Ok(size - offset);
        }
        if offset > 0 && session.get(&key).is_none() {
            return Err(StorageError::SessionExpired(format!("no session at {offset}")));
        }
        if let Some(SessionState::Cursor { offset: cursor, .. }) = session.get(&key).cloned() {
            if cursor < offset {
                session.remove(&key);
                return Err(StorageError::SessionExpired(format!(
                    "cursor at {cursor}, resume requested at {offset}"
                )));
            }
            if cursor > offset {
                if cursor >= size {
                    *s.commits.entry(dest.to_string()).or_default() += 1;
                    session.mark_complete(&key);
                }
                return Ok(cursor - offset);
            }
        }
        let end = request
            .max_length
            .map_or(size, |max| (offset + max).min(size));
        let buf = s.remote.entry(dest.to_string()).or_default();
        if offset == 0 {
            buf.clear();
        }
        buf.truncate(offset as usize);
        buf.extend_from_slice(&data[offset as usize..end as usize]);
        if end == size && s.commit_fail_calls.contains(&index) {
            session.insert(
                &key,
                SessionState::Cursor {
                    session_id: format!("cursor-{dest}"),
                    offset: end,
                },
            );
            return Err(StorageError::provider("scripted", "503 commit rejected"));
        }
        if end == size {
            *s.commits.entry(dest.to_string()).or_default() += 1;
            session.mark_complete(&key);
        } else {
            session.insert(
                &key,
                SessionState::Cursor {
                    session_id: format!("cursor-{dest}"),
                    offset: end,
                },
            );
        }
        Ok(end - offset)
    }
}

impl StorageAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>> {
        let s = self.script.lock().unwrap();
        let info = if let Some(data) = s.sources.get(path) {
            PathInfo::file(path, data.len() as u64)
        } else if s.dirs.contains(path) {
            PathInfo::dir(path)
        } else {
            PathInfo::missing(path)
        };
        Box::pin(async move { Ok(info) })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        self.script
            .lock()
            .unwrap()
            .created_dirs
            .push(path.to_string());
        Box::pin(async { Ok(()) })
    }

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        self.script
            .lock()
            .unwrap()
            .remote
            .insert(path.to_string(), content.to_vec());
        Box::pin(async move { Ok(content.len() as u64) })
    }

    fn delete<'a>(&'a self, path: &'a str, _: bool) -> BoxFuture<'a, Result<(), StorageError>> {
        self.script.lock().unwrap().remote.remove(path);
        Box::pin(async { Ok(()) })
    }

    fn move_path<'a>(
        &'a self,
        old_path: &'a str,
        new_path: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        let mut s = self.script.lock().unwrap();
        let result = match s.remote.remove(old_path) {
            Some(data) => {
                s.remote.insert(new_path.to_string(), data);
                Ok(())
            }
            None => Err(StorageError::NotFound(old_path.to_string())),
        };
        Box::pin(async move { result })
    }

    fn scan_dir<'a>(
        &'a self,
        _: &'a str,
        _: bool,
        _: bool,
    ) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn get_file_content<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        let result = self
            .remote(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()));
        Box::pin(async move { result })
    }

    fn copy_to_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        let result = self.upload(source, dest, request, session);
        Box::pin(async move { result })
    }

    fn copy_from_storage<'a>(
        &'a self,
        source: &'a str,
        _: &'a str,
        _: ChunkRequest,
        _: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move { Err(StorageError::NotFound(source.to_string())) })
    }
}

fn manager(
    adapter: &Arc<ScriptedAdapter>,
    store: &Arc<MemoryStore>,
    items: &[(&str, &str)],
    config: ChunkConfig,
) -> ChunkingManager {
    let items = items
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
    ChunkingManager::new(
        "transfer",
        Direction::Upload,
        adapter.clone(),
        adapter.clone(),
        items,
        store.clone(),
        config,
    )
}

fn chunked(chunk_size: u64, max_iterations: Option<u32>) -> ChunkConfig {
    ChunkConfig {
        chunk_size: Some(chunk_size),
        max_iterations,
        ..ChunkConfig::default()
    }
}

#[tokio::test]
async fn twelve_mib_file_takes_three_chunked_ticks() {
    let adapter = ScriptedAdapter::new();
    let data = adapter.add_source("a.txt", 12 * MIB as usize);
    let store = Arc::new(MemoryStore::new());
    let mut m = manager(&adapter, &store, &[("a.txt", "b.txt")], chunked(5 * MIB, Some(1)));

    let mut statuses = Vec::new();
    let mut bytes = Vec::new();
    loop {
        let report = m.tick().await;
        statuses.push(report.status);
        bytes.push(report.bytes_this_tick);
        if report.status != TickStatus::Continue {
            break;
        }
    }
    assert_eq!(
        statuses,
        vec![TickStatus::Continue, TickStatus::Continue, TickStatus::Done]
    );
    assert_eq!(bytes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
    assert_eq!(
        adapter.calls(),
        vec![
            ("a.txt".to_string(), 0),
            ("a.txt".to_string(), 5 * MIB),
            ("a.txt".to_string(), 10 * MIB),
        ]
    );
    assert!(m.iterator().is_terminal());
    assert_eq!(m.progress_percent(), 100.0);
    assert_eq!(adapter.remote("b.txt").unwrap(), data);
}

#[tokio::test]
async fn failure_resumes_from_last_good_chunk() {
    let adapter = ScriptedAdapter::new();
    let data = adapter.add_source("a.txt", 12 * MIB as usize);
    adapter.fail_call(1);
    let store = Arc::new(MemoryStore::new());

    let mut m = manager(&adapter, &store, &[("a.txt", "b.txt")], chunked(5 * MIB, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Failed);
    assert_eq!(report.bytes_this_tick, 5 * MIB);
    assert!(report.message.contains("simulated network error"));
    assert_eq!(adapter.calls().len(), 2);
    assert_eq!(
        store.get("transfer").unwrap().position,
        IteratorPosition::new(0, 5 * MIB)
    );

    adapter.heal();
    let mut m = manager(&adapter, &store, &[("a.txt", "b.txt")], chunked(5 * MIB, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Done);
    let calls = adapter.calls();
    assert_eq!(calls[2], ("a.txt".to_string(), 5 * MIB));
    assert_eq!(adapter.remote("b.txt").unwrap(), data);
    assert_eq!(adapter.commits("b.txt"), 1);
}

#[tokio::test]
async fn failed_commit_resumes_without_restarting_the_file() {
    let adapter = ScriptedAdapter::new();
    let data = adapter.add_source("a.txt", 12 * MIB as usize);
    adapter.fail_commit_on_call(2);
    let store = Arc::new(MemoryStore::new());

    let mut m = manager(&adapter, &store, &[("a.txt", "b.txt")], chunked(5 * MIB, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Failed);
    assert!(report.message.contains("503 commit rejected"));
    assert_eq!(
        store.get("transfer").unwrap().position,
        IteratorPosition::new(0, 10 * MIB)
    );
    assert_eq!(adapter.commits("b.txt"), 0);

    let mut m = manager(&adapter, &store, &[("a.txt", "b.txt")], chunked(5 * MIB, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Done);
    assert_eq!(report.bytes_this_tick, 2 * MIB);
    let offsets: Vec<u64> = adapter.calls().into_iter().map(|(_, o)| o).collect();
    assert_eq!(offsets, vec![0, 5 * MIB, 10 * MIB, 10 * MIB]);
    assert_eq!(adapter.commits("b.txt"), 1);
    assert_eq!(adapter.remote("b.txt").unwrap(), data);
}

#[tokio::test]
async fn finishing_a_file_drops_its_session_entry() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.txt", 6 * MIB as usize);
    adapter.add_source("c.txt", 6 * MIB as usize);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.txt", "b.txt"), ("c.txt", "d.txt")];

    let mut m = manager(&adapter, &store, &items, chunked(5 * MIB, Some(1)));
    assert_eq!(m.tick().await.status, TickStatus::Continue);
    assert!(m.session().get(&session_key("a.txt", "b.txt")).is_some());

    assert_eq!(m.tick().await.status, TickStatus::Continue);
    assert_eq!(m.position(), IteratorPosition::new(1, 0));
    assert!(m.session().is_empty());
    assert!(store.get("transfer").unwrap().session.is_empty());

    assert_eq!(m.tick().await.status, TickStatus::Continue);
    assert!(m.session().get(&session_key("c.txt", "d.txt")).is_some());
    assert!(m.session().get(&session_key("a.txt", "b.txt")).is_none());
}

#[tokio::test]
async fn directory_item_creates_dir_only() {
    let adapter = ScriptedAdapter::new();
    adapter.add_dir("dir1");
    let store = Arc::new(MemoryStore::new());
    let mut m = manager(&adapter, &store, &[("dir1", "remoteDir1")], ChunkConfig::default());

    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Done);
    assert_eq!(adapter.created_dirs(), vec!["remoteDir1"]);
    assert!(adapter.calls().is_empty());
    assert!(m.iterator().is_terminal());
}

#[tokio::test]
async fn vanished_source_is_skipped_with_stale_total() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.bin", MIB as usize);
    adapter.add_source("b.bin", MIB as usize);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.bin", "r/a.bin"), ("b.bin", "r/b.bin")];

    let mut m = manager(&adapter, &store, &items, chunked(MIB, Some(1)));
    assert_eq!(m.tick().await.status, TickStatus::Continue);
    assert_eq!(store.get("transfer").unwrap().total_size, Some(2 * MIB));

    adapter.remove_source("b.bin");
    let mut m = manager(&adapter, &store, &items, chunked(MIB, Some(1)));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Done);
    assert!(adapter.calls().iter().all(|(from, _)| from == "a.bin"));
    // The total was computed before b.bin vanished and is not recomputed.
    assert_eq!(m.iterator().total_size(), Some(2 * MIB));
    assert_eq!(m.progress_percent(), 50.0);
}

#[tokio::test]
async fn vanished_source_is_skipped_within_one_manager() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.bin", 100);
    adapter.add_source("b.bin", 100);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.bin", "r/a.bin"), ("b.bin", "r/b.bin")];

    let mut m = manager(&adapter, &store, &items, chunked(100, Some(1)));
    assert_eq!(m.tick().await.status, TickStatus::Continue);
    adapter.remove_source("b.bin");
    assert_eq!(m.tick().await.status, TickStatus::Done);
    assert_eq!(adapter.calls().len(), 1);
}

#[tokio::test]
async fn offsets_are_monotonic_across_ticks() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.bin", 10_000);
    let store = Arc::new(MemoryStore::new());
    let mut m = manager(&adapter, &store, &[("a.bin", "a.bin")], chunked(3_000, Some(1)));

    let mut last = IteratorPosition::default();
    loop {
        let report = m.tick().await;
        let pos = m.position();
        assert!((pos.index, pos.offset) >= (last.index, last.offset));
        if pos.index == 0 {
            assert!(pos.offset <= 10_000);
        }
        last = pos;
        if report.status == TickStatus::Done {
            break;
        }
    }
    assert_eq!(last, IteratorPosition::new(1, 0));
}

#[tokio::test]
async fn fresh_manager_per_tick_matches_single_instance() {
    let files = [("a.bin", 10_000), ("empty.bin", 0), ("c.bin", 5_000)];
    let items = [
        ("a.bin", "out/a.bin"),
        ("empty.bin", "out/empty.bin"),
        ("c.bin", "out/c.bin"),
    ];
    for chunk in [1_000, 4_096, 7_777, 20_000] {
        let config = chunked(chunk, Some(1));

        let single = ScriptedAdapter::new();
        let resumed = ScriptedAdapter::new();
        for (name, size) in files {
            single.add_source(name, size);
            resumed.add_source(name, size);
        }

        let store = Arc::new(MemoryStore::new());
        let mut m = manager(&single, &store, &items, config);
        while m.tick().await.status == TickStatus::Continue {}

        let store = Arc::new(MemoryStore::new());
        loop {
            let mut m = manager(&resumed, &store, &items, config);
            if m.tick().await.status != TickStatus::Continue {
                break;
            }
        }

        for (_, to) in items {
            assert_eq!(single.remote(to), resumed.remote(to), "chunk {chunk}, file {to}");
            assert_eq!(resumed.commits(to), 1, "chunk {chunk}, file {to}");
        }
        assert_eq!(single.calls(), resumed.calls(), "chunk {chunk}");
    }
}

#[tokio::test]
async fn missing_source_never_reaches_the_adapter() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("b.bin", 10);
    let store = Arc::new(MemoryStore::new());
    let mut m = manager(
        &adapter,
        &store,
        &[("missing.bin", "r/missing.bin"), ("b.bin", "r/b.bin")],
        ChunkConfig::default(),
    );
    assert_eq!(m.tick().await.status, TickStatus::Done);
    assert_eq!(adapter.calls(), vec![("b.bin".to_string(), 0)]);
    assert_eq!(m.iterator().total_size(), Some(10));
    assert!(adapter.remote("r/missing.bin").is_none());
}

#[tokio::test]
async fn create_dir_is_idempotent_on_local_storage() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalAdapter::new(dir.path());
    local.create_dir("a/b").await.unwrap();
    local.create_dir("a/b").await.unwrap();
    assert!(local.is_dir("a/b").await.unwrap());
}

#[tokio::test]
async fn commit_happens_once_even_when_ticks_repeat() {
    let adapter = ScriptedAdapter::new();
    let data = adapter.add_source("a.bin", 2_500);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.bin", "r/a.bin")];

    let mut m = manager(&adapter, &store, &items, chunked(1_000, None));
    assert_eq!(m.tick().await.status, TickStatus::Done);
    assert_eq!(adapter.commits("r/a.bin"), 1);

    // Replaying from the terminal checkpoint does not touch the file again.
    let mut m = manager(&adapter, &store, &items, chunked(1_000, None));
    assert_eq!(m.tick().await.status, TickStatus::Done);
    assert_eq!(adapter.calls().len(), 3);
    assert_eq!(adapter.commits("r/a.bin"), 1);
    assert_eq!(adapter.remote("r/a.bin").unwrap(), data);
}

#[tokio::test]
async fn completed_session_is_not_committed_twice() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.bin", 2_000);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.bin", "r/a.bin")];

    // A checkpoint saved after the commit but before the offset moved on.
    let mut session = SessionBag::new();
    session.mark_complete(session_key("a.bin", "r/a.bin"));
    store
        .save(
            "transfer",
            &stowaway_transfer::TransferState {
                position: IteratorPosition::new(0, 1_000),
                session,
                total_size: Some(2_000),
            },
        )
        .await
        .unwrap();

    let mut m = manager(&adapter, &store, &items, chunked(1_000, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Done);
    assert_eq!(report.bytes_this_tick, 1_000);
    assert_eq!(adapter.commits("r/a.bin"), 0);
}

#[tokio::test]
async fn expired_session_restarts_the_file() {
    let adapter = ScriptedAdapter::new();
    let data = adapter.add_source("a.bin", 3_000);
    adapter.expire_call(1);
    let store = Arc::new(MemoryStore::new());
    let items = [("a.bin", "r/a.bin")];

    let mut m = manager(&adapter, &store, &items, chunked(1_000, None));
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Failed);
    assert!(report.message.contains("cursor rejected"));
    let saved = store.get("transfer").unwrap();
    assert_eq!(saved.position, IteratorPosition::new(0, 0));
    assert!(saved.session.is_empty());
    assert_eq!(m.progress_percent(), 0.0);

    adapter.heal();
    let mut m = manager(&adapter, &store, &items, chunked(1_000, None));
    assert_eq!(m.tick().await.status, TickStatus::Done);
    assert_eq!(adapter.calls()[2], ("a.bin".to_string(), 0));
    assert_eq!(adapter.remote("r/a.bin").unwrap(), data);
    assert_eq!(adapter.commits("r/a.bin"), 1);
}

#[tokio::test]
async fn throttle_counts_against_the_tick_budget() {
    let adapter = ScriptedAdapter::new();
    adapter.add_source("a.bin", 10_000);
    let store = Arc::new(MemoryStore::new());
    let config = ChunkConfig {
        chunk_size: Some(1_000),
        tick_timeout: Some(std::time::Duration::from_millis(50)),
        throttle: Some(std::time::Duration::from_millis(30)),
        ..ChunkConfig::default()
    };
    let mut m = manager(&adapter, &store, &[("a.bin", "a.bin")], config);
    let report = m.tick().await;
    assert_eq!(report.status, TickStatus::Continue);
    assert!(adapter.calls().len() <= 2);
}

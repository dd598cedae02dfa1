//! Directory-of-files TaskStore.
//!
//! Layout under the root directory:
//! - `index.json`: task ids in insertion order
//! - `<id>.json`: the record (status, type, metadata, created_at)
//! - `<id>.log`: append-only output
//! - `.store.lock`: serializes every read-modify-write across processes
//!
//! Records and the index are replaced atomically (write temp file, rename),
//! so readers never observe a half-written file and do not take the lock.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{Metadata, TaskError, TaskId, TaskRecord, TaskStatus, TaskType};
use crate::impls::file_lock::{FileLock, LockGuard};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

const INDEX_FILE: &str = "index.json";
const STORE_LOCK: &str = ".store";

pub struct FileTaskStore {
    root: PathBuf,
    known_types: BTreeSet<String>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    mutex: FileLock,
}

impl FileTaskStore {
    /// Open (creating if needed) a store rooted at `root` that accepts the
    /// given task types.
    pub fn open<I, S>(root: impl Into<PathBuf>, known_types: I) -> Result<Self, TaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| TaskError::storage(&root, e))?;
        Ok(Self {
            mutex: FileLock::new(&root, STORE_LOCK),
            known_types: known_types.into_iter().map(Into::into).collect(),
            clock: Arc::new(SystemClock),
            ids: Box::new(UlidGenerator::new(SystemClock)),
            root,
        })
    }

    pub fn with_clock<C: Clock + Clone + 'static>(mut self, clock: C) -> Self {
        self.ids = Box::new(UlidGenerator::new(clock.clone()));
        self.clock = Arc::new(clock);
        self
    }

    pub fn output_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(format!("{id}.log"))
    }

    fn record_path(&self, id: &TaskId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn lock(&self) -> Result<LockGuard, TaskError> {
        self.mutex.acquire()
    }

    fn read_index(&self) -> Result<Vec<TaskId>, TaskError> {
        let path = self.index_path();
        match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| TaskError::codec(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TaskError::storage(&path, e)),
        }
    }

    fn write_index(&self, ids: &[TaskId]) -> Result<(), TaskError> {
        let path = self.index_path();
        let raw = serde_json::to_vec_pretty(ids).map_err(|e| TaskError::codec(&path, e))?;
        write_atomic(&path, &raw)
    }

    fn read_record(&self, id: &TaskId) -> Result<Option<TaskRecord>, TaskError> {
        let path = self.record_path(id);
        match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| TaskError::codec(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskError::storage(&path, e)),
        }
    }

    fn write_record(&self, record: &TaskRecord) -> Result<(), TaskError> {
        let path = self.record_path(&record.id);
        let raw = serde_json::to_vec_pretty(record).map_err(|e| TaskError::codec(&path, e))?;
        write_atomic(&path, &raw)
    }
}

impl TaskStore for FileTaskStore {
    fn enqueue(&self, task_type: &TaskType, metadata: Metadata) -> Result<TaskId, TaskError> {
        if !self.known_types.contains(task_type.as_str()) {
            return Err(TaskError::UnknownTaskType(task_type.to_string()));
        }

        let _guard = self.lock()?;
        let id = self.ids.generate_task_id();
        let record = TaskRecord::new(id, task_type.clone(), metadata, self.clock.now());

        // record before index: an interrupted enqueue leaves an orphan file,
        // never an index entry without a record
        self.write_record(&record)?;
        let output = self.output_path(&id);
        File::create(&output).map_err(|e| TaskError::storage(&output, e))?;

        let mut index = self.read_index()?;
        index.push(id);
        self.write_index(&index)?;

        info!(task_id = %id, task_type = %task_type, "task queued");
        Ok(id)
    }

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, TaskError> {
        self.read_record(id)
    }

    fn get_next(&self) -> Result<Option<TaskRecord>, TaskError> {
        for id in self.read_index()? {
            match self.read_record(&id)? {
                Some(record) if record.status == TaskStatus::Pending => return Ok(Some(record)),
                Some(_) => continue,
                None => warn!(task_id = %id, "indexed task has no record"),
            }
        }
        Ok(None)
    }

    fn remove(&self, id: &TaskId) -> Result<(), TaskError> {
        let _guard = self.lock()?;
        let record = self
            .read_record(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if record.is_running() {
            return Err(TaskError::TaskRunning(*id));
        }

        let mut index = self.read_index()?;
        index.retain(|known| known != id);
        self.write_index(&index)?;

        for path in [self.record_path(id), self.output_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TaskError::storage(&path, e)),
            }
        }

        info!(task_id = %id, "task removed");
        Ok(())
    }

    fn ids(&self) -> Result<Vec<TaskId>, TaskError> {
        self.read_index()
    }

    fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<TaskRecord, TaskError> {
        let _guard = self.lock()?;
        let mut record = self
            .read_record(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if !record.status.can_transition_to(status) {
            return Err(TaskError::InvalidTransition {
                id: *id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        self.write_record(&record)?;
        debug!(task_id = %id, status = %status, "task status updated");
        Ok(record)
    }

    fn append_output(&self, id: &TaskId, bytes: &[u8]) -> Result<(), TaskError> {
        let path = self.output_path(id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TaskError::storage(&path, e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| TaskError::storage(&path, e))
    }

    fn read_output(&self, id: &TaskId, offset: u64) -> Result<String, TaskError> {
        let path = self.output_path(id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(TaskError::storage(&path, e)),
        };

        let mut raw = Vec::new();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_to_end(&mut raw))
            .map_err(|e| TaskError::storage(&path, e))?;
        // an offset inside a multi-byte character starts at the next one
        let skip = raw
            .iter()
            .take(3)
            .take_while(|b| is_utf8_continuation(**b))
            .count();
        Ok(String::from_utf8_lossy(&raw[skip..]).into_owned())
    }

    fn output_len(&self, id: &TaskId) -> Result<u64, TaskError> {
        let path = self.output_path(id);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(TaskError::storage(&path, e)),
        }
    }
}

fn is_utf8_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TaskError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = File::create(&tmp).map_err(|e| TaskError::storage(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| TaskError::storage(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| TaskError::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn store() -> (TempDir, FileTaskStore) {
        let dir = tempdir().unwrap();
        let store = FileTaskStore::open(dir.path().join("tasks"), ["upgrade", "remove-package"])
            .unwrap();
        (dir, store)
    }

    fn upgrade() -> TaskType {
        TaskType::new("upgrade")
    }

    #[test]
    fn enqueue_keeps_insertion_order_and_unique_ids() {
        let (_dir, store) = store();

        let ids: Vec<TaskId> = (0..5)
            .map(|_| store.enqueue(&upgrade(), Metadata::new()).unwrap())
            .collect();

        assert_eq!(store.ids().unwrap(), ids);
        let unique: BTreeSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn enqueue_persists_pending_record_with_metadata() {
        let dir = tempdir().unwrap();
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let store = FileTaskStore::open(dir.path(), ["upgrade"])
            .unwrap()
            .with_clock(FixedClock::new(created_at));

        let mut metadata = Metadata::new();
        metadata.insert("packages".into(), json!(["vendor/a"]));
        let id = store.enqueue(&upgrade(), metadata.clone()).unwrap();

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.task_type, upgrade());
        assert_eq!(record.created_at, created_at);
        assert_eq!(record.metadata, metadata);
    }

    #[test]
    fn unknown_type_creates_nothing() {
        let (_dir, store) = store();
        store.enqueue(&upgrade(), Metadata::new()).unwrap();
        let before = store.ids().unwrap();

        let err = store
            .enqueue(&TaskType::new("unknown-type"), Metadata::new())
            .unwrap_err();

        assert!(matches!(err, TaskError::UnknownTaskType(t) if t == "unknown-type"));
        assert_eq!(store.ids().unwrap(), before);
    }

    #[test]
    fn get_next_returns_oldest_pending() {
        let (_dir, store) = store();
        assert!(store.get_next().unwrap().is_none());

        let first = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        let second = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        assert_eq!(store.get_next().unwrap().unwrap().id, first);

        store.update_status(&first, TaskStatus::Running).unwrap();
        assert_eq!(store.get_next().unwrap().unwrap().id, second);

        store.update_status(&first, TaskStatus::Done).unwrap();
        store.update_status(&second, TaskStatus::Running).unwrap();
        assert!(store.get_next().unwrap().is_none());
    }

    #[test]
    fn remove_refuses_running_records() {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        store.update_status(&id, TaskStatus::Running).unwrap();

        let err = store.remove(&id).unwrap_err();
        assert!(matches!(err, TaskError::TaskRunning(running) if running == id));
        assert!(store.get(&id).unwrap().is_some());
    }

    #[rstest]
    #[case::pending(&[])]
    #[case::done(&[TaskStatus::Running, TaskStatus::Done])]
    #[case::error(&[TaskStatus::Running, TaskStatus::Error])]
    fn remove_deletes_record_and_output(#[case] path: &[TaskStatus]) {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        for status in path {
            store.update_status(&id, *status).unwrap();
        }
        store.append_output(&id, b"some output").unwrap();

        store.remove(&id).unwrap();

        assert!(store.get(&id).unwrap().is_none());
        assert!(store.ids().unwrap().is_empty());
        assert!(!store.output_path(&id).exists());
    }

    #[test]
    fn remove_unknown_id_is_not_found() {
        let (_dir, store) = store();
        let id: TaskId = ulid::Ulid::new().into();
        assert!(matches!(store.remove(&id), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn update_status_rejects_invalid_transition() {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();

        let err = store.update_status(&id, TaskStatus::Done).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Done,
                ..
            }
        ));
        assert_eq!(store.get(&id).unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn output_reads_from_offset() {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();

        store.append_output(&id, b"Loading composer repositories\n").unwrap();
        let len = store.output_len(&id).unwrap();
        store.append_output(&id, b"Updating dependencies\n").unwrap();

        assert_eq!(store.read_output(&id, len).unwrap(), "Updating dependencies\n");
        assert_eq!(
            store.read_output(&id, 0).unwrap(),
            "Loading composer repositories\nUpdating dependencies\n"
        );
    }

    #[test]
    fn output_offset_reads_are_idempotent_and_never_fail_past_the_end() {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        store.append_output(&id, b"abc").unwrap();

        assert_eq!(store.read_output(&id, 1).unwrap(), "bc");
        assert_eq!(store.read_output(&id, 1).unwrap(), "bc");
        assert_eq!(store.read_output(&id, 3).unwrap(), "");
        assert_eq!(store.read_output(&id, 1_000).unwrap(), "");
    }

    #[rstest]
    #[case(1, "ösung ✓\n")]
    #[case(2, "sung ✓\n")]
    #[case(8, "✓\n")]
    #[case(9, "\n")]
    #[case(10, "\n")]
    fn offset_inside_a_character_moves_to_the_next_one(#[case] offset: u64, #[case] expected: &str) {
        let (_dir, store) = store();
        let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();
        store.append_output(&id, "Lösung ✓\n".as_bytes()).unwrap();

        assert_eq!(store.read_output(&id, offset).unwrap(), expected);
    }

    #[test]
    fn reopened_store_sees_persisted_state() {
        let dir = tempdir().unwrap();
        let id = {
            let store = FileTaskStore::open(dir.path(), ["upgrade"]).unwrap();
            let id = store.enqueue(&upgrade(), Metadata::new()).unwrap();
            store.update_status(&id, TaskStatus::Running).unwrap();
            id
        };

        let store = FileTaskStore::open(dir.path(), ["upgrade"]).unwrap();
        assert_eq!(store.ids().unwrap(), vec![id]);
        assert_eq!(store.get(&id).unwrap().unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn concurrent_enqueues_are_not_lost() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    // separate store instances, like separate request processes
                    let store = FileTaskStore::open(&root, ["upgrade"]).unwrap();
                    (0..10)
                        .map(|_| store.enqueue(&TaskType::new("upgrade"), Metadata::new()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut created: Vec<TaskId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let store = FileTaskStore::open(&root, ["upgrade"]).unwrap();
        let mut indexed = store.ids().unwrap();
        assert_eq!(indexed.len(), 40);

        created.sort();
        indexed.sort();
        assert_eq!(created, indexed);
    }
}

//! 체크포인트 저장소
//!
//! 스트림(샤드) ID마다 하나의 커서 레코드를 저장합니다.
//! 커서 갱신은 compare-and-set으로만 이루어집니다.

use crate::error::{CdcError, Result};
use crate::position::TransactionId;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// 스트림(샤드) 식별자
///
/// 파일명으로도 쓰이므로 영문자, 숫자, '.', '_', '-'만 허용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

fn stream_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid stream id pattern"))
}

impl StreamId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !stream_id_pattern().is_match(&id) || id == "." || id == ".." {
            return Err(CdcError::InvalidStreamId(id));
        }
        Ok(StreamId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        StreamId("default".to_string())
    }
}

impl TryFrom<String> for StreamId {
    type Error = CdcError;

    fn try_from(value: String) -> Result<Self> {
        StreamId::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 저장되는 커서 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub stream: StreamId,
    pub transaction_id: TransactionId,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(stream: StreamId, transaction_id: TransactionId) -> Self {
        CheckpointRecord {
            stream,
            transaction_id,
            updated_at: Utc::now(),
        }
    }
}

/// 커서 저장소 계약
///
/// `Arc<dyn PositionStore>`로 여러 스트림이 공유할 수 있어야 합니다.
/// 모든 I/O 실패는 `CdcError::StorageUnavailable`로 보고합니다.
pub trait PositionStore: Send + Sync {
    /// 현재 커서 조회 (`None`이면 저장된 적 없음)
    fn read(&self, stream: &StreamId) -> Result<Option<CheckpointRecord>>;

    /// 현재 값이 `expected`와 같을 때만 `new_value`로 교체
    ///
    /// `expected`가 `None`이면 레코드가 없을 때만 성공합니다.
    /// 반환 전에 쓰기가 영구 저장되어야 합니다.
    fn compare_and_set(
        &self,
        stream: &StreamId,
        expected: Option<&TransactionId>,
        new_value: &TransactionId,
    ) -> Result<bool>;

    /// 커서를 무조건 덮어쓰거나 삭제 (운영자 개입 전용)
    fn overwrite(&self, stream: &StreamId, value: Option<&TransactionId>) -> Result<()>;
}

/// 메모리 저장소 (프로세스 재시작 시 유실됨, 테스트용)
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    records: RwLock<HashMap<StreamId, CheckpointRecord>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        MemoryPositionStore::default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn read(&self, stream: &StreamId) -> Result<Option<CheckpointRecord>> {
        Ok(self.records.read().get(stream).cloned())
    }

    fn compare_and_set(
        &self,
        stream: &StreamId,
        expected: Option<&TransactionId>,
        new_value: &TransactionId,
    ) -> Result<bool> {
        let mut records = self.records.write();
        let current = records.get(stream).map(|r| &r.transaction_id);
        if current != expected {
            return Ok(false);
        }
        records.insert(
            stream.clone(),
            CheckpointRecord::new(stream.clone(), new_value.clone()),
        );
        Ok(true)
    }

    fn overwrite(&self, stream: &StreamId, value: Option<&TransactionId>) -> Result<()> {
        let mut records = self.records.write();
        match value {
            Some(id) => {
                records.insert(stream.clone(), CheckpointRecord::new(stream.clone(), id.clone()));
            }
            None => {
                records.remove(stream);
            }
        }
        Ok(())
    }
}

/// 파일 저장소
///
/// 스트림마다 `<dir>/<stream>.json` 파일 하나를 사용합니다.
/// 쓰기는 임시 파일 작성 → fsync → rename → 디렉터리 fsync 순서로 진행합니다.
pub struct FilePositionStore {
    base_dir: PathBuf,
    // compare-and-set 직렬화
    write_lock: Mutex<()>,
    fsync: bool,
}

impl FilePositionStore {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true)
    }

    pub fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).map_err(|e| {
            storage_error(format!("create {}", base_dir.display()), e)
        })?;

        info!("Checkpoint store opened at {}", base_dir.display());

        Ok(FilePositionStore {
            base_dir,
            write_lock: Mutex::new(()),
            fsync,
        })
    }

    fn file_path(&self, stream: &StreamId) -> PathBuf {
        self.base_dir.join(format!("{}.json", stream))
    }

    fn read_file(&self, stream: &StreamId) -> Result<Option<CheckpointRecord>> {
        let path = self.file_path(stream);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(format!("read {}", path.display()), e)),
        };

        let record: CheckpointRecord = serde_json::from_str(&contents).map_err(|e| {
            CdcError::StorageUnavailable(format!("corrupt checkpoint {}: {}", path.display(), e))
        })?;

        if record.stream != *stream {
            return Err(CdcError::StorageUnavailable(format!(
                "checkpoint {} belongs to stream {}",
                path.display(),
                record.stream
            )));
        }

        Ok(Some(record))
    }

    fn write_file(&self, record: &CheckpointRecord) -> Result<()> {
        let path = self.file_path(&record.stream);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| storage_error(format!("open {}", temp_path.display()), e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| storage_error(format!("write {}", temp_path.display()), e))?;
        if self.fsync {
            file.sync_all()
                .map_err(|e| storage_error(format!("fsync {}", temp_path.display()), e))?;
        }
        drop(file);

        fs::rename(&temp_path, &path)
            .map_err(|e| storage_error(format!("rename {}", path.display()), e))?;

        if self.fsync {
            // rename 자체의 영속화, 실패하면 advance도 실패해야 함
            sync_dir(&self.base_dir)?;
        }

        debug!("Saved checkpoint for {}: {}", record.stream, record.transaction_id);
        Ok(())
    }
}

impl PositionStore for FilePositionStore {
    fn read(&self, stream: &StreamId) -> Result<Option<CheckpointRecord>> {
        let _guard = self.write_lock.lock();
        self.read_file(stream)
    }

    fn compare_and_set(
        &self,
        stream: &StreamId,
        expected: Option<&TransactionId>,
        new_value: &TransactionId,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let current = self.read_file(stream)?;
        if current.as_ref().map(|r| &r.transaction_id) != expected {
            return Ok(false);
        }
        self.write_file(&CheckpointRecord::new(stream.clone(), new_value.clone()))?;
        Ok(true)
    }

    fn overwrite(&self, stream: &StreamId, value: Option<&TransactionId>) -> Result<()> {
        let _guard = self.write_lock.lock();
        match value {
            Some(id) => self.write_file(&CheckpointRecord::new(stream.clone(), id.clone())),
            None => {
                let path = self.file_path(stream);
                match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(storage_error(format!("remove {}", path.display()), e)),
                }
            }
        }
    }
}

fn sync_dir(dir: &Path) -> Result<()> {
    let handle =
        File::open(dir).map_err(|e| storage_error(format!("open {}", dir.display()), e))?;
    handle
        .sync_all()
        .map_err(|e| storage_error(format!("fsync {}", dir.display()), e))
}

fn storage_error(action: String, err: std::io::Error) -> CdcError {
    CdcError::StorageUnavailable(format!("{}: {}", action, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TransactionId {
        TransactionId::new(s).unwrap()
    }

    #[test]
    fn test_stream_id_validation() {
        assert!(StreamId::new("shard-0").is_ok());
        assert!(StreamId::new("keyspace.80-c0").is_ok());
        assert!(StreamId::new("").is_err());
        assert!(StreamId::new("../etc").is_err());
        assert!(StreamId::new("a/b").is_err());
        assert!(StreamId::new("..").is_err());
    }

    #[test]
    fn test_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn PositionStore) {}
    }

    #[test]
    fn test_memory_compare_and_set() {
        let store = MemoryPositionStore::new();
        let stream = StreamId::new("s1").unwrap();

        assert!(store.read(&stream).unwrap().is_none());
        assert!(store.compare_and_set(&stream, None, &id("txn-1")).unwrap());
        assert!(!store.compare_and_set(&stream, None, &id("txn-2")).unwrap());
        assert!(store
            .compare_and_set(&stream, Some(&id("txn-1")), &id("txn-2"))
            .unwrap());
        assert_eq!(
            store.read(&stream).unwrap().unwrap().transaction_id,
            id("txn-2")
        );
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let stream = StreamId::new("shard-0").unwrap();
        {
            let store = FilePositionStore::open(dir.path()).unwrap();
            assert!(store.compare_and_set(&stream, None, &id("txn-7")).unwrap());
        }

        let reopened = FilePositionStore::open(dir.path()).unwrap();
        let record = reopened.read(&stream).unwrap().unwrap();
        assert_eq!(record.transaction_id, id("txn-7"));
        assert_eq!(record.stream, stream);
        assert!(!dir.path().join("shard-0.json.tmp").exists());
    }

    #[test]
    fn test_file_store_streams_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePositionStore::with_options(dir.path(), false).unwrap();
        let a = StreamId::new("a").unwrap();
        let b = StreamId::new("b").unwrap();

        store.compare_and_set(&a, None, &id("txn-1")).unwrap();
        assert!(store.read(&b).unwrap().is_none());

        store.overwrite(&a, None).unwrap();
        assert!(store.read(&a).unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePositionStore::open(dir.path()).unwrap();
        let stream = StreamId::new("broken").unwrap();
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        assert!(matches!(
            store.read(&stream),
            Err(CdcError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_directory_sync_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sync_dir(dir.path()).is_ok());

        let missing = dir.path().join("gone");
        assert!(matches!(
            sync_dir(&missing),
            Err(CdcError::StorageUnavailable(msg)) if msg.contains("gone")
        ));
    }
}

//! Durable pipeline state store.
//!
//! SQLite database at `<workspace>/.pipeline_state.db` recording every
//! file, stage transition and chunk. Each public call is one transaction,
//! so the on-disk state after a crash is exactly the last committed call.
//! The orchestrator is the only writer.

use crate::error::{NeuravoxError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One step of the per-recording state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Ingest,
    Segment,
    Encode,
    Transcribe,
    Combine,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Ingest,
        Stage::Segment,
        Stage::Encode,
        Stage::Transcribe,
        Stage::Combine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Segment => "segment",
            Stage::Encode => "encode",
            Stage::Transcribe => "transcribe",
            Stage::Combine => "combine",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    /// Position in the execution order, 0-based.
    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<StageStatus> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "running" => Some(StageStatus::Running),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

/// Overall status of a recording, a function of its stage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<FileStatus> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

/// Row in the `files` table.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_id: String,
    pub original_path: PathBuf,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row in the `stages` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub detail_json: Option<String>,
}

/// Row in the `chunks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_index: usize,
    pub audio_path: PathBuf,
    pub transcript_path: Option<PathBuf>,
    pub start_s: f64,
    pub end_s: f64,
    pub transcribed: bool,
}

/// Overview of the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSummary {
    pub status_counts: BTreeMap<String, usize>,
    pub total_files: usize,
    pub recent: Vec<FileRecord>,
}

/// State store that owns the SQLite connection.
pub struct StateStore {
    conn: Mutex<Connection>,
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| NeuravoxError::State {
            message: format!("bad timestamp '{s}': {e}"),
        })
}

impl StateStore {
    /// Open (creating if needed) the state database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;

        log::info!("state store opened at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                original_path TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL REFERENCES files(file_id),
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error TEXT,
                detail_json TEXT,
                UNIQUE(file_id, stage)
            );
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL REFERENCES files(file_id),
                chunk_index INTEGER NOT NULL,
                audio_path TEXT NOT NULL,
                transcript_path TEXT,
                start_s REAL NOT NULL,
                end_s REAL NOT NULL,
                transcribed INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_id, chunk_index)
            );
            CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);
            CREATE INDEX IF NOT EXISTS idx_stages_file_id ON stages(file_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| NeuravoxError::State {
            message: format!("connection lock poisoned: {e}"),
        })
    }

    /// Idempotent creation of a FileRecord in state `pending`.
    pub fn begin(&self, file_id: &str, original_path: &Path) -> Result<()> {
        let conn = self.lock()?;
        let now = now_str();
        conn.execute(
            "INSERT INTO files (file_id, original_path, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)
             ON CONFLICT(file_id) DO NOTHING",
            params![file_id, original_path.to_string_lossy(), now],
        )?;
        Ok(())
    }

    /// Mark a stage `running`. The recording becomes `processing`.
    pub fn stage_start(&self, file_id: &str, stage: Stage) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_str();
        tx.execute(
            "INSERT INTO stages (file_id, stage, status, started_at, completed_at, error, detail_json)
             VALUES (?1, ?2, 'running', ?3, NULL, NULL, NULL)
             ON CONFLICT(file_id, stage) DO UPDATE SET
                 status = 'running', started_at = ?3,
                 completed_at = NULL, error = NULL",
            params![file_id, stage.as_str(), now],
        )?;
        tx.execute(
            "UPDATE files SET status = 'processing', updated_at = ?2 WHERE file_id = ?1",
            params![file_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Mark a stage `completed`, persisting an optional detail payload.
    pub fn stage_complete(
        &self,
        file_id: &str,
        stage: Stage,
        detail: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_str();
        let detail_json = detail.map(|d| d.to_string());
        tx.execute(
            "UPDATE stages SET status = 'completed', completed_at = ?3, detail_json = ?4
             WHERE file_id = ?1 AND stage = ?2",
            params![file_id, stage.as_str(), now, detail_json],
        )?;
        tx.execute(
            "UPDATE files SET updated_at = ?2 WHERE file_id = ?1",
            params![file_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Mark a stage `failed`. The recording becomes `failed`.
    pub fn stage_fail(&self, file_id: &str, stage: Stage, error: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = now_str();
        tx.execute(
            "UPDATE stages SET status = 'failed', completed_at = ?3, error = ?4
             WHERE file_id = ?1 AND stage = ?2",
            params![file_id, stage.as_str(), now, error],
        )?;
        tx.execute(
            "UPDATE files SET status = 'failed', updated_at = ?2 WHERE file_id = ?1",
            params![file_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Reset a failed stage to `pending` so it can be retried.
    pub fn stage_reset(&self, file_id: &str, stage: Stage) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE stages SET status = 'pending', started_at = NULL,
                 completed_at = NULL, error = NULL
             WHERE file_id = ?1 AND stage = ?2 AND status = 'failed'",
            params![file_id, stage.as_str()],
        )?;
        Ok(())
    }

    /// Mark the recording `completed` after its final stage.
    pub fn mark_completed(&self, file_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET status = 'completed', updated_at = ?2 WHERE file_id = ?1",
            params![file_id, now_str()],
        )?;
        Ok(())
    }

    /// Mark the recording `failed`. Used when a later stage succeeded
    /// after an earlier one failed (a partial run) so the overall status
    /// still reflects the failure.
    pub fn mark_failed(&self, file_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE files SET status = 'failed', updated_at = ?2 WHERE file_id = ?1",
            params![file_id, now_str()],
        )?;
        Ok(())
    }

    /// Insert or update a chunk row. Transcription status is preserved on
    /// update so a re-run does not forget finished chunks.
    pub fn chunk_upsert(
        &self,
        file_id: &str,
        chunk_index: usize,
        audio_path: &Path,
        start_s: f64,
        end_s: f64,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chunks (file_id, chunk_index, audio_path, start_s, end_s, transcribed)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(file_id, chunk_index) DO UPDATE SET
                 audio_path = ?3, start_s = ?4, end_s = ?5",
            params![
                file_id,
                chunk_index as i64,
                audio_path.to_string_lossy(),
                start_s,
                end_s
            ],
        )?;
        Ok(())
    }

    /// Drop all chunk rows for a recording. Used when segmentation is
    /// rerun and may produce a different chunk list.
    pub fn clear_chunks(&self, file_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }

    /// Record a chunk's finished transcript.
    pub fn mark_chunk_transcribed(
        &self,
        file_id: &str,
        chunk_index: usize,
        transcript_path: &Path,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chunks SET transcribed = 1, transcript_path = ?3
             WHERE file_id = ?1 AND chunk_index = ?2",
            params![
                file_id,
                chunk_index as i64,
                transcript_path.to_string_lossy()
            ],
        )?;
        Ok(())
    }

    /// All chunk rows for a recording, ordered by index.
    pub fn chunks(&self, file_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_index, audio_path, transcript_path, start_s, end_s, transcribed
             FROM chunks WHERE file_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            Ok(ChunkRecord {
                chunk_index: row.get::<_, i64>(0)? as usize,
                audio_path: PathBuf::from(row.get::<_, String>(1)?),
                transcript_path: row.get::<_, Option<String>>(2)?.map(PathBuf::from),
                start_s: row.get(3)?,
                end_s: row.get(4)?,
                transcribed: row.get::<_, i64>(5)? != 0,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Indices of chunks not yet marked transcribed, ordered.
    pub fn untranscribed_chunks(&self, file_id: &str) -> Result<Vec<usize>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_index FROM chunks
             WHERE file_id = ?1 AND transcribed = 0 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![file_id], |row| Ok(row.get::<_, i64>(0)? as usize))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Files whose overall status is not `completed`, oldest first.
    pub fn list_resumable(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_id FROM files WHERE status != 'completed' ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Current FileRecord, if the recording is known.
    pub fn file_status(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT file_id, original_path, status, created_at, updated_at
                 FROM files WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        record
            .map(|(file_id, original_path, status, created_at, updated_at)| {
                Ok(FileRecord {
                    file_id,
                    original_path: PathBuf::from(original_path),
                    status: FileStatus::parse(&status).ok_or_else(|| NeuravoxError::State {
                        message: format!("unknown file status '{status}'"),
                    })?,
                    created_at: parse_ts(&created_at)?,
                    updated_at: parse_ts(&updated_at)?,
                })
            })
            .transpose()
    }

    /// Stage records for a recording, in execution order.
    pub fn stage_history(&self, file_id: &str) -> Result<Vec<StageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT stage, status, started_at, completed_at, error, detail_json
             FROM stages WHERE file_id = ?1",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (stage, status, started_at, completed_at, error, detail_json) = row?;
            let stage = Stage::parse(&stage).ok_or_else(|| NeuravoxError::State {
                message: format!("unknown stage '{stage}'"),
            })?;
            let status = StageStatus::parse(&status).ok_or_else(|| NeuravoxError::State {
                message: format!("unknown stage status '{status}'"),
            })?;
            records.push(StageRecord {
                stage,
                status,
                started_at: started_at.as_deref().map(parse_ts).transpose()?,
                completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
                error,
                detail_json,
            });
        }
        records.sort_by_key(|r| r.stage.index());
        Ok(records)
    }

    /// Status of a single stage, if recorded.
    pub fn stage_status(&self, file_id: &str, stage: Stage) -> Result<Option<StageStatus>> {
        let conn = self.lock()?;
        let status = conn
            .query_row(
                "SELECT status FROM stages WHERE file_id = ?1 AND stage = ?2",
                params![file_id, stage.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        status
            .map(|s| {
                StageStatus::parse(&s).ok_or_else(|| NeuravoxError::State {
                    message: format!("unknown stage status '{s}'"),
                })
            })
            .transpose()
    }

    /// Status counts plus the ten most recently touched files.
    pub fn summary(&self) -> Result<StoreSummary> {
        let conn = self.lock()?;
        let mut summary = StoreSummary::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM files GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            summary.total_files += count;
            summary.status_counts.insert(status, count);
        }

        let mut stmt = conn.prepare(
            "SELECT file_id, original_path, status, created_at, updated_at
             FROM files ORDER BY updated_at DESC LIMIT 10",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        for row in rows {
            let (file_id, original_path, status, created_at, updated_at) = row?;
            summary.recent.push(FileRecord {
                file_id,
                original_path: PathBuf::from(original_path),
                status: FileStatus::parse(&status).ok_or_else(|| NeuravoxError::State {
                    message: format!("unknown file status '{status}'"),
                })?,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            });
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Ingest.index(), 0);
        assert_eq!(Stage::Combine.index(), 4);
        assert_eq!(Stage::parse("transcribe"), Some(Stage::Transcribe));
        assert_eq!(Stage::parse("nope"), None);
    }

    #[test]
    fn test_begin_is_idempotent() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store.begin("f1", Path::new("/a.mp3")).unwrap();

        let record = store.file_status("f1").unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Pending);
        assert_eq!(record.original_path, PathBuf::from("/a.mp3"));
    }

    #[test]
    fn test_file_status_unknown_file() {
        let store = store();
        assert!(store.file_status("missing").unwrap().is_none());
    }

    #[test]
    fn test_stage_lifecycle() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();

        store.stage_start("f1", Stage::Ingest).unwrap();
        assert_eq!(
            store.file_status("f1").unwrap().unwrap().status,
            FileStatus::Processing
        );
        assert_eq!(
            store.stage_status("f1", Stage::Ingest).unwrap(),
            Some(StageStatus::Running)
        );

        let detail = serde_json::json!({"duration_s": 60.0});
        store
            .stage_complete("f1", Stage::Ingest, Some(&detail))
            .unwrap();
        assert_eq!(
            store.stage_status("f1", Stage::Ingest).unwrap(),
            Some(StageStatus::Completed)
        );

        let history = store.stage_history("f1").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].started_at.is_some());
        assert!(history[0].completed_at.is_some());
        assert!(history[0].detail_json.as_ref().unwrap().contains("60"));
    }

    #[test]
    fn test_stage_fail_and_reset() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store.stage_start("f1", Stage::Transcribe).unwrap();
        store
            .stage_fail("f1", Stage::Transcribe, "backend unavailable")
            .unwrap();

        assert_eq!(
            store.file_status("f1").unwrap().unwrap().status,
            FileStatus::Failed
        );
        let history = store.stage_history("f1").unwrap();
        assert_eq!(history[0].status, StageStatus::Failed);
        assert_eq!(history[0].error.as_deref(), Some("backend unavailable"));

        store.stage_reset("f1", Stage::Transcribe).unwrap();
        assert_eq!(
            store.stage_status("f1", Stage::Transcribe).unwrap(),
            Some(StageStatus::Pending)
        );
    }

    #[test]
    fn test_stage_reset_only_touches_failed() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store.stage_start("f1", Stage::Ingest).unwrap();
        store.stage_complete("f1", Stage::Ingest, None).unwrap();

        store.stage_reset("f1", Stage::Ingest).unwrap();
        assert_eq!(
            store.stage_status("f1", Stage::Ingest).unwrap(),
            Some(StageStatus::Completed)
        );
    }

    #[test]
    fn test_stage_restart_clears_previous_error() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store.stage_start("f1", Stage::Segment).unwrap();
        store.stage_fail("f1", Stage::Segment, "boom").unwrap();
        store.stage_start("f1", Stage::Segment).unwrap();

        let history = store.stage_history("f1").unwrap();
        assert_eq!(history[0].status, StageStatus::Running);
        assert!(history[0].error.is_none());
        assert!(history[0].completed_at.is_none());
    }

    #[test]
    fn test_stage_history_is_in_execution_order() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        // Insert out of order
        store.stage_start("f1", Stage::Combine).unwrap();
        store.stage_start("f1", Stage::Ingest).unwrap();
        store.stage_start("f1", Stage::Encode).unwrap();

        let history = store.stage_history("f1").unwrap();
        let stages: Vec<Stage> = history.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::Ingest, Stage::Encode, Stage::Combine]);
    }

    #[test]
    fn test_chunk_upsert_and_transcribed() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store
            .chunk_upsert("f1", 0, Path::new("/ws/chunk_000.flac"), 0.0, 55.0)
            .unwrap();
        store
            .chunk_upsert("f1", 1, Path::new("/ws/chunk_001.flac"), 55.0, 143.0)
            .unwrap();

        assert_eq!(store.untranscribed_chunks("f1").unwrap(), vec![0, 1]);

        store
            .mark_chunk_transcribed("f1", 0, Path::new("/ws/chunk_000.txt"))
            .unwrap();
        assert_eq!(store.untranscribed_chunks("f1").unwrap(), vec![1]);

        let chunks = store.chunks("f1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].transcribed);
        assert_eq!(
            chunks[0].transcript_path.as_deref(),
            Some(Path::new("/ws/chunk_000.txt"))
        );
        assert!(!chunks[1].transcribed);
    }

    #[test]
    fn test_chunk_upsert_preserves_transcribed_flag() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store
            .chunk_upsert("f1", 0, Path::new("/ws/chunk_000.flac"), 0.0, 55.0)
            .unwrap();
        store
            .mark_chunk_transcribed("f1", 0, Path::new("/ws/chunk_000.txt"))
            .unwrap();

        // Re-upsert (e.g. a resume re-running encode) keeps the flag.
        store
            .chunk_upsert("f1", 0, Path::new("/ws/chunk_000.flac"), 0.0, 55.0)
            .unwrap();
        assert!(store.untranscribed_chunks("f1").unwrap().is_empty());
    }

    #[test]
    fn test_clear_chunks() {
        let store = store();
        store.begin("f1", Path::new("/a.mp3")).unwrap();
        store
            .chunk_upsert("f1", 0, Path::new("/ws/chunk_000.flac"), 0.0, 55.0)
            .unwrap();
        store.clear_chunks("f1").unwrap();
        assert!(store.chunks("f1").unwrap().is_empty());
    }

    #[test]
    fn test_list_resumable() {
        let store = store();
        store.begin("done", Path::new("/done.mp3")).unwrap();
        store.mark_completed("done").unwrap();

        store.begin("failed", Path::new("/failed.mp3")).unwrap();
        store.stage_start("failed", Stage::Ingest).unwrap();
        store.stage_fail("failed", Stage::Ingest, "bad file").unwrap();

        store.begin("stuck", Path::new("/stuck.mp3")).unwrap();
        store.stage_start("stuck", Stage::Transcribe).unwrap();

        let resumable = store.list_resumable().unwrap();
        assert!(resumable.contains(&"failed".to_string()));
        assert!(resumable.contains(&"stuck".to_string()));
        assert!(!resumable.contains(&"done".to_string()));
    }

    #[test]
    fn test_summary() {
        let store = store();
        store.begin("a", Path::new("/a.mp3")).unwrap();
        store.begin("b", Path::new("/b.mp3")).unwrap();
        store.mark_completed("b").unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.status_counts.get("pending"), Some(&1));
        assert_eq!(summary.status_counts.get("completed"), Some(&1));
        assert_eq!(summary.recent.len(), 2);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".pipeline_state.db");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.begin("f1", Path::new("/a.mp3")).unwrap();
            store.stage_start("f1", Stage::Ingest).unwrap();
            store.stage_complete("f1", Stage::Ingest, None).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(
            store.stage_status("f1", Stage::Ingest).unwrap(),
            Some(StageStatus::Completed)
        );
    }
}

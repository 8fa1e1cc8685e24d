//! Durable pipeline state: stable input identity and per-step cache records.
//!
//! One SQLite table backs everything:
//!
//! ```text
//! tasks(id, input_data, input_type, step_name, output_path, status)
//!       UNIQUE (input_data, input_type, step_name)
//! ```
//!
//! Each `(input_data, input_type)` pair owns a pseudo-step row named `Init`
//! whose `id` is the stable integer identity for that input — the join key
//! for every scratch artifact on disk. The `Init` row doubles as the
//! run-status record (`pending` → `success`|`failed`). Real step rows carry
//! the cached output path for skip-if-cached.
//!
//! Rows are upserted with replace semantics: only the latest state is kept,
//! never history. Every mutation commits immediately so state survives a
//! crash mid-run — that is what makes resume possible.
//!
//! ## Schema self-repair
//!
//! On open, the column set and the status CHECK constraint are compared
//! against what this build expects. A mismatch drops and recreates the
//! table. This is a deliberate best-effort forward migration, not a
//! migration framework: the table only caches recomputable state, so losing
//! it costs API credits, not data.

use crate::config::InputType;
use crate::error::Talk2PdfError;
use crate::step::StepName;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Step name of the run-status pseudo-step.
const INIT_STEP: &str = "Init";

/// The exact CHECK constraint the current schema must carry. Checked
/// verbatim against `sqlite_master`; older databases without `pending`
/// in the set are recreated.
const STATUS_CHECK: &str = "CHECK(status IN ('pending', 'success', 'failed'))";

const CREATE_TASKS: &str = "
    CREATE TABLE tasks (
        id INTEGER,
        input_data TEXT NOT NULL,
        input_type TEXT NOT NULL,
        step_name TEXT NOT NULL,
        output_path TEXT,
        status TEXT NOT NULL CHECK(status IN ('pending', 'success', 'failed')),
        UNIQUE (input_data, input_type, step_name)
    )";

/// Status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the `tasks` table, as seen by callers.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub output_path: Option<PathBuf>,
    pub status: TaskStatus,
}

/// Handle to the pipeline state database.
///
/// A single shared connection behind a mutex; every mutation commits
/// immediately. In-process callers are serialised by the mutex, and the
/// UNIQUE constraint guards id allocation against a second process —
/// though concurrent runs on the same input remain a caller responsibility.
pub struct StateStore {
    conn: Mutex<Connection>,
    /// Append-only failure log, written next to the database file.
    error_log: PathBuf,
}

impl StateStore {
    /// Open (or create) the state database at `db_path`.
    ///
    /// Creates parent directories as needed and runs the schema self-repair
    /// check described in the module docs.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, Talk2PdfError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Talk2PdfError::io(parent, e))?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        migrate(&conn)?;

        let error_log = db_path
            .parent()
            .map(|p| p.join("errors.log"))
            .unwrap_or_else(|| PathBuf::from("errors.log"));

        Ok(Self {
            conn: Mutex::new(conn),
            error_log,
        })
    }

    /// In-memory store for tests.
    #[doc(hidden)]
    pub fn in_memory() -> Result<Self, Talk2PdfError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            error_log: PathBuf::from("errors.log"),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the stable id for `(input_data, input_type)`, allocating one
    /// on first sight.
    ///
    /// An existing `Init` record keeps its id forever — even across
    /// failures — and has its status reset to `pending` for the new run.
    /// A fresh input gets an `Init` row whose rowid becomes its id.
    pub fn get_or_create_id(
        &self,
        input_data: &str,
        input_type: InputType,
    ) -> Result<i64, Talk2PdfError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM tasks
                 WHERE input_data = ?1 AND input_type = ?2 AND step_name = ?3",
                params![input_data, input_type.as_str(), INIT_STEP],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE tasks SET status = 'pending'
                     WHERE input_data = ?1 AND input_type = ?2 AND step_name = ?3",
                    params![input_data, input_type.as_str(), INIT_STEP],
                )?;
                debug!("Reusing id {id} for {input_data}");
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO tasks (id, input_data, input_type, step_name, output_path, status)
                     VALUES (NULL, ?1, ?2, ?3, NULL, 'pending')",
                    params![input_data, input_type.as_str(), INIT_STEP],
                )?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "UPDATE tasks SET id = ?1 WHERE rowid = ?1",
                    params![rowid],
                )?;
                debug!("Assigned new id {rowid} for {input_data}");
                rowid
            }
        };

        tx.commit()?;
        Ok(id)
    }

    /// Return the cached output path for a step, if it is still valid.
    ///
    /// Valid means the record exists with `success` status AND the file is
    /// still on disk. A recorded path whose artifact was deleted out-of-band
    /// is treated as absent, forcing recomputation rather than handing a
    /// dead reference to the next step.
    pub fn cached_output(
        &self,
        input_data: &str,
        input_type: InputType,
        id: i64,
        step: StepName,
    ) -> Result<Option<PathBuf>, Talk2PdfError> {
        let path: Option<String> = self
            .conn()
            .query_row(
                "SELECT output_path FROM tasks
                 WHERE input_data = ?1 AND input_type = ?2 AND id = ?3
                   AND step_name = ?4 AND status = 'success'",
                params![input_data, input_type.as_str(), id, step.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        match path {
            Some(p) => {
                let p = PathBuf::from(p);
                if p.exists() {
                    Ok(Some(p))
                } else {
                    warn!("Cached {step} output {} is gone, will recompute", p.display());
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Upsert a `success` record with the step's output path.
    pub fn record_success(
        &self,
        input_data: &str,
        input_type: InputType,
        id: i64,
        step: StepName,
        output_path: &Path,
    ) -> Result<(), Talk2PdfError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO tasks (id, input_data, input_type, step_name, output_path, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'success')",
            params![
                id,
                input_data,
                input_type.as_str(),
                step.as_str(),
                output_path.to_string_lossy().into_owned()
            ],
        )?;
        debug!(
            "Recorded {step} output for {input_data} (id {id:03}) at {}",
            output_path.display()
        );
        Ok(())
    }

    /// Upsert a `failed` record (output cleared) and append to `errors.log`.
    ///
    /// The log write is best-effort: a failure to log must never mask the
    /// step error being recorded.
    pub fn record_failure(
        &self,
        input_data: &str,
        input_type: InputType,
        id: i64,
        step: StepName,
        message: &str,
    ) -> Result<(), Talk2PdfError> {
        let line = format!("{input_data} (id {id:03}): {step} failed: {message}");
        error!("{line}");
        if let Err(e) = append_line(&self.error_log, &line) {
            warn!("Could not append to {}: {e}", self.error_log.display());
        }

        self.conn().execute(
            "INSERT OR REPLACE INTO tasks (id, input_data, input_type, step_name, output_path, status)
             VALUES (?1, ?2, ?3, ?4, NULL, 'failed')",
            params![id, input_data, input_type.as_str(), step.as_str()],
        )?;
        Ok(())
    }

    /// Mark the run's `Init` record `failed`, clearing its output.
    pub fn record_run_failure(
        &self,
        input_data: &str,
        input_type: InputType,
    ) -> Result<(), Talk2PdfError> {
        self.conn().execute(
            "UPDATE tasks SET status = 'failed', output_path = NULL
             WHERE input_data = ?1 AND input_type = ?2 AND step_name = ?3",
            params![input_data, input_type.as_str(), INIT_STEP],
        )?;
        Ok(())
    }

    /// Record the terminal step's output and flip `Init` to `success`.
    pub fn record_run_success(
        &self,
        input_data: &str,
        input_type: InputType,
        id: i64,
        final_output: &Path,
    ) -> Result<(), Talk2PdfError> {
        self.record_success(input_data, input_type, id, StepName::Pdf, final_output)?;
        self.conn().execute(
            "UPDATE tasks SET status = 'success', output_path = ?4
             WHERE input_data = ?1 AND input_type = ?2 AND step_name = ?3",
            params![
                input_data,
                input_type.as_str(),
                INIT_STEP,
                final_output.to_string_lossy().into_owned()
            ],
        )?;
        debug!("Recorded run success for {input_data} (id {id:03})");
        Ok(())
    }

    /// Look up the final PDF for an input, with the same staleness guard as
    /// [`StateStore::cached_output`].
    pub fn final_output(
        &self,
        input_data: &str,
        input_type: InputType,
        id: i64,
    ) -> Result<Option<PathBuf>, Talk2PdfError> {
        self.cached_output(input_data, input_type, id, StepName::Pdf)
    }

    /// Fetch one task record by its unique key. `step` is a raw name so the
    /// `Init` pseudo-step is addressable too.
    pub fn task(
        &self,
        input_data: &str,
        input_type: InputType,
        step: &str,
    ) -> Result<Option<TaskRecord>, Talk2PdfError> {
        let row: Option<(Option<String>, String)> = self
            .conn()
            .query_row(
                "SELECT output_path, status FROM tasks
                 WHERE input_data = ?1 AND input_type = ?2 AND step_name = ?3",
                params![input_data, input_type.as_str(), step],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(path, status)| {
            TaskStatus::parse(&status).map(|status| TaskRecord {
                output_path: path.map(PathBuf::from),
                status,
            })
        }))
    }
}

/// Create the `tasks` table, or drop and recreate it when the persisted
/// schema does not match this build.
fn migrate(conn: &Connection) -> Result<(), Talk2PdfError> {
    let table_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'tasks'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let Some(table_sql) = table_sql else {
        conn.execute(CREATE_TASKS, [])?;
        debug!("Created tasks table");
        return Ok(());
    };

    let mut stmt = conn.prepare("PRAGMA table_info(tasks)")?;
    let columns: HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let required = ["id", "input_data", "input_type", "step_name", "output_path", "status"];
    let columns_ok = required.iter().all(|c| columns.contains(*c));

    if !columns_ok || !table_sql.contains(STATUS_CHECK) {
        warn!("tasks table schema is outdated, recreating (cached state is lost)");
        conn.execute("DROP TABLE tasks", [])?;
        conn.execute(CREATE_TASKS, [])?;
    } else {
        debug!("tasks table schema is up to date");
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(f, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::in_memory().unwrap()
    }

    #[test]
    fn id_is_stable_across_calls() {
        let s = store();
        let a = s.get_or_create_id("lecture.txt", InputType::TextFile).unwrap();
        let b = s.get_or_create_id("lecture.txt", InputType::TextFile).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_get_distinct_ids() {
        let s = store();
        let a = s.get_or_create_id("one.txt", InputType::TextFile).unwrap();
        let b = s.get_or_create_id("two.txt", InputType::TextFile).unwrap();
        let c = s.get_or_create_id("one.txt", InputType::VideoFile).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c, "same data with a different type is a different input");
    }

    #[test]
    fn id_survives_failure() {
        let s = store();
        let id = s.get_or_create_id("x", InputType::TextFile).unwrap();
        s.record_failure("x", InputType::TextFile, id, StepName::Notes, "boom")
            .unwrap();
        s.record_run_failure("x", InputType::TextFile).unwrap();
        assert_eq!(s.get_or_create_id("x", InputType::TextFile).unwrap(), id);
    }

    #[test]
    fn reusing_an_id_resets_init_to_pending() {
        let s = store();
        let id = s.get_or_create_id("x", InputType::TextFile).unwrap();
        s.record_run_failure("x", InputType::TextFile).unwrap();
        assert_eq!(s.get_or_create_id("x", InputType::TextFile).unwrap(), id);
        let init = s.task("x", InputType::TextFile, "Init").unwrap().unwrap();
        assert_eq!(init.status, TaskStatus::Pending);
    }

    #[test]
    fn cached_output_requires_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let id = s.get_or_create_id("x", InputType::TextFile).unwrap();

        let gone = dir.path().join("001_notes.md");
        s.record_success("x", InputType::TextFile, id, StepName::Notes, &gone)
            .unwrap();
        assert!(
            s.cached_output("x", InputType::TextFile, id, StepName::Notes)
                .unwrap()
                .is_none(),
            "dangling reference must be treated as absent"
        );

        std::fs::write(&gone, "# notes").unwrap();
        assert_eq!(
            s.cached_output("x", InputType::TextFile, id, StepName::Notes)
                .unwrap(),
            Some(gone)
        );
    }

    #[test]
    fn failure_clears_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let id = s.get_or_create_id("x", InputType::TextFile).unwrap();
        let p = dir.path().join("001_notes.md");
        std::fs::write(&p, "# notes").unwrap();

        s.record_success("x", InputType::TextFile, id, StepName::Notes, &p)
            .unwrap();
        s.record_failure("x", InputType::TextFile, id, StepName::Notes, "boom")
            .unwrap();

        let rec = s.task("x", InputType::TextFile, "Notes").unwrap().unwrap();
        assert_eq!(rec.status, TaskStatus::Failed);
        assert!(rec.output_path.is_none(), "replace semantics must clear the path");
    }

    #[test]
    fn run_success_flips_init_with_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let id = s.get_or_create_id("x", InputType::TextFile).unwrap();
        let pdf = dir.path().join("x_notes.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();

        s.record_run_success("x", InputType::TextFile, id, &pdf).unwrap();

        let init = s.task("x", InputType::TextFile, "Init").unwrap().unwrap();
        assert_eq!(init.status, TaskStatus::Success);
        assert_eq!(init.output_path, Some(pdf.clone()));
        assert_eq!(
            s.final_output("x", InputType::TextFile, id).unwrap(),
            Some(pdf)
        );
    }

    #[test]
    fn id_survives_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");

        let first = {
            let s = StateStore::open(&db).unwrap();
            s.get_or_create_id("lecture.txt", InputType::TextFile).unwrap()
        };
        let second = {
            let s = StateStore::open(&db).unwrap();
            s.get_or_create_id("lecture.txt", InputType::TextFile).unwrap()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn outdated_schema_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute(
                "CREATE TABLE tasks (id INTEGER PRIMARY KEY, input_data TEXT, status TEXT)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO tasks (input_data, status) VALUES ('old', 'done')",
                [],
            )
            .unwrap();
        }

        let s = StateStore::open(&db).unwrap();
        // Old rows are gone, and the store works normally.
        assert!(s.task("old", InputType::TextFile, "Init").unwrap().is_none());
        let id = s.get_or_create_id("new", InputType::TextFile).unwrap();
        assert!(id > 0);
    }

    #[test]
    fn missing_check_constraint_triggers_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tasks.db");
        {
            let conn = Connection::open(&db).unwrap();
            // Right columns, but a stale constraint without 'pending'.
            conn.execute(
                "CREATE TABLE tasks (
                    id INTEGER,
                    input_data TEXT,
                    input_type TEXT,
                    step_name TEXT,
                    output_path TEXT,
                    status TEXT CHECK(status IN ('success', 'failed')),
                    UNIQUE (input_data, input_type, step_name)
                )",
                [],
            )
            .unwrap();
        }

        let s = StateStore::open(&db).unwrap();
        // 'pending' inserts only work against the recreated schema.
        s.get_or_create_id("x", InputType::TextFile).unwrap();
    }
}

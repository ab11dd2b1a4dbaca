//! Durable task storage.

use super::{
    TaskError,
    model::{Task, TaskStatus},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use std::path::Path;
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Persistence for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a `processing` task or reset the existing one for `(file_path, user_email)`.
    async fn upsert_processing(
        &self,
        file_name: &str,
        file_path: &str,
        user_email: &str,
        now: OffsetDateTime,
    ) -> Result<Task, TaskError>;

    /// Move a `processing` task to a terminal state. Returns `false` when the task was not
    /// in `processing` (or does not exist) and nothing changed.
    async fn finish(
        &self,
        task_id: i64,
        status: TaskStatus,
        error_message: Option<String>,
        additional_info: Option<String>,
        now: OffsetDateTime,
    ) -> Result<bool, TaskError>;

    /// Stamp `started_at` on a `processing` task as a worker begins executing it. Returns
    /// `None` when the task is missing or not in `processing`.
    async fn start(&self, task_id: i64, now: OffsetDateTime) -> Result<Option<Task>, TaskError>;

    /// Fetch one task.
    async fn get(&self, task_id: i64) -> Result<Option<Task>, TaskError>;

    /// Every task uploaded by `user_email`, newest first.
    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Task>, TaskError>;

    /// Every task still in `processing`.
    async fn list_processing(&self) -> Result<Vec<Task>, TaskError>;
}

/// SQLite-backed [`TaskStore`].
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

const TASK_COLUMNS: &str = "task_id, status, file_name, file_path, user_email, error_message, \
     additional_info, created_at, updated_at, completed_at, started_at";

impl SqliteTaskStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Self::with_connection(conn)
    }

    /// Fresh in-memory database.
    pub fn in_memory() -> Result<Self, TaskError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TaskError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                user_email TEXT NOT NULL,
                error_message TEXT,
                additional_info TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                started_at TEXT,
                UNIQUE (file_path, user_email)
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user_email ON tasks(user_email);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);",
        )?;
        add_missing_column(&conn, "started_at", "TEXT")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, operation: F) -> Result<T, TaskError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            operation(&guard)
        })
        .await
        .map_err(|err| TaskError::Database(err.to_string()))?
        .map_err(TaskError::from)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn upsert_processing(
        &self,
        file_name: &str,
        file_path: &str,
        user_email: &str,
        now: OffsetDateTime,
    ) -> Result<Task, TaskError> {
        let (file_name, file_path, user_email) = (
            file_name.to_string(),
            file_path.to_string(),
            user_email.to_string(),
        );
        let now = format_timestamp(now)?;
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO tasks (status, file_name, file_path, user_email, created_at, updated_at)
                     VALUES ('processing', ?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT (file_path, user_email) DO UPDATE SET
                        status = 'processing',
                        file_name = excluded.file_name,
                        error_message = NULL,
                        additional_info = NULL,
                        completed_at = NULL,
                        started_at = NULL,
                        updated_at = excluded.updated_at
                     RETURNING {TASK_COLUMNS}"
                ),
                params![file_name, file_path, user_email, now],
                row_to_task,
            )
        })
        .await
    }

    async fn finish(
        &self,
        task_id: i64,
        status: TaskStatus,
        error_message: Option<String>,
        additional_info: Option<String>,
        now: OffsetDateTime,
    ) -> Result<bool, TaskError> {
        let now = format_timestamp(now)?;
        let changed = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE tasks
                     SET status = ?2, error_message = ?3, additional_info = ?4,
                         completed_at = ?5, updated_at = ?5
                     WHERE task_id = ?1 AND status = 'processing'",
                    params![task_id, status.as_str(), error_message, additional_info, now],
                )
            })
            .await?;
        Ok(changed == 1)
    }

    async fn start(&self, task_id: i64, now: OffsetDateTime) -> Result<Option<Task>, TaskError> {
        let now = format_timestamp(now)?;
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE tasks SET started_at = ?2, updated_at = ?2
                     WHERE task_id = ?1 AND status = 'processing'
                     RETURNING {TASK_COLUMNS}"
                ),
                params![task_id, now],
                row_to_task,
            )
            .optional()
        })
        .await
    }

    async fn get(&self, task_id: i64) -> Result<Option<Task>, TaskError> {
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                params![task_id],
                row_to_task,
            )
            .optional()
        })
        .await
    }

    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Task>, TaskError> {
        let user_email = user_email.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE user_email = ?1 ORDER BY task_id DESC"
            ))?;
            let rows = stmt.query_map(params![user_email], row_to_task)?;
            rows.collect()
        })
        .await
    }

    async fn list_processing(&self) -> Result<Vec<Task>, TaskError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'processing' ORDER BY task_id"
            ))?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect()
        })
        .await
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(1)?;
    Ok(Task {
        task_id: row.get(0)?,
        status: status.parse().map_err(|err: String| conversion_error(1, err))?,
        file_name: row.get(2)?,
        file_path: row.get(3)?,
        user_email: row.get(4)?,
        error_message: row.get(5)?,
        additional_info: row.get(6)?,
        created_at: parse_timestamp(7, row.get(7)?)?,
        updated_at: parse_timestamp(8, row.get(8)?)?,
        completed_at: row
            .get::<_, Option<String>>(9)?
            .map(|value| parse_timestamp(9, value))
            .transpose()?,
        started_at: row
            .get::<_, Option<String>>(10)?
            .map(|value| parse_timestamp(10, value))
            .transpose()?,
    })
}

/// Databases created before a column existed get it added in place.
fn add_missing_column(conn: &Connection, column: &str, definition: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('tasks')")?;
    let present = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|name| name == column);
    if !present {
        conn.execute_batch(&format!("ALTER TABLE tasks ADD COLUMN {column} {definition}"))?;
    }
    Ok(())
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::parse(&value, &Rfc3339).map_err(|err| conversion_error(idx, err.to_string()))
}

fn format_timestamp(value: OffsetDateTime) -> Result<String, TaskError> {
    value
        .format(&Rfc3339)
        .map_err(|err| TaskError::Database(err.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

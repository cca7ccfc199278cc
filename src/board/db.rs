use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::errors::{BoardError, OrderingError};
use crate::ordering::{self, DropTarget};

/// Columns every new project starts with, in board order.
pub const DEFAULT_COLUMNS: [&str; 3] = ["To Do", "In Progress", "Done"];

const COLUMN_FIELDS: &str = "id, project_id, name, order_index, created_at, updated_at";
const TASK_FIELDS: &str = "id, project_id, column_id, title, description, priority, due_date, order_index, created_at, updated_at";
const SUBTASK_FIELDS: &str = "id, task_id, title, done, order_index, created_at, updated_at";
const PAGE_FIELDS: &str = "id, project_id, title, content, order_index, created_at, updated_at";

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| BoardError::LockPoisoned.into())
    }
}

/// Tables whose rows carry an `order_index` within a parent group.
#[derive(Debug, Clone, Copy)]
enum OrderedTable {
    Columns,
    Tasks,
    Subtasks,
    Pages,
}

impl OrderedTable {
    fn name(self) -> &'static str {
        match self {
            Self::Columns => "status_columns",
            Self::Tasks => "tasks",
            Self::Subtasks => "subtasks",
            Self::Pages => "pages",
        }
    }

    fn group_column(self) -> &'static str {
        match self {
            Self::Columns | Self::Pages => "project_id",
            Self::Tasks => "column_id",
            Self::Subtasks => "task_id",
        }
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS status_columns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    order_index REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    column_id INTEGER NOT NULL REFERENCES status_columns(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    due_date TEXT,
                    order_index REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS subtasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    done INTEGER NOT NULL DEFAULT 0,
                    order_index REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS pages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '',
                    order_index REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_columns_project ON status_columns(project_id, order_index);
                CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(column_id, order_index);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id, order_index);
                CREATE INDEX IF NOT EXISTS idx_pages_project ON pages(project_id, order_index);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Create a project together with its default status columns.
    pub fn create_project(&self, name: &str) -> Result<Project> {
        require_text("name", name)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("INSERT INTO projects (name) VALUES (?1)", params![name])
            .context("Failed to insert project")?;
        let id = tx.last_insert_rowid();
        for (pos, column) in DEFAULT_COLUMNS.iter().enumerate() {
            tx.execute(
                "INSERT INTO status_columns (project_id, name, order_index) VALUES (?1, ?2, ?3)",
                params![id, column, pos as f64],
            )
            .context("Failed to insert default column")?;
        }
        tx.commit().context("Failed to commit project")?;
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM projects ORDER BY id")
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], project_from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()
            .context("Failed to query project")
    }

    fn require_project(&self, id: i64) -> Result<Project> {
        Ok(self
            .get_project(id)?
            .ok_or(BoardError::ProjectNotFound { id })?)
    }

    // ── Status columns ────────────────────────────────────────────────

    pub fn create_column(&self, project_id: i64, name: &str) -> Result<StatusColumn> {
        require_text("name", name)?;
        self.require_project(project_id)?;
        let order_index = ordering::next_index(self.last_index(OrderedTable::Columns, project_id)?);
        self.conn
            .execute(
                "INSERT INTO status_columns (project_id, name, order_index) VALUES (?1, ?2, ?3)",
                params![project_id, name, order_index],
            )
            .context("Failed to insert column")?;
        let id = self.conn.last_insert_rowid();
        self.get_column(id)?.context("Column not found after insert")
    }

    pub fn get_column(&self, id: i64) -> Result<Option<StatusColumn>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM status_columns WHERE id = ?1", COLUMN_FIELDS),
                params![id],
                column_from_row,
            )
            .optional()
            .context("Failed to query column")
    }

    pub fn list_columns(&self, project_id: i64) -> Result<Vec<StatusColumn>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM status_columns WHERE project_id = ?1 ORDER BY order_index, id",
                COLUMN_FIELDS
            ))
            .context("Failed to prepare list_columns")?;
        let rows = stmt
            .query_map(params![project_id], column_from_row)
            .context("Failed to query columns")?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.context("Failed to read column row")?);
        }
        Ok(columns)
    }

    pub fn update_column(&self, id: i64, patch: &ColumnPatch) -> Result<StatusColumn> {
        self.get_column(id)?.ok_or(BoardError::ColumnNotFound { id })?;
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE status_columns SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to update column name")?;
        }
        if let Some(order_index) = patch.order_index {
            tx.execute(
                "UPDATE status_columns SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![order_index, id],
            )
            .context("Failed to update column order")?;
        }
        tx.commit().context("Failed to commit column update")?;
        self.get_column(id)?.context("Column not found after update")
    }

    /// Delete a column and, through the foreign key, every task in it.
    pub fn delete_column(&self, id: i64) -> Result<Option<StatusColumn>> {
        let Some(column) = self.get_column(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM status_columns WHERE id = ?1", params![id])
            .context("Failed to delete column")?;
        Ok(Some(column))
    }

    pub fn move_column(&self, id: i64, target: DropTarget) -> Result<MoveOutcome<StatusColumn>> {
        let column = self.get_column(id)?.ok_or(BoardError::ColumnNotFound { id })?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let (order_index, renumbered) =
            self.position_in(OrderedTable::Columns, id, column.project_id, target)?;
        tx.execute(
            "UPDATE status_columns SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![order_index, id],
        )
        .context("Failed to move column")?;
        tx.commit().context("Failed to commit column move")?;

        Ok(MoveOutcome {
            item: self.get_column(id)?.context("Column not found after move")?,
            from_group: column.project_id,
            renumbered: self.load_all(&renumbered, Self::get_column)?,
        })
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Create a task at the end of its column.
    pub fn create_task(&self, column_id: i64, title: &str, description: &str) -> Result<Task> {
        require_text("title", title)?;
        let column = self
            .get_column(column_id)?
            .ok_or(BoardError::ColumnNotFound { id: column_id })?;
        let order_index = ordering::next_index(self.last_index(OrderedTable::Tasks, column_id)?);
        self.conn
            .execute(
                "INSERT INTO tasks (project_id, column_id, title, description, order_index) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![column.project_id, column_id, title, description, order_index],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_FIELDS),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY order_index, id",
                TASK_FIELDS
            ),
            project_id,
        )
    }

    pub fn list_column_tasks(&self, column_id: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM tasks WHERE column_id = ?1 ORDER BY order_index, id",
                TASK_FIELDS
            ),
            column_id,
        )
    }

    fn query_tasks(&self, sql: &str, key: i64) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare task query")?;
        let rows = stmt
            .query_map(params![key], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    /// Apply a partial update. Column and order changes land in the same
    /// transaction as the field edits, so a cross-column move is atomic.
    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Task> {
        let task = self.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }
        if let Some(column_id) = patch.column_id {
            self.require_sibling_column(&task, column_id)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(t) = &patch.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![t, id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(d) = &patch.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![d, id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(p) = patch.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![p.as_str(), id],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(due) = &patch.due_date {
            tx.execute(
                "UPDATE tasks SET due_date = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![due.map(|d| d.to_string()), id],
            )
            .context("Failed to update task due date")?;
        }
        if patch.column_id.is_some() || patch.order_index.is_some() {
            let column_id = patch.column_id.unwrap_or(task.column_id);
            let order_index = match patch.order_index {
                Some(idx) => idx,
                None if column_id == task.column_id => task.order_index,
                None => ordering::next_index(self.last_index(OrderedTable::Tasks, column_id)?),
            };
            tx.execute(
                "UPDATE tasks SET column_id = ?1, order_index = ?2, updated_at = datetime('now') WHERE id = ?3",
                params![column_id, order_index, id],
            )
            .context("Failed to update task position")?;
        }

        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)?.context("Task not found after update")
    }

    /// Move a task to `target` within `column_id` (which may be its current
    /// column). Writes one row unless the destination had to be renumbered.
    pub fn move_task(
        &self,
        id: i64,
        column_id: i64,
        target: DropTarget,
    ) -> Result<MoveOutcome<Task>> {
        let task = self.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
        self.require_sibling_column(&task, column_id)?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let (order_index, renumbered) =
            self.position_in(OrderedTable::Tasks, id, column_id, target)?;
        tx.execute(
            "UPDATE tasks SET column_id = ?1, order_index = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![column_id, order_index, id],
        )
        .context("Failed to move task")?;
        tx.commit().context("Failed to commit task move")?;

        Ok(MoveOutcome {
            item: self.get_task(id)?.context("Task not found after move")?,
            from_group: task.column_id,
            renumbered: self.load_all(&renumbered, Self::get_task)?,
        })
    }

    pub fn delete_task(&self, id: i64) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(Some(task))
    }

    fn require_sibling_column(&self, task: &Task, column_id: i64) -> Result<()> {
        let column = self
            .get_column(column_id)?
            .ok_or(BoardError::ColumnNotFound { id: column_id })?;
        if column.project_id != task.project_id {
            return Err(BoardError::BadRequest(format!(
                "Column {} belongs to a different project than task {}",
                column_id, task.id
            ))
            .into());
        }
        Ok(())
    }

    // ── Subtasks ──────────────────────────────────────────────────────

    pub fn create_subtask(&self, task_id: i64, title: &str) -> Result<Subtask> {
        require_text("title", title)?;
        self.get_task(task_id)?
            .ok_or(BoardError::TaskNotFound { id: task_id })?;
        let order_index = ordering::next_index(self.last_index(OrderedTable::Subtasks, task_id)?);
        self.conn
            .execute(
                "INSERT INTO subtasks (task_id, title, order_index) VALUES (?1, ?2, ?3)",
                params![task_id, title, order_index],
            )
            .context("Failed to insert subtask")?;
        let id = self.conn.last_insert_rowid();
        self.get_subtask(id)?.context("Subtask not found after insert")
    }

    pub fn get_subtask(&self, id: i64) -> Result<Option<Subtask>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM subtasks WHERE id = ?1", SUBTASK_FIELDS),
                params![id],
                subtask_from_row,
            )
            .optional()
            .context("Failed to query subtask")
    }

    pub fn list_subtasks(&self, task_id: i64) -> Result<Vec<Subtask>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM subtasks WHERE task_id = ?1 ORDER BY order_index, id",
                SUBTASK_FIELDS
            ))
            .context("Failed to prepare list_subtasks")?;
        let rows = stmt
            .query_map(params![task_id], subtask_from_row)
            .context("Failed to query subtasks")?;
        let mut subtasks = Vec::new();
        for row in rows {
            subtasks.push(row.context("Failed to read subtask row")?);
        }
        Ok(subtasks)
    }

    pub fn update_subtask(&self, id: i64, patch: &SubtaskPatch) -> Result<Subtask> {
        self.get_subtask(id)?
            .ok_or(BoardError::SubtaskNotFound { id })?;
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(t) = &patch.title {
            tx.execute(
                "UPDATE subtasks SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![t, id],
            )
            .context("Failed to update subtask title")?;
        }
        if let Some(done) = patch.done {
            tx.execute(
                "UPDATE subtasks SET done = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![done, id],
            )
            .context("Failed to update subtask state")?;
        }
        if let Some(order_index) = patch.order_index {
            tx.execute(
                "UPDATE subtasks SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![order_index, id],
            )
            .context("Failed to update subtask order")?;
        }
        tx.commit().context("Failed to commit subtask update")?;
        self.get_subtask(id)?.context("Subtask not found after update")
    }

    pub fn move_subtask(&self, id: i64, target: DropTarget) -> Result<MoveOutcome<Subtask>> {
        let subtask = self
            .get_subtask(id)?
            .ok_or(BoardError::SubtaskNotFound { id })?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let (order_index, renumbered) =
            self.position_in(OrderedTable::Subtasks, id, subtask.task_id, target)?;
        tx.execute(
            "UPDATE subtasks SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![order_index, id],
        )
        .context("Failed to move subtask")?;
        tx.commit().context("Failed to commit subtask move")?;

        Ok(MoveOutcome {
            item: self.get_subtask(id)?.context("Subtask not found after move")?,
            from_group: subtask.task_id,
            renumbered: self.load_all(&renumbered, Self::get_subtask)?,
        })
    }

    pub fn delete_subtask(&self, id: i64) -> Result<Option<Subtask>> {
        let Some(subtask) = self.get_subtask(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM subtasks WHERE id = ?1", params![id])
            .context("Failed to delete subtask")?;
        Ok(Some(subtask))
    }

    // ── Pages ─────────────────────────────────────────────────────────

    pub fn create_page(&self, project_id: i64, title: &str, content: &str) -> Result<Page> {
        require_text("title", title)?;
        self.require_project(project_id)?;
        let order_index = ordering::next_index(self.last_index(OrderedTable::Pages, project_id)?);
        self.conn
            .execute(
                "INSERT INTO pages (project_id, title, content, order_index) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, title, content, order_index],
            )
            .context("Failed to insert page")?;
        let id = self.conn.last_insert_rowid();
        self.get_page(id)?.context("Page not found after insert")
    }

    pub fn get_page(&self, id: i64) -> Result<Option<Page>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM pages WHERE id = ?1", PAGE_FIELDS),
                params![id],
                page_from_row,
            )
            .optional()
            .context("Failed to query page")
    }

    pub fn list_pages(&self, project_id: i64) -> Result<Vec<Page>> {
        self.require_project(project_id)?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM pages WHERE project_id = ?1 ORDER BY order_index, id",
                PAGE_FIELDS
            ))
            .context("Failed to prepare list_pages")?;
        let rows = stmt
            .query_map(params![project_id], page_from_row)
            .context("Failed to query pages")?;
        let mut pages = Vec::new();
        for row in rows {
            pages.push(row.context("Failed to read page row")?);
        }
        Ok(pages)
    }

    pub fn update_page(&self, id: i64, patch: &PagePatch) -> Result<Page> {
        self.get_page(id)?.ok_or(BoardError::PageNotFound { id })?;
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(t) = &patch.title {
            tx.execute(
                "UPDATE pages SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![t, id],
            )
            .context("Failed to update page title")?;
        }
        if let Some(c) = &patch.content {
            tx.execute(
                "UPDATE pages SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![c, id],
            )
            .context("Failed to update page content")?;
        }
        if let Some(order_index) = patch.order_index {
            tx.execute(
                "UPDATE pages SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![order_index, id],
            )
            .context("Failed to update page order")?;
        }
        tx.commit().context("Failed to commit page update")?;
        self.get_page(id)?.context("Page not found after update")
    }

    pub fn move_page(&self, id: i64, target: DropTarget) -> Result<MoveOutcome<Page>> {
        let page = self.get_page(id)?.ok_or(BoardError::PageNotFound { id })?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let (order_index, renumbered) =
            self.position_in(OrderedTable::Pages, id, page.project_id, target)?;
        tx.execute(
            "UPDATE pages SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![order_index, id],
        )
        .context("Failed to move page")?;
        tx.commit().context("Failed to commit page move")?;

        Ok(MoveOutcome {
            item: self.get_page(id)?.context("Page not found after move")?,
            from_group: page.project_id,
            renumbered: self.load_all(&renumbered, Self::get_page)?,
        })
    }

    pub fn delete_page(&self, id: i64) -> Result<Option<Page>> {
        let Some(page) = self.get_page(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM pages WHERE id = ?1", params![id])
            .context("Failed to delete page")?;
        Ok(Some(page))
    }

    // ── Views ─────────────────────────────────────────────────────────

    pub fn get_board(&self, project_id: i64) -> Result<BoardView> {
        let project = self.require_project(project_id)?;
        let mut tasks = self.list_tasks(project_id)?;

        let columns = self
            .list_columns(project_id)?
            .into_iter()
            .map(|column| {
                let (mine, rest): (Vec<Task>, Vec<Task>) =
                    tasks.drain(..).partition(|t| t.column_id == column.id);
                tasks = rest;
                ColumnView {
                    column,
                    tasks: mine,
                }
            })
            .collect();

        Ok(BoardView { project, columns })
    }

    pub fn get_task_detail(&self, id: i64) -> Result<Option<TaskDetail>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        let subtasks = self.list_subtasks(id)?;
        Ok(Some(TaskDetail { task, subtasks }))
    }

    // ── Ordering helpers ──────────────────────────────────────────────

    fn last_index(&self, table: OrderedTable, group: i64) -> Result<Option<f64>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT MAX(order_index) FROM {} WHERE {} = ?1",
                    table.name(),
                    table.group_column()
                ),
                params![group],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to get max order_index of {}", table.name()))
    }

    /// Sorted indices of `group`, without the item being moved.
    fn sibling_indices(&self, table: OrderedTable, group: i64, exclude: i64) -> Result<Vec<f64>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT order_index FROM {} WHERE {} = ?1 AND id != ?2 ORDER BY order_index, id",
                table.name(),
                table.group_column()
            ))
            .context("Failed to prepare sibling query")?;
        let rows = stmt
            .query_map(params![group, exclude], |row| row.get::<_, f64>(0))
            .context("Failed to query siblings")?;
        let mut indices = Vec::new();
        for row in rows {
            indices.push(row.context("Failed to read sibling row")?);
        }
        Ok(indices)
    }

    /// Resolve `target` to an index, renumbering the group first if its
    /// neighbours have run out of precision. Returns the renumbered ids.
    fn position_in(
        &self,
        table: OrderedTable,
        id: i64,
        group: i64,
        target: DropTarget,
    ) -> Result<(f64, Vec<i64>)> {
        let siblings = self.sibling_indices(table, group, id)?;
        match ordering::order_index_for(&siblings, target) {
            Ok(index) => Ok((index, Vec::new())),
            Err(OrderingError::PrecisionExhausted { before, after }) => {
                tracing::info!(
                    table = table.name(),
                    group,
                    before,
                    after,
                    "order index precision exhausted, renumbering group"
                );
                let renumbered = self.renumber_group(table, group, id)?;
                let siblings = self.sibling_indices(table, group, id)?;
                Ok((ordering::order_index_for(&siblings, target)?, renumbered))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn renumber_group(&self, table: OrderedTable, group: i64, exclude: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, order_index FROM {} WHERE {} = ?1 AND id != ?2 ORDER BY order_index, id",
                table.name(),
                table.group_column()
            ))
            .context("Failed to prepare renumber query")?;
        let rows = stmt
            .query_map(params![group, exclude], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })
            .context("Failed to query group for renumbering")?;
        let mut current = Vec::new();
        for row in rows {
            current.push(row.context("Failed to read renumber row")?);
        }

        let mut changed = Vec::new();
        for (pos, (id, index)) in current.into_iter().enumerate() {
            if index == pos as f64 {
                continue;
            }
            self.conn
                .execute(
                    &format!(
                        "UPDATE {} SET order_index = ?1, updated_at = datetime('now') WHERE id = ?2",
                        table.name()
                    ),
                    params![pos as f64, id],
                )
                .context("Failed to renumber row")?;
            changed.push(id);
        }
        Ok(changed)
    }

    fn load_all<T>(&self, ids: &[i64], get: fn(&Self, i64) -> Result<Option<T>>) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = get(self, *id)? {
                out.push(item);
            }
        }
        Ok(out)
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BoardError::BadRequest(format!("{} must not be empty", field)).into());
    }
    Ok(())
}

// ── Row mapping ───────────────────────────────────────────────────────

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<StatusColumn> {
    Ok(StatusColumn {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        order_index: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        done: row.get(3)?,
        order_index: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        order_index: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Raw task row; priority and due date are stored as text.
struct TaskRow {
    id: i64,
    project_id: i64,
    column_id: i64,
    title: String,
    description: String,
    priority: String,
    due_date: Option<String>,
    order_index: f64,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            column_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            priority: row.get(5)?,
            due_date: row.get(6)?,
            order_index: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let priority = Priority::from_str(&self.priority).map_err(|e| anyhow::anyhow!(e))?;
        let due_date = self
            .due_date
            .map(|d| NaiveDate::from_str(&d))
            .transpose()
            .with_context(|| format!("Invalid due date stored for task {}", self.id))?;
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            column_id: self.column_id,
            title: self.title,
            description: self.description,
            priority,
            due_date,
            order_index: self.order_index,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with_project() -> Result<(BoardDb, Project, Vec<StatusColumn>)> {
        let db = BoardDb::new_in_memory()?;
        let project = db.create_project("test")?;
        let columns = db.list_columns(project.id)?;
        Ok((db, project, columns))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let tables: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for expected in ["pages", "projects", "status_columns", "subtasks", "tasks"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }

        // Re-running migrations is harmless.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_create_project_adds_default_columns() -> Result<()> {
        let (_db, project, columns) = board_with_project()?;
        assert_eq!(project.name, "test");
        assert!(!project.created_at.is_empty());

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, DEFAULT_COLUMNS);
        let indices: Vec<f64> = columns.iter().map(|c| c.order_index).collect();
        assert_eq!(indices, vec![0.0, 1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_create_project_rejects_blank_name() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_project("   ").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
        assert!(db.list_projects()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_tasks_append_to_end_of_column() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let todo = columns[0].id;

        let first = db.create_task(todo, "First", "")?;
        let second = db.create_task(todo, "Second", "")?;
        let third = db.create_task(todo, "Third", "")?;
        assert_eq!(first.order_index, 0.0);
        assert_eq!(second.order_index, 1.0);
        assert_eq!(third.order_index, 2.0);
        assert_eq!(first.priority, Priority::Medium);
        assert!(first.due_date.is_none());

        let other = db.create_task(columns[1].id, "Elsewhere", "")?;
        assert_eq!(other.order_index, 0.0);
        Ok(())
    }

    #[test]
    fn test_create_task_in_missing_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_task(99, "Orphan", "").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::ColumnNotFound { id: 99 })
        ));
        Ok(())
    }

    #[test]
    fn test_move_third_task_to_top_then_between() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let todo = columns[0].id;
        db.create_task(todo, "A", "")?;
        db.create_task(todo, "B", "")?;
        let c = db.create_task(todo, "C", "")?;

        let moved = db.move_task(c.id, todo, DropTarget::First)?;
        assert_eq!(moved.item.order_index, -1.0);
        assert!(moved.renumbered.is_empty());

        let moved = db.move_task(c.id, todo, DropTarget::Before(1))?;
        assert_eq!(moved.item.order_index, 0.5);

        let titles: Vec<String> = db
            .list_column_tasks(todo)?
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["A", "C", "B"]);
        Ok(())
    }

    #[test]
    fn test_cross_column_move_is_atomic() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let (todo, doing) = (columns[0].id, columns[1].id);
        let task = db.create_task(todo, "Move me", "")?;
        db.create_task(doing, "X", "")?;
        db.create_task(doing, "Y", "")?;

        let moved = db.move_task(task.id, doing, DropTarget::Before(1))?;
        assert_eq!(moved.from_group, todo);
        assert_eq!(moved.item.column_id, doing);
        assert_eq!(moved.item.order_index, 0.5);

        assert!(db.list_column_tasks(todo)?.is_empty());
        let titles: Vec<String> = db
            .list_column_tasks(doing)?
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["X", "Move me", "Y"]);
        Ok(())
    }

    #[test]
    fn test_move_task_into_other_project_column_rejected() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let other = db.create_project("other")?;
        let foreign = db.list_columns(other.id)?[0].id;
        let task = db.create_task(columns[0].id, "Stay", "")?;

        let err = db.move_task(task.id, foreign, DropTarget::Last).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::BadRequest(_))
        ));
        assert_eq!(db.get_task(task.id)?.unwrap().column_id, columns[0].id);
        Ok(())
    }

    #[test]
    fn test_move_renumbers_when_precision_exhausted() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let todo = columns[0].id;
        let a = db.create_task(todo, "A", "")?;
        let b = db.create_task(todo, "B", "")?;
        let c = db.create_task(todo, "C", "")?;

        // Squeeze A and B onto adjacent floats.
        let tight = f64::from_bits(1.0_f64.to_bits() + 1);
        db.update_task(a.id, &TaskPatch { order_index: Some(1.0), ..Default::default() })?;
        db.update_task(b.id, &TaskPatch { order_index: Some(tight), ..Default::default() })?;
        db.update_task(c.id, &TaskPatch { order_index: Some(5.0), ..Default::default() })?;

        let d = db.create_task(columns[1].id, "D", "")?;
        let moved = db.move_task(d.id, todo, DropTarget::Before(1))?;
        assert_eq!(moved.item.order_index, 0.5);
        assert_eq!(moved.renumbered.len(), 3);

        let order: Vec<(String, f64)> = db
            .list_column_tasks(todo)?
            .into_iter()
            .map(|t| (t.title, t.order_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("A".to_string(), 0.0),
                ("D".to_string(), 0.5),
                ("B".to_string(), 1.0),
                ("C".to_string(), 2.0),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_drop_at_top_past_huge_index_keeps_position() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let todo = columns[0].id;
        let a = db.create_task(todo, "A", "")?;
        db.update_task(a.id, &TaskPatch { order_index: Some(1.0e17), ..Default::default() })?;
        let b = db.create_task(columns[1].id, "B", "")?;

        let moved = db.move_task(b.id, todo, DropTarget::First)?;
        assert_eq!(moved.renumbered.len(), 1);
        assert_eq!(moved.item.order_index, -1.0);

        let titles: Vec<String> = db
            .list_column_tasks(todo)?
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["B", "A"]);
        Ok(())
    }

    #[test]
    fn test_update_task_fields() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let task = db.create_task(columns[0].id, "Old title", "Old desc")?;

        let updated = db.update_task(task.id, &TaskPatch::title("New title"))?;
        assert_eq!(updated.title, "New title");
        assert_eq!(updated.description, "Old desc");

        let due = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let updated = db.update_task(
            task.id,
            &TaskPatch {
                priority: Some(Priority::High),
                due_date: Some(Some(due)),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.due_date, Some(due));

        let cleared = db.update_task(
            task.id,
            &TaskPatch {
                due_date: Some(None),
                ..Default::default()
            },
        )?;
        assert!(cleared.due_date.is_none());
        Ok(())
    }

    #[test]
    fn test_update_task_column_without_index_appends() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let (todo, done) = (columns[0].id, columns[2].id);
        db.create_task(done, "Already done", "")?;
        let task = db.create_task(todo, "Finish", "")?;

        let updated = db.update_task(
            task.id,
            &TaskPatch {
                column_id: Some(done),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.column_id, done);
        assert_eq!(updated.order_index, 1.0);
        Ok(())
    }

    #[test]
    fn test_update_missing_task_is_not_found() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.update_task(5, &TaskPatch::title("x")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::TaskNotFound { id: 5 })
        ));
        Ok(())
    }

    #[test]
    fn test_delete_column_cascades_to_tasks() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let task = db.create_task(columns[0].id, "Gone soon", "")?;
        db.create_subtask(task.id, "Step")?;

        let deleted = db.delete_column(columns[0].id)?;
        assert!(deleted.is_some());
        assert!(db.get_task(task.id)?.is_none());
        assert!(db.list_subtasks(task.id)?.is_empty());
        assert!(db.delete_column(columns[0].id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_subtasks_ordering_and_toggle() -> Result<()> {
        let (db, _project, columns) = board_with_project()?;
        let task = db.create_task(columns[0].id, "Parent", "")?;
        let one = db.create_subtask(task.id, "One")?;
        let two = db.create_subtask(task.id, "Two")?;
        assert_eq!(one.order_index, 0.0);
        assert_eq!(two.order_index, 1.0);
        assert!(!one.done);

        let toggled = db.update_subtask(
            one.id,
            &SubtaskPatch {
                done: Some(true),
                ..Default::default()
            },
        )?;
        assert!(toggled.done);

        db.move_subtask(two.id, DropTarget::First)?;
        let titles: Vec<String> = db
            .list_subtasks(task.id)?
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Two", "One"]);

        let detail = db.get_task_detail(task.id)?.unwrap();
        assert_eq!(detail.subtasks.len(), 2);
        Ok(())
    }

    #[test]
    fn test_pages_crud_and_move() -> Result<()> {
        let (db, project, _columns) = board_with_project()?;
        let notes = db.create_page(project.id, "Notes", "# Notes")?;
        let plan = db.create_page(project.id, "Plan", "")?;

        let updated = db.update_page(notes.id, &PagePatch::content("# Notes\n\nmore"))?;
        assert_eq!(updated.content, "# Notes\n\nmore");
        assert_eq!(updated.title, "Notes");

        db.move_page(plan.id, DropTarget::First)?;
        let titles: Vec<String> = db
            .list_pages(project.id)?
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Plan", "Notes"]);

        assert!(db.delete_page(notes.id)?.is_some());
        assert_eq!(db.list_pages(project.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_move_column_reorders_board() -> Result<()> {
        let (db, project, columns) = board_with_project()?;
        db.move_column(columns[2].id, DropTarget::First)?;
        let renamed = db.update_column(
            columns[0].id,
            &ColumnPatch {
                name: Some("Backlog".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(renamed.name, "Backlog");

        let names: Vec<String> = db
            .list_columns(project.id)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Done", "Backlog", "In Progress"]);
        Ok(())
    }

    #[test]
    fn test_get_board_view() -> Result<()> {
        let (db, project, columns) = board_with_project()?;
        db.create_task(columns[0].id, "Todo 1", "")?;
        db.create_task(columns[0].id, "Todo 2", "")?;
        db.create_task(columns[2].id, "Shipped", "")?;

        let board = db.get_board(project.id)?;
        assert_eq!(board.project.id, project.id);
        assert_eq!(board.columns.len(), 3);
        assert_eq!(board.columns[0].tasks.len(), 2);
        assert_eq!(board.columns[0].tasks[0].title, "Todo 1");
        assert!(board.columns[1].tasks.is_empty());
        assert_eq!(board.columns[2].tasks[0].title, "Shipped");
        Ok(())
    }

    #[test]
    fn test_get_board_missing_project() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.get_board(404).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::ProjectNotFound { id: 404 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let project = handle.call(|db| db.create_project("async")).await?;
        let fetched = handle
            .call(move |db| db.get_project(project.id))
            .await?
            .expect("project should exist");
        assert_eq!(fetched.name, "async");
        assert_eq!(handle.lock_sync()?.list_projects()?.len(), 1);
        Ok(())
    }
}

//! Record-store contract shared by the ordering and autosave components.
//!
//! A [`RecordStore`] persists one record kind and exposes a change feed.
//! [`BoardStore`] is the production implementation: it writes through
//! [`DbHandle`] and announces every write on the websocket broadcast
//! channel. Subscribers decode those payloads back into typed
//! [`ChangeEvent`]s, dropping anything that does not belong to their kind.

use std::fmt;
use std::marker::PhantomData;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::board::db::DbHandle;
use crate::board::models::*;
use crate::board::ws::{WsMessage, broadcast_message};
use crate::errors::{BoardError, StoreError};
use crate::ordering::{DropTarget, OrderedItem};

/// A partial update. `merge` folds a later patch in, later fields winning.
pub trait Patch: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn merge(&mut self, later: Self);
    fn is_empty(&self) -> bool;
}

/// A record kind the store can persist and broadcast.
pub trait Record: OrderedItem + Clone + fmt::Debug + Send + Sync + 'static {
    type New: Send + 'static;
    type Patch: Patch;

    /// Lowercase kind name used in errors and logs.
    const KIND: &'static str;

    /// Whether a move may change the record's group.
    const CROSS_GROUP: bool = false;

    /// Apply a patch locally, mirroring what the store does on update.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// The single patch that places the record at `order_index` in `group_key`.
    fn reposition(group_key: i64, order_index: f64) -> Self::Patch;

    /// Pick out this kind's events from the change feed. The second value is
    /// the group the record left, for moves that changed group.
    fn decode(msg: WsMessage) -> Option<(ChangeEvent<Self>, Option<i64>)>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Inserted(R),
    Updated(R),
    Deleted { id: i64, group_key: i64 },
}

impl<R: OrderedItem> ChangeEvent<R> {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(r) | Self::Updated(r) => r.id(),
            Self::Deleted { id, .. } => *id,
        }
    }

    pub fn group_key(&self) -> i64 {
        match self {
            Self::Inserted(r) | Self::Updated(r) => r.group_key(),
            Self::Deleted { group_key, .. } => *group_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Record(i64),
    /// Events for records in this group, including records moving out of it.
    Group(i64),
}

impl SubscriptionFilter {
    pub fn matches<R: OrderedItem>(&self, event: &ChangeEvent<R>, from_group: Option<i64>) -> bool {
        match *self {
            Self::All => true,
            Self::Record(id) => event.id() == id,
            Self::Group(group) => event.group_key() == group || from_group == Some(group),
        }
    }
}

/// Typed view over the broadcast change feed. Dropping it unsubscribes.
pub struct Subscription<R> {
    rx: broadcast::Receiver<String>,
    filter: SubscriptionFilter,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Record> Subscription<R> {
    pub fn new(rx: broadcast::Receiver<String>, filter: SubscriptionFilter) -> Self {
        Self {
            rx,
            filter,
            _kind: PhantomData,
        }
    }

    /// Wait for the next matching event. Returns `None` once the feed closes.
    pub async fn next(&mut self) -> Option<ChangeEvent<R>> {
        loop {
            let json = match self.rx.recv().await {
                Ok(json) => json,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(kind = R::KIND, skipped, "subscription lagged behind change feed");
                    continue;
                }
            };
            let msg = match serde_json::from_str::<WsMessage>(&json) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed change payload");
                    continue;
                }
            };
            if let Some((event, from_group)) = R::decode(msg)
                && self.filter.matches(&event, from_group)
            {
                return Some(event);
            }
        }
    }
}

#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn create(&self, new: R::New) -> Result<R, StoreError>;

    async fn update(&self, id: i64, patch: R::Patch) -> Result<R, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<R>;
}

// ── Record impls ──────────────────────────────────────────────────────

impl Patch for ColumnPatch {
    fn merge(&mut self, later: Self) {
        ColumnPatch::merge(self, later)
    }
    fn is_empty(&self) -> bool {
        ColumnPatch::is_empty(self)
    }
}

impl Patch for TaskPatch {
    fn merge(&mut self, later: Self) {
        TaskPatch::merge(self, later)
    }
    fn is_empty(&self) -> bool {
        TaskPatch::is_empty(self)
    }
}

impl Patch for SubtaskPatch {
    fn merge(&mut self, later: Self) {
        SubtaskPatch::merge(self, later)
    }
    fn is_empty(&self) -> bool {
        SubtaskPatch::is_empty(self)
    }
}

impl Patch for PagePatch {
    fn merge(&mut self, later: Self) {
        PagePatch::merge(self, later)
    }
    fn is_empty(&self) -> bool {
        PagePatch::is_empty(self)
    }
}

impl Record for StatusColumn {
    type New = NewColumn;
    type Patch = ColumnPatch;
    const KIND: &'static str = "column";

    fn apply_patch(&mut self, patch: &ColumnPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(idx) = patch.order_index {
            self.order_index = idx;
        }
    }

    fn reposition(_group_key: i64, order_index: f64) -> ColumnPatch {
        ColumnPatch {
            order_index: Some(order_index),
            ..Default::default()
        }
    }

    fn decode(msg: WsMessage) -> Option<(ChangeEvent<Self>, Option<i64>)> {
        match msg {
            WsMessage::ColumnCreated { column } => Some((ChangeEvent::Inserted(column), None)),
            WsMessage::ColumnUpdated { column } => Some((ChangeEvent::Updated(column), None)),
            WsMessage::ColumnDeleted {
                column_id,
                project_id,
            } => Some((
                ChangeEvent::Deleted {
                    id: column_id,
                    group_key: project_id,
                },
                None,
            )),
            _ => None,
        }
    }
}

impl Record for Task {
    type New = NewTask;
    type Patch = TaskPatch;
    const KIND: &'static str = "task";
    const CROSS_GROUP: bool = true;

    fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due) = patch.due_date {
            self.due_date = due;
        }
        if let Some(column_id) = patch.column_id {
            self.column_id = column_id;
        }
        if let Some(idx) = patch.order_index {
            self.order_index = idx;
        }
    }

    fn reposition(group_key: i64, order_index: f64) -> TaskPatch {
        TaskPatch {
            column_id: Some(group_key),
            order_index: Some(order_index),
            ..Default::default()
        }
    }

    fn decode(msg: WsMessage) -> Option<(ChangeEvent<Self>, Option<i64>)> {
        match msg {
            WsMessage::TaskCreated { task } => Some((ChangeEvent::Inserted(task), None)),
            WsMessage::TaskUpdated { task } => Some((ChangeEvent::Updated(task), None)),
            WsMessage::TaskMoved {
                task,
                from_column_id,
            } => Some((ChangeEvent::Updated(task), Some(from_column_id))),
            WsMessage::TaskDeleted { task_id, column_id } => Some((
                ChangeEvent::Deleted {
                    id: task_id,
                    group_key: column_id,
                },
                None,
            )),
            _ => None,
        }
    }
}

impl Record for Subtask {
    type New = NewSubtask;
    type Patch = SubtaskPatch;
    const KIND: &'static str = "subtask";

    fn apply_patch(&mut self, patch: &SubtaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(done) = patch.done {
            self.done = done;
        }
        if let Some(idx) = patch.order_index {
            self.order_index = idx;
        }
    }

    fn reposition(_group_key: i64, order_index: f64) -> SubtaskPatch {
        SubtaskPatch {
            order_index: Some(order_index),
            ..Default::default()
        }
    }

    fn decode(msg: WsMessage) -> Option<(ChangeEvent<Self>, Option<i64>)> {
        match msg {
            WsMessage::SubtaskCreated { subtask } => Some((ChangeEvent::Inserted(subtask), None)),
            WsMessage::SubtaskUpdated { subtask } => Some((ChangeEvent::Updated(subtask), None)),
            WsMessage::SubtaskDeleted {
                subtask_id,
                task_id,
            } => Some((
                ChangeEvent::Deleted {
                    id: subtask_id,
                    group_key: task_id,
                },
                None,
            )),
            _ => None,
        }
    }
}

impl Record for Page {
    type New = NewPage;
    type Patch = PagePatch;
    const KIND: &'static str = "page";

    fn apply_patch(&mut self, patch: &PagePatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(idx) = patch.order_index {
            self.order_index = idx;
        }
    }

    fn reposition(_group_key: i64, order_index: f64) -> PagePatch {
        PagePatch {
            order_index: Some(order_index),
            ..Default::default()
        }
    }

    fn decode(msg: WsMessage) -> Option<(ChangeEvent<Self>, Option<i64>)> {
        match msg {
            WsMessage::PageCreated { page } => Some((ChangeEvent::Inserted(page), None)),
            WsMessage::PageUpdated { page } => Some((ChangeEvent::Updated(page), None)),
            WsMessage::PageDeleted {
                page_id,
                project_id,
            } => Some((
                ChangeEvent::Deleted {
                    id: page_id,
                    group_key: project_id,
                },
                None,
            )),
            _ => None,
        }
    }
}

// ── BoardStore ────────────────────────────────────────────────────────

/// SQLite-backed store that announces every write on the change feed.
#[derive(Clone)]
pub struct BoardStore {
    db: DbHandle,
    ws_tx: broadcast::Sender<String>,
}

impl BoardStore {
    pub fn new(db: DbHandle, ws_tx: broadcast::Sender<String>) -> Self {
        Self { db, ws_tx }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn sender(&self) -> &broadcast::Sender<String> {
        &self.ws_tx
    }

    fn publish(&self, msg: WsMessage) {
        broadcast_message(&self.ws_tx, &msg);
    }

    pub async fn create_project(&self, name: String) -> Result<Project> {
        let project = self.db.call(move |db| db.create_project(&name)).await?;
        tracing::debug!(project_id = project.id, "project created");
        self.publish(WsMessage::ProjectCreated {
            project: project.clone(),
        });
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.db.call(|db| db.list_projects()).await
    }

    pub async fn get_project(&self, id: i64) -> Result<Project> {
        self.db
            .call(move |db| Ok(db.get_project(id)?.ok_or(BoardError::ProjectNotFound { id })?))
            .await
    }

    pub async fn board(&self, project_id: i64) -> Result<BoardView> {
        self.db.call(move |db| db.get_board(project_id)).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Task> {
        self.db
            .call(move |db| Ok(db.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?))
            .await
    }

    pub async fn task_detail(&self, id: i64) -> Result<TaskDetail> {
        self.db
            .call(move |db| Ok(db.get_task_detail(id)?.ok_or(BoardError::TaskNotFound { id })?))
            .await
    }

    pub async fn list_subtasks(&self, task_id: i64) -> Result<Vec<Subtask>> {
        self.db
            .call(move |db| {
                db.get_task(task_id)?
                    .ok_or(BoardError::TaskNotFound { id: task_id })?;
                db.list_subtasks(task_id)
            })
            .await
    }

    pub async fn list_pages(&self, project_id: i64) -> Result<Vec<Page>> {
        self.db.call(move |db| db.list_pages(project_id)).await
    }

    pub async fn get_page(&self, id: i64) -> Result<Page> {
        self.db
            .call(move |db| Ok(db.get_page(id)?.ok_or(BoardError::PageNotFound { id })?))
            .await
    }

    pub async fn move_column(&self, id: i64, target: DropTarget) -> Result<StatusColumn> {
        let outcome = self.db.call(move |db| db.move_column(id, target)).await?;
        for column in outcome.renumbered {
            self.publish(WsMessage::ColumnUpdated { column });
        }
        self.publish(WsMessage::ColumnUpdated {
            column: outcome.item.clone(),
        });
        Ok(outcome.item)
    }

    /// Move a task into `column_id` at `target`; the broadcast is a
    /// `TaskMoved` when the column changed.
    pub async fn move_task(&self, id: i64, column_id: i64, target: DropTarget) -> Result<Task> {
        let outcome = self
            .db
            .call(move |db| db.move_task(id, column_id, target))
            .await?;
        tracing::debug!(
            task_id = id,
            from_column = outcome.from_group,
            to_column = column_id,
            order_index = outcome.item.order_index,
            "task moved"
        );
        for task in outcome.renumbered {
            self.publish(WsMessage::TaskUpdated { task });
        }
        self.publish_task_write(outcome.item.clone(), outcome.from_group);
        Ok(outcome.item)
    }

    pub async fn move_subtask(&self, id: i64, target: DropTarget) -> Result<Subtask> {
        let outcome = self.db.call(move |db| db.move_subtask(id, target)).await?;
        for subtask in outcome.renumbered {
            self.publish(WsMessage::SubtaskUpdated { subtask });
        }
        self.publish(WsMessage::SubtaskUpdated {
            subtask: outcome.item.clone(),
        });
        Ok(outcome.item)
    }

    pub async fn move_page(&self, id: i64, target: DropTarget) -> Result<Page> {
        let outcome = self.db.call(move |db| db.move_page(id, target)).await?;
        for page in outcome.renumbered {
            self.publish(WsMessage::PageUpdated { page });
        }
        self.publish(WsMessage::PageUpdated {
            page: outcome.item.clone(),
        });
        Ok(outcome.item)
    }

    fn publish_task_write(&self, task: Task, from_column_id: i64) {
        if task.column_id == from_column_id {
            self.publish(WsMessage::TaskUpdated { task });
        } else {
            self.publish(WsMessage::TaskMoved {
                task,
                from_column_id,
            });
        }
    }
}

#[async_trait]
impl RecordStore<StatusColumn> for BoardStore {
    async fn create(&self, new: NewColumn) -> Result<StatusColumn, StoreError> {
        let column = self
            .db
            .call(move |db| db.create_column(new.project_id, &new.name))
            .await?;
        tracing::debug!(column_id = column.id, "column created");
        self.publish(WsMessage::ColumnCreated {
            column: column.clone(),
        });
        Ok(column)
    }

    async fn update(&self, id: i64, patch: ColumnPatch) -> Result<StatusColumn, StoreError> {
        let column = self.db.call(move |db| db.update_column(id, &patch)).await?;
        tracing::debug!(column_id = id, "column updated");
        self.publish(WsMessage::ColumnUpdated {
            column: column.clone(),
        });
        Ok(column)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let column = self
            .db
            .call(move |db| db.delete_column(id))
            .await?
            .ok_or(StoreError::NotFound { kind: "Column", id })?;
        tracing::debug!(column_id = id, "column deleted");
        self.publish(WsMessage::ColumnDeleted {
            column_id: id,
            project_id: column.project_id,
        });
        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<StatusColumn> {
        Subscription::new(self.ws_tx.subscribe(), filter)
    }
}

#[async_trait]
impl RecordStore<Task> for BoardStore {
    async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        let task = self
            .db
            .call(move |db| db.create_task(new.column_id, &new.title, &new.description))
            .await?;
        tracing::debug!(task_id = task.id, column_id = task.column_id, "task created");
        self.publish(WsMessage::TaskCreated { task: task.clone() });
        Ok(task)
    }

    async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError> {
        let (before, task) = self
            .db
            .call(move |db| {
                let before = db.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
                let after = db.update_task(id, &patch)?;
                Ok((before, after))
            })
            .await?;
        tracing::debug!(task_id = id, "task updated");
        self.publish_task_write(task.clone(), before.column_id);
        Ok(task)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let task = self
            .db
            .call(move |db| db.delete_task(id))
            .await?
            .ok_or(StoreError::NotFound { kind: "Task", id })?;
        tracing::debug!(task_id = id, "task deleted");
        self.publish(WsMessage::TaskDeleted {
            task_id: id,
            column_id: task.column_id,
        });
        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<Task> {
        Subscription::new(self.ws_tx.subscribe(), filter)
    }
}

#[async_trait]
impl RecordStore<Subtask> for BoardStore {
    async fn create(&self, new: NewSubtask) -> Result<Subtask, StoreError> {
        let subtask = self
            .db
            .call(move |db| db.create_subtask(new.task_id, &new.title))
            .await?;
        tracing::debug!(subtask_id = subtask.id, "subtask created");
        self.publish(WsMessage::SubtaskCreated {
            subtask: subtask.clone(),
        });
        Ok(subtask)
    }

    async fn update(&self, id: i64, patch: SubtaskPatch) -> Result<Subtask, StoreError> {
        let subtask = self.db.call(move |db| db.update_subtask(id, &patch)).await?;
        tracing::debug!(subtask_id = id, "subtask updated");
        self.publish(WsMessage::SubtaskUpdated {
            subtask: subtask.clone(),
        });
        Ok(subtask)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let subtask = self
            .db
            .call(move |db| db.delete_subtask(id))
            .await?
            .ok_or(StoreError::NotFound { kind: "Subtask", id })?;
        tracing::debug!(subtask_id = id, "subtask deleted");
        self.publish(WsMessage::SubtaskDeleted {
            subtask_id: id,
            task_id: subtask.task_id,
        });
        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<Subtask> {
        Subscription::new(self.ws_tx.subscribe(), filter)
    }
}

#[async_trait]
impl RecordStore<Page> for BoardStore {
    async fn create(&self, new: NewPage) -> Result<Page, StoreError> {
        let page = self
            .db
            .call(move |db| db.create_page(new.project_id, &new.title, &new.content))
            .await?;
        tracing::debug!(page_id = page.id, "page created");
        self.publish(WsMessage::PageCreated { page: page.clone() });
        Ok(page)
    }

    async fn update(&self, id: i64, patch: PagePatch) -> Result<Page, StoreError> {
        let page = self.db.call(move |db| db.update_page(id, &patch)).await?;
        tracing::debug!(page_id = id, "page updated");
        self.publish(WsMessage::PageUpdated { page: page.clone() });
        Ok(page)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let page = self
            .db
            .call(move |db| db.delete_page(id))
            .await?
            .ok_or(StoreError::NotFound { kind: "Page", id })?;
        tracing::debug!(page_id = id, "page deleted");
        self.publish(WsMessage::PageDeleted {
            page_id: id,
            project_id: page.project_id,
        });
        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<Page> {
        Subscription::new(self.ws_tx.subscribe(), filter)
    }
}

/// Open the database at `path` (creating parent directories) and wrap it in
/// a store with a fresh change feed.
pub fn open_board_store(path: &std::path::Path) -> Result<BoardStore> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = crate::board::db::BoardDb::new(path)?;
    let (ws_tx, _) = broadcast::channel(256);
    Ok(BoardStore::new(DbHandle::new(db), ws_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use std::time::Duration;

    fn test_store() -> BoardStore {
        let db = BoardDb::new_in_memory().expect("in-memory db");
        let (tx, _) = broadcast::channel(64);
        BoardStore::new(DbHandle::new(db), tx)
    }

    async fn first_column(store: &BoardStore) -> (Project, Vec<StatusColumn>) {
        let project = store.create_project("p".into()).await.unwrap();
        let board = store.board(project.id).await.unwrap();
        let columns = board.columns.into_iter().map(|c| c.column).collect();
        (project, columns)
    }

    async fn next_event<R: Record>(sub: &mut Subscription<R>) -> ChangeEvent<R> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for change event")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_create_task_is_announced_to_subscribers() {
        let store = test_store();
        let (_project, columns) = first_column(&store).await;
        let mut sub: Subscription<Task> = store.subscribe(SubscriptionFilter::All);

        let task = RecordStore::<Task>::create(
            &store,
            NewTask {
                column_id: columns[0].id,
                title: "Write docs".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        match next_event(&mut sub).await {
            ChangeEvent::Inserted(t) => assert_eq!(t, task),
            other => panic!("Expected Inserted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscription_skips_other_kinds_and_malformed_payloads() {
        let store = test_store();
        let (project, columns) = first_column(&store).await;
        let mut sub: Subscription<Task> = store.subscribe(SubscriptionFilter::All);

        store.sender().send("not json".to_string()).unwrap();
        store
            .sender()
            .send(r#"{"type":"TaskCreated","data":{"task":{"id":"oops"}}}"#.to_string())
            .unwrap();
        RecordStore::<Page>::create(
            &store,
            NewPage {
                project_id: project.id,
                title: "Notes".into(),
                content: String::new(),
            },
        )
        .await
        .unwrap();
        let task = RecordStore::<Task>::create(
            &store,
            NewTask {
                column_id: columns[1].id,
                title: "Real".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        assert_eq!(next_event(&mut sub).await, ChangeEvent::Inserted(task));
    }

    #[tokio::test]
    async fn test_record_filter_only_sees_that_record() {
        let store = test_store();
        let (_project, columns) = first_column(&store).await;
        let new = |title: &str| NewTask {
            column_id: columns[0].id,
            title: title.into(),
            description: String::new(),
        };
        let watched = RecordStore::<Task>::create(&store, new("watched")).await.unwrap();
        let other = RecordStore::<Task>::create(&store, new("other")).await.unwrap();

        let mut sub: Subscription<Task> = store.subscribe(SubscriptionFilter::Record(watched.id));
        RecordStore::<Task>::update(&store, other.id, TaskPatch::title("ignored"))
            .await
            .unwrap();
        RecordStore::<Task>::update(&store, watched.id, TaskPatch::title("seen"))
            .await
            .unwrap();

        match next_event(&mut sub).await {
            ChangeEvent::Updated(t) => {
                assert_eq!(t.id, watched.id);
                assert_eq!(t.title, "seen");
            }
            other => panic!("Expected Updated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_group_filter_sees_task_leaving_the_group() {
        let store = test_store();
        let (_project, columns) = first_column(&store).await;
        let (todo, doing) = (columns[0].id, columns[1].id);
        let task = RecordStore::<Task>::create(
            &store,
            NewTask {
                column_id: todo,
                title: "Move me".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        let mut source: Subscription<Task> = store.subscribe(SubscriptionFilter::Group(todo));
        let mut dest: Subscription<Task> = store.subscribe(SubscriptionFilter::Group(doing));
        let moved = store.move_task(task.id, doing, DropTarget::Last).await.unwrap();
        assert_eq!(moved.column_id, doing);

        assert_eq!(next_event(&mut source).await, ChangeEvent::Updated(moved.clone()));
        assert_eq!(next_event(&mut dest).await, ChangeEvent::Updated(moved));
    }

    #[tokio::test]
    async fn test_cross_column_update_broadcasts_task_moved() {
        let store = test_store();
        let (_project, columns) = first_column(&store).await;
        let task = RecordStore::<Task>::create(
            &store,
            NewTask {
                column_id: columns[0].id,
                title: "t".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        let mut raw = store.sender().subscribe();
        RecordStore::<Task>::update(&store, task.id, Task::reposition(columns[2].id, 0.0))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw.recv().await.unwrap()).unwrap();
        assert_eq!(json["type"], "TaskMoved");
        assert_eq!(json["data"]["from_column_id"], columns[0].id);
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_not_found() {
        let store = test_store();
        let err = RecordStore::<Subtask>::delete(&store, 77).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Subtask", id: 77 }));

        let err = RecordStore::<Page>::update(&store, 5, PagePatch::content("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Page", id: 5 }));
    }

    #[tokio::test]
    async fn test_delete_announces_group() {
        let store = test_store();
        let (_project, columns) = first_column(&store).await;
        let task = RecordStore::<Task>::create(
            &store,
            NewTask {
                column_id: columns[0].id,
                title: "bye".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();
        let mut sub: Subscription<Task> = store.subscribe(SubscriptionFilter::Group(columns[0].id));
        RecordStore::<Task>::delete(&store, task.id).await.unwrap();
        assert_eq!(
            next_event(&mut sub).await,
            ChangeEvent::Deleted {
                id: task.id,
                group_key: columns[0].id
            }
        );
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let store = test_store();
        let sub: Subscription<Page> = store.subscribe(SubscriptionFilter::All);
        assert_eq!(store.sender().receiver_count(), 1);
        drop(sub);
        assert_eq!(store.sender().receiver_count(), 0);
    }

    #[test]
    fn test_task_apply_patch_mirrors_store() {
        let mut task = Task {
            id: 1,
            project_id: 1,
            column_id: 1,
            title: "old".into(),
            description: String::new(),
            priority: Priority::Low,
            due_date: None,
            order_index: 0.0,
            created_at: String::new(),
            updated_at: String::new(),
        };
        task.apply_patch(&Task::reposition(4, 2.5));
        assert_eq!(task.group_key(), 4);
        assert_eq!(task.order_index, 2.5);
        assert_eq!(task.title, "old");

        task.apply_patch(&TaskPatch::title("new"));
        assert_eq!(task.title, "new");
        assert_eq!(task.column_id, 4);
    }

    #[test]
    fn test_open_board_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("board.db");
        let store = open_board_store(&path).unwrap();
        assert!(path.exists());
        assert!(store.db().lock_sync().unwrap().list_projects().unwrap().is_empty());
    }
}

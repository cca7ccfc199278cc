use crate::errors::{MoveError, OrderingError};
use crate::store::{ChangeEvent, Record, RecordStore};

use super::{DropTarget, MovePlan, plan_move, renumber, sort_group};

/// A locally held set of ordered records, updated optimistically.
#[derive(Debug, Clone)]
pub struct OrderedList<R> {
    items: Vec<R>,
}

/// What a move replaced, so it can be reverted if the store rejects it.
#[derive(Debug, Clone)]
#[must_use = "a MoveUndo is the only way to revert an optimistic move"]
pub struct MoveUndo<R> {
    previous: R,
}

impl<R: Record> OrderedList<R> {
    pub fn new(items: Vec<R>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&R> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Records of one group in display order.
    pub fn items_in(&self, group_key: i64) -> Vec<R> {
        let mut group: Vec<R> = self
            .items
            .iter()
            .filter(|item| item.group_key() == group_key)
            .cloned()
            .collect();
        sort_group(&mut group);
        group
    }

    /// Apply a move locally. The returned plan is the one store update to
    /// send; the undo restores the previous group and index.
    pub fn move_item(
        &mut self,
        id: i64,
        to_group: i64,
        target: DropTarget,
    ) -> Result<(MovePlan, MoveUndo<R>), OrderingError> {
        let current = self.get(id).ok_or(OrderingError::UnknownItem { id })?;
        if !R::CROSS_GROUP && current.group_key() != to_group {
            return Err(OrderingError::CrossGroupMove { kind: R::KIND });
        }
        let undo = MoveUndo {
            previous: current.clone(),
        };

        let plan = plan_move(&self.items, id, to_group, target)?;
        if let Some(item) = self.items.iter_mut().find(|item| item.id() == id) {
            item.apply_patch(&R::reposition(plan.group_key, plan.order_index));
        }
        Ok((plan, undo))
    }

    pub fn rollback(&mut self, undo: MoveUndo<R>) {
        self.upsert(undo.previous);
    }

    pub fn upsert(&mut self, record: R) {
        match self.items.iter_mut().find(|item| item.id() == record.id()) {
            Some(slot) => *slot = record,
            None => self.items.push(record),
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<R> {
        let pos = self.items.iter().position(|item| item.id() == id)?;
        Some(self.items.remove(pos))
    }

    /// Fold a change from the feed into the local list.
    pub fn apply_remote(&mut self, event: ChangeEvent<R>) {
        match event {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => self.upsert(record),
            ChangeEvent::Deleted { id, .. } => {
                self.remove(id);
            }
        }
    }

    /// Consecutive indices for `group_key`, leaving out `exclude`.
    fn renumber_plan(&self, group_key: i64, exclude: i64) -> Vec<MovePlan> {
        let group: Vec<R> = self
            .items_in(group_key)
            .into_iter()
            .filter(|item| item.id() != exclude)
            .collect();
        renumber(&group)
    }
}

/// Move `id` optimistically, then persist it with a single store update.
///
/// If the store rejects the write the local list is reverted and the store
/// error is returned. When the destination has run out of index precision,
/// its siblings are renumbered through the store before the move is retried.
pub async fn sync_move<R, S>(
    list: &mut OrderedList<R>,
    store: &S,
    id: i64,
    to_group: i64,
    target: DropTarget,
) -> Result<R, MoveError>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    let (plan, undo) = match list.move_item(id, to_group, target) {
        Ok(moved) => moved,
        Err(OrderingError::PrecisionExhausted { before, after }) => {
            tracing::info!(
                kind = R::KIND,
                group = to_group,
                before,
                after,
                "order index precision exhausted, renumbering group"
            );
            for step in list.renumber_plan(to_group, id) {
                let saved = store
                    .update(step.id, R::reposition(step.group_key, step.order_index))
                    .await?;
                list.upsert(saved);
            }
            list.move_item(id, to_group, target)?
        }
        Err(e) => return Err(e.into()),
    };

    match store
        .update(plan.id, R::reposition(plan.group_key, plan.order_index))
        .await
    {
        Ok(saved) => {
            list.upsert(saved.clone());
            Ok(saved)
        }
        Err(err) => {
            tracing::warn!(kind = R::KIND, id, error = %err, "move rejected by store, rolling back");
            list.rollback(undo);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::*;
    use crate::errors::StoreError;
    use crate::store::{Subscription, SubscriptionFilter};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    fn task(id: i64, column_id: i64, order_index: f64) -> Task {
        Task {
            id,
            project_id: 1,
            column_id,
            title: format!("task {}", id),
            description: String::new(),
            priority: Priority::Medium,
            due_date: None,
            order_index,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn subtask(id: i64, task_id: i64, order_index: f64) -> Subtask {
        Subtask {
            id,
            task_id,
            title: format!("step {}", id),
            done: false,
            order_index,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// In-memory task store that can be told to fail.
    struct FakeTaskStore {
        tasks: Mutex<HashMap<i64, Task>>,
        fail: AtomicBool,
        updates: AtomicUsize,
        tx: broadcast::Sender<String>,
    }

    impl FakeTaskStore {
        fn new(tasks: &[Task]) -> Self {
            let (tx, _) = broadcast::channel(8);
            Self {
                tasks: Mutex::new(tasks.iter().map(|t| (t.id, t.clone())).collect()),
                fail: AtomicBool::new(false),
                updates: AtomicUsize::new(0),
                tx,
            }
        }
    }

    #[async_trait]
    impl RecordStore<Task> for FakeTaskStore {
        async fn create(&self, _new: NewTask) -> Result<Task, StoreError> {
            Err(StoreError::Rejected("not supported".into()))
        }

        async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "Task", id })?;
            task.apply_patch(&patch);
            Ok(task.clone())
        }

        async fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.tasks.lock().unwrap().remove(&id);
            Ok(())
        }

        fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<Task> {
            Subscription::new(self.tx.subscribe(), filter)
        }
    }

    fn ids(items: &[Task]) -> Vec<i64> {
        items.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_move_item_applies_locally() {
        let mut list = OrderedList::new(vec![task(1, 1, 0.0), task(2, 1, 1.0), task(3, 1, 2.0)]);
        let (plan, _undo) = list.move_item(3, 1, DropTarget::First).unwrap();
        assert_eq!(plan.order_index, -1.0);
        assert_eq!(ids(&list.items_in(1)), vec![3, 1, 2]);
    }

    #[test]
    fn test_rollback_restores_group_and_index() {
        let mut list = OrderedList::new(vec![task(1, 1, 0.0), task(2, 2, 0.0)]);
        let (_plan, undo) = list.move_item(1, 2, DropTarget::Last).unwrap();
        assert!(list.items_in(1).is_empty());

        list.rollback(undo);
        assert_eq!(ids(&list.items_in(1)), vec![1]);
        assert_eq!(list.get(1).unwrap().order_index, 0.0);
        assert_eq!(ids(&list.items_in(2)), vec![2]);
    }

    #[test]
    fn test_subtasks_cannot_change_parent() {
        let mut list = OrderedList::new(vec![subtask(1, 10, 0.0)]);
        let err = list.move_item(1, 11, DropTarget::Last).unwrap_err();
        assert_eq!(err, OrderingError::CrossGroupMove { kind: "subtask" });
        assert_eq!(list.get(1).unwrap().task_id, 10);
    }

    #[test]
    fn test_apply_remote_events() {
        let mut list = OrderedList::new(vec![task(1, 1, 0.0)]);
        list.apply_remote(ChangeEvent::Inserted(task(2, 1, 1.0)));
        list.apply_remote(ChangeEvent::Updated(task(1, 1, 5.0)));
        assert_eq!(ids(&list.items_in(1)), vec![2, 1]);

        list.apply_remote(ChangeEvent::Deleted { id: 2, group_key: 1 });
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_move_writes_once() {
        let tasks = [task(1, 1, 0.0), task(2, 1, 1.0), task(3, 2, 0.0)];
        let store = FakeTaskStore::new(&tasks);
        let mut list = OrderedList::new(tasks.to_vec());

        let saved = sync_move(&mut list, &store, 3, 1, DropTarget::Before(1))
            .await
            .unwrap();
        assert_eq!(saved.column_id, 1);
        assert_eq!(saved.order_index, 0.5);
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(ids(&list.items_in(1)), vec![1, 3, 2]);
        assert!(list.items_in(2).is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_move_rolls_back() {
        let tasks = [task(1, 1, 0.0), task(2, 1, 1.0), task(3, 2, 0.0)];
        let store = FakeTaskStore::new(&tasks);
        store.fail.store(true, Ordering::SeqCst);
        let mut list = OrderedList::new(tasks.to_vec());

        let err = sync_move(&mut list, &store, 3, 1, DropTarget::First)
            .await
            .unwrap_err();
        assert!(matches!(err, MoveError::Store(StoreError::Unavailable(_))));
        assert_eq!(ids(&list.items_in(1)), vec![1, 2]);
        assert_eq!(ids(&list.items_in(2)), vec![3]);
        assert_eq!(list.get(3).unwrap().order_index, 0.0);
    }

    #[tokio::test]
    async fn test_sync_move_renumbers_exhausted_group() {
        let tight = f64::from_bits(1.0_f64.to_bits() + 1);
        let tasks = [task(1, 1, 1.0), task(2, 1, tight), task(3, 2, 0.0)];
        let store = FakeTaskStore::new(&tasks);
        let mut list = OrderedList::new(tasks.to_vec());

        let saved = sync_move(&mut list, &store, 3, 1, DropTarget::Before(1))
            .await
            .unwrap();
        assert_eq!(saved.order_index, 0.5);
        // Two siblings renumbered to 0 and 1, then the move itself.
        assert_eq!(store.updates.load(Ordering::SeqCst), 3);
        assert_eq!(ids(&list.items_in(1)), vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_sync_move_unknown_item_touches_nothing() {
        let store = FakeTaskStore::new(&[]);
        let mut list: OrderedList<Task> = OrderedList::new(Vec::new());
        let err = sync_move(&mut list, &store, 9, 1, DropTarget::Last)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MoveError::Ordering(OrderingError::UnknownItem { id: 9 })
        ));
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
    }
}

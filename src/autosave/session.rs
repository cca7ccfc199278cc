use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::machine::{AutosaveConfig, AutosaveMachine, RemoteDecision, SaveState};
use crate::errors::StoreError;
use crate::store::{ChangeEvent, Record, RecordStore, Subscription, SubscriptionFilter};

enum Command<R: Record> {
    Edit(R::Patch),
    Remote(R, oneshot::Sender<RemoteDecision>),
    Close,
}

#[derive(Debug, Clone)]
struct Snapshot<R> {
    state: SaveState,
    draft: R,
}

/// An open editing session for one record.
///
/// The machine lives on its own tokio task; this handle only sends commands
/// and reads the latest published state. Remote updates for the record are
/// picked up from the store's change feed automatically.
pub struct AutosaveSession<R: Record> {
    commands: mpsc::UnboundedSender<Command<R>>,
    snapshot: watch::Receiver<Snapshot<R>>,
    task: JoinHandle<()>,
}

impl<R: Record> AutosaveSession<R> {
    pub fn open<S>(store: Arc<S>, record: R, config: AutosaveConfig) -> Self
    where
        S: RecordStore<R> + ?Sized + 'static,
    {
        let subscription = store.subscribe(SubscriptionFilter::Record(record.id()));
        let (commands, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Snapshot {
            state: SaveState::Idle,
            draft: record.clone(),
        });
        let machine = AutosaveMachine::new(record, config);
        let task = tokio::spawn(run_session(machine, store, rx, subscription, snapshot_tx));

        Self {
            commands,
            snapshot,
            task,
        }
    }

    pub fn report_edit(&self, patch: R::Patch) {
        let _ = self.commands.send(Command::Edit(patch));
    }

    /// Offer a remote copy of the record. Returns `None` if the session has
    /// already closed.
    pub async fn report_remote_update(&self, record: R) -> Option<RemoteDecision> {
        let (reply, decision) = oneshot::channel();
        self.commands.send(Command::Remote(record, reply)).ok()?;
        decision.await.ok()
    }

    pub fn state(&self) -> SaveState {
        self.snapshot.borrow().state
    }

    pub fn is_saving(&self) -> bool {
        self.state() == SaveState::Saving
    }

    pub fn draft(&self) -> R {
        self.snapshot.borrow().draft.clone()
    }

    /// Wait until the published state satisfies `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(SaveState) -> bool) -> SaveState {
        let observed = self
            .snapshot
            .wait_for(|snap| pred(snap.state))
            .await
            .map(|snap| snap.state);
        observed.unwrap_or_else(|_| self.state())
    }

    /// Stop the session. Unsaved edits are dropped; a save already in flight
    /// still reaches the store.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            tracing::warn!(kind = R::KIND, error = %e, "autosave session task failed");
        }
    }
}

async fn run_session<R, S>(
    mut machine: AutosaveMachine<R>,
    store: Arc<S>,
    mut commands: mpsc::UnboundedReceiver<Command<R>>,
    mut subscription: Subscription<R>,
    snapshot: watch::Sender<Snapshot<R>>,
) where
    R: Record,
    S: RecordStore<R> + ?Sized + 'static,
{
    let id = machine.draft().id();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<R, StoreError>>();
    let mut feed_open = true;

    loop {
        let deadline = machine.next_deadline();

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Edit(patch)) => machine.report_edit(Instant::now(), patch),
                Some(Command::Remote(record, reply)) => {
                    let _ = reply.send(machine.report_remote_update(Instant::now(), record));
                }
                Some(Command::Close) | None => break,
            },
            Some(result) = done_rx.recv() => machine.save_finished(Instant::now(), result),
            event = subscription.next(), if feed_open => match event {
                Some(ChangeEvent::Updated(record)) => {
                    machine.report_remote_update(Instant::now(), record);
                }
                Some(ChangeEvent::Deleted { .. }) => {
                    tracing::debug!(kind = R::KIND, id, "record deleted while open");
                }
                Some(ChangeEvent::Inserted(_)) => {}
                None => feed_open = false,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }

        if let Some(patch) = machine.poll(Instant::now()) {
            tracing::debug!(kind = R::KIND, id, ?patch, "autosave flushing");
            let store = store.clone();
            let done = done_tx.clone();
            tokio::spawn(async move {
                let result = store.update(id, patch).await;
                let _ = done.send(result);
            });
        }

        snapshot.send_replace(Snapshot {
            state: machine.state(),
            draft: machine.draft().clone(),
        });
    }

    if let Some(discarded) = machine.close() {
        tracing::debug!(kind = R::KIND, id, ?discarded, "session closed with unsaved edits");
    }
    snapshot.send_replace(Snapshot {
        state: machine.state(),
        draft: machine.draft().clone(),
    });
}

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::errors::StoreError;
use crate::store::{Patch, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub debounce: Duration,
    pub grace_window: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            grace_window: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    Editing,
    PendingSave,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    Applied,
    Suppressed,
}

/// Autosave state for one open record.
#[derive(Debug)]
pub struct AutosaveMachine<R: Record> {
    config: AutosaveConfig,
    state: SaveState,
    draft: R,
    /// Edits not yet handed to the store, merged field by field.
    pending: Option<R::Patch>,
    due: Option<Instant>,
    last_edit: Option<Instant>,
}

impl<R: Record> AutosaveMachine<R> {
    pub fn new(record: R, config: AutosaveConfig) -> Self {
        Self {
            config,
            state: SaveState::Idle,
            draft: record,
            pending: None,
            due: None,
            last_edit: None,
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn draft(&self) -> &R {
        &self.draft
    }

    pub fn is_saving(&self) -> bool {
        self.state == SaveState::Saving
    }

    pub fn has_unsaved_edits(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a local edit and push the save deadline out.
    pub fn report_edit(&mut self, now: Instant, patch: R::Patch) {
        if patch.is_empty() {
            return;
        }
        self.draft.apply_patch(&patch);
        match &mut self.pending {
            Some(pending) => pending.merge(patch),
            None => self.pending = Some(patch),
        }
        self.last_edit = Some(now);
        self.due = Some(now + self.config.debounce);
        if self.state != SaveState::Saving {
            self.state = SaveState::PendingSave;
        }
    }

    /// Advance timers. Returns the patch to write when a save should start.
    pub fn poll(&mut self, now: Instant) -> Option<R::Patch> {
        match self.state {
            SaveState::PendingSave if self.due.is_some_and(|due| now >= due) => {
                self.due = None;
                let patch = self.pending.take()?;
                self.state = SaveState::Saving;
                Some(patch)
            }
            SaveState::Editing if !self.within_grace(now) => {
                self.state = SaveState::Idle;
                None
            }
            _ => None,
        }
    }

    /// The in-flight save completed. Failures keep the draft; nothing is
    /// retried.
    pub fn save_finished(&mut self, now: Instant, result: Result<R, StoreError>) {
        if self.state != SaveState::Saving {
            return;
        }
        match result {
            Ok(saved) => {
                tracing::debug!(kind = R::KIND, id = saved.id(), "autosave completed");
                if self.pending.is_none() {
                    self.draft = saved;
                }
            }
            Err(err) => {
                tracing::warn!(
                    kind = R::KIND,
                    id = self.draft.id(),
                    error = %err,
                    "autosave failed, keeping local draft"
                );
            }
        }
        self.state = if self.pending.is_some() {
            SaveState::PendingSave
        } else if self.within_grace(now) {
            SaveState::Editing
        } else {
            SaveState::Idle
        };
    }

    /// A remote copy of the record arrived. It replaces the draft unless a
    /// local edit happened within the grace window.
    pub fn report_remote_update(&mut self, now: Instant, record: R) -> RemoteDecision {
        if self.last_edit.is_some() && self.within_grace(now) {
            tracing::debug!(kind = R::KIND, id = record.id(), "remote update suppressed");
            return RemoteDecision::Suppressed;
        }
        self.draft = record;
        RemoteDecision::Applied
    }

    /// When `poll` next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SaveState::PendingSave => self.due,
            SaveState::Editing => self
                .last_edit
                .map(|last| last + self.config.grace_window + Duration::from_millis(1)),
            SaveState::Idle | SaveState::Saving => None,
        }
    }

    /// Stop the timer and drop unsaved edits. An in-flight save is not
    /// affected. Returns the discarded edits.
    pub fn close(&mut self) -> Option<R::Patch> {
        self.due = None;
        let discarded = self.pending.take();
        if self.state == SaveState::PendingSave {
            self.state = SaveState::Idle;
        }
        discarded
    }

    fn within_grace(&self, now: Instant) -> bool {
        self.last_edit
            .is_some_and(|last| now.saturating_duration_since(last) <= self.config.grace_window)
    }
}

//! Debounced autosave with an edit-presence guard.
//!
//! While a user types, each keystroke updates a local draft immediately and
//! pushes the write deadline out by the debounce delay, so a burst of edits
//! becomes one store update. Remote pushes for the same record are ignored
//! for a grace window after the last local edit; that window is what stops a
//! client's own save echo from clobbering keystrokes typed since.
//!
//! | State         | Meaning                                              |
//! |---------------|------------------------------------------------------|
//! | `Idle`        | No recent edit; remote pushes apply                  |
//! | `Editing`     | Saved, but inside the grace window of the last edit  |
//! | `PendingSave` | Unsaved edits waiting for the debounce deadline      |
//! | `Saving`      | One update in flight                                 |
//!
//! [`AutosaveMachine`] holds the transitions and never touches a clock or a
//! store; [`AutosaveSession`] drives it from a tokio task.

mod machine;
mod session;

pub use machine::{AutosaveConfig, AutosaveMachine, RemoteDecision, SaveState};
pub use session::AutosaveSession;

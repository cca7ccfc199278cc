//! Task board back-end: SQLite storage, HTTP API and realtime change feed.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ BoardStore (crate::store)              │
//!                       │         v                                        │
//!                       │  db.rs   (BoardDb behind DbHandle)               │
//!                       │         │                                        │
//!                       │         │ every write                            │
//!                       │         v                                        │
//!                       │  ws.rs   (WsMessage, broadcast_message)          │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | Records, creation payloads, patches and board views         |
//! | `db`     | Schema, migrations, CRUD and server-side ordered moves      |
//! | `ws`     | `WsMessage` enum, broadcast helper, `/ws` socket loop        |
//! | `api`    | REST handlers and `ApiError` → status-code mapping          |
//! | `server` | Router assembly, CORS in dev mode, graceful shutdown        |
//!
//! ## Typical Request Flow (drag a card to another column)
//!
//! 1. `PATCH /api/tasks/{id}/move` with `{column_id, index}`.
//! 2. `BoardDb::move_task` computes the order index against the destination
//!    siblings, renumbering the column first if the gap is exhausted.
//! 3. `BoardStore` broadcasts `TaskUpdated` for each renumbered sibling and
//!    `TaskMoved` for the card itself.
//! 4. Open clients apply the push through their `OrderedList`, or suppress it
//!    inside an autosave grace window.

pub mod api;
pub mod db;
pub mod models;
pub mod server;
pub mod ws;

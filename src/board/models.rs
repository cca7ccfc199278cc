use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::ordering::OrderedItem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// A status column on a project board. Columns are themselves ordered
/// within their project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusColumn {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub order_index: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub column_id: i64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub order_index: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Checklist entry under a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: i64,
    pub task_id: i64,
    pub title: String,
    pub done: bool,
    pub order_index: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Free-form note attached to a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub content: String,
    pub order_index: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderedItem for StatusColumn {
    fn id(&self) -> i64 {
        self.id
    }
    fn group_key(&self) -> i64 {
        self.project_id
    }
    fn order_index(&self) -> f64 {
        self.order_index
    }
}

impl OrderedItem for Task {
    fn id(&self) -> i64 {
        self.id
    }
    fn group_key(&self) -> i64 {
        self.column_id
    }
    fn order_index(&self) -> f64 {
        self.order_index
    }
}

impl OrderedItem for Subtask {
    fn id(&self) -> i64 {
        self.id
    }
    fn group_key(&self) -> i64 {
        self.task_id
    }
    fn order_index(&self) -> f64 {
        self.order_index
    }
}

impl OrderedItem for Page {
    fn id(&self) -> i64 {
        self.id
    }
    fn group_key(&self) -> i64 {
        self.project_id
    }
    fn order_index(&self) -> f64 {
        self.order_index
    }
}

// ── Creation payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewColumn {
    pub project_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub column_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubtask {
    pub task_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPage {
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

// ── Partial updates ───────────────────────────────────────────────────
//
// Every field is optional; `None` leaves the stored value alone. Merging a
// later patch into an earlier one keeps the latest value per field.

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ColumnPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<f64>,
}

impl ColumnPatch {
    pub fn merge(&mut self, later: Self) {
        merge_field(&mut self.name, later.name);
        merge_field(&mut self.order_index, later.order_index);
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.order_index.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// `Some(None)` clears the due date; JSON `null` deserializes to that.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<f64>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn merge(&mut self, later: Self) {
        merge_field(&mut self.title, later.title);
        merge_field(&mut self.description, later.description);
        merge_field(&mut self.priority, later.priority);
        merge_field(&mut self.due_date, later.due_date);
        merge_field(&mut self.column_id, later.column_id);
        merge_field(&mut self.order_index, later.order_index);
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.column_id.is_none()
            && self.order_index.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubtaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<f64>,
}

impl SubtaskPatch {
    pub fn merge(&mut self, later: Self) {
        merge_field(&mut self.title, later.title);
        merge_field(&mut self.done, later.done);
        merge_field(&mut self.order_index, later.order_index);
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.done.is_none() && self.order_index.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<f64>,
}

impl PagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn merge(&mut self, later: Self) {
        merge_field(&mut self.title, later.title);
        merge_field(&mut self.content, later.content);
        merge_field(&mut self.order_index, later.order_index);
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.order_index.is_none()
    }
}

fn merge_field<T>(slot: &mut Option<T>, later: Option<T>) {
    if later.is_some() {
        *slot = later;
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub project: Project,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    #[serde(flatten)]
    pub column: StatusColumn,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<Subtask>,
}

/// Result of a positional move: the updated record, where it came from, and
/// any siblings that had to be renumbered to make room.
#[derive(Debug, Clone)]
pub struct MoveOutcome<T> {
    pub item: T,
    pub from_group: i64,
    pub renumbered: Vec<T>,
}

//! Fractional order-index reordering.
//!
//! Every manually sortable record carries a real-valued `order_index`. A
//! drag-and-drop move computes one new index from the destination neighbours
//! instead of renumbering the whole group, so a move costs a single write:
//!
//! | Destination                 | New index             |
//! |-----------------------------|-----------------------|
//! | empty group                 | `0`                   |
//! | before the first sibling    | `first - 1`           |
//! | after the last sibling      | `last + 1`            |
//! | between siblings `a` and `b`| `(a + b) / 2`         |
//!
//! Repeated bisection eventually runs out of `f64` precision. The calculator
//! reports that as [`OrderingError::PrecisionExhausted`] and callers renumber
//! the group with [`renumber`] before retrying.

mod list;

pub use list::{MoveUndo, OrderedList, sync_move};

use serde::{Deserialize, Serialize};

use crate::errors::OrderingError;

/// A record that participates in a manually sorted list.
pub trait OrderedItem {
    fn id(&self) -> i64;

    /// The group the item is sorted within (column, parent task, project).
    fn group_key(&self) -> i64;

    fn order_index(&self) -> f64;
}

/// Where a dragged item lands among its destination siblings.
///
/// Sibling positions are counted with the moved item already removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", content = "index", rename_all = "snake_case")]
pub enum DropTarget {
    First,
    /// Before the sibling currently at this position.
    Before(usize),
    Last,
}

impl DropTarget {
    /// Map an optional wire index (`None` means "append") onto a target.
    pub fn from_index(index: Option<usize>) -> Self {
        match index {
            None => Self::Last,
            Some(0) => Self::First,
            Some(i) => Self::Before(i),
        }
    }
}

/// The single update a move produces: group and index change together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    pub id: i64,
    pub group_key: i64,
    pub order_index: f64,
}

/// Compute the order index for an insertion into `siblings`, which must be
/// sorted ascending.
pub fn order_index_for(siblings: &[f64], target: DropTarget) -> Result<f64, OrderingError> {
    let (Some(&first), Some(&last)) = (siblings.first(), siblings.last()) else {
        return Ok(0.0);
    };

    match target {
        DropTarget::First | DropTarget::Before(0) => below(first),
        DropTarget::Last => above(last),
        DropTarget::Before(i) if i >= siblings.len() => above(last),
        DropTarget::Before(i) => midpoint(siblings[i - 1], siblings[i]),
    }
}

/// `first - 1`, unless the subtraction is absorbed at this magnitude.
fn below(first: f64) -> Result<f64, OrderingError> {
    let index = first - 1.0;
    if index < first {
        Ok(index)
    } else {
        Err(OrderingError::PrecisionExhausted {
            before: index,
            after: first,
        })
    }
}

/// `last + 1`, unless the addition is absorbed at this magnitude.
fn above(last: f64) -> Result<f64, OrderingError> {
    let index = last + 1.0;
    if index > last {
        Ok(index)
    } else {
        Err(OrderingError::PrecisionExhausted {
            before: last,
            after: index,
        })
    }
}

/// Index for a record appended to a group whose current maximum is `last`.
pub fn next_index(last: Option<f64>) -> f64 {
    last.map_or(0.0, |l| l + 1.0)
}

/// Midpoint of two neighbours, or an error when it would collide with one.
pub fn midpoint(before: f64, after: f64) -> Result<f64, OrderingError> {
    let mid = (before + after) / 2.0;
    if before < mid && mid < after {
        Ok(mid)
    } else {
        Err(OrderingError::PrecisionExhausted { before, after })
    }
}

/// Sort a group the way every view orders it: by index, ties by id.
pub fn sort_group<T: OrderedItem>(items: &mut [T]) {
    items.sort_by(|a, b| {
        a.order_index()
            .total_cmp(&b.order_index())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

/// Plan a move of `moved_id` into `to_group` at `target`.
///
/// `items` may contain records of any group; only the destination siblings
/// (minus the moved item) are considered.
pub fn plan_move<T: OrderedItem>(
    items: &[T],
    moved_id: i64,
    to_group: i64,
    target: DropTarget,
) -> Result<MovePlan, OrderingError> {
    if !items.iter().any(|item| item.id() == moved_id) {
        return Err(OrderingError::UnknownItem { id: moved_id });
    }

    let mut siblings: Vec<(i64, f64)> = items
        .iter()
        .filter(|item| item.group_key() == to_group && item.id() != moved_id)
        .map(|item| (item.id(), item.order_index()))
        .collect();
    siblings.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let indices: Vec<f64> = siblings.iter().map(|(_, idx)| *idx).collect();

    Ok(MovePlan {
        id: moved_id,
        group_key: to_group,
        order_index: order_index_for(&indices, target)?,
    })
}

/// Consecutive integer indices for an already sorted group, skipping items
/// whose index would not change.
pub fn renumber<T: OrderedItem>(sorted: &[T]) -> Vec<MovePlan> {
    sorted
        .iter()
        .enumerate()
        .filter(|(pos, item)| item.order_index() != *pos as f64)
        .map(|(pos, item)| MovePlan {
            id: item.id(),
            group_key: item.group_key(),
            order_index: pos as f64,
        })
        .collect()
}

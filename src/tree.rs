//! Pure operations over a statement's row tree.
//!
//! Every operation takes the rows by reference and returns a new tree. Targeting an
//! id that does not exist is a no-op that returns an unchanged copy; callers check
//! [`contains`] when they need to know whether anything happened.

use crate::schema::Row;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

pub fn find_row<'a>(rows: &'a [Row], id: &str) -> Option<&'a Row> {
    for row in rows {
        if row.id == id {
            return Some(row);
        }
        if let Some(found) = find_row(&row.children, id) {
            return Some(found);
        }
    }
    None
}

pub(crate) fn find_row_mut<'a>(rows: &'a mut [Row], id: &str) -> Option<&'a mut Row> {
    for row in rows.iter_mut() {
        if row.id == id {
            return Some(row);
        }
        if let Some(found) = find_row_mut(&mut row.children, id) {
            return Some(found);
        }
    }
    None
}

pub fn contains(rows: &[Row], id: &str) -> bool {
    find_row(rows, id).is_some()
}

/// `None` if `id` is absent, `Some(None)` for a top-level row, `Some(Some(parent))` otherwise.
pub fn find_parent_id(rows: &[Row], id: &str) -> Option<Option<String>> {
    if rows.iter().any(|r| r.id == id) {
        return Some(None);
    }
    fn search(rows: &[Row], id: &str) -> Option<String> {
        for row in rows {
            if row.children.iter().any(|c| c.id == id) {
                return Some(row.id.clone());
            }
            if let Some(parent) = search(&row.children, id) {
                return Some(parent);
            }
        }
        None
    }
    search(rows, id).map(Some)
}

/// The sibling list that contains `id`.
pub fn siblings_of<'a>(rows: &'a [Row], id: &str) -> Option<&'a [Row]> {
    if rows.iter().any(|r| r.id == id) {
        return Some(rows);
    }
    rows.iter().find_map(|r| siblings_of(&r.children, id))
}

pub fn map_subtree<F>(rows: &[Row], id: &str, f: F) -> Vec<Row>
where
    F: FnOnce(Row) -> Row,
{
    let mut out = rows.to_vec();
    if let Some(slot) = find_row_mut(&mut out, id) {
        *slot = f(slot.clone());
    }
    out
}

pub fn remove_subtree(rows: &[Row], id: &str) -> Vec<Row> {
    rows.iter()
        .filter(|r| r.id != id)
        .map(|r| {
            let mut row = r.clone();
            if !row.children.is_empty() {
                row.children = remove_subtree(&r.children, id);
            }
            row
        })
        .collect()
}

/// Inserts under `parent_id`, appending when `at_index` is `None`. Indices past the end append.
pub fn insert_child(rows: &[Row], parent_id: &str, child: Row, at_index: Option<usize>) -> Vec<Row> {
    let mut out = rows.to_vec();
    if let Some(parent) = find_row_mut(&mut out, parent_id) {
        let index = at_index
            .unwrap_or(parent.children.len())
            .min(parent.children.len());
        parent.children.insert(index, child);
    }
    out
}

/// Inserts a top-level row, clamping the index.
pub fn insert_at(rows: &[Row], index: usize, row: Row) -> Vec<Row> {
    let mut out = rows.to_vec();
    let index = index.min(out.len());
    out.insert(index, row);
    out
}

/// Swaps `id` with its neighbour among its siblings when `allow(row, neighbour)` agrees.
pub fn move_within_siblings<F>(rows: &[Row], id: &str, direction: Direction, allow: F) -> Option<Vec<Row>>
where
    F: Fn(&Row, &Row) -> bool,
{
    fn swap_in(list: &mut [Row], id: &str, direction: Direction, allow: &dyn Fn(&Row, &Row) -> bool) -> Option<bool> {
        if let Some(idx) = list.iter().position(|r| r.id == id) {
            let neighbour = match direction {
                Direction::Up => idx.checked_sub(1),
                Direction::Down => Some(idx + 1).filter(|n| *n < list.len()),
            };
            return Some(match neighbour {
                Some(n) if allow(&list[idx], &list[n]) => {
                    list.swap(idx, n);
                    true
                }
                _ => false,
            });
        }
        list.iter_mut()
            .find_map(|r| swap_in(&mut r.children, id, direction, allow))
    }

    let mut out = rows.to_vec();
    match swap_in(&mut out, id, direction, &allow) {
        Some(true) => Some(out),
        _ => None,
    }
}

/// Pre-order traversal.
pub fn flatten(rows: &[Row]) -> Vec<&Row> {
    let mut out = Vec::new();
    fn walk<'a>(rows: &'a [Row], out: &mut Vec<&'a Row>) {
        for row in rows {
            out.push(row);
            walk(&row.children, out);
        }
    }
    walk(rows, &mut out);
    out
}

pub fn collect_ids(rows: &[Row]) -> HashSet<String> {
    flatten(rows).into_iter().map(|r| r.id.clone()).collect()
}

pub fn count_rows(rows: &[Row]) -> usize {
    flatten(rows).len()
}

/// Applies `f` to every row, children first.
pub fn map_all<F>(rows: &[Row], f: &F) -> Vec<Row>
where
    F: Fn(Row) -> Row,
{
    rows.iter()
        .map(|r| {
            let mut row = r.clone();
            row.children = map_all(&r.children, f);
            f(row)
        })
        .collect()
}

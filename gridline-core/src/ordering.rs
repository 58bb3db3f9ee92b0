//! Sparse order values.
//!
//! Rows and columns carry `f64` order values so that an item can always be
//! placed between two neighbours without renumbering the rest.

use crate::{Column, RowHeader};

/// Order for an item placed between `before` and `after`.
///
/// Midpoint between two neighbours, neighbour ± 1 at an edge, 1.0 alone.
pub fn order_between(before: Option<f64>, after: Option<f64>) -> f64 {
    match (before, after) {
        (Some(b), Some(a)) => b + (a - b) / 2.0,
        (Some(b), None) => b + 1.0,
        (None, Some(a)) => a - 1.0,
        (None, None) => 1.0,
    }
}

/// Index at which a row with `order_value` belongs.
///
/// Existing rows with an equal order stay ahead of the new one. Headers are
/// expected in ascending order; out-of-order input falls back to a scan.
pub fn insertion_index_by_order(order_value: f64, row_headers: &[RowHeader]) -> usize {
    if is_sorted_by(row_headers, |h| h.order_value) {
        row_headers.partition_point(|h| h.order_value <= order_value)
    } else {
        row_headers
            .iter()
            .rposition(|h| h.order_value <= order_value)
            .map_or(0, |i| i + 1)
    }
}

/// Index at which a column with `new_order` belongs.
pub fn column_insertion_index(columns: &[Column], new_order: f64) -> usize {
    if is_sorted_by(columns, |c| c.order) {
        columns.partition_point(|c| c.order <= new_order)
    } else {
        columns
            .iter()
            .rposition(|c| c.order <= new_order)
            .map_or(0, |i| i + 1)
    }
}

/// Rewrite row/display indices after an insert or removal.
pub fn renumber(row_headers: &mut [RowHeader]) {
    for (index, header) in row_headers.iter_mut().enumerate() {
        header.row_index = index;
        header.display_index = index + 1;
    }
}

fn is_sorted_by<T>(items: &[T], key: impl Fn(&T) -> f64) -> bool {
    items.windows(2).all(|w| key(&w[0]) <= key(&w[1]))
}

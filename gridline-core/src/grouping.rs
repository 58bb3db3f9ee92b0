//! Group points → renderable linear rows.
//!
//! The record list is the arena; the linear projection is a view over it.
//! The rendering layer addresses rows by linear index, mutations address
//! records by real index, and [`GroupProjection`] is the one table that
//! translates between the two.
//!
//! ```text
//!  group points            linear rows           real_to_linear
//!  Header(0, "A", 2)  ──►  0 GroupHeader "A"
//!  Leaf               ──►  1 Record(real 0)      [0] = Some(1)
//!  Leaf               ──►  2 Record(real 1)      [1] = Some(2)
//!                          3 Append "A"
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-computed node of a grouping query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupPoint {
    Header {
        depth: u32,
        /// Unique key of the group within the view.
        key: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        count: usize,
        #[serde(default)]
        collapsed: bool,
    },
    /// One member record, consumed in real-index order.
    Leaf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinearRowKind {
    GroupHeader {
        key: String,
        value: Value,
        depth: u32,
        count: usize,
        collapsed: bool,
    },
    Record {
        real_index: usize,
    },
    /// Synthetic "add a row here" row closing a group.
    Append {
        group_key: Option<String>,
        depth: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    pub kind: LinearRowKind,
    pub top: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupProjection {
    pub rows: Vec<LinearRow>,
    /// `None` for records hidden inside a collapsed group.
    pub real_to_linear: Vec<Option<usize>>,
}

struct OpenGroup {
    key: String,
    depth: u32,
    members_hidden: bool,
    has_child_groups: bool,
}

struct Builder {
    rows: Vec<LinearRow>,
    real_to_linear: Vec<Option<usize>>,
    top: f64,
    include_append_row: bool,
    row_height: f64,
}

impl Builder {
    fn push(&mut self, kind: LinearRowKind, height: f64) -> usize {
        self.rows.push(LinearRow {
            kind,
            top: self.top,
            height,
        });
        self.top += height;
        self.rows.len() - 1
    }

    fn close(&mut self, group: OpenGroup) {
        if self.include_append_row && !group.has_child_groups && !group.members_hidden {
            self.push(
                LinearRowKind::Append {
                    group_key: Some(group.key),
                    depth: group.depth,
                },
                self.row_height,
            );
        }
    }
}

impl GroupProjection {
    /// Project group points with the server's collapsed flags.
    pub fn project(
        points: &[GroupPoint],
        include_append_row: bool,
        header_height: f64,
        row_height: f64,
    ) -> Self {
        Self::project_with_collapsed(points, include_append_row, header_height, row_height, &HashSet::new())
    }

    /// Project group points, additionally collapsing the groups whose keys
    /// the user collapsed locally.
    pub fn project_with_collapsed(
        points: &[GroupPoint],
        include_append_row: bool,
        header_height: f64,
        row_height: f64,
        collapsed_keys: &HashSet<String>,
    ) -> Self {
        let mut b = Builder {
            rows: Vec::with_capacity(points.len() + 1),
            real_to_linear: Vec::new(),
            top: 0.0,
            include_append_row,
            row_height,
        };
        let mut stack: Vec<OpenGroup> = Vec::new();

        for point in points {
            match point {
                GroupPoint::Header {
                    depth,
                    key,
                    value,
                    count,
                    collapsed,
                } => {
                    while stack.last().is_some_and(|g| g.depth >= *depth) {
                        if let Some(done) = stack.pop() {
                            b.close(done);
                        }
                    }
                    let ancestor_hidden = stack.last().is_some_and(|g| g.members_hidden);
                    if let Some(parent) = stack.last_mut() {
                        parent.has_child_groups = true;
                    }
                    let collapsed = *collapsed || collapsed_keys.contains(key);
                    if !ancestor_hidden {
                        b.push(
                            LinearRowKind::GroupHeader {
                                key: key.clone(),
                                value: value.clone(),
                                depth: *depth,
                                count: *count,
                                collapsed,
                            },
                            header_height,
                        );
                    }
                    stack.push(OpenGroup {
                        key: key.clone(),
                        depth: *depth,
                        members_hidden: ancestor_hidden || collapsed,
                        has_child_groups: false,
                    });
                }
                GroupPoint::Leaf => {
                    let real_index = b.real_to_linear.len();
                    if stack.last().is_some_and(|g| g.members_hidden) {
                        b.real_to_linear.push(None);
                    } else {
                        let linear = b.push(LinearRowKind::Record { real_index }, row_height);
                        b.real_to_linear.push(Some(linear));
                    }
                }
            }
        }
        while let Some(done) = stack.pop() {
            b.close(done);
        }

        Self {
            rows: b.rows,
            real_to_linear: b.real_to_linear,
        }
    }

    /// Identity projection for ungrouped views.
    pub fn flat(record_count: usize, row_height: f64, include_append_row: bool) -> Self {
        let mut rows = Vec::with_capacity(record_count + 1);
        for real_index in 0..record_count {
            rows.push(LinearRow {
                kind: LinearRowKind::Record { real_index },
                top: real_index as f64 * row_height,
                height: row_height,
            });
        }
        if include_append_row {
            rows.push(LinearRow {
                kind: LinearRowKind::Append {
                    group_key: None,
                    depth: 0,
                },
                top: record_count as f64 * row_height,
                height: row_height,
            });
        }
        Self {
            rows,
            real_to_linear: (0..record_count).map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Real record index behind a linear row, if it is a record row.
    pub fn linear_to_real(&self, linear: usize) -> Option<usize> {
        match self.rows.get(linear)?.kind {
            LinearRowKind::Record { real_index } => Some(real_index),
            _ => None,
        }
    }

    pub fn real_to_linear(&self, real: usize) -> Option<usize> {
        self.real_to_linear.get(real).copied().flatten()
    }

    pub fn total_height(&self) -> f64 {
        self.rows.last().map_or(0.0, |r| r.top + r.height)
    }
}

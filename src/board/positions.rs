//! Position reconciler: keeps sibling rows in a dense `0..n-1` ordering.
//!
//! Every function here takes a plain `&Connection` and expects to run inside
//! a transaction opened by the caller, so that a move (close gap, open gap,
//! write item) commits or rolls back as a unit.
//!
//! Both ordered tables carry a partial unique index over
//! `(group, position) WHERE deleted_at IS NULL AND position >= 0`. SQLite
//! checks that index row by row during an `UPDATE`, so shifting a range by
//! one would collide with its neighbour half-way through. Shifts are
//! therefore two-phase: affected rows are first mapped to distinct negative
//! positions, then flipped back to their final non-negative values.

use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::TrackerError;

/// Position a row holds while it is being moved.
const PARKED: i64 = -1;

/// Which ordered table a reconciler call operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderedKind {
    /// Applications, grouped by `stage_id`.
    Application,
    /// Stages, grouped by `pipeline_id`.
    Stage,
}

impl OrderedKind {
    fn table(&self) -> &'static str {
        match self {
            Self::Application => "applications",
            Self::Stage => "stages",
        }
    }

    fn group_column(&self) -> &'static str {
        match self {
            Self::Application => "stage_id",
            Self::Stage => "pipeline_id",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Stage => "Stage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub group_id: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub from: Placement,
    pub to: Placement,
}

impl MoveOutcome {
    pub fn changed_group(&self) -> bool {
        self.from.group_id != self.to.group_id
    }
}

/// One entry of a bulk reorder payload. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedItem {
    pub id: String,
    pub rank: i64,
}

/// Current group and position of an active row.
pub fn placement(conn: &Connection, kind: OrderedKind, id: &str) -> Result<Placement> {
    let sql = format!(
        "SELECT {g}, position FROM {t} WHERE id = ?1 AND deleted_at IS NULL",
        g = kind.group_column(),
        t = kind.table(),
    );
    let found = conn
        .query_row(&sql, params![id], |row| {
            Ok(Placement {
                group_id: row.get(0)?,
                position: row.get(1)?,
            })
        })
        .optional()
        .with_context(|| format!("Failed to read {} placement", kind.entity()))?;
    match found {
        Some(p) => Ok(p),
        None => Err(TrackerError::not_found(kind.entity(), id).into()),
    }
}

/// Number of active rows in a group, ignoring `exclude_id`.
pub fn active_count(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
    exclude_id: &str,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {t} WHERE {g} = ?1 AND deleted_at IS NULL AND id != ?2",
        t = kind.table(),
        g = kind.group_column(),
    );
    conn.query_row(&sql, params![group_id, exclude_id], |row| row.get(0))
        .context("Failed to count active rows")
}

/// Append slot for a group: `max + 1`, or `0` when the group is empty.
pub fn next_position(conn: &Connection, kind: OrderedKind, group_id: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(position), -1) FROM {t} WHERE {g} = ?1 AND deleted_at IS NULL AND position >= 0",
        t = kind.table(),
        g = kind.group_column(),
    );
    let max: i64 = conn
        .query_row(&sql, params![group_id], |row| row.get(0))
        .context("Failed to get max position")?;
    Ok(max + 1)
}

/// Ids and positions of a group's active rows, in order.
pub fn group_positions(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
) -> Result<Vec<(String, i64)>> {
    let sql = format!(
        "SELECT id, position FROM {t} WHERE {g} = ?1 AND deleted_at IS NULL ORDER BY position",
        t = kind.table(),
        g = kind.group_column(),
    );
    let mut stmt = conn.prepare(&sql).context("Failed to prepare group_positions")?;
    let rows = stmt
        .query_map(params![group_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .context("Failed to query group positions")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("Failed to read position row")?);
    }
    Ok(out)
}

/// Shift every active row in `group_id` at or after `from` by `delta`,
/// skipping `exclude_id`. Returns the number of rows moved.
fn shift(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
    from: i64,
    delta: i64,
    exclude_id: &str,
) -> Result<usize> {
    let (t, g) = (kind.table(), kind.group_column());
    let marked = conn
        .execute(
            &format!(
                "UPDATE {t} SET position = -(position + ?1) - 1
                 WHERE {g} = ?2 AND deleted_at IS NULL AND position >= ?3 AND id != ?4"
            ),
            params![delta, group_id, from, exclude_id],
        )
        .context("Failed to mark shifted positions")?;
    if marked == 0 {
        return Ok(0);
    }
    conn.execute(
        &format!(
            "UPDATE {t} SET position = -position - 1
             WHERE {g} = ?1 AND deleted_at IS NULL AND position < 0 AND id != ?2"
        ),
        params![group_id, exclude_id],
    )
    .context("Failed to settle shifted positions")?;
    Ok(marked)
}

fn resolve_target(requested: Option<i64>, len: i64) -> Result<i64> {
    match requested {
        Some(p) if p < 0 => Err(TrackerError::validation("position must be >= 0").into()),
        Some(p) => Ok(p.min(len)),
        None => Ok(len),
    }
}

/// Open a slot for a new row in `group_id` and return its position.
///
/// Without a requested position the row is appended. A requested position
/// past the end is clamped to the end.
pub fn insert_slot(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
    requested: Option<i64>,
) -> Result<i64> {
    let len = active_count(conn, kind, group_id, "")?;
    let position = resolve_target(requested, len)?;
    shift(conn, kind, group_id, position, 1, "")?;
    Ok(position)
}

/// Close the slot left behind by a row that has just been soft-deleted.
pub fn close_slot(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
    vacated: i64,
    removed_id: &str,
) -> Result<()> {
    shift(conn, kind, group_id, vacated + 1, -1, removed_id)?;
    Ok(())
}

/// Move a row to `target_group` (default: its current group) at
/// `target_position` (default: append).
///
/// Callers validate that the target group is a legal sibling group before
/// calling; this function only maintains the ordering.
pub fn move_item(
    conn: &Connection,
    kind: OrderedKind,
    id: &str,
    target_group: Option<&str>,
    target_position: Option<i64>,
) -> Result<MoveOutcome> {
    if let Some(p) = target_position {
        if p < 0 {
            return Err(TrackerError::validation("position must be >= 0").into());
        }
    }
    let from = placement(conn, kind, id)?;
    let to_group = target_group.unwrap_or(&from.group_id).to_string();
    let (t, g) = (kind.table(), kind.group_column());

    conn.execute(
        &format!("UPDATE {t} SET position = ?1 WHERE id = ?2"),
        params![PARKED, id],
    )
    .context("Failed to park moved row")?;

    shift(conn, kind, &from.group_id, from.position + 1, -1, id)?;

    let len = active_count(conn, kind, &to_group, id)?;
    let to_position = resolve_target(target_position, len)?;
    shift(conn, kind, &to_group, to_position, 1, id)?;

    conn.execute(
        &format!(
            "UPDATE {t} SET {g} = ?1, position = ?2, updated_at = datetime('now') WHERE id = ?3"
        ),
        params![to_group, to_position, id],
    )
    .context("Failed to write moved row")?;

    tracing::debug!(
        entity = kind.entity(),
        id,
        from_group = %from.group_id,
        from_position = from.position,
        to_group = %to_group,
        to_position,
        "reconciled move"
    );

    Ok(MoveOutcome {
        from,
        to: Placement {
            group_id: to_group,
            position: to_position,
        },
    })
}

/// Check the shape of a bulk reorder payload before touching the database.
pub fn validate_ranks(items: &[RankedItem]) -> Result<(), TrackerError> {
    if items.is_empty() {
        return Err(TrackerError::validation("items must not be empty"));
    }
    if items.iter().any(|i| i.rank < 1) {
        return Err(TrackerError::validation("position must be >= 1"));
    }
    let mut ranks = HashSet::new();
    if !items.iter().all(|i| ranks.insert(i.rank)) {
        return Err(TrackerError::validation(
            "Duplicate positions in reorder payload",
        ));
    }
    let mut ids = HashSet::new();
    if !items.iter().all(|i| ids.insert(i.id.as_str())) {
        return Err(TrackerError::validation("Duplicate ids in reorder payload"));
    }
    Ok(())
}

/// Rewrite a whole group in the order given by `items`' ranks.
///
/// The payload must name every active row in the group exactly once. Final
/// positions are dense: the lowest rank lands on 0.
pub fn reorder_group(
    conn: &Connection,
    kind: OrderedKind,
    group_id: &str,
    items: &[RankedItem],
) -> Result<()> {
    validate_ranks(items)?;

    let current: HashSet<String> = group_positions(conn, kind, group_id)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    if items.iter().any(|i| !current.contains(&i.id)) {
        return Err(TrackerError::validation(format!(
            "Some ids are invalid or do not belong to this {}",
            match kind {
                OrderedKind::Application => "stage",
                OrderedKind::Stage => "pipeline",
            }
        ))
        .into());
    }
    if items.len() != current.len() {
        return Err(TrackerError::validation(format!(
            "Reorder payload must list all {} active items",
            current.len()
        ))
        .into());
    }

    let mut sorted: Vec<&RankedItem> = items.iter().collect();
    sorted.sort_by_key(|i| i.rank);

    let t = kind.table();
    let temp_sql = format!("UPDATE {t} SET position = ?1 WHERE id = ?2");
    for (idx, item) in sorted.iter().enumerate() {
        conn.execute(&temp_sql, params![-(idx as i64) - 1, item.id])
            .context("Failed to write temporary position")?;
    }
    let final_sql =
        format!("UPDATE {t} SET position = ?1, updated_at = datetime('now') WHERE id = ?2");
    for (idx, item) in sorted.iter().enumerate() {
        conn.execute(&final_sql, params![idx as i64, item.id])
            .context("Failed to write final position")?;
    }

    tracing::debug!(entity = kind.entity(), group_id, count = sorted.len(), "reordered group");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE applications (
                id TEXT PRIMARY KEY,
                stage_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX idx_app_pos ON applications(stage_id, position)
                WHERE deleted_at IS NULL AND position >= 0;
            CREATE TABLE stages (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX idx_stage_pos ON stages(pipeline_id, position)
                WHERE deleted_at IS NULL AND position >= 0;
            ",
        )
        .unwrap();
        conn
    }

    fn add(conn: &Connection, kind: OrderedKind, id: &str, group: &str) {
        let pos = insert_slot(conn, kind, group, None).unwrap();
        let sql = format!(
            "INSERT INTO {} (id, {}, position) VALUES (?1, ?2, ?3)",
            kind.table(),
            kind.group_column()
        );
        conn.execute(&sql, params![id, group, pos]).unwrap();
    }

    fn order(conn: &Connection, kind: OrderedKind, group: &str) -> Vec<String> {
        let rows = group_positions(conn, kind, group).unwrap();
        for (idx, (_, pos)) in rows.iter().enumerate() {
            assert_eq!(*pos, idx as i64, "positions must be dense in {group}");
        }
        rows.into_iter().map(|(id, _)| id).collect()
    }

    const APP: OrderedKind = OrderedKind::Application;

    #[test]
    fn test_append_assigns_dense_positions() {
        let conn = setup();
        assert_eq!(next_position(&conn, APP, "A").unwrap(), 0);
        add(&conn, APP, "a", "A");
        add(&conn, APP, "b", "A");
        assert_eq!(next_position(&conn, APP, "A").unwrap(), 2);
        assert_eq!(order(&conn, APP, "A"), vec!["a", "b"]);
    }

    #[test]
    fn test_move_to_end_of_other_group() {
        let conn = setup();
        for id in ["x", "a1", "a2"] {
            add(&conn, APP, id, "A");
        }
        for id in ["b1", "b2"] {
            add(&conn, APP, id, "B");
        }

        let outcome = move_item(&conn, APP, "x", Some("B"), None).unwrap();
        assert!(outcome.changed_group());
        assert_eq!(outcome.from.position, 0);
        assert_eq!(outcome.to.position, 2);

        assert_eq!(order(&conn, APP, "A"), vec!["a1", "a2"]);
        assert_eq!(order(&conn, APP, "B"), vec!["b1", "b2", "x"]);
    }

    #[test]
    fn test_move_into_middle_of_other_group() {
        let conn = setup();
        add(&conn, APP, "x", "A");
        for id in ["b0", "b1", "b2"] {
            add(&conn, APP, id, "B");
        }
        move_item(&conn, APP, "x", Some("B"), Some(1)).unwrap();
        assert_eq!(order(&conn, APP, "B"), vec!["b0", "x", "b1", "b2"]);
        assert!(order(&conn, APP, "A").is_empty());
    }

    #[test]
    fn test_move_within_group_forward_and_back() {
        let conn = setup();
        for id in ["a", "b", "c", "d"] {
            add(&conn, APP, id, "A");
        }
        move_item(&conn, APP, "a", None, Some(2)).unwrap();
        assert_eq!(order(&conn, APP, "A"), vec!["b", "c", "a", "d"]);
        move_item(&conn, APP, "d", None, Some(0)).unwrap();
        assert_eq!(order(&conn, APP, "A"), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_move_to_own_position_is_noop() {
        let conn = setup();
        for id in ["a", "b", "c"] {
            add(&conn, APP, id, "A");
        }
        let before = group_positions(&conn, APP, "A").unwrap();
        let outcome = move_item(&conn, APP, "b", Some("A"), Some(1)).unwrap();
        assert!(!outcome.changed_group());
        assert_eq!(group_positions(&conn, APP, "A").unwrap(), before);
    }

    #[test]
    fn test_move_without_target_appends_in_same_group() {
        let conn = setup();
        for id in ["a", "b", "c"] {
            add(&conn, APP, id, "A");
        }
        let outcome = move_item(&conn, APP, "a", None, None).unwrap();
        assert_eq!(outcome.to.position, 2);
        assert_eq!(order(&conn, APP, "A"), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_position_past_end_is_clamped() {
        let conn = setup();
        for id in ["a", "b"] {
            add(&conn, APP, id, "A");
        }
        add(&conn, APP, "x", "B");
        let outcome = move_item(&conn, APP, "x", Some("A"), Some(99)).unwrap();
        assert_eq!(outcome.to.position, 2);
        assert_eq!(order(&conn, APP, "A"), vec!["a", "b", "x"]);
    }

    #[test]
    fn test_negative_position_rejected() {
        let conn = setup();
        add(&conn, APP, "a", "A");
        let err = move_item(&conn, APP, "a", None, Some(-1)).unwrap_err();
        assert!(matches!(
            TrackerError::find(&err),
            Some(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_or_deleted_item_not_found() {
        let conn = setup();
        add(&conn, APP, "a", "A");
        conn.execute(
            "UPDATE applications SET deleted_at = datetime('now') WHERE id = 'a'",
            [],
        )
        .unwrap();
        for id in ["a", "ghost"] {
            let err = move_item(&conn, APP, id, None, None).unwrap_err();
            assert!(matches!(
                TrackerError::find(&err),
                Some(TrackerError::NotFound { .. })
            ));
        }
    }

    #[test]
    fn test_insert_slot_opens_gap() {
        let conn = setup();
        for id in ["a", "b"] {
            add(&conn, APP, id, "A");
        }
        let pos = insert_slot(&conn, APP, "A", Some(0)).unwrap();
        assert_eq!(pos, 0);
        conn.execute(
            "INSERT INTO applications (id, stage_id, position) VALUES ('n', 'A', 0)",
            [],
        )
        .unwrap();
        assert_eq!(order(&conn, APP, "A"), vec!["n", "a", "b"]);
    }

    #[test]
    fn test_close_slot_after_soft_delete() {
        let conn = setup();
        for id in ["a", "b", "c"] {
            add(&conn, APP, id, "A");
        }
        conn.execute(
            "UPDATE applications SET deleted_at = datetime('now') WHERE id = 'a'",
            [],
        )
        .unwrap();
        close_slot(&conn, APP, "A", 0, "a").unwrap();
        assert_eq!(order(&conn, APP, "A"), vec!["b", "c"]);
        assert_eq!(next_position(&conn, APP, "A").unwrap(), 2);
    }

    #[test]
    fn test_reorder_group_follows_ranks() {
        let conn = setup();
        for id in ["c", "a", "b"] {
            add(&conn, OrderedKind::Stage, id, "P");
        }
        let items = vec![
            RankedItem { id: "a".into(), rank: 1 },
            RankedItem { id: "b".into(), rank: 2 },
            RankedItem { id: "c".into(), rank: 3 },
        ];
        reorder_group(&conn, OrderedKind::Stage, "P", &items).unwrap();
        assert_eq!(order(&conn, OrderedKind::Stage, "P"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reorder_rejects_duplicate_ranks() {
        let items = vec![
            RankedItem { id: "a".into(), rank: 1 },
            RankedItem { id: "b".into(), rank: 2 },
            RankedItem { id: "c".into(), rank: 2 },
        ];
        assert_eq!(
            validate_ranks(&items),
            Err(TrackerError::validation(
                "Duplicate positions in reorder payload"
            ))
        );
    }

    #[test]
    fn test_reorder_rejects_empty_and_zero_rank() {
        assert!(validate_ranks(&[]).is_err());
        let zero = vec![RankedItem { id: "a".into(), rank: 0 }];
        assert!(validate_ranks(&zero).is_err());
    }

    #[test]
    fn test_reorder_rejects_foreign_and_partial_payloads() {
        let conn = setup();
        for id in ["a", "b"] {
            add(&conn, OrderedKind::Stage, id, "P");
        }
        add(&conn, OrderedKind::Stage, "z", "Q");

        let foreign = vec![
            RankedItem { id: "a".into(), rank: 1 },
            RankedItem { id: "z".into(), rank: 2 },
        ];
        assert!(reorder_group(&conn, OrderedKind::Stage, "P", &foreign).is_err());

        let partial = vec![RankedItem { id: "a".into(), rank: 1 }];
        assert!(reorder_group(&conn, OrderedKind::Stage, "P", &partial).is_err());

        assert_eq!(order(&conn, OrderedKind::Stage, "P"), vec!["a", "b"]);
    }

    #[test]
    fn test_many_random_moves_stay_dense() {
        let conn = setup();
        let groups = ["A", "B", "C"];
        for i in 0..9 {
            add(&conn, APP, &format!("i{i}"), groups[i % 3]);
        }
        // Deterministic pseudo-random walk over (item, group, position).
        let mut seed: u64 = 42;
        for _ in 0..60 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let item = format!("i{}", (seed >> 33) % 9);
            let group = groups[((seed >> 40) % 3) as usize];
            let pos = ((seed >> 50) % 5) as i64;
            move_item(&conn, APP, &item, Some(group), Some(pos)).unwrap();
            let total: usize = groups.iter().map(|g| order(&conn, APP, g).len()).sum();
            assert_eq!(total, 9);
        }
    }
}

//! Position ledger: predicate-scoped bulk shifts over card and board rows.
//!
//! Every mutating operation keeps the invariant that live positions within a
//! scope are exactly `[0..N-1]`. Compound operations (insert + shift, the
//! two-sided cross-scope move) run inside a single transaction and bump the
//! `rev` stamp of every touched lane, so interleaved writers cannot commit a
//! half-applied shift. Affected-row counts are diagnostics only and never
//! verify the invariant.

use log::debug;
use rusqlite::{Connection, params};

use super::repo::BoardRepo;
use crate::error::Result;
use crate::model::{Card, Scope};

impl BoardRepo {
    /// Insert `card` at `pos`, shifting followers up by one.
    ///
    /// Returns the new rev of the target lane.
    pub fn insert_card_at(&self, card: &Card, pos: i64) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let scope = card.scope();
        let shifted = shift_for_insert(&tx, &scope, pos, &card.id)?;
        tx.execute(
            "INSERT INTO cards (id, board_id, lane_id, position, title, description, tags, due_at, archived, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                card.id,
                card.board_id,
                card.lane_id,
                pos,
                card.title,
                card.description,
                serde_json::to_string(&card.tags)?,
                card.due_at.map(|d| d.timestamp()),
                card.created_at.timestamp(),
            ],
        )?;
        let rev = bump_rev(&tx, &scope.lane_id)?;

        tx.commit()?;
        debug!("insert {} at {} in {:?}: shifted {} rows", card.id, pos, scope, shifted);
        Ok(rev)
    }

    /// Archive a card, closing the gap it leaves behind.
    ///
    /// Returns the new rev of the lane it left.
    pub fn archive_card_at(&self, card_id: &str, scope: &Scope, pos: i64) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("UPDATE cards SET archived = 1 WHERE id = ?", [card_id])?;
        let shifted = shift_for_remove(&tx, scope, pos, card_id)?;
        let rev = bump_rev(&tx, &scope.lane_id)?;

        tx.commit()?;
        debug!("archive {} at {} in {:?}: shifted {} rows", card_id, pos, scope, shifted);
        Ok(rev)
    }

    /// Move a card within its scope using the directional range shift.
    ///
    /// Moving down (`new < old`) lifts `[new, old)` by one; moving up
    /// (`new > old`) lowers `(old, new]` by one.
    pub fn move_card_within(
        &self,
        card_id: &str,
        scope: &Scope,
        old_pos: i64,
        new_pos: i64,
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let shifted = if new_pos < old_pos {
            tx.execute(
                "UPDATE cards SET position = position + 1
                 WHERE board_id = ? AND lane_id = ? AND archived = 0
                   AND position >= ? AND position < ? AND id <> ?",
                params![scope.board_id, scope.lane_id, new_pos, old_pos, card_id],
            )?
        } else {
            tx.execute(
                "UPDATE cards SET position = position - 1
                 WHERE board_id = ? AND lane_id = ? AND archived = 0
                   AND position > ? AND position <= ? AND id <> ?",
                params![scope.board_id, scope.lane_id, old_pos, new_pos, card_id],
            )?
        };
        tx.execute(
            "UPDATE cards SET position = ? WHERE id = ?",
            params![new_pos, card_id],
        )?;
        let rev = bump_rev(&tx, &scope.lane_id)?;

        tx.commit()?;
        debug!(
            "move {} {} -> {} in {:?}: shifted {} rows",
            card_id, old_pos, new_pos, scope, shifted
        );
        Ok(rev)
    }

    /// Move a card to another scope: the insert shift in the target followed
    /// by the remove shift in the source, committed as one unit.
    ///
    /// Returns the new revs of (source lane, target lane).
    pub fn move_card_across(
        &self,
        card_id: &str,
        from_scope: &Scope,
        from_pos: i64,
        to_scope: &Scope,
        to_pos: i64,
    ) -> Result<(i64, i64)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = shift_for_insert(&tx, to_scope, to_pos, card_id)?;
        let removed = shift_for_remove(&tx, from_scope, from_pos, card_id)?;
        tx.execute(
            "UPDATE cards SET board_id = ?, lane_id = ?, position = ? WHERE id = ?",
            params![to_scope.board_id, to_scope.lane_id, to_pos, card_id],
        )?;
        let from_rev = bump_rev(&tx, &from_scope.lane_id)?;
        let to_rev = bump_rev(&tx, &to_scope.lane_id)?;

        tx.commit()?;
        debug!(
            "move {} {:?}@{} -> {:?}@{}: shifted {}+{} rows",
            card_id, from_scope, from_pos, to_scope, to_pos, inserted, removed
        );
        Ok((from_rev, to_rev))
    }

    /// Move a board within its project's ordering.
    pub fn move_board_within(&self, board_id: &str, project_id: &str, old_pos: i64, new_pos: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if new_pos < old_pos {
            tx.execute(
                "UPDATE boards SET position = position + 1
                 WHERE project_id = ? AND archived = 0
                   AND position >= ? AND position < ? AND id <> ?",
                params![project_id, new_pos, old_pos, board_id],
            )?;
        } else {
            tx.execute(
                "UPDATE boards SET position = position - 1
                 WHERE project_id = ? AND archived = 0
                   AND position > ? AND position <= ? AND id <> ?",
                params![project_id, old_pos, new_pos, board_id],
            )?;
        }
        tx.execute(
            "UPDATE boards SET position = ? WHERE id = ?",
            params![new_pos, board_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Move a board to another project, repositioning both orderings.
    pub fn move_board_across(
        &self,
        board_id: &str,
        from_project: &str,
        from_pos: i64,
        to_project: &str,
        to_pos: i64,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE boards SET position = position + 1
             WHERE project_id = ? AND archived = 0 AND position >= ? AND id <> ?",
            params![to_project, to_pos, board_id],
        )?;
        tx.execute(
            "UPDATE boards SET position = position - 1
             WHERE project_id = ? AND archived = 0 AND position > ? AND id <> ?",
            params![from_project, from_pos, board_id],
        )?;
        tx.execute(
            "UPDATE boards SET project_id = ?, position = ? WHERE id = ?",
            params![to_project, to_pos, board_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Close the gap left by an archived board.
    pub fn archive_board_at(&self, board_id: &str, project_id: &str, pos: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("UPDATE boards SET archived = 1 WHERE id = ?", [board_id])?;
        tx.execute(
            "UPDATE boards SET position = position - 1
             WHERE project_id = ? AND archived = 0 AND position > ? AND id <> ?",
            params![project_id, pos, board_id],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// `position += 1` for live cards at or after `pos`, excluding the row being
/// placed so it is never double-adjusted.
fn shift_for_insert(conn: &Connection, scope: &Scope, pos: i64, exclude_id: &str) -> Result<usize> {
    let n = conn.execute(
        "UPDATE cards SET position = position + 1
         WHERE board_id = ? AND lane_id = ? AND archived = 0 AND position >= ? AND id <> ?",
        params![scope.board_id, scope.lane_id, pos, exclude_id],
    )?;
    Ok(n)
}

/// `position -= 1` for live cards strictly after `pos`; the removed row is
/// already detached.
fn shift_for_remove(conn: &Connection, scope: &Scope, pos: i64, exclude_id: &str) -> Result<usize> {
    let n = conn.execute(
        "UPDATE cards SET position = position - 1
         WHERE board_id = ? AND lane_id = ? AND archived = 0 AND position > ? AND id <> ?",
        params![scope.board_id, scope.lane_id, pos, exclude_id],
    )?;
    Ok(n)
}

fn bump_rev(conn: &Connection, lane_id: &str) -> Result<i64> {
    conn.execute("UPDATE lanes SET rev = rev + 1 WHERE id = ?", [lane_id])?;
    let rev = conn.query_row("SELECT rev FROM lanes WHERE id = ?", [lane_id], |row| {
        row.get(0)
    })?;
    Ok(rev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Board, Lane, PermissionOverrides, Project};
    use crate::store::init_database;
    use chrono::Utc;

    fn setup() -> (BoardRepo, Scope, Scope) {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = BoardRepo::new(conn);

        let owner = repo.get_or_create_user("owner@example.com").unwrap();
        repo.insert_project(&Project {
            id: "p1".into(),
            title: "Launch".into(),
            owner_user_id: owner,
            team_id: None,
            invite_only: false,
            member_ids: vec![],
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        repo.insert_board(&Board {
            id: "b1".into(),
            project_id: "p1".into(),
            title: "Sprint".into(),
            position: 0,
            lane_order: vec!["todo".into(), "doing".into()],
            archived: false,
            created_at: Utc::now(),
        })
        .unwrap();
        for lane_id in ["todo", "doing"] {
            repo.insert_lane(&Lane {
                id: lane_id.into(),
                board_id: "b1".into(),
                title: lane_id.into(),
                archived: false,
                rev: 0,
            })
            .unwrap();
        }

        (repo, Scope::new("b1", "todo"), Scope::new("b1", "doing"))
    }

    fn card(id: &str, scope: &Scope) -> Card {
        Card {
            id: id.into(),
            board_id: scope.board_id.clone(),
            lane_id: scope.lane_id.clone(),
            position: 0,
            title: id.to_uppercase(),
            description: String::new(),
            tags: vec![],
            due_at: None,
            archived: false,
            created_at: Utc::now(),
        }
    }

    fn seed(repo: &BoardRepo, scope: &Scope, ids: &[&str]) {
        for (i, id) in ids.iter().enumerate() {
            repo.insert_card_at(&card(id, scope), i as i64).unwrap();
        }
    }

    fn ordering(repo: &BoardRepo, scope: &Scope) -> Vec<(String, i64)> {
        repo.cards_in_scope(&scope.board_id, &scope.lane_id)
            .unwrap()
            .into_iter()
            .map(|c| (c.id, c.position))
            .collect()
    }

    fn assert_contiguous(repo: &BoardRepo, scope: &Scope) {
        let cards = ordering(repo, scope);
        for (i, (_, pos)) in cards.iter().enumerate() {
            assert_eq!(*pos, i as i64, "gap or duplicate in {:?}: {:?}", scope, cards);
        }
    }

    #[test]
    fn insert_in_middle_shifts_followers() {
        let (repo, todo, _) = setup();
        seed(&repo, &todo, &["a", "b"]);

        repo.insert_card_at(&card("x", &todo), 1).unwrap();

        assert_eq!(
            ordering(&repo, &todo),
            vec![("a".into(), 0), ("x".into(), 1), ("b".into(), 2)]
        );
    }

    #[test]
    fn move_down_lifts_range() {
        let (repo, todo, _) = setup();
        seed(&repo, &todo, &["a", "b", "c", "d"]);

        repo.move_card_within("c", &todo, 2, 0).unwrap();

        assert_eq!(
            ordering(&repo, &todo),
            vec![
                ("c".into(), 0),
                ("a".into(), 1),
                ("b".into(), 2),
                ("d".into(), 3)
            ]
        );
    }

    #[test]
    fn move_up_lowers_range() {
        let (repo, todo, _) = setup();
        seed(&repo, &todo, &["a", "b", "c", "d"]);

        repo.move_card_within("a", &todo, 0, 3).unwrap();

        assert_eq!(
            ordering(&repo, &todo),
            vec![
                ("b".into(), 0),
                ("c".into(), 1),
                ("d".into(), 2),
                ("a".into(), 3)
            ]
        );
    }

    #[test]
    fn archive_closes_gap() {
        let (repo, todo, _) = setup();
        seed(&repo, &todo, &["a", "b", "c"]);

        repo.archive_card_at("b", &todo, 1).unwrap();

        assert_eq!(ordering(&repo, &todo), vec![("a".into(), 0), ("c".into(), 1)]);
        // The archived row keeps its id but leaves the live ordering
        assert!(repo.card("b").unwrap().unwrap().archived);
    }

    #[test]
    fn cross_scope_move_keeps_both_contiguous() {
        let (repo, todo, doing) = setup();
        seed(&repo, &todo, &["a", "b", "c"]);
        seed(&repo, &doing, &["x", "y"]);

        repo.move_card_across("b", &todo, 1, &doing, 1).unwrap();

        assert_eq!(ordering(&repo, &todo), vec![("a".into(), 0), ("c".into(), 1)]);
        assert_eq!(
            ordering(&repo, &doing),
            vec![("x".into(), 0), ("b".into(), 1), ("y".into(), 2)]
        );
        assert_contiguous(&repo, &todo);
        assert_contiguous(&repo, &doing);
    }

    #[test]
    fn op_sequence_preserves_invariant() {
        let (repo, todo, doing) = setup();
        seed(&repo, &todo, &["a", "b", "c", "d", "e"]);
        seed(&repo, &doing, &["x"]);

        repo.move_card_within("d", &todo, 3, 1).unwrap();
        repo.insert_card_at(&card("f", &todo), 0).unwrap();
        repo.move_card_across("b", &todo, 3, &doing, 0).unwrap();
        repo.archive_card_at("a", &todo, 2).unwrap();
        repo.move_card_within("x", &doing, 1, 0).unwrap();

        assert_contiguous(&repo, &todo);
        assert_contiguous(&repo, &doing);
    }

    #[test]
    fn rev_bumps_on_every_commit() {
        let (repo, todo, doing) = setup();
        let r1 = repo.insert_card_at(&card("a", &todo), 0).unwrap();
        let r2 = repo.insert_card_at(&card("b", &todo), 1).unwrap();
        assert!(r2 > r1);

        let (from_rev, to_rev) = repo.move_card_across("a", &todo, 0, &doing, 0).unwrap();
        assert!(from_rev > r2);
        assert_eq!(repo.lane("doing").unwrap().unwrap().rev, to_rev);
    }

    #[test]
    fn board_moves_reposition_both_projects() {
        let (repo, _, _) = setup();
        let owner = repo.get_or_create_user("owner@example.com").unwrap();
        repo.insert_project(&Project {
            id: "p2".into(),
            title: "Ops".into(),
            owner_user_id: owner,
            team_id: None,
            invite_only: false,
            member_ids: vec![],
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        for (id, project, pos) in [("b2", "p1", 1), ("b3", "p2", 0)] {
            repo.insert_board(&Board {
                id: id.into(),
                project_id: project.into(),
                title: id.into(),
                position: pos,
                lane_order: vec![],
                archived: false,
                created_at: Utc::now(),
            })
            .unwrap();
        }

        // b1@0, b2@1 in p1; b3@0 in p2. Move b1 to p2 at 0.
        repo.move_board_across("b1", "p1", 0, "p2", 0).unwrap();

        let p1: Vec<_> = repo
            .boards_in_project("p1")
            .unwrap()
            .into_iter()
            .map(|b| (b.id, b.position))
            .collect();
        let p2: Vec<_> = repo
            .boards_in_project("p2")
            .unwrap()
            .into_iter()
            .map(|b| (b.id, b.position))
            .collect();
        assert_eq!(p1, vec![("b2".to_string(), 0)]);
        assert_eq!(p2, vec![("b1".to_string(), 0), ("b3".to_string(), 1)]);
    }
}

//! Board hierarchy service: the mutation surface.
//!
//! Every entry point authorizes through [`permission`], delegates position
//! arithmetic to the store's ledger operations, and emits events on the bus
//! only after the commit succeeded. Events never fail a request; the
//! transport layer decides who hears them.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::{CorkboardError, Result};
use crate::events::{BoardEvent, EventBus, EventEnvelope, PositionPair};
use crate::model::{
    Board, BoardAction, Card, CardDraft, CardPatch, Identity, Lane, PermissionOverrides, Project,
    Scope, Team,
};
use crate::permission::{authorize, can_view};
use crate::store::BoardRepo;

/// Fields accepted by [`BoardService::edit_project`].
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub invite_only: Option<bool>,
    pub member_ids: Option<Vec<String>>,
    pub permission_overrides: Option<PermissionOverrides>,
}

/// Authoritative entry point for all board mutations.
pub struct BoardService {
    repo: Arc<BoardRepo>,
    bus: Arc<EventBus>,
}

impl BoardService {
    pub fn new(repo: Arc<BoardRepo>, bus: Arc<EventBus>) -> Self {
        Self { repo, bus }
    }

    pub fn repo(&self) -> &Arc<BoardRepo> {
        &self.repo
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ===== Card operations =====

    /// Create a card in a scope, appending when `position` is `None`.
    pub fn create_card(
        &self,
        identity: &Identity,
        scope: &Scope,
        position: Option<usize>,
        draft: CardDraft,
    ) -> Result<Card> {
        let board = self.resolve_board(&scope.board_id)?;
        self.check_lane(&board, &scope.lane_id)?;
        self.gate(identity, &board.project_id, BoardAction::CreateCard)?;

        let len = self.repo.card_count(&scope.board_id, &scope.lane_id)?;
        let pos = position.unwrap_or(len);
        if pos > len {
            return Err(CorkboardError::InvalidPosition { given: pos, len });
        }

        let card = Card {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: scope.board_id.clone(),
            lane_id: scope.lane_id.clone(),
            position: pos as i64,
            title: draft.title,
            description: draft.description,
            tags: draft.tags,
            due_at: draft.due_at,
            archived: false,
            created_at: Utc::now(),
        };
        let rev = self.repo.insert_card_at(&card, pos as i64)?;

        self.emit(identity, BoardEvent::CardAdded { card: card.clone() });
        self.emit_positions(identity, scope, rev)?;
        Ok(card)
    }

    /// Move a card within its scope or into another one.
    pub fn move_card(
        &self,
        identity: &Identity,
        card_id: &str,
        new_scope: Option<Scope>,
        new_position: usize,
    ) -> Result<Card> {
        let card = self.resolve_card(card_id)?;
        if card.archived {
            return Err(CorkboardError::MissingScope(card_id.to_string()));
        }
        let from_scope = card.scope();
        let to_scope = new_scope.unwrap_or_else(|| from_scope.clone());

        let from_board = self.resolve_board(&from_scope.board_id)?;
        self.gate(identity, &from_board.project_id, BoardAction::MoveCard)?;

        if to_scope == from_scope {
            let len = self.repo.card_count(&from_scope.board_id, &from_scope.lane_id)?;
            if new_position >= len {
                return Err(CorkboardError::InvalidPosition {
                    given: new_position,
                    len,
                });
            }
            let rev = self.repo.move_card_within(
                card_id,
                &from_scope,
                card.position,
                new_position as i64,
            )?;
            self.emit_positions(identity, &from_scope, rev)?;
        } else {
            let to_board = self.resolve_board(&to_scope.board_id)?;
            self.check_lane(&to_board, &to_scope.lane_id)?;
            if to_board.project_id != from_board.project_id {
                self.gate(identity, &to_board.project_id, BoardAction::MoveCard)?;
            }

            let len = self.repo.card_count(&to_scope.board_id, &to_scope.lane_id)?;
            if new_position > len {
                return Err(CorkboardError::InvalidPosition {
                    given: new_position,
                    len,
                });
            }
            let (from_rev, to_rev) = self.repo.move_card_across(
                card_id,
                &from_scope,
                card.position,
                &to_scope,
                new_position as i64,
            )?;

            let moved = self.resolve_card(card_id)?;
            self.emit(
                identity,
                BoardEvent::CardMovedLane {
                    card: moved,
                    from_scope: from_scope.clone(),
                    to_scope: to_scope.clone(),
                },
            );
            self.emit_positions(identity, &from_scope, from_rev)?;
            self.emit_positions(identity, &to_scope, to_rev)?;
        }

        self.resolve_card(card_id)
    }

    /// Soft-archive a card and close the gap it leaves.
    pub fn archive_card(&self, identity: &Identity, card_id: &str) -> Result<()> {
        let card = self.resolve_card(card_id)?;
        if card.archived {
            return Err(CorkboardError::MissingScope(card_id.to_string()));
        }
        let scope = card.scope();
        let board = self.resolve_board(&scope.board_id)?;
        self.gate(identity, &board.project_id, BoardAction::ArchiveCard)?;

        let rev = self.repo.archive_card_at(card_id, &scope, card.position)?;

        self.emit(
            identity,
            BoardEvent::CardArchived {
                card_id: card_id.to_string(),
                scope: scope.clone(),
            },
        );
        self.emit_positions(identity, &scope, rev)?;
        Ok(())
    }

    /// Edit card fields; positions are untouched.
    pub fn edit_card(&self, identity: &Identity, card_id: &str, patch: CardPatch) -> Result<Card> {
        let mut card = self.resolve_card(card_id)?;
        let board = self.resolve_board(&card.board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditCard)?;

        if let Some(title) = patch.title {
            card.title = title;
        }
        if let Some(description) = patch.description {
            card.description = description;
        }
        if let Some(tags) = patch.tags {
            card.tags = tags;
        }
        if let Some(due_at) = patch.due_at {
            card.due_at = due_at;
        }
        self.repo.save_card_fields(&card)?;

        self.emit(identity, BoardEvent::CardEdited { card: card.clone() });
        Ok(card)
    }

    /// Visibility-gated ordered read of a scope; the catch-up path after a
    /// disconnect, since missed events are never replayed.
    pub fn fetch_scope(&self, identity: &Identity, scope: &Scope) -> Result<Vec<Card>> {
        let board = self.resolve_board(&scope.board_id)?;
        let project = self.resolve_project(&board.project_id)?;
        // Invisible projects read as missing rather than forbidden.
        if !can_view(identity, &project) {
            return Err(CorkboardError::NotFound {
                kind: "board",
                id: scope.board_id.clone(),
            });
        }
        self.repo.cards_in_scope(&scope.board_id, &scope.lane_id)
    }

    // ===== Board operations =====

    /// Create a board with an initial set of lanes, appended to the project.
    pub fn create_board(
        &self,
        identity: &Identity,
        project_id: &str,
        title: &str,
        lane_titles: &[&str],
    ) -> Result<Board> {
        self.gate(identity, project_id, BoardAction::EditBoard)?;

        let position = self.repo.board_count(project_id)? as i64;
        let mut board = Board {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            position,
            lane_order: Vec::new(),
            archived: false,
            created_at: Utc::now(),
        };
        self.repo.insert_board(&board)?;
        for lane_title in lane_titles {
            let lane = Lane {
                id: uuid::Uuid::new_v4().to_string(),
                board_id: board.id.clone(),
                title: lane_title.to_string(),
                archived: false,
                rev: 0,
            };
            self.repo.insert_lane(&lane)?;
            board.lane_order.push(lane.id.clone());
        }
        self.repo.save_board(&board)?;

        self.emit(identity, BoardEvent::BoardAdded { board: board.clone() });
        Ok(board)
    }

    /// Rename a board.
    pub fn edit_board(&self, identity: &Identity, board_id: &str, title: &str) -> Result<Board> {
        let mut board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;

        board.title = title.to_string();
        self.repo.save_board(&board)?;

        self.emit(identity, BoardEvent::BoardEdited { board: board.clone() });
        Ok(board)
    }

    /// Archive a board and close the gap in its project ordering.
    pub fn archive_board(&self, identity: &Identity, board_id: &str) -> Result<()> {
        let mut board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;

        self.repo
            .archive_board_at(board_id, &board.project_id, board.position)?;
        board.archived = true;

        self.emit(identity, BoardEvent::BoardArchived { board });
        Ok(())
    }

    /// Reposition a board, optionally into another project.
    pub fn move_board(
        &self,
        identity: &Identity,
        board_id: &str,
        new_project_id: &str,
        new_position: usize,
    ) -> Result<Board> {
        let board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;

        if new_project_id == board.project_id {
            let len = self.repo.board_count(new_project_id)?;
            if new_position >= len {
                return Err(CorkboardError::InvalidPosition {
                    given: new_position,
                    len,
                });
            }
            self.repo.move_board_within(
                board_id,
                new_project_id,
                board.position,
                new_position as i64,
            )?;
        } else {
            self.resolve_project(new_project_id)?;
            self.gate(identity, new_project_id, BoardAction::EditBoard)?;
            let len = self.repo.board_count(new_project_id)?;
            if new_position > len {
                return Err(CorkboardError::InvalidPosition {
                    given: new_position,
                    len,
                });
            }
            self.repo.move_board_across(
                board_id,
                &board.project_id,
                board.position,
                new_project_id,
                new_position as i64,
            )?;
        }

        let moved = self.resolve_board(board_id)?;
        self.emit(identity, BoardEvent::BoardEdited { board: moved.clone() });
        Ok(moved)
    }

    // ===== Lane operations =====

    /// Append a lane to a board's ordering.
    pub fn add_lane(&self, identity: &Identity, board_id: &str, title: &str) -> Result<Lane> {
        let mut board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;

        let lane = Lane {
            id: uuid::Uuid::new_v4().to_string(),
            board_id: board_id.to_string(),
            title: title.to_string(),
            archived: false,
            rev: 0,
        };
        self.repo.insert_lane(&lane)?;
        board.lane_order.push(lane.id.clone());
        self.repo.save_board(&board)?;

        self.emit(identity, BoardEvent::BoardEdited { board });
        Ok(lane)
    }

    /// Move a lane to a new index in the board's array order.
    pub fn move_lane(
        &self,
        identity: &Identity,
        board_id: &str,
        lane_id: &str,
        new_index: usize,
    ) -> Result<Board> {
        let mut board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;

        let Some(old_index) = board.lane_order.iter().position(|id| id == lane_id) else {
            return Err(CorkboardError::LaneMismatch {
                board_id: board_id.to_string(),
                lane_id: lane_id.to_string(),
            });
        };
        if new_index >= board.lane_order.len() {
            return Err(CorkboardError::InvalidPosition {
                given: new_index,
                len: board.lane_order.len(),
            });
        }
        let id = board.lane_order.remove(old_index);
        board.lane_order.insert(new_index, id);
        self.repo.save_board(&board)?;

        self.emit(identity, BoardEvent::BoardEdited { board: board.clone() });
        Ok(board)
    }

    /// Archive an empty lane and drop it from the board's ordering.
    pub fn archive_lane(&self, identity: &Identity, board_id: &str, lane_id: &str) -> Result<()> {
        let mut board = self.resolve_board(board_id)?;
        self.gate(identity, &board.project_id, BoardAction::EditBoard)?;
        let mut lane = self
            .repo
            .lane(lane_id)?
            .filter(|l| l.board_id == board_id)
            .ok_or_else(|| CorkboardError::LaneMismatch {
                board_id: board_id.to_string(),
                lane_id: lane_id.to_string(),
            })?;

        if self.repo.card_count(board_id, lane_id)? > 0 {
            return Err(CorkboardError::LaneNotEmpty(lane_id.to_string()));
        }

        lane.archived = true;
        self.repo.save_lane(&lane)?;
        board.lane_order.retain(|id| id != lane_id);
        self.repo.save_board(&board)?;

        self.emit(identity, BoardEvent::BoardEdited { board });
        Ok(())
    }

    // ===== Project operations =====

    /// Create a project owned by the requester, optionally under a team.
    pub fn create_project(
        &self,
        identity: &Identity,
        title: &str,
        team_id: Option<&str>,
        invite_only: bool,
    ) -> Result<Project> {
        if let Some(team_id) = team_id {
            self.resolve_team(team_id)?;
            if !identity.is_member_of(team_id) {
                return Err(CorkboardError::Denied {
                    project_id: team_id.to_string(),
                    action: BoardAction::EditProject,
                });
            }
        }

        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner_user_id: identity.user_id.clone(),
            team_id: team_id.map(Into::into),
            invite_only,
            member_ids: if invite_only {
                vec![identity.user_id.clone()]
            } else {
                Vec::new()
            },
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        };
        self.repo.insert_project(&project)?;

        self.emit(
            identity,
            BoardEvent::ProjectAdded {
                project: project.clone(),
            },
        );
        Ok(project)
    }

    /// Edit project settings: title, invite flag, whitelist, overrides.
    pub fn edit_project(
        &self,
        identity: &Identity,
        project_id: &str,
        patch: ProjectPatch,
    ) -> Result<Project> {
        let (mut project, _) = self.gate(identity, project_id, BoardAction::EditProject)?;

        if let Some(title) = patch.title {
            project.title = title;
        }
        if let Some(invite_only) = patch.invite_only {
            project.invite_only = invite_only;
        }
        if let Some(member_ids) = patch.member_ids {
            for user_id in &member_ids {
                self.repo.add_project_member(project_id, user_id)?;
            }
            project.member_ids = member_ids;
        }
        if let Some(overrides) = patch.permission_overrides {
            project.permission_overrides = overrides;
        }
        self.repo.save_project(&project)?;

        self.emit(
            identity,
            BoardEvent::ProjectEdited {
                project: project.clone(),
            },
        );
        Ok(project)
    }

    // ===== Internals =====

    /// Authorize `action` against a project, returning the loaded context.
    /// Always resolved fresh; permission state is never cached.
    fn gate(
        &self,
        identity: &Identity,
        project_id: &str,
        action: BoardAction,
    ) -> Result<(Project, Option<Team>)> {
        let project = self.resolve_project(project_id)?;
        let team = match project.team_id.as_deref() {
            Some(team_id) => Some(self.resolve_team(team_id)?),
            None => None,
        };
        authorize(identity, &project, team.as_ref(), action)?;
        Ok((project, team))
    }

    fn resolve_card(&self, card_id: &str) -> Result<Card> {
        self.repo.card(card_id)?.ok_or_else(|| CorkboardError::NotFound {
            kind: "card",
            id: card_id.to_string(),
        })
    }

    fn resolve_board(&self, board_id: &str) -> Result<Board> {
        self.repo
            .board(board_id)?
            .filter(|b| !b.archived)
            .ok_or_else(|| CorkboardError::NotFound {
                kind: "board",
                id: board_id.to_string(),
            })
    }

    fn resolve_project(&self, project_id: &str) -> Result<Project> {
        self.repo
            .project(project_id)?
            .ok_or_else(|| CorkboardError::NotFound {
                kind: "project",
                id: project_id.to_string(),
            })
    }

    fn resolve_team(&self, team_id: &str) -> Result<Team> {
        self.repo.team(team_id)?.ok_or_else(|| CorkboardError::NotFound {
            kind: "team",
            id: team_id.to_string(),
        })
    }

    /// Validate that a lane is live and belongs to the board.
    fn check_lane(&self, board: &Board, lane_id: &str) -> Result<()> {
        let lane = self
            .repo
            .lane(lane_id)?
            .filter(|l| l.board_id == board.id && !l.archived);
        if lane.is_none() {
            return Err(CorkboardError::LaneMismatch {
                board_id: board.id.clone(),
                lane_id: lane_id.to_string(),
            });
        }
        Ok(())
    }

    fn emit(&self, identity: &Identity, event: BoardEvent) {
        debug!("emit {} by {}", event.kind(), identity.user_id);
        self.bus.emit(&EventEnvelope {
            actor: identity.user_id.clone(),
            event,
        });
    }

    /// Broadcast the full live ordering of a scope after a commit.
    fn emit_positions(&self, identity: &Identity, scope: &Scope, rev: i64) -> Result<()> {
        let pairs = self
            .repo
            .cards_in_scope(&scope.board_id, &scope.lane_id)?
            .into_iter()
            .map(|c| PositionPair {
                id: c.id,
                position: c.position,
            })
            .collect();
        self.emit(
            identity,
            BoardEvent::CardPositionsChanged {
                scope: scope.clone(),
                pairs,
                rev,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PermissionLevel, TeamRole};
    use crate::store::init_database;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Fixture {
        service: BoardService,
        events: Arc<Mutex<Vec<EventEnvelope>>>,
        board_id: String,
        todo: String,
        doing: String,
        member: Identity,
        admin: Identity,
        outsider: Identity,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(BoardRepo::new(conn));
        let bus = Arc::new(EventBus::new());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(Arc::new(move |env: &EventEnvelope| {
            sink.lock().unwrap().push(env.clone());
        }));

        let owner = repo.get_or_create_user("owner@example.com").unwrap();
        let member_id = repo.get_or_create_user("member@example.com").unwrap();
        let admin_id = repo.get_or_create_user("admin@example.com").unwrap();

        repo.insert_team(&Team {
            id: "t1".into(),
            name: "Platform".into(),
            owner_user_id: owner.clone(),
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        repo.set_team_member("t1", &owner, TeamRole::Admin).unwrap();
        repo.set_team_member("t1", &member_id, TeamRole::User).unwrap();
        repo.set_team_member("t1", &admin_id, TeamRole::Admin).unwrap();

        let service = BoardService::new(repo, bus);

        let admin = Identity::new(admin_id).with_membership("t1", TeamRole::Admin);
        let member = Identity::new(member_id).with_membership("t1", TeamRole::User);
        let outsider = Identity::new("stranger");

        let project = service
            .create_project(&admin, "Launch", Some("t1"), false)
            .unwrap();
        let board = service
            .create_board(&admin, &project.id, "Sprint", &["To do", "Doing"])
            .unwrap();
        let todo = board.lane_order[0].clone();
        let doing = board.lane_order[1].clone();

        events.lock().unwrap().clear();

        Fixture {
            service,
            events,
            board_id: board.id,
            todo,
            doing,
            member,
            admin,
            outsider,
        }
    }

    fn titles(service: &BoardService, scope: &Scope) -> Vec<String> {
        service
            .repo()
            .cards_in_scope(&scope.board_id, &scope.lane_id)
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect()
    }

    fn draft(title: &str) -> CardDraft {
        CardDraft {
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_appends_and_inserts() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());

        f.service.create_card(&f.member, &scope, None, draft("A")).unwrap();
        f.service.create_card(&f.member, &scope, None, draft("B")).unwrap();
        f.service
            .create_card(&f.member, &scope, Some(1), draft("X"))
            .unwrap();

        assert_eq!(titles(&f.service, &scope), vec!["A", "X", "B"]);

        let kinds: Vec<_> = f
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.kind())
            .collect();
        assert_eq!(kinds.iter().filter(|k| **k == "card_added").count(), 3);
        assert_eq!(
            kinds.iter().filter(|k| **k == "card_positions_changed").count(),
            3
        );
    }

    #[test]
    fn move_within_scope_reorders() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        let mut ids = Vec::new();
        for t in ["A", "B", "C", "D"] {
            ids.push(f.service.create_card(&f.member, &scope, None, draft(t)).unwrap().id);
        }
        f.events.lock().unwrap().clear();

        f.service.move_card(&f.member, &ids[2], None, 0).unwrap();
        assert_eq!(titles(&f.service, &scope), vec!["C", "A", "B", "D"]);

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].event {
            BoardEvent::CardPositionsChanged { pairs, .. } => {
                assert_eq!(pairs.len(), 4);
                assert_eq!(pairs[0].id, ids[2]);
                assert_eq!(pairs[0].position, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn move_across_scopes_emits_both_orderings() {
        let f = fixture();
        let todo = Scope::new(f.board_id.clone(), f.todo.clone());
        let doing = Scope::new(f.board_id.clone(), f.doing.clone());
        let mut ids = Vec::new();
        for t in ["A", "B", "C"] {
            ids.push(f.service.create_card(&f.member, &todo, None, draft(t)).unwrap().id);
        }
        f.service.create_card(&f.member, &doing, None, draft("X")).unwrap();
        f.events.lock().unwrap().clear();

        f.service
            .move_card(&f.member, &ids[1], Some(doing.clone()), 0)
            .unwrap();

        assert_eq!(titles(&f.service, &todo), vec!["A", "C"]);
        assert_eq!(titles(&f.service, &doing), vec!["B", "X"]);

        let kinds: Vec<_> = f
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.kind().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "card_moved_lane",
                "card_positions_changed",
                "card_positions_changed"
            ]
        );
    }

    #[test]
    fn archive_emits_and_closes_gap() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        let mut ids = Vec::new();
        for t in ["A", "B", "C"] {
            ids.push(f.service.create_card(&f.member, &scope, None, draft(t)).unwrap().id);
        }
        f.events.lock().unwrap().clear();

        f.service.archive_card(&f.member, &ids[1]).unwrap();
        assert_eq!(titles(&f.service, &scope), vec!["A", "C"]);

        let kinds: Vec<_> = f
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["card_archived", "card_positions_changed"]);

        // Archiving twice is a validation error, not a second mutation
        let err = f.service.archive_card(&f.member, &ids[1]).unwrap_err();
        assert!(matches!(err, CorkboardError::MissingScope(_)));
    }

    #[test]
    fn denied_mutation_leaves_no_trace() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        let id = f
            .service
            .create_card(&f.member, &scope, None, draft("A"))
            .unwrap()
            .id;

        // Raise the bar: moves now need an admin role
        f.service
            .edit_project(
                &f.admin,
                &f.service.repo().board(&f.board_id).unwrap().unwrap().project_id,
                ProjectPatch {
                    permission_overrides: Some(
                        [(BoardAction::MoveCard, PermissionLevel::Admin)]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                },
            )
            .unwrap();
        f.events.lock().unwrap().clear();

        let err = f.service.move_card(&f.member, &id, None, 0).unwrap_err();
        assert!(err.is_denied());
        assert!(f.events.lock().unwrap().is_empty());
        assert_eq!(titles(&f.service, &scope), vec!["A"]);

        // The admin passes the same gate
        f.service.create_card(&f.admin, &scope, None, draft("B")).unwrap();
        f.service.move_card(&f.admin, &id, None, 1).unwrap();
        assert_eq!(titles(&f.service, &scope), vec!["B", "A"]);
    }

    #[test]
    fn unknown_ids_and_bad_positions_fail_before_writing() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        f.service.create_card(&f.member, &scope, None, draft("A")).unwrap();
        f.events.lock().unwrap().clear();

        let err = f.service.move_card(&f.member, "nope", None, 0).unwrap_err();
        assert!(err.is_not_found());

        let err = f
            .service
            .create_card(&f.member, &scope, Some(5), draft("X"))
            .unwrap_err();
        assert!(matches!(err, CorkboardError::InvalidPosition { given: 5, len: 1 }));

        let err = f
            .service
            .create_card(
                &f.member,
                &Scope::new(f.board_id.clone(), "ghost-lane"),
                None,
                draft("X"),
            )
            .unwrap_err();
        assert!(err.is_validation());

        assert!(f.events.lock().unwrap().is_empty());
    }

    #[test]
    fn fetch_scope_masks_invisible_projects() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        f.service.create_card(&f.member, &scope, None, draft("A")).unwrap();

        let cards = f.service.fetch_scope(&f.member, &scope).unwrap();
        assert_eq!(cards.len(), 1);

        let err = f.service.fetch_scope(&f.outsider, &scope).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn lane_lifecycle() {
        let f = fixture();
        let lane = f.service.add_lane(&f.admin, &f.board_id, "Done").unwrap();
        let board = f.service.repo().board(&f.board_id).unwrap().unwrap();
        assert_eq!(board.lane_order.len(), 3);
        assert_eq!(board.lane_order[2], lane.id);

        let board = f
            .service
            .move_lane(&f.admin, &f.board_id, &lane.id, 0)
            .unwrap();
        assert_eq!(board.lane_order[0], lane.id);

        // Archiving a lane holding cards is refused
        let scope = Scope::new(f.board_id.clone(), lane.id.clone());
        let card = f.service.create_card(&f.member, &scope, None, draft("A")).unwrap();
        let err = f
            .service
            .archive_lane(&f.admin, &f.board_id, &lane.id)
            .unwrap_err();
        assert!(matches!(err, CorkboardError::LaneNotEmpty(_)));

        f.service.archive_card(&f.member, &card.id).unwrap();
        f.service.archive_lane(&f.admin, &f.board_id, &lane.id).unwrap();
        let board = f.service.repo().board(&f.board_id).unwrap().unwrap();
        assert_eq!(board.lane_order.len(), 2);
    }

    #[test]
    fn move_board_between_projects() {
        let f = fixture();
        let second = f
            .service
            .create_project(&f.admin, "Ops", Some("t1"), false)
            .unwrap();
        f.events.lock().unwrap().clear();

        let moved = f
            .service
            .move_board(&f.admin, &f.board_id, &second.id, 0)
            .unwrap();
        assert_eq!(moved.project_id, second.id);
        assert_eq!(moved.position, 0);

        let kinds: Vec<_> = f
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["board_edited"]);
    }

    #[test]
    fn edit_card_patch_applies_selected_fields() {
        let f = fixture();
        let scope = Scope::new(f.board_id.clone(), f.todo.clone());
        let card = f.service.create_card(&f.member, &scope, None, draft("A")).unwrap();

        let edited = f
            .service
            .edit_card(
                &f.member,
                &card.id,
                CardPatch {
                    title: Some("A2".into()),
                    tags: Some(vec!["urgent".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(edited.title, "A2");
        assert_eq!(edited.tags, vec!["urgent"]);
        assert_eq!(edited.position, card.position);
    }
}

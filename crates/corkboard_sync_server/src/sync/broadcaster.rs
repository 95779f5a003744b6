//! Audience computation and event fan-out.
//!
//! The broadcaster subscribes once to the core event bus. For every
//! committed mutation it resolves the owning project, computes the set of
//! users authorized to hear about it, and pushes the serialized event to
//! each of their live connections. Delivery is best-effort and at-most-once:
//! failures are logged and swallowed, never surfaced to the originating
//! request, which has already been committed and acknowledged.

use std::sync::Arc;

use corkboard_core::events::{BoardEvent, EventBus, EventEnvelope, SubscriptionId};
use corkboard_core::model::Project;
use corkboard_core::store::BoardRepo;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;

pub struct Broadcaster {
    repo: Arc<BoardRepo>,
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(repo: Arc<BoardRepo>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { repo, registry }
    }

    /// Subscribe this broadcaster to a bus. Keep the returned id if the
    /// subscription should ever be torn down.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let broadcaster = Arc::clone(self);
        bus.subscribe(Arc::new(move |envelope: &EventEnvelope| {
            broadcaster.dispatch(envelope);
        }))
    }

    /// Fan one envelope out to its audience.
    pub fn dispatch(&self, envelope: &EventEnvelope) {
        let audience = match self.audience(envelope) {
            Ok(audience) => audience,
            Err(e) => {
                warn!("audience computation failed for {}: {}", envelope.event.kind(), e);
                return;
            }
        };
        if audience.is_empty() {
            return;
        }

        let payload = match serde_json::to_string(envelope) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize {}: {}", envelope.event.kind(), e);
                return;
            }
        };

        let mut delivered = 0;
        for user_id in &audience {
            delivered += self.registry.send_to(user_id, &payload);
        }
        debug!(
            "{} -> {} users, {} connections",
            envelope.event.kind(),
            audience.len(),
            delivered
        );
    }

    /// Users who should hear this event: the owning team's members, filtered
    /// by the invite whitelist when the project is invite-only, minus the
    /// originating actor. Personal projects broadcast to their owner only.
    fn audience(&self, envelope: &EventEnvelope) -> corkboard_core::Result<Vec<String>> {
        let project = self.owning_project(&envelope.event)?;

        let mut users = match project.team_id.as_deref() {
            Some(team_id) => {
                let members = self.repo.team_member_ids(team_id)?;
                if project.invite_only {
                    members
                        .into_iter()
                        .filter(|u| project.member_ids.contains(u))
                        .collect()
                } else {
                    members
                }
            }
            None => vec![project.owner_user_id.clone()],
        };

        // No self-echo: the actor's own client already applied the change.
        users.retain(|u| u != &envelope.actor);
        Ok(users)
    }

    fn owning_project(&self, event: &BoardEvent) -> corkboard_core::Result<Project> {
        match event {
            BoardEvent::CardPositionsChanged { scope, .. }
            | BoardEvent::CardArchived { scope, .. } => self.project_of_board(&scope.board_id),
            BoardEvent::CardAdded { card } | BoardEvent::CardEdited { card } => {
                self.project_of_board(&card.board_id)
            }
            // The card already carries its destination scope.
            BoardEvent::CardMovedLane { card, .. } => self.project_of_board(&card.board_id),
            BoardEvent::BoardAdded { board }
            | BoardEvent::BoardEdited { board }
            | BoardEvent::BoardArchived { board } => self.project_by_id(&board.project_id),
            BoardEvent::ProjectAdded { project } | BoardEvent::ProjectEdited { project } => {
                Ok(project.clone())
            }
        }
    }

    fn project_of_board(&self, board_id: &str) -> corkboard_core::Result<Project> {
        use corkboard_core::CorkboardError;
        let board = self.repo.board(board_id)?.ok_or(CorkboardError::NotFound {
            kind: "board",
            id: board_id.to_string(),
        })?;
        self.project_by_id(&board.project_id)
    }

    fn project_by_id(&self, project_id: &str) -> corkboard_core::Result<Project> {
        use corkboard_core::CorkboardError;
        self.repo
            .project(project_id)?
            .ok_or(CorkboardError::NotFound {
                kind: "project",
                id: project_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use corkboard_core::events::PositionPair;
    use corkboard_core::model::{Board, PermissionOverrides, Project, Scope, Team, TeamRole};
    use corkboard_core::store::init_database;
    use rusqlite::Connection;
    use tokio::sync::mpsc;

    struct Fixture {
        broadcaster: Arc<Broadcaster>,
        registry: Arc<ConnectionRegistry>,
        repo: Arc<BoardRepo>,
        users: Vec<String>,
    }

    fn fixture(invite_only: bool) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(BoardRepo::new(conn));
        let registry = Arc::new(ConnectionRegistry::new());

        let mut users = Vec::new();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            users.push(repo.get_or_create_user(email).unwrap());
        }

        repo.insert_team(&Team {
            id: "t1".into(),
            name: "Platform".into(),
            owner_user_id: users[0].clone(),
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        for user in &users {
            repo.set_team_member("t1", user, TeamRole::User).unwrap();
        }

        repo.insert_project(&Project {
            id: "p1".into(),
            title: "Launch".into(),
            owner_user_id: users[0].clone(),
            team_id: Some("t1".into()),
            invite_only,
            // Only the first two users are whitelisted
            member_ids: vec![users[0].clone(), users[1].clone()],
            permission_overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
        })
        .unwrap();
        repo.insert_board(&Board {
            id: "b1".into(),
            project_id: "p1".into(),
            title: "Sprint".into(),
            position: 0,
            lane_order: vec![],
            archived: false,
            created_at: Utc::now(),
        })
        .unwrap();

        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&repo), Arc::clone(&registry)));
        Fixture {
            broadcaster,
            registry,
            repo,
            users,
        }
    }

    fn positions_envelope(actor: &str) -> EventEnvelope {
        EventEnvelope {
            actor: actor.into(),
            event: BoardEvent::CardPositionsChanged {
                scope: Scope::new("b1", "todo"),
                pairs: vec![PositionPair {
                    id: "c1".into(),
                    position: 0,
                }],
                rev: 1,
            },
        }
    }

    #[test]
    fn audience_excludes_actor_and_skips_disconnected() {
        let f = fixture(false);
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        f.registry.register(&f.users[1], tx_b);
        // users[2] is a team member but has no live connection

        f.broadcaster.dispatch(&positions_envelope(&f.users[0]));

        let payload = rx_b.try_recv().unwrap();
        assert!(payload.contains("card_positions_changed"));

        // The actor got nothing even when connected
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        f.registry.register(&f.users[0], tx_a);
        f.broadcaster.dispatch(&positions_envelope(&f.users[0]));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn invite_only_filters_audience() {
        let f = fixture(true);
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        f.registry.register(&f.users[1], tx_b);
        f.registry.register(&f.users[2], tx_c);

        f.broadcaster.dispatch(&positions_envelope(&f.users[0]));

        // users[1] is whitelisted, users[2] is not
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn personal_project_reaches_owner_only() {
        let f = fixture(false);
        f.repo
            .insert_project(&Project {
                id: "p2".into(),
                title: "Personal".into(),
                owner_user_id: f.users[1].clone(),
                team_id: None,
                invite_only: false,
                member_ids: vec![],
                permission_overrides: PermissionOverrides::default(),
                created_at: Utc::now(),
            })
            .unwrap();
        f.repo
            .insert_board(&Board {
                id: "b2".into(),
                project_id: "p2".into(),
                title: "Scratch".into(),
                position: 0,
                lane_order: vec![],
                archived: false,
                created_at: Utc::now(),
            })
            .unwrap();

        let (tx_owner, mut rx_owner) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        f.registry.register(&f.users[1], tx_owner);
        f.registry.register(&f.users[2], tx_other);

        let envelope = EventEnvelope {
            actor: f.users[0].clone(),
            event: BoardEvent::CardPositionsChanged {
                scope: Scope::new("b2", "todo"),
                pairs: vec![],
                rev: 1,
            },
        };
        f.broadcaster.dispatch(&envelope);

        assert!(rx_owner.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn unknown_board_is_swallowed() {
        let f = fixture(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.registry.register(&f.users[1], tx);

        let envelope = EventEnvelope {
            actor: f.users[0].clone(),
            event: BoardEvent::CardPositionsChanged {
                scope: Scope::new("ghost", "todo"),
                pairs: vec![],
                rev: 1,
            },
        };
        // Must not panic or deliver anything
        f.broadcaster.dispatch(&envelope);
        assert!(rx.try_recv().is_err());
    }
}

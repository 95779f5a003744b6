//! Domain rows and identity types.
//!
//! These mirror the persisted layout: card rows carry `(board_id, lane_id,
//! position)`, board rows carry `(project_id, position, lane_order)`, and
//! project rows carry the team link, invite whitelist and permission
//! overrides.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The (board, lane) pair within which card positions are unique and
/// contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub board_id: String,
    pub lane_id: String,
}

impl Scope {
    pub fn new(board_id: impl Into<String>, lane_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            lane_id: lane_id.into(),
        }
    }
}

/// A unit of work placed at an integer position within a scope.
///
/// Cards are never hard-deleted; archiving detaches them from their live
/// scope while keeping the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub board_id: String,
    pub lane_id: String,
    pub position: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn scope(&self) -> Scope {
        Scope::new(self.board_id.clone(), self.lane_id.clone())
    }
}

/// Caller-supplied fields for a new card.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

/// Partial update for card fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    #[serde(default, with = "double_option")]
    pub due_at: Option<Option<DateTime<Utc>>>,
}

mod double_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<DateTime<Utc>>::deserialize(d).map(Some)
    }
}

/// A column within a board.
///
/// Lanes have no position field of their own; their order is the array
/// order of [`Board::lane_order`]. The `rev` stamp is bumped by every
/// committed mutation in the lane's scope and rides on position events so
/// mirrors can drop stale broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub id: String,
    pub board_id: String,
    pub title: String,
    #[serde(default)]
    pub archived: bool,
    pub rev: i64,
}

/// An ordered set of lanes, itself positioned within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub position: i64,
    /// Lane ids in display order; the only source of lane ordering.
    pub lane_order: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// A top-level grouping of boards, owned by a user or a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub owner_user_id: String,
    /// Absent for personal projects; permission resolution then allows
    /// unconditionally.
    pub team_id: Option<String>,
    #[serde(default)]
    pub invite_only: bool,
    /// Explicit whitelist, only consulted when `invite_only` is set.
    #[serde(default)]
    pub member_ids: Vec<String>,
    /// Per-action levels overriding the owning team's defaults.
    #[serde(default)]
    pub permission_overrides: PermissionOverrides,
    pub created_at: DateTime<Utc>,
}

/// Minimum role required for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Regular,
    Admin,
    Owner,
}

/// Actions gated by the permission resolution cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardAction {
    CreateCard,
    EditCard,
    MoveCard,
    ArchiveCard,
    EditBoard,
    EditProject,
}

/// Per-action permission levels, iterated in insertion order.
pub type PermissionOverrides = IndexMap<BoardAction, PermissionLevel>;

/// Role recorded for a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Admin,
    User,
}

/// A team owning projects, with per-action default permission levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub permission_overrides: PermissionOverrides,
    pub created_at: DateTime<Utc>,
}

/// One team membership carried by an [`Identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMembership {
    pub team_id: String,
    pub role: TeamRole,
}

/// What the identity collaborator yields for a requester: who they are and
/// their recorded role per team. Membership and roles may change between
/// requests, so this is resolved fresh per call, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub memberships: Vec<TeamMembership>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            memberships: Vec::new(),
        }
    }

    pub fn with_membership(mut self, team_id: impl Into<String>, role: TeamRole) -> Self {
        self.memberships.push(TeamMembership {
            team_id: team_id.into(),
            role,
        });
        self
    }

    /// The requester's recorded role for a team, if they are a member.
    pub fn role_for(&self, team_id: &str) -> Option<TeamRole> {
        self.memberships
            .iter()
            .find(|m| m.team_id == team_id)
            .map(|m| m.role)
    }

    pub fn is_member_of(&self, team_id: &str) -> bool {
        self.role_for(team_id).is_some()
    }
}

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::model::{
    Board, Card, Lane, PermissionOverrides, Project, Team, TeamMembership, TeamRole,
};

/// Repository over the shared SQLite connection.
///
/// All persisted board state goes through here: point lookups by id, document
/// save/replace, and (in `positions.rs`) the predicate-scoped bulk position
/// shifts. Individual calls serialize on the connection mutex; compound
/// position operations additionally run inside a transaction.
#[derive(Clone)]
pub struct BoardRepo {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl BoardRepo {
    /// Create a new BoardRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    // ===== User operations =====

    /// Create or get a user by email (returns user ID)
    pub fn get_or_create_user(&self, email: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();

        if let Some(user_id) = conn
            .query_row("SELECT id FROM users WHERE email = ?", [email], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
        {
            return Ok(user_id);
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)",
            params![user_id, email, now],
        )?;

        Ok(user_id)
    }

    // ===== Team operations =====

    /// Insert a new team row
    pub fn insert_team(&self, team: &Team) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO teams (id, name, owner_user_id, permission_overrides, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                team.id,
                team.name,
                team.owner_user_id,
                serde_json::to_string(&team.permission_overrides)?,
                team.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Get a team by ID
    pub fn team(&self, team_id: &str) -> Result<Option<Team>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, owner_user_id, permission_overrides, created_at
                 FROM teams WHERE id = ?",
                [team_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, name, owner_user_id, overrides, created_at)) => Ok(Some(Team {
                id,
                name,
                owner_user_id,
                permission_overrides: parse_overrides(&overrides)?,
                created_at: timestamp_to_datetime(created_at),
            })),
            None => Ok(None),
        }
    }

    /// Add or replace a team membership
    pub fn set_team_member(&self, team_id: &str, user_id: &str, role: TeamRole) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let role = match role {
            TeamRole::Admin => "admin",
            TeamRole::User => "user",
        };
        conn.execute(
            "INSERT OR REPLACE INTO team_members (team_id, user_id, role) VALUES (?, ?, ?)",
            params![team_id, user_id, role],
        )?;
        Ok(())
    }

    /// User ids of all members of a team
    pub fn team_member_ids(&self, team_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT user_id FROM team_members WHERE team_id = ?")?;
        let ids = stmt
            .query_map([team_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// All team memberships recorded for a user, with roles
    pub fn memberships_for_user(&self, user_id: &str) -> Result<Vec<TeamMembership>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT team_id, role FROM team_members WHERE user_id = ?")?;
        let memberships = stmt
            .query_map([user_id], |row| {
                let role: String = row.get(1)?;
                Ok(TeamMembership {
                    team_id: row.get(0)?,
                    role: if role == "admin" {
                        TeamRole::Admin
                    } else {
                        TeamRole::User
                    },
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(memberships)
    }

    // ===== Project operations =====

    /// Insert a new project row (whitelist rows are separate)
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO projects (id, title, owner_user_id, team_id, invite_only, permission_overrides, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                project.id,
                project.title,
                project.owner_user_id,
                project.team_id,
                project.invite_only as i32,
                serde_json::to_string(&project.permission_overrides)?,
                project.created_at.timestamp(),
            ],
        )?;
        drop(conn);

        for user_id in &project.member_ids {
            self.add_project_member(&project.id, user_id)?;
        }
        Ok(())
    }

    /// Replace mutable project fields (title, invite flag, overrides)
    pub fn save_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET title = ?, team_id = ?, invite_only = ?, permission_overrides = ?
             WHERE id = ?",
            params![
                project.title,
                project.team_id,
                project.invite_only as i32,
                serde_json::to_string(&project.permission_overrides)?,
                project.id,
            ],
        )?;
        Ok(())
    }

    /// Get a project by ID, including its invite whitelist
    pub fn project(&self, project_id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, title, owner_user_id, team_id, invite_only, permission_overrides, created_at
                 FROM projects WHERE id = ?",
                [project_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i32>(4)? != 0,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, title, owner_user_id, team_id, invite_only, overrides, created_at)) = row
        else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT user_id FROM project_members WHERE project_id = ?")?;
        let member_ids = stmt
            .query_map([project_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(Project {
            id,
            title,
            owner_user_id,
            team_id,
            invite_only,
            member_ids,
            permission_overrides: parse_overrides(&overrides)?,
            created_at: timestamp_to_datetime(created_at),
        }))
    }

    /// Add a user to a project's invite whitelist
    pub fn add_project_member(&self, project_id: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?, ?)",
            params![project_id, user_id],
        )?;
        Ok(())
    }

    /// Number of live boards in a project (next append position)
    pub fn board_count(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM boards WHERE project_id = ? AND archived = 0",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ===== Board operations =====

    /// Insert a new board row
    pub fn insert_board(&self, board: &Board) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO boards (id, project_id, title, position, lane_order, archived, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                board.id,
                board.project_id,
                board.title,
                board.position,
                serde_json::to_string(&board.lane_order)?,
                board.archived as i32,
                board.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Replace a board row (title, position, lane order, archived flag)
    pub fn save_board(&self, board: &Board) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE boards SET project_id = ?, title = ?, position = ?, lane_order = ?, archived = ?
             WHERE id = ?",
            params![
                board.project_id,
                board.title,
                board.position,
                serde_json::to_string(&board.lane_order)?,
                board.archived as i32,
                board.id,
            ],
        )?;
        Ok(())
    }

    /// Get a board by ID
    pub fn board(&self, board_id: &str) -> Result<Option<Board>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, project_id, title, position, lane_order, archived, created_at
                 FROM boards WHERE id = ?",
                [board_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i32>(5)? != 0,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, project_id, title, position, lane_order, archived, created_at)) => {
                Ok(Some(Board {
                    id,
                    project_id,
                    title,
                    position,
                    lane_order: serde_json::from_str(&lane_order)?,
                    archived,
                    created_at: timestamp_to_datetime(created_at),
                }))
            }
            None => Ok(None),
        }
    }

    /// Live boards of a project in position order
    pub fn boards_in_project(&self, project_id: &str) -> Result<Vec<Board>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, title, position, lane_order, archived, created_at
             FROM boards WHERE project_id = ? AND archived = 0 ORDER BY position",
        )?;
        let rows: Vec<(String, String, String, i64, String, i32, i64)> = stmt
            .query_map([project_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(
                |(id, project_id, title, position, lane_order, archived, created_at)| {
                    Ok(Board {
                        id,
                        project_id,
                        title,
                        position,
                        lane_order: serde_json::from_str(&lane_order)?,
                        archived: archived != 0,
                        created_at: timestamp_to_datetime(created_at),
                    })
                },
            )
            .collect()
    }

    // ===== Lane operations =====

    /// Insert a new lane row (the caller updates the board's lane order)
    pub fn insert_lane(&self, lane: &Lane) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO lanes (id, board_id, title, archived, rev) VALUES (?, ?, ?, ?, ?)",
            params![lane.id, lane.board_id, lane.title, lane.archived as i32, lane.rev],
        )?;
        Ok(())
    }

    /// Replace lane title/archived flag
    pub fn save_lane(&self, lane: &Lane) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE lanes SET title = ?, archived = ? WHERE id = ?",
            params![lane.title, lane.archived as i32, lane.id],
        )?;
        Ok(())
    }

    /// Get a lane by ID
    pub fn lane(&self, lane_id: &str) -> Result<Option<Lane>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, board_id, title, archived, rev FROM lanes WHERE id = ?",
            [lane_id],
            |row| {
                Ok(Lane {
                    id: row.get(0)?,
                    board_id: row.get(1)?,
                    title: row.get(2)?,
                    archived: row.get::<_, i32>(3)? != 0,
                    rev: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    // ===== Card operations =====

    /// Get a card by ID
    pub fn card(&self, card_id: &str) -> Result<Option<Card>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, board_id, lane_id, position, title, description, tags, due_at, archived, created_at
                 FROM cards WHERE id = ?",
                [card_id],
                map_card_row,
            )
            .optional()?;
        row.map(finish_card).transpose()
    }

    /// Replace mutable card fields (title, description, tags, due date)
    pub fn save_card_fields(&self, card: &Card) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cards SET title = ?, description = ?, tags = ?, due_at = ? WHERE id = ?",
            params![
                card.title,
                card.description,
                serde_json::to_string(&card.tags)?,
                card.due_at.map(|d| d.timestamp()),
                card.id,
            ],
        )?;
        Ok(())
    }

    /// Live cards of a scope in position order
    pub fn cards_in_scope(&self, board_id: &str, lane_id: &str) -> Result<Vec<Card>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, board_id, lane_id, position, title, description, tags, due_at, archived, created_at
             FROM cards WHERE board_id = ? AND lane_id = ? AND archived = 0 ORDER BY position",
        )?;
        let rows: Vec<CardRow> = stmt
            .query_map(params![board_id, lane_id], map_card_row)?
            .filter_map(|r| r.ok())
            .collect();
        rows.into_iter().map(finish_card).collect()
    }

    /// Number of live cards in a scope (next append position)
    pub fn card_count(&self, board_id: &str, lane_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cards WHERE board_id = ? AND lane_id = ? AND archived = 0",
            params![board_id, lane_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ===== Session operations =====

    /// Store a session token for a user
    pub fn insert_session(&self, token: &str, user_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            params![token, user_id, expires_at.timestamp(), now],
        )?;
        Ok(())
    }

    /// Resolve a session token to a user id, if valid and unexpired
    pub fn session_user(&self, token: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        conn.query_row(
            "SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?",
            params![token, now],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

// ===== Helper functions =====

type CardRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<i64>,
    i32,
    i64,
);

fn map_card_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn finish_card(row: CardRow) -> Result<Card> {
    let (id, board_id, lane_id, position, title, description, tags, due_at, archived, created_at) =
        row;
    Ok(Card {
        id,
        board_id,
        lane_id,
        position,
        title,
        description,
        tags: serde_json::from_str(&tags)?,
        due_at: due_at.map(timestamp_to_datetime),
        archived: archived != 0,
        created_at: timestamp_to_datetime(created_at),
    })
}

fn parse_overrides(json: &str) -> Result<PermissionOverrides> {
    // Unknown action keys from older rows are dropped rather than failing
    // the whole lookup.
    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    let mut overrides = PermissionOverrides::default();
    for (key, value) in raw {
        let action = serde_json::from_value(serde_json::Value::String(key));
        let level = serde_json::from_value(value);
        if let (Ok(action), Ok(level)) = (action, level) {
            overrides.insert(action, level);
        }
    }
    Ok(overrides)
}

/// Convert Unix timestamp to DateTime<Utc>
pub(crate) fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

//! Permission resolution for project-scoped actions.
//!
//! The cascade: personal projects allow everything; invite-only projects
//! veto non-whitelisted requesters outright; otherwise the required level
//! comes from the project's per-action override, falling back to the owning
//! team's defaults. Resolution runs fresh on every call because memberships
//! and roles may change between requests.

use crate::error::{CorkboardError, Result};
use crate::model::{BoardAction, Identity, PermissionLevel, Project, Team, TeamRole};

/// Check whether `identity` may perform `action` against `project`.
///
/// `team` must be the project's owning team when `project.team_id` is set.
pub fn authorize(
    identity: &Identity,
    project: &Project,
    team: Option<&Team>,
    action: BoardAction,
) -> Result<()> {
    let Some(team) = team else {
        // Personal project, no team gate.
        return Ok(());
    };

    // Invite-only is a hard veto, independent of any level below.
    if project.invite_only && !project.member_ids.contains(&identity.user_id) {
        return Err(CorkboardError::NotInvited(project.id.clone()));
    }

    let level = resolve_level(project, team, action);

    match level {
        PermissionLevel::Regular => Ok(()),
        _ if identity.user_id == team.owner_user_id => Ok(()),
        PermissionLevel::Owner => Err(denied(project, action)),
        PermissionLevel::Admin => match identity.role_for(&team.id) {
            Some(TeamRole::Admin) => Ok(()),
            _ => Err(denied(project, action)),
        },
    }
}

/// Visibility check used for fetches and audience computation: team
/// membership plus the invite-only veto. Personal projects are visible to
/// their owner only.
pub fn can_view(identity: &Identity, project: &Project) -> bool {
    let Some(team_id) = project.team_id.as_deref() else {
        return identity.user_id == project.owner_user_id;
    };
    if !identity.is_member_of(team_id) {
        return false;
    }
    !project.invite_only || project.member_ids.contains(&identity.user_id)
}

/// Project override for the action if present, else the team default, else
/// `Regular`.
fn resolve_level(project: &Project, team: &Team, action: BoardAction) -> PermissionLevel {
    project
        .permission_overrides
        .get(&action)
        .or_else(|| team.permission_overrides.get(&action))
        .copied()
        .unwrap_or(PermissionLevel::Regular)
}

fn denied(project: &Project, action: BoardAction) -> CorkboardError {
    CorkboardError::Denied {
        project_id: project.id.clone(),
        action,
    }
}

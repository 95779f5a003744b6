//! Token-to-identity resolution.
//!
//! Issuing sessions (login flows, identity providers) is out of scope; this
//! module only maps an opaque bearer token to the requester's [`Identity`],
//! loading their team memberships fresh on every call so role changes take
//! effect immediately.

use chrono::{Duration, Utc};
use corkboard_core::Result;
use corkboard_core::model::Identity;
use corkboard_core::store::BoardRepo;

/// Resolve a session token to an identity with current team memberships.
///
/// Returns `None` for unknown or expired tokens.
pub fn resolve_identity(repo: &BoardRepo, token: &str) -> Result<Option<Identity>> {
    let Some(user_id) = repo.session_user(token)? else {
        return Ok(None);
    };
    let memberships = repo.memberships_for_user(&user_id)?;
    Ok(Some(Identity {
        user_id,
        memberships,
    }))
}

/// Create a session token for a user (used by tooling and tests).
pub fn create_session(repo: &BoardRepo, user_id: &str, expiry_days: i64) -> Result<String> {
    let token = generate_secure_token();
    let expires_at = Utc::now() + Duration::days(expiry_days);
    repo.insert_session(&token, user_id, expires_at)?;
    Ok(token)
}

/// Generate a cryptographically secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

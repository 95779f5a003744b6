//! Corkboard core
//!
//! The authoritative model behind collaborative boards: lanes of cards kept
//! in gap-free integer order, mutations gated by a cascading permission
//! model, and a typed event stream that live clients mirror.
//!
//! ## Layout
//!
//! - [`model`]: domain rows (cards, lanes, boards, projects, teams) and
//!   requester identity
//! - [`store`]: SQLite persistence with point lookups, bulk position shifts,
//!   and document save/replace
//! - [`permission`]: per-action permission resolution with invite-only veto
//! - [`hierarchy`]: the gated mutation surface ([`hierarchy::BoardService`])
//! - [`events`]: mutation events and the publish/subscribe bus
//! - [`mirror`]: client-side ordered mirror with optimistic drag support
//!
//! Transports (HTTP/WebSocket) live in `corkboard_sync_server`; this crate
//! has no opinion about framing.

pub mod error;
pub mod events;
pub mod hierarchy;
pub mod mirror;
pub mod model;
pub mod permission;
pub mod store;

pub use error::{CorkboardError, Result};

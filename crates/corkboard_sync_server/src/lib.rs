//! Corkboard Sync Server
//!
//! Live multi-client synchronization for Corkboard boards.
//!
//! ## Features
//!
//! - **Authoritative mutations**: thin HTTP handlers over the core board
//!   service; ordering and permissions are decided once, server-side
//! - **Real-time push**: committed mutations fan out as typed JSON events to
//!   every authorized, connected client over WebSocket
//! - **No replay**: delivery is at-most-once; a disconnected client catches
//!   up with a full scope fetch on reconnect
//! - **Persistent storage**: SQLite for board data and session tokens
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3050)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./corkboard.db)
//! - `SESSION_EXPIRY_DAYS`: Session token expiration (default: 30)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod config;
pub mod handlers;
pub mod identity;
pub mod sync;

pub use config::Config;

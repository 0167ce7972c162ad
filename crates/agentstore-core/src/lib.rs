//! agentstore-core: user accounts and chat history storage
//!
//! This crate owns the relational schema for `users` and `chat-histories`,
//! the ordered forward-only migration steps that produce it, the runner
//! that applies them, and a typed data-access handle over the result.

pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod migrator;
pub mod models;
pub mod paths;
pub mod schema;

pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;
pub use migrator::Migrator;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "agentstore";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "AGENTSTORE".to_string()
}

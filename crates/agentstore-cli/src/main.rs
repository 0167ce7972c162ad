//! agentstore CLI - user and chat history storage

use std::path::PathBuf;

use agentstore_core::migrations::MIGRATIONS;
use agentstore_core::migrator::{MigrationStatus, pending_status};
use agentstore_core::models::{HistoryEntry, MessageRole, NewChatSession, NewUser, UserUpdate};
use agentstore_core::{Config, Database};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "agentstore",
    author,
    version,
    about = "User and chat history storage with versioned migrations",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connection string, overriding config and DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (or inspect them)
    Migrate {
        #[command(subcommand)]
        command: Option<MigrateCommand>,
    },

    /// Check the live schema against the declared one
    Verify,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Manage chat sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Show database statistics
    Stats,
}

#[derive(Debug, Subcommand)]
enum MigrateCommand {
    /// Apply pending migrations
    Run,

    /// List migrations and whether they are applied
    Status,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Create a user
    Create {
        /// Unique email address
        email: String,

        /// Stored credential
        #[arg(long, env = "AGENTSTORE_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        payment_status: Option<String>,

        #[arg(long)]
        subscribed: Option<bool>,
    },

    /// Show a user by ID
    Show {
        id: Uuid,
    },

    /// Find a user by email
    Find {
        email: String,
    },

    /// List users
    List {
        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Update fields of a user
    Update {
        id: Uuid,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        payment_status: Option<String>,

        #[arg(long)]
        subscribed: Option<bool>,

        /// Subscription document (JSON, `null` clears)
        #[arg(long)]
        subscription: Option<String>,

        /// Free plan usage document (JSON, `null` clears)
        #[arg(long)]
        free_plan_usage: Option<String>,

        /// Notifications document (JSON, `null` clears)
        #[arg(long)]
        notifications: Option<String>,
    },

    /// Append a notification (JSON) to a user
    Notify {
        id: Uuid,
        notification: String,
    },

    /// Delete a user (refused while the user owns sessions)
    Delete {
        id: Uuid,

        /// Delete the user's sessions first
        #[arg(long)]
        with_sessions: bool,
    },

    /// List a user's sessions
    Sessions {
        id: Uuid,
    },
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Create a session for a user
    Create {
        user_id: Uuid,

        /// Session ID (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Initial history (JSON, defaults to an empty array)
        #[arg(long)]
        history: Option<String>,
    },

    /// Show a session
    Show {
        session_id: String,
    },

    /// List sessions
    List {
        /// Only sessions of this user
        #[arg(long)]
        user: Option<Uuid>,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Append a message to a session's history
    Append {
        session_id: String,

        /// Message role (user, assistant, system, tool)
        #[arg(long, default_value = "user")]
        role: String,

        content: String,
    },

    /// Move a session to another user
    Reassign {
        session_id: String,
        user_id: Uuid,
    },

    /// Delete a session
    Delete {
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let mut config = Config::ensure_at(&config_path)?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    // Initialize logging
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    tracing::debug!("Using config {}", config_path.display());

    // Status must not apply anything; everything else goes through the gate.
    if let Command::Migrate {
        command: Some(MigrateCommand::Status),
    } = cli.command
    {
        let missing = Config::sqlite_path(&config.database_url).is_some_and(|p| !p.exists());
        let statuses = if missing {
            pending_status(MIGRATIONS)
        } else {
            Database::connect_existing(&config.database_url, 1)
                .await?
                .migration_status()
                .await?
        };
        print_migration_status(&statuses);
        return Ok(());
    }

    let db = Database::open(&config)
        .await
        .context("Schema migration failed; refusing to continue")?;

    match cli.command {
        Command::Migrate { .. } => {
            print_migration_status(&db.migration_status().await?);
            Ok(())
        }
        Command::Verify => {
            db.verify_schema().await?;
            println!("Schema matches declaration.");
            Ok(())
        }
        Command::User { command } => cmd_user(&db, command).await,
        Command::Session { command } => cmd_session(&db, command).await,
        Command::Stats => cmd_stats(&db).await,
    }
}

fn print_migration_status(statuses: &[MigrationStatus]) {
    for status in statuses {
        let applied = status
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "pending".to_string());
        println!("{}_{} | {}", status.version, status.name, applied);
    }
}

async fn cmd_user(db: &Database, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Create {
            email,
            password,
            role,
            plan,
            payment_status,
            subscribed,
        } => {
            let new = NewUser {
                is_subscribed: subscribed,
                role,
                payment_status,
                plan,
                ..NewUser::new(email, password)
            };
            let user = db.create_user(&new).await?;
            println!("Created user: {} ({})", user.id, user.email);
        }
        UserCommand::Show { id } => {
            let user = db
                .get_user(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("User not found"))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserCommand::Find { email } => {
            let user = db
                .get_user_by_email(&email)
                .await?
                .ok_or_else(|| anyhow::anyhow!("User not found"))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserCommand::List { limit } => {
            let users = db.list_users(Some(limit)).await?;
            if users.is_empty() {
                println!("No users found.");
            }
            for user in users {
                println!(
                    "{} | {} | {} | {} | {}",
                    user.id,
                    user.email,
                    user.role,
                    user.plan,
                    user.payment_status
                );
            }
        }
        UserCommand::Update {
            id,
            email,
            password,
            role,
            plan,
            payment_status,
            subscribed,
            subscription,
            free_plan_usage,
            notifications,
        } => {
            let update = UserUpdate {
                email,
                password,
                is_subscribed: subscribed,
                subscription: subscription.as_deref().map(parse_json).transpose()?,
                free_plan_usage: free_plan_usage.as_deref().map(parse_json).transpose()?,
                role,
                payment_status,
                plan,
                notifications: notifications.as_deref().map(parse_json).transpose()?,
            };
            let user = db.update_user(id, &update).await?;
            println!("Updated user: {} (updatedAt {})", user.id, user.updated_at);
        }
        UserCommand::Notify { id, notification } => {
            let user = db.append_notification(id, &parse_json(&notification)?).await?;
            let count = user
                .notifications
                .as_ref()
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            println!("User {} now has {} notification(s)", user.id, count);
        }
        UserCommand::Delete { id, with_sessions } => {
            if with_sessions {
                let removed = db.delete_sessions_for_user(id).await?;
                println!("Deleted {removed} session(s)");
            }
            db.delete_user(id).await?;
            println!("Deleted user: {id}");
        }
        UserCommand::Sessions { id } => {
            let sessions = db.list_sessions_for_user(id, None).await?;
            print_sessions(&sessions);
        }
    }
    Ok(())
}

async fn cmd_session(db: &Database, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Create {
            user_id,
            session_id,
            history,
        } => {
            let mut new = match session_id {
                Some(session_id) => NewChatSession::new(session_id, user_id),
                None => NewChatSession::generated(user_id),
            };
            if let Some(raw) = history {
                new = new.with_history(parse_json(&raw)?);
            }
            let session = db.create_session(&new).await?;
            println!("Created session: {}", session.session_id);
        }
        SessionCommand::Show { session_id } => {
            let session = db
                .get_session(&session_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Session not found"))?;
            println!("Session: {}", session.session_id);
            println!("User: {}", session.user_id);
            println!("Created: {}", session.created_at);
            println!();
            if session.history.is_array() {
                for entry in session.entries() {
                    match serde_json::from_value::<HistoryEntry>(entry.clone()) {
                        Ok(entry) => {
                            println!("--- {} ---", entry.role);
                            println!("{}", entry.content);
                            println!();
                        }
                        Err(_) => println!("{entry}"),
                    }
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&session.history)?);
            }
        }
        SessionCommand::List { user, limit } => {
            let sessions = match user {
                Some(user_id) => db.list_sessions_for_user(user_id, Some(limit)).await?,
                None => db.list_sessions(Some(limit)).await?,
            };
            print_sessions(&sessions);
        }
        SessionCommand::Append {
            session_id,
            role,
            content,
        } => {
            let entry = HistoryEntry::new(MessageRole::from(role.as_str()), content);
            let session = db.append_history(&session_id, &entry.to_value()).await?;
            println!(
                "Session {} now has {} message(s)",
                session.session_id,
                session.entries().len()
            );
        }
        SessionCommand::Reassign {
            session_id,
            user_id,
        } => {
            let session = db.reassign_session(&session_id, user_id).await?;
            println!("Session {} now belongs to {}", session.session_id, session.user_id);
        }
        SessionCommand::Delete { session_id } => {
            db.delete_session(&session_id).await?;
            println!("Deleted session: {session_id}");
        }
    }
    Ok(())
}

async fn cmd_stats(db: &Database) -> Result<()> {
    let users = db.count_users().await?;
    let sessions = db.count_sessions().await?;
    let migrations = db.migration_status().await?;
    let applied = migrations.iter().filter(|m| m.is_applied()).count();

    println!("Database Statistics");
    println!("-------------------");
    println!("Users:      {users}");
    println!("Sessions:   {sessions}");
    println!("Migrations: {applied}/{}", migrations.len());

    Ok(())
}

fn print_sessions(sessions: &[agentstore_core::models::ChatSession]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }
    for session in sessions {
        let date = session.created_at.format("%Y-%m-%d %H:%M");
        println!(
            "{} | {} | {} | {} message(s)",
            session.session_id,
            session.user_id,
            date,
            session.entries().len()
        );
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {raw}"))
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Inspect and drive the Amity message store", version)]
pub struct Cli {
    /// SQLite database file (overrides messaging.json)
    #[arg(long, env = "AMITY_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Log fewer messages
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a member, or update their profile fields
    Member(MemberArgs),

    /// Send a message
    Send(SendArgs),

    /// List one page of a mailbox
    List(ListArgs),

    /// Show the conversation with another member and mark it read
    Thread(ThreadArgs),

    /// Delete a message for one participant
    Delete(DeleteArgs),
}

#[derive(clap::Args)]
pub struct MemberArgs {
    pub username: String,

    /// Display name
    #[arg(long)]
    pub known_as: Option<String>,

    /// Main photo URL
    #[arg(long)]
    pub photo_url: Option<String>,
}

#[derive(clap::Args)]
pub struct SendArgs {
    pub from: String,
    pub to: String,
    pub content: String,
}

#[derive(clap::Args)]
pub struct ListArgs {
    pub username: String,

    /// Inbox, Outbox, or anything else for unread
    #[arg(short, long, default_value = "Unread")]
    pub container: String,

    #[arg(short, long, allow_negative_numbers = true)]
    pub page: Option<i64>,

    #[arg(short = 's', long, allow_negative_numbers = true)]
    pub page_size: Option<i64>,
}

#[derive(clap::Args)]
pub struct ThreadArgs {
    pub username: String,
    pub other: String,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    pub id: i64,

    /// Participant deleting the message
    #[arg(long = "as")]
    pub username: String,
}

//! Mailbox - command-line front end for the Amity message store
//!
//! Each invocation is one request: it opens a repository session, performs a
//! single operation, and commits.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, error, info};
use messaging::{
    Container, DeleteOutcome, MailboxParams, MessageId, MessageRepository, MessageStore,
    MessagingConfig, NewMember, PaginationHeader, SqliteMessageStore,
};

mod cli;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let mut settings = MessagingConfig::load().context("Failed to load messaging config")?;
    if let Some(db) = cli.db {
        settings.database_path = Some(db);
    }

    let db_path = settings.database_path()?;
    debug!("Opening message store at {}", db_path.display());
    let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(&db_path)?);
    let mut repo = MessageRepository::with_config(store.clone(), &settings);

    match cli.command {
        Command::Member(args) => {
            let mut member = NewMember::new(args.username);
            if let Some(known_as) = args.known_as {
                member = member.known_as(known_as);
            }
            if let Some(photo_url) = args.photo_url {
                member = member.photo_url(photo_url);
            }
            let member = store.upsert_member(member)?;
            info!("Saved member {} (id {})", member.username, member.id);
        }
        Command::Send(args) => {
            repo.stage_send(&args.from, &args.to, args.content)?;
            if !repo.commit()? {
                bail!("Failed to send message");
            }
            let id = repo.last_inserted_ids().first().copied();
            info!("Sent message {:?} from {} to {}", id, args.from, args.to);
        }
        Command::List(args) => {
            let params = MailboxParams {
                username: args.username,
                container: Container::parse(&args.container),
                page_number: args.page,
                page_size: args.page_size,
            };
            let page = repo.get_mailbox(&params)?;
            println!(
                "{}: {}",
                PaginationHeader::NAME,
                page.header().to_header_value()
            );
            println!("{}", serde_json::to_string_pretty(&page.items)?);
        }
        Command::Thread(args) => {
            let thread = repo.get_thread_and_mark_read(&args.username, &args.other)?;
            println!("{}", serde_json::to_string_pretty(&thread)?);
        }
        Command::Delete(args) => {
            match repo.stage_delete_for(MessageId::new(args.id), &args.username)? {
                DeleteOutcome::NotFound => bail!("Message {} not found", args.id),
                outcome => {
                    if !repo.commit()? {
                        bail!("Problem deleting the message");
                    }
                    info!("Message {} {:?} for {}", args.id, outcome, args.username);
                }
            }
        }
    }

    Ok(())
}

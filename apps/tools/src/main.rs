use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use forum_core::filter_threads;
use shared::{domain::UserId, validation};
use storage::{Storage, ThreadStore, UserDirectory};
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/forum.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers a user or refreshes their name and email.
    AddUser {
        user_id: String,
        username: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    SetModerator {
        user_id: String,
        #[arg(long)]
        revoke: bool,
    },
    /// Lists threads newest first, optionally keeping those with any of the given tags.
    ListThreads {
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::AddUser {
            user_id,
            username,
            email,
        } => {
            let user = storage
                .register_user(&UserId::new(user_id), &username, &email)
                .await?;
            println!(
                "user {} ({}) moderator={}",
                user.id, user.username, user.is_moderator
            );
        }
        Command::SetModerator { user_id, revoke } => {
            let user_id = UserId::new(user_id);
            if !storage.set_moderator(&user_id, !revoke).await? {
                bail!("no user with id {user_id}");
            }
            info!(%user_id, is_moderator = !revoke, "moderator flag updated");
        }
        Command::ListThreads { tags } => {
            let selected = validation::resolve_tags(&tags)?;
            let threads = storage.fetch_all_threads().await?;
            for thread in filter_threads(&threads, &selected) {
                let tags: Vec<&str> = thread.tags.iter().map(|t| t.name.as_str()).collect();
                println!(
                    "{}  {}  [{}]  comments={} answered={} locked={}",
                    thread.id,
                    thread.title,
                    tags.join(", "),
                    thread.comments.len(),
                    thread.is_answered,
                    thread.is_locked
                );
            }
        }
    }

    Ok(())
}

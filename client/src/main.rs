/// Story Chat Client - Main entry point
///
/// A command-line shell over the story chat message cache and sync engine
use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use story_chat_client::{
    cli, events, ChatContext, ClientManager, RetentionPolicy, Session, SyncConfig,
};

#[derive(Parser)]
#[command(name = "story-chat")]
#[command(about = "Story Chat Client - Talk to story roles with an offline message cache")]
struct Args {
    /// Server URL (default: http://localhost:4000)
    #[arg(long, default_value = "http://localhost:4000")]
    server: String,

    /// Your user id
    #[arg(long)]
    user: String,

    /// Story role to talk to
    #[arg(long)]
    role: String,

    /// Chat id (default: <user>-<role>)
    #[arg(long)]
    chat: Option<String>,

    /// Bearer token for the server
    #[arg(long)]
    token: Option<String>,

    /// Directory for the message cache (default: ~/.storychat)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Messages per page
    #[arg(long, default_value_t = story_chat_client::config::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Timeout for each server call, in seconds
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    /// Drop cached messages older than this many days (0 disables)
    #[arg(long, default_value_t = 30)]
    max_age_days: u64,

    /// Keep at most this many cached messages per chat (0 disables)
    #[arg(long, default_value_t = story_chat_client::config::DEFAULT_MAX_MESSAGES_PER_CHAT)]
    max_messages: usize,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            page_size: self.page_size,
            gateway_timeout: Duration::from_secs(self.timeout_secs),
            retention: RetentionPolicy {
                max_age: (self.max_age_days > 0)
                    .then(|| Duration::from_secs(self.max_age_days * 24 * 60 * 60)),
                max_messages_per_chat: (self.max_messages > 0).then_some(self.max_messages),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let chat_id = args
        .chat
        .clone()
        .unwrap_or_else(|| format!("{}-{}", args.user, args.role));
    let context = ChatContext::new(chat_id, &args.user, &args.role);

    info!("Starting Story Chat Client");
    info!("Server: {}", args.server);
    info!("Chat: {} ({} with {})", context.chat_id, args.user, args.role);

    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => {
            use directories::BaseDirs;
            let base_dirs = BaseDirs::new().context("Failed to get home directory")?;
            base_dirs.home_dir().join(".storychat")
        }
    };
    info!("Data directory: {}", data_dir.display());

    let mut session = Session::new(&args.user);
    if let Some(token) = &args.token {
        session = session.with_token(token);
    }

    let (tx, rx) = events::channel();
    let manager = ClientManager::connect(&args.server, session.clone(), &data_dir, args.sync_config(), Some(tx))
        .context("Failed to initialize client")?;

    // Registration is best effort; the cache works without the server
    match story_chat_client::ServerApi::new(&args.server, session) {
        Ok(api) => {
            if let Err(e) = api.register_chat(&context).await {
                log::warn!("Could not register chat with server: {}", e);
            }
        }
        Err(e) => log::warn!("Invalid server configuration: {}", e),
    }

    cli::run_client_loop(&manager, context, rx).await?;

    match manager.prune().await {
        Ok(removed) if removed > 0 => info!("Pruned {} cached messages on exit", removed),
        Ok(_) => {}
        Err(e) => log::warn!("Pruning on exit failed: {}", e),
    }

    Ok(())
}

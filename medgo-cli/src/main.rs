//! medgo: terminal client for the MedGo clinical chat backend.
//!
//! # Subcommands
//! - `chat [message]`: one-shot or interactive chat; Ctrl+C stops the reply
//! - `sessions <list|new|switch|delete>`: manage local sessions
//! - `trace [turn_id] --view <runs|dag|tree>`: render a turn's execution path
//! - `uploads [--user-id <id>]`: watch knowledge uploads until they settle

mod render;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use medgo_client::{BackendClient, ConversationDriver, ReplayQuery, SendOutcome};
use medgo_core::{
    aggregate_node_runs, build_dag, build_path_tree, ChatEvent, Clock, FileKvStore, KvStore,
    MedgoConfig, MemoryKvStore, ResourcePoller, ReusableSessionCache, SessionStore, SystemClock,
    UploadQuery,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "medgo", version, about = "Terminal client for the MedGo clinical chat backend")]
struct Cli {
    #[arg(short, long, default_value = "medgo.toml")]
    config: String,

    /// Backend base URL (overrides backend.base_url)
    #[arg(long, env = "MEDGO_BACKEND_URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message, or start an interactive chat when none is given
    Chat {
        message: Option<String>,

        /// Continue the recently used session if it is still fresh
        #[arg(long)]
        resume: bool,
    },

    /// Manage local sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Fetch and render the execution path of a turn
    Trace {
        /// Defaults to the last traced turn of the active session
        turn_id: Option<String>,

        #[arg(long, value_enum, default_value_t = View::Dag)]
        view: View,

        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch knowledge uploads until every one is indexed or failed
    Uploads {
        /// Defaults to chat.user_id from the config
        #[arg(long)]
        user_id: Option<String>,

        /// Fetch once and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    List {
        #[arg(long)]
        json: bool,
    },
    New,
    Switch {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum View {
    Runs,
    Dag,
    Tree,
}

// ============================================================================
// Wiring
// ============================================================================

struct App {
    config: MedgoConfig,
    backend: BackendClient,
}

impl App {
    fn new(mut config: MedgoConfig, server: Option<String>) -> anyhow::Result<Self> {
        if let Some(server) = server {
            config.backend.base_url = server;
        }
        let backend = BackendClient::new(config.backend.clone())?;
        Ok(Self { config, backend })
    }

    fn storage(&self) -> anyhow::Result<(Arc<SessionStore>, ReusableSessionCache)> {
        let data_dir = &self.config.storage.data_dir;
        let kv: Arc<dyn KvStore> = Arc::new(
            FileKvStore::new(data_dir)
                .with_context(|| format!("cannot open session storage at {}", data_dir))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store = SessionStore::load(kv.clone(), clock.clone())?;
        let ttl = Duration::from_secs(self.config.storage.reusable_session_ttl_minutes * 60);
        let reuse = ReusableSessionCache::new(Arc::new(MemoryKvStore::new()), kv, clock).with_ttl(ttl);
        Ok((Arc::new(store), reuse))
    }

    async fn driver(&self) -> anyhow::Result<ConversationDriver> {
        let (store, reuse) = self.storage()?;
        let mut driver = ConversationDriver::open(self.backend.clone(), store, self.config.chat.clone())
            .await
            .with_reuse_cache(reuse);
        if self.config.chat.suggest_next_actions {
            driver = driver.with_suggester(Arc::new(self.backend.clone()));
        }
        Ok(driver)
    }
}

// ============================================================================
// Chat
// ============================================================================

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Delta {
            content: Some(text), ..
        } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        ChatEvent::Route(route) => {
            tracing::debug!(turn_id = ?route.turn_id, agent = ?route.agent, "Routed")
        }
        _ => {}
    }
}

/// Send one message; Ctrl+C stops the reply but keeps the session.
async fn send_one(driver: &Arc<ConversationDriver>, text: &str) -> anyhow::Result<()> {
    let mut sending = tokio::spawn({
        let driver = driver.clone();
        let text = text.to_string();
        async move { driver.send(&text, print_event).await }
    });

    let outcome = tokio::select! {
        joined = &mut sending => joined?,
        _ = tokio::signal::ctrl_c() => {
            driver.abort().await;
            sending.await?
        }
    };
    println!();

    match outcome? {
        SendOutcome::Completed(_) => {
            let actions = driver
                .messages()
                .last()
                .and_then(|m| m.next_actions.clone())
                .unwrap_or_default();
            for action in actions {
                println!("  > {}", action);
            }
        }
        SendOutcome::Failed(notice) => eprintln!("{}", notice),
        SendOutcome::Stopped => eprintln!("(stopped)"),
    }
    Ok(())
}

async fn run_chat(app: &App, message: Option<String>, resume: bool) -> anyhow::Result<()> {
    let driver = Arc::new(app.driver().await?);
    if resume {
        if let Some(id) = driver.resume_reusable().await? {
            eprintln!("Resumed session {}", id);
        }
    }

    if let Some(message) = message {
        return send_one(&driver, &message).await;
    }

    eprintln!(
        "Session {}. Type a message, or /new, /sessions, /quit.",
        driver.active_session_id()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                let snapshot = driver.new_session().await?;
                eprintln!("New session {}", snapshot.session_id);
            }
            "/sessions" => {
                let sessions = driver.list_sessions().await;
                print!("{}", render::sessions(&sessions, &driver.active_session_id()));
            }
            text => send_one(&driver, text).await?,
        }
    }
    Ok(())
}

// ============================================================================
// Sessions
// ============================================================================

async fn run_sessions(app: &App, action: SessionAction) -> anyhow::Result<()> {
    let driver = app.driver().await?;
    match action {
        SessionAction::List { json } => {
            let sessions = driver.list_sessions().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print!("{}", render::sessions(&sessions, &driver.active_session_id()));
            }
        }
        SessionAction::New => {
            let snapshot = driver.new_session().await?;
            println!("{}", snapshot.session_id);
        }
        SessionAction::Switch { id } => {
            driver.switch_session(&id).await?;
            println!("Switched to {}", id);
        }
        SessionAction::Delete { id } => {
            let active = driver.delete_session(&id).await?;
            println!("Deleted {}; active session is {}", id, active.session_id);
        }
    }
    Ok(())
}

// ============================================================================
// Trace
// ============================================================================

async fn run_trace(app: &App, turn_id: Option<String>, view: View, json: bool) -> anyhow::Result<()> {
    let mut query = match turn_id {
        Some(turn_id) => ReplayQuery::new(turn_id),
        None => {
            let (store, _) = app.storage()?;
            let active = store.active_snapshot().await;
            let turn_id = active
                .active_trace_id
                .context("no turn id given and the active session has no traced turn")?;
            ReplayQuery {
                conversation_id: Some(active.conversation_id),
                session_id: Some(active.session_id),
                ..ReplayQuery::new(turn_id)
            }
        }
    };
    query.max_lines = Some(app.config.backend.replay_max_lines);

    let replay = app.backend.path_replay(&query).await?;
    tracing::info!(turn_id = %query.turn_id, events = replay.events.len(), "Loaded path replay");

    let text = match view {
        View::Runs => {
            let runs = aggregate_node_runs(&replay.events);
            if json {
                serde_json::to_string_pretty(&runs)?
            } else {
                render::runs(&runs)
            }
        }
        View::Dag => {
            let dag = build_dag(&replay.events);
            if json {
                serde_json::to_string_pretty(&dag)?
            } else {
                render::dag(&dag)
            }
        }
        View::Tree => {
            let tree = build_path_tree(&replay.events, None);
            if json {
                serde_json::to_string_pretty(&tree)?
            } else {
                render::tree(&tree)
            }
        }
    };
    println!("{}", text.trim_end());
    Ok(())
}

// ============================================================================
// Uploads
// ============================================================================

async fn run_uploads(app: &App, user_id: Option<String>, once: bool) -> anyhow::Result<()> {
    let user_id = user_id
        .or_else(|| app.config.chat.user_id.clone())
        .context("no user id; pass --user-id or set chat.user_id")?;
    let query = UploadQuery::new(&user_id, app.config.poller.page_limit);

    if once {
        let page = app.backend.fetch_uploads(&query).await?;
        print!("{}", render::uploads(&page.items));
        return Ok(());
    }

    let poller = Arc::new(ResourcePoller::new(
        Arc::new(app.backend.clone()),
        query,
        app.config.poller.clone(),
        user_id,
    ));
    let mut updates = poller.subscribe();
    let mut handle = poller.clone().spawn();

    let stop = poller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            stop.cancel();
        }
    });

    // One line per fetch; phase-only updates are not printed.
    let mut printed = 0;
    let reason = loop {
        tokio::select! {
            joined = &mut handle => break joined?,
            changed = updates.changed() => {
                if changed.is_err() {
                    break handle.await?;
                }
                let state = updates.borrow_and_update().clone();
                if state.fetches > printed {
                    printed = state.fetches;
                    eprintln!("{}", render::poll_line(&state));
                }
            }
        }
    };

    print!("{}", render::uploads(&poller.state().items));
    println!("{}", render::stop_reason(&reason));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match MedgoConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    let app = App::new(config, cli.server)?;
    match cli.command {
        Commands::Chat { message, resume } => run_chat(&app, message, resume).await,
        Commands::Sessions { action } => run_sessions(&app, action).await,
        Commands::Trace { turn_id, view, json } => run_trace(&app, turn_id, view, json).await,
        Commands::Uploads { user_id, once } => run_uploads(&app, user_id, once).await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_trace_defaults_to_dag() {
        let cli = Cli::try_parse_from(["medgo", "trace", "turn-1"]).unwrap();
        match cli.command {
            Commands::Trace { turn_id, view, json } => {
                assert_eq!(turn_id.as_deref(), Some("turn-1"));
                assert_eq!(view, View::Dag);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sessions_switch_parses_id() {
        let cli = Cli::try_parse_from(["medgo", "-c", "alt.toml", "sessions", "switch", "abc"]).unwrap();
        assert_eq!(cli.config, "alt.toml");
        assert!(matches!(
            cli.command,
            Commands::Sessions {
                action: SessionAction::Switch { id }
            } if id == "abc"
        ));
    }

    #[test]
    fn test_server_flag_overrides_config() {
        let app = App::new(MedgoConfig::default(), Some("http://10.0.0.5:9000".to_string())).unwrap();
        assert_eq!(app.backend.config().base_url, "http://10.0.0.5:9000");
    }

    #[tokio::test]
    async fn test_driver_uses_configured_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MedgoConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        let app = App::new(config, None).unwrap();

        let first = app.driver().await.unwrap().active_session_id();
        let again = app.driver().await.unwrap().active_session_id();
        assert_eq!(first, again);
    }
}

//! `fabric` CLI — runs the control-plane gateway, manages cron/heartbeat
//! schedules, and offers a local chat REPL for smoke-testing.
//!
//! Usage:
//!   fabric serve              — start transports + cron + heartbeat + gateway
//!   fabric chat               — interactive REPL against the default router
//!   fabric onboard            — create a default configuration
//!   fabric status             — show configuration and health
//!   fabric cron {list,add,remove,run,status}
//!   fabric heartbeat {set,status}
//!   fabric sessions {list,delete}

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;

use fabric_core::agent::{AgentConfig, AgentLoop};
use fabric_core::bus::Bus;
use fabric_core::config::Config;
use fabric_core::cron::manager::AddJobParams;
use fabric_core::cron::store::ListRunsOpts;
use fabric_core::cron::{CronManager, CronStore};
use fabric_core::dedupe::Dedupe;
use fabric_core::gateway::connection::PresenceTracker;
use fabric_core::gateway::event_bridge::EventBridge;
use fabric_core::gateway::ingest::TransportIngest;
use fabric_core::gateway::methods::register_default_methods;
use fabric_core::gateway::registry::MethodRegistry;
use fabric_core::gateway::server::GatewayServer;
use fabric_core::gateway::state::GatewayState;
use fabric_core::gateway::waiter::RunWaiter;
use fabric_core::heartbeat::HeartbeatManager;
use fabric_core::model::HeartbeatConfig;
use fabric_core::poller_lock::PollerLock;
use fabric_core::provider::openai::OpenAiProvider;
use fabric_core::provider::{FallbackProvider, LlmProvider};
use fabric_core::router::{Router, SimpleRouter};
use fabric_core::session::SessionManager;
use fabric_core::store::Store;
use fabric_core::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use fabric_core::tools::web::{WebFetchTool, WebSearchTool};
use fabric_core::tools::ToolRegistry;

#[cfg(feature = "telegram")]
use fabric_core::gateway::channels::telegram::TelegramTransport;

#[cfg(feature = "discord")]
use fabric_core::gateway::channels::discord::DiscordTransport;

#[derive(Parser)]
#[command(
    name = "fabric",
    version,
    about = "Multi-channel agent automation fabric",
    long_about = "fabric — cron scheduling, heartbeats, transport ingest, and a control-plane gateway for running an agent across channels."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start transports, the cron manager, the heartbeat manager, and the control-plane gateway.
    Serve,
    /// Interactive REPL against the default router, for local smoke-testing.
    Chat {
        #[arg(short, long, default_value = "default")]
        session: String,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Create or reset the default configuration.
    Onboard,
    /// Show configuration status and health.
    Status,
    /// Manage scheduled jobs.
    Cron {
        #[command(subcommand)]
        action: CronCommands,
    },
    /// Manage per-agent heartbeats.
    Heartbeat {
        #[command(subcommand)]
        action: HeartbeatCommands,
    },
    /// Manage conversation sessions.
    Sessions {
        #[command(subcommand)]
        action: Option<SessionCommands>,
    },
}

#[derive(Subcommand)]
enum CronCommands {
    List,
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        schedule: String,
        #[arg(short, long)]
        agent_id: String,
        #[arg(long)]
        session_key: String,
        #[arg(short, long)]
        prompt: String,
    },
    Remove {
        id: String,
    },
    Run {
        id: String,
    },
    Status {
        id: String,
    },
}

#[derive(Subcommand)]
enum HeartbeatCommands {
    Set {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        enabled: bool,
        #[arg(long, default_value_t = 60_000)]
        interval_ms: u64,
        #[arg(long, default_value = "HEARTBEAT")]
        prompt: String,
    },
    Status {
        #[arg(long)]
        agent_id: String,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    List,
    Delete { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) => cmd_serve().await?,
        Some(Commands::Chat { session, model }) => cmd_chat(&session, model.as_deref()).await?,
        Some(Commands::Onboard) => cmd_onboard()?,
        Some(Commands::Status) => cmd_status()?,
        Some(Commands::Cron { action }) => cmd_cron(action).await?,
        Some(Commands::Heartbeat { action }) => cmd_heartbeat(action).await?,
        Some(Commands::Sessions { action }) => cmd_sessions(action)?,
        None => cmd_chat("default", None).await?,
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    if let Err(e) = config.validate() {
        anyhow::bail!("{e}\n\nRun `fabric onboard` first, then edit config.json");
    }
    Ok(())
}

/// Builds a fully wired [`AgentLoop`] from config: the provider fallback
/// chain plus the filesystem/web tool set every generation of this crate
/// has shipped.
fn build_agent(config: &Config, model_override: Option<&str>) -> Result<AgentLoop> {
    let active_providers = config.providers.find_all_active();
    if active_providers.is_empty() {
        anyhow::bail!("no LLM provider configured with a real API key. Run `fabric onboard` first, then edit config.json");
    }

    let client = reqwest::Client::new();
    let model = model_override.unwrap_or(&config.agents.defaults.model).to_string();
    let mut inner_providers = Vec::new();
    for (name, entry) in active_providers {
        let p = OpenAiProvider::new(name, &entry.api_key, entry.api_base.as_deref(), &model, client.clone());
        inner_providers.push((name.to_string(), Box::new(p) as Box<dyn LlmProvider>));
    }
    let provider = FallbackProvider::new(inner_providers);

    let workspace = config.workspace_path();
    let restrict = config.tools.restrict_to_workspace;
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(ReadFileTool::new(workspace.clone(), restrict)));
    tools.register(Box::new(WriteFileTool::new(workspace.clone(), restrict)));
    tools.register(Box::new(EditFileTool::new(workspace.clone(), restrict)));
    tools.register(Box::new(ListDirTool::new(workspace.clone(), restrict)));
    tools.register(Box::new(WebFetchTool::new()));
    if !config.tools.web_search.api_key.is_empty() {
        tools.register(Box::new(WebSearchTool::new(&config.tools.web_search.api_key, config.tools.web_search.max_results)));
    }

    let agent_config = AgentConfig {
        model: model_override.map(str::to_string),
        max_tokens: config.agents.defaults.max_tokens,
        temperature: config.agents.defaults.temperature,
        max_iterations: config.agents.defaults.max_tool_iterations,
        workspace,
    };

    Ok(AgentLoop::new(Box::new(provider), tools, agent_config))
}

// ── Serve ─────────────────────────────────────────────────────────────

async fn cmd_serve() -> Result<()> {
    let config = Config::load()?;
    validate_config(&config)?;

    let bus = Arc::new(Bus::new());
    let store = Store::new(config.store_dir());
    let cron_store = CronStore::new(store.clone());

    let agent = build_agent(&config, None)?;
    let router: Arc<dyn Router> = Arc::new(SimpleRouter::new(bus.clone(), Arc::new(Mutex::new(agent))));

    let cron = Arc::new(CronManager::new(cron_store, bus.clone(), router.clone()));
    let heartbeat = Arc::new(HeartbeatManager::new(store.clone(), bus.clone(), cron.clone(), router.clone()));
    let waiter = Arc::new(RunWaiter::new(bus.clone()));

    let gateway_state = Arc::new(GatewayState::new(
        bus.clone(),
        store.clone(),
        cron.clone(),
        heartbeat.clone(),
        router.clone(),
        waiter.clone(),
        &config.workspace_path(),
    ));

    let mut registry = MethodRegistry::new();
    register_default_methods(&mut registry, gateway_state.clone());
    let registry = Arc::new(registry);

    let presence = Arc::new(PresenceTracker::new(bus.clone()));
    let event_bridge = Arc::new(EventBridge::new(bus.clone()));
    tokio::spawn(event_bridge.clone().run());

    let cron_cancel = cron.clone().spawn();
    heartbeat.start().await;
    tokio::spawn(heartbeat.clone().watch_cron());

    let poller_lock = PollerLock::new(config.store_dir().join("poller_locks"));
    let mut guards = Vec::new();
    let mut transport_tasks = Vec::new();

    #[cfg(feature = "telegram")]
    {
        if let Some(tel) = config.channels.telegram.as_ref().filter(|t| t.enabled && !t.token.is_empty()) {
            let guard = poller_lock.acquire("telegram", &tel.token).await?;
            guards.push(guard);

            let transport = Arc::new(TelegramTransport::new(tel.token.clone(), tel.allow_from.clone()));
            let ingest = Arc::new(TransportIngest::new(
                transport.clone(),
                router.clone(),
                waiter.clone(),
                Dedupe::new(),
                store.clone(),
                "default",
            ));
            transport_tasks.push(tokio::spawn(async move {
                transport.run(ingest).await;
            }));
            tracing::info!("telegram transport enabled");
        }
    }

    #[cfg(feature = "discord")]
    {
        if let Some(disc) = config.channels.discord.as_ref().filter(|d| d.enabled && !d.token.is_empty()) {
            let guard = poller_lock.acquire("discord", &disc.token).await?;
            guards.push(guard);

            let transport = Arc::new(DiscordTransport::new(disc.token.clone(), disc.allow_from.clone()));
            let ingest = Arc::new(TransportIngest::new(
                transport.clone(),
                router.clone(),
                waiter.clone(),
                Dedupe::new(),
                store.clone(),
                "default",
            ));
            transport_tasks.push(tokio::spawn(async move {
                if let Err(e) = transport.run(ingest).await {
                    tracing::error!("discord transport failed: {e}");
                }
            }));
            tracing::info!("discord transport enabled");
        }
    }

    let server = Arc::new(GatewayServer::new(registry, presence, event_bridge, config.gateway.host.clone(), config.gateway.port));
    let server_task = tokio::spawn(server.serve());

    println!("  fabric gateway listening on {}:{}", config.gateway.host, config.gateway.port);
    println!("  Press Ctrl+C for graceful shutdown.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\n  Shutting down...");
        }
        res = server_task => {
            if let Ok(Err(e)) = res {
                tracing::error!("gateway server stopped: {e}");
            }
        }
    }

    cron_cancel.cancel();
    for guard in guards {
        poller_lock.release(guard).await;
    }
    for task in transport_tasks {
        task.abort();
    }

    Ok(())
}

// ── Chat ──────────────────────────────────────────────────────────────

async fn cmd_chat(session_key: &str, model_override: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    validate_config(&config)?;

    let model = model_override.unwrap_or(&config.agents.defaults.model).to_string();
    let workspace = config.workspace_path();
    let mut agent = build_agent(&config, model_override)?;

    println!();
    println!("  fabric v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Providers: {} | Model: {}",
        config.providers.find_all_active().iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", "),
        model
    );
    println!("  Session: {session_key} | Workspace: {}", workspace.display());
    println!();
    println!("  Type your message, or /quit to exit.");
    println!("  ─────────────────────────────────────");
    println!();

    let stdin = io::stdin();
    loop {
        print!("  > ");
        io::stdout().flush()?;

        let mut input = String::new();
        stdin.read_line(&mut input)?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => {
                println!("  Goodbye!");
                break;
            }
            "/clear" => {
                let mut mgr = SessionManager::new(&workspace);
                let session = mgr.get_or_create(session_key);
                session.clear();
                println!("  Session cleared.");
                continue;
            }
            "/status" => {
                cmd_status()?;
                continue;
            }
            _ => {}
        }

        println!();
        match agent.process(input, session_key).await {
            Ok(response) => println!("  {response}\n"),
            Err(e) => eprintln!("  Request failed: {e}\n"),
        }
    }

    Ok(())
}

// ── Onboard / Status ────────────────────────────────────────────────

fn cmd_onboard() -> Result<()> {
    let path = Config::write_default_template()?;
    println!();
    println!("  Configuration created at:");
    println!("     {}", path.display());
    println!();
    println!("  Next steps:");
    println!("  1. Edit the config file and add your API key");
    println!("  2. Run `fabric chat` to start chatting, or `fabric serve` to run the gateway");
    println!();
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load()?;

    println!();
    println!("  fabric status");
    println!("  ─────────────────────────────────────");

    if config_path.exists() {
        println!("  Config:    {}", config_path.display());
    } else {
        println!("  Config:    not found (run `fabric onboard`)");
        return Ok(());
    }

    match config.providers.find_active() {
        Some((name, _)) => println!("  Provider:  {name} configured"),
        None => println!("  Provider:  no provider configured"),
    }
    println!("  Model:     {}", config.agents.defaults.model);

    let ws = config.workspace_path();
    println!("  Workspace: {} {}", ws.display(), if ws.exists() { "" } else { "(will be created)" });

    let mgr = SessionManager::new(&ws);
    println!("  Sessions:  {} saved", mgr.list_sessions().len());
    println!("  Gateway:   {}:{}", config.gateway.host, config.gateway.port);

    println!();
    Ok(())
}

// ── Cron ──────────────────────────────────────────────────────────────

async fn cmd_cron(action: CronCommands) -> Result<()> {
    let config = Config::load()?;
    let bus = Arc::new(Bus::new());
    let store = Store::new(config.store_dir());
    let cron_store = CronStore::new(store);
    let router: Arc<dyn Router> = Arc::new(fabric_core::router::EchoRouter::new(bus.clone()));
    let cron = CronManager::new(cron_store, bus, router);

    match action {
        CronCommands::List => {
            let jobs = cron.list().await;
            if jobs.is_empty() {
                println!("  No scheduled jobs.");
            } else {
                for job in jobs {
                    let status = if job.enabled { "enabled " } else { "disabled" };
                    println!("  [{status}] {} ({}) — {}", job.name, job.id, job.schedule);
                }
            }
        }
        CronCommands::Add { name, schedule, agent_id, session_key, prompt } => {
            let job = cron
                .add(AddJobParams {
                    name,
                    schedule,
                    agent_id,
                    session_key,
                    prompt,
                    timezone: None,
                    jitter_sec: None,
                    timeout_ms: None,
                    meta: None,
                })
                .await?;
            println!("  Job added: {} ({})", job.name, job.id);
        }
        CronCommands::Remove { id } => {
            cron.remove(&id).await?;
            println!("  Job removed: {id}");
        }
        CronCommands::Run { id } => {
            let run = cron.run_now(&id).await?;
            println!("  Run {} finished with status={:?}", run.id, run.status);
        }
        CronCommands::Status { id } => {
            let job = cron.store().get_job(&id).await.ok_or_else(|| anyhow::anyhow!("job not found: {id}"))?;
            let last_run = cron.runs(&id, ListRunsOpts { limit: Some(1), status: None, since_ms: None }).await;
            println!("  {} ({}) — {}", job.name, job.id, job.schedule);
            match last_run.first() {
                Some(run) => println!("  Last run: {} status={:?}", run.id, run.status),
                None => println!("  No runs yet."),
            }
        }
    }

    Ok(())
}

// ── Heartbeat ─────────────────────────────────────────────────────────

async fn cmd_heartbeat(action: HeartbeatCommands) -> Result<()> {
    let config = Config::load()?;
    let bus = Arc::new(Bus::new());
    let store = Store::new(config.store_dir());
    let cron_store = CronStore::new(store.clone());
    let router: Arc<dyn Router> = Arc::new(fabric_core::router::EchoRouter::new(bus.clone()));
    let cron = Arc::new(CronManager::new(cron_store, bus.clone(), router.clone()));
    let heartbeat = Arc::new(HeartbeatManager::new(store, bus, cron, router));

    match action {
        HeartbeatCommands::Set { agent_id, enabled, interval_ms, prompt } => {
            heartbeat
                .update_config(
                    &agent_id,
                    HeartbeatConfig {
                        agent_id: agent_id.clone(),
                        enabled,
                        interval_ms,
                        prompt,
                    },
                )
                .await?;
            println!("  Heartbeat for {agent_id}: enabled={enabled} interval_ms={interval_ms}");
        }
        HeartbeatCommands::Status { agent_id } => match heartbeat.last(&agent_id).await {
            Some(last) => println!("  {agent_id}: {last:?}"),
            None => println!("  {agent_id}: no heartbeat recorded yet"),
        },
    }

    Ok(())
}

// ── Sessions ────────────────────────────────────────────────────────

fn cmd_sessions(action: Option<SessionCommands>) -> Result<()> {
    let config = Config::load()?;
    let ws = config.workspace_path();
    let mut mgr = SessionManager::new(&ws);

    match action {
        Some(SessionCommands::Delete { key }) => {
            if mgr.delete(&key) {
                println!("  Session deleted: {key}");
            } else {
                println!("  Session not found: {key}");
            }
        }
        Some(SessionCommands::List) | None => {
            let sessions = mgr.list_sessions();
            if sessions.is_empty() {
                println!("  No saved sessions.");
            } else {
                for (key, updated) in sessions {
                    println!("  {key} (updated: {updated})");
                }
            }
        }
    }

    Ok(())
}

//! fabric-core: the runtime library behind the multi-channel agent
//! automation fabric.
//!
//! Component map (§4 of the design document):
//!
//! - [`clock`] / [`error`] / [`bus`] / [`store`] — the foundation: IDs and
//!   time, the error taxonomy, the in-process pub/sub bus, namespaced KV
//!   persistence.
//! - [`session_key`] / [`dedupe`] / [`poller_lock`] / [`model`] — shared
//!   identifiers, dedupe tables, transport-exclusivity locking, and the
//!   wire/persistence data model.
//! - [`cron`] — cron schedule parsing, the cron job store, and the Cron
//!   Manager actor that ticks and executes due jobs.
//! - [`heartbeat`] — per-agent heartbeat probing, layered on cron for
//!   minute-or-slower cadences and a direct timer for sub-minute ones.
//! - [`router`] — the `Router` contract external engines submit jobs
//!   through, plus `EchoRouter` and the crate's own `SimpleRouter`.
//! - [`gateway`] — transport ingest, the run submitter/waiter, the
//!   approvals bridge, the control-plane method registry/frames/event
//!   bridge/connection state machine, and the concrete channel adapters.
//! - [`agent`] / [`provider`] / [`session`] / [`tools`] — the agent loop
//!   itself: LLM providers, conversation sessions, and the tool registry
//!   it calls out to.
//! - [`config`] — typed configuration loading from JSON.
//!
//! # Quick start
//!
//! ```no_run
//! use fabric_core::config::Config;
//! use fabric_core::provider::openai::OpenAiProvider;
//! use fabric_core::agent::{AgentLoop, AgentConfig};
//! use fabric_core::tools::ToolRegistry;
//!
//! let config = Config::load().unwrap();
//! let (name, entry) = config.providers.find_active().unwrap();
//! let client = reqwest::Client::new();
//! let provider = OpenAiProvider::new(
//!     name,
//!     &entry.api_key,
//!     entry.api_base.as_deref(),
//!     &config.agents.defaults.model,
//!     client,
//! );
//!
//! let tools = ToolRegistry::new();
//! let agent_config = AgentConfig {
//!     model: None,
//!     max_tokens: config.agents.defaults.max_tokens,
//!     temperature: config.agents.defaults.temperature,
//!     max_iterations: config.agents.defaults.max_tool_iterations,
//!     workspace: config.workspace_path(),
//! };
//!
//! let agent = AgentLoop::new(Box::new(provider), tools, agent_config);
//! ```

pub mod agent;
pub mod bus;
pub mod clock;
pub mod config;
pub mod cron;
pub mod dedupe;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod model;
pub mod outbox;
pub mod poller_lock;
pub mod provider;
pub mod router;
pub mod session;
pub mod session_key;
pub mod store;
pub mod tools;

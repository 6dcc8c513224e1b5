//! Discord [`Transport`] (§6): turns gateway message events into
//! [`InboundMessage`]s and delivers replies through the REST client.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{FabricError, Result};
use crate::gateway::transport::Transport;
use crate::gateway::utils::chunk_message;
use crate::model::{DeliveryDescriptor, InboundEnvelope, InboundMessage, OutboundPayload, Peer, PeerKind};

const DISCORD_MAX_LEN: usize = 2000;

pub struct DiscordTransport {
    token: String,
    http: Http,
    allow_from: Vec<String>,
    sent: Mutex<HashSet<String>>,
}

impl DiscordTransport {
    pub fn new(token: String, allow_from: Vec<String>) -> Self {
        Self {
            http: Http::new(&token),
            token,
            allow_from,
            sent: Mutex::new(HashSet::new()),
        }
    }
}

struct Handler {
    transport: Arc<DiscordTransport>,
    ingest: Arc<crate::gateway::ingest::TransportIngest>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: DiscordMessage) {
        if msg.author.bot {
            return;
        }
        let raw = match serde_json::to_value(&msg) {
            Ok(v) => v,
            Err(e) => {
                error!("discord: failed to serialize message: {e}");
                return;
            }
        };
        match self.transport.normalize(raw) {
            Ok(Some(inbound)) => self.ingest.handle(inbound).await,
            Ok(None) => {}
            Err(e) => warn!("discord: dropping unnormalizable message: {e}"),
        }
    }

    async fn ready(&self, _: Context, ready: serenity::model::gateway::Ready) {
        info!("discord transport ready: {}", ready.user.name);
    }
}

impl DiscordTransport {
    /// Runs the gateway client, feeding every accepted message to
    /// `ingest.handle`.
    pub async fn run(
        self: Arc<Self>,
        ingest: Arc<crate::gateway::ingest::TransportIngest>,
    ) -> std::result::Result<(), serenity::Error> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::DIRECT_MESSAGES;
        let mut client = Client::builder(&self.token, intents)
            .event_handler(Handler {
                transport: self.clone(),
                ingest,
            })
            .await?;

        info!("discord transport starting");
        client.start().await
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    fn channel_id(&self) -> &str {
        "discord"
    }

    fn normalize(&self, raw: serde_json::Value) -> Result<Option<InboundMessage>> {
        let msg: DiscordMessage = serde_json::from_value(raw)
            .map_err(|e| FabricError::InvalidRequest(format!("malformed discord message: {e}")))?;

        if msg.content.is_empty() {
            return Ok(None);
        }
        let user_id = msg.author.id.to_string();
        if !self.allow_from.is_empty() && !self.allow_from.contains(&user_id) {
            warn!(user_id, channel_id = %msg.channel_id, "discord: rejected sender not in allow_from");
            return Ok(None);
        }

        Ok(Some(InboundMessage {
            channel_id: "discord".into(),
            account_id: "discord".into(),
            peer: Peer {
                kind: if msg.guild_id.is_some() { PeerKind::Group } else { PeerKind::Dm },
                id: msg.channel_id.to_string(),
                thread_id: None,
            },
            sender: user_id,
            message: InboundEnvelope {
                id: msg.id.to_string(),
                text: msg.content.clone(),
                timestamp: msg.timestamp.unix_timestamp(),
                reply_to_id: msg.referenced_message.as_ref().map(|m| m.id.to_string()),
            },
            raw: serde_json::Value::Null,
            meta: serde_json::Value::Null,
        }))
    }

    async fn deliver(&self, payload: OutboundPayload) -> Result<DeliveryDescriptor> {
        if let Some(key) = &payload.idempotency_key {
            let mut sent = self.sent.lock().await;
            if !sent.insert(key.clone()) {
                return Ok(DeliveryDescriptor { message_id: key.clone() });
            }
        }

        let channel_id: u64 = payload
            .peer_id
            .parse()
            .map_err(|_| FabricError::InvalidRequest(format!("invalid discord channel id: {}", payload.peer_id)))?;

        let mut last_id = String::new();
        for chunk in chunk_message(&payload.text, DISCORD_MAX_LEN) {
            match ChannelId::new(channel_id).say(&self.http, chunk).await {
                Ok(sent) => last_id = sent.id.to_string(),
                Err(e) => {
                    error!("discord: say failed: {e}");
                    return Err(FabricError::Unavailable(format!("discord delivery failed: {e}")));
                }
            }
        }
        Ok(DeliveryDescriptor { message_id: last_id })
    }
}

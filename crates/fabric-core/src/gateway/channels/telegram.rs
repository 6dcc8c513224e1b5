//! Telegram [`Transport`] (§6): turns Telegram Bot API updates into
//! [`InboundMessage`]s and delivers replies back through the bot client.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message as TgMessage};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{FabricError, Result};
use crate::gateway::transport::Transport;
use crate::gateway::utils::chunk_message;
use crate::model::{DeliveryDescriptor, InboundEnvelope, InboundMessage, OutboundPayload, Peer, PeerKind};

const TELEGRAM_MAX_LEN: usize = 4096;

pub struct TelegramTransport {
    bot: Bot,
    allow_from: Vec<String>,
    /// `idempotency_key`s already delivered, so a replayed key doesn't
    /// double-send (§6's Transport contract requires this).
    sent: Mutex<HashSet<String>>,
}

impl TelegramTransport {
    pub fn new(token: String, allow_from: Vec<String>) -> Self {
        Self {
            bot: Bot::new(token),
            allow_from,
            sent: Mutex::new(HashSet::new()),
        }
    }

    /// Runs the long-poll dispatcher, feeding every accepted update to
    /// `ingest.handle`.
    pub async fn run(self: Arc<Self>, ingest: Arc<crate::gateway::ingest::TransportIngest>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().endpoint({
            let transport = self.clone();
            move |msg: TgMessage| {
                let transport = transport.clone();
                let ingest = ingest.clone();
                async move {
                    let raw = serde_json::to_value(&msg).unwrap_or(serde_json::Value::Null);
                    match transport.normalize(raw) {
                        Ok(Some(inbound)) => ingest.handle(inbound).await,
                        Ok(None) => {}
                        Err(e) => warn!("telegram: dropping unnormalizable update: {e}"),
                    }
                    respond(())
                }
            }
        });

        info!("telegram transport starting");
        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn channel_id(&self) -> &str {
        "telegram"
    }

    fn normalize(&self, raw: serde_json::Value) -> Result<Option<InboundMessage>> {
        let msg: TgMessage = serde_json::from_value(raw)
            .map_err(|e| FabricError::InvalidRequest(format!("malformed telegram update: {e}")))?;

        let Some(text) = msg.text() else {
            return Ok(None);
        };
        let user_id = msg
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if !self.allow_from.is_empty() && !self.allow_from.contains(&user_id) {
            warn!(user_id, chat_id = %msg.chat.id, "telegram: rejected sender not in allow_from");
            return Ok(None);
        }

        Ok(Some(InboundMessage {
            channel_id: "telegram".into(),
            account_id: "telegram".into(),
            peer: Peer {
                kind: if msg.chat.is_private() { PeerKind::Dm } else { PeerKind::Group },
                id: msg.chat.id.to_string(),
                // Forum topic threading isn't modeled yet; top-level chat
                // id is enough to round-trip a reply.
                thread_id: None,
            },
            sender: user_id,
            message: InboundEnvelope {
                id: msg.id.to_string(),
                text: text.to_string(),
                timestamp: msg.date.timestamp(),
                reply_to_id: msg.reply_to_message().map(|m| m.id.to_string()),
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

        let chat_id: i64 = payload
            .peer_id
            .parse()
            .map_err(|_| FabricError::InvalidRequest(format!("invalid telegram chat id: {}", payload.peer_id)))?;

        let mut last_id = String::new();
        for chunk in chunk_message(&payload.text, TELEGRAM_MAX_LEN) {
            match self.bot.send_message(ChatId(chat_id), chunk).await {
                Ok(sent) => last_id = sent.id.to_string(),
                Err(e) => {
                    error!("telegram: send_message failed: {e}");
                    return Err(FabricError::Unavailable(format!("telegram delivery failed: {e}")));
                }
            }
        }
        Ok(DeliveryDescriptor { message_id: last_id })
    }
}

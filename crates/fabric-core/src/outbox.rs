//! Channel outbound delivery collaborator.
//!
//! A thin seam so components that need to push a message at a channel
//! (completion forwarding, approval prompts) don't need to know which
//! transport owns the destination — they just enqueue an
//! [`crate::model::OutboundPayload`] and the right transport's `deliver`
//! picks it up, honoring `idempotency_key`.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DeliveryDescriptor, OutboundPayload};

#[async_trait]
pub trait ChannelOutbox: Send + Sync {
    async fn enqueue(&self, payload: OutboundPayload) -> Result<DeliveryDescriptor>;
}

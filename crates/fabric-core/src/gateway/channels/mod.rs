//! Concrete [`super::transport::Transport`] adapters, feature-gated since
//! their SDKs pull in a full client stack apiece.

#[cfg(feature = "telegram")]
pub mod telegram;

#[cfg(feature = "discord")]
pub mod discord;

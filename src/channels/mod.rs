//! Channel abstraction layer — web/bot/phone transports for the guarded
//! agent runtime.
//!
//! A **channel** is any transport layer that delivers [`traits::ChannelMessage`]s
//! between the orchestration runtime and an external peer (chat WebSocket
//! client, Telegram, Discord, Slack, phone call).
//!
//! # Architecture
//!
//! ```text
//!   Gateway WS / Telegram API / Discord API / Slack API
//!         │
//!         ▼
//!   ┌─────────────┐
//!   │  Channel    │  (impl: TelegramChannel, DiscordChannel, …)
//!   └──────┬──────┘
//!          │ mpsc::Sender<ChannelMessage>
//!          ▼
//!   ┌─────────────────┐
//!   │  ChannelManager │  aggregates all channels into one receiver
//!   └──────┬──────────┘
//!          │ mpsc::Receiver<ChannelMessage>
//!          ▼
//!   Interceptor / Approval Broker (bot-channel HITL prompts)
//! ```
//!
//! # Registering a new channel
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crate::channels::ChannelManager;
//! use crate::event_bus::TokioBroadcastBus;
//!
//! let bus = Arc::new(TokioBroadcastBus::new());
//! let mgr = ChannelManager::new();
//! let (rx, _handles) = mgr.start_all(64).await;
//! // poll rx for inbound approval replies
//! ```

pub mod manager;
#[cfg(feature = "channels-telegram")]
pub mod telegram;
pub mod traits;

#[cfg(feature = "channels-discord")]
pub mod discord;

#[cfg(feature = "channels-matrix")]
pub mod matrix_;

#[cfg(feature = "channels-slack")]
pub mod slack;

pub use manager::ChannelManager;
pub use traits::{Channel, ChannelEvent, ChannelMessage};

#[cfg(feature = "channels-telegram")]
pub use telegram::{BotCommand, TelegramChannel, TelegramConfig};

#[cfg(feature = "channels-discord")]
pub use discord::{DiscordChannel, DiscordConfig};

#[cfg(feature = "channels-matrix")]
pub use matrix_::{MatrixChannel, MatrixConfig};

#[cfg(feature = "channels-slack")]
pub use slack::{SlackChannel, SlackConfig};

//! # wsbridge-core
//!
//! Shared vocabulary for the WebSocket <-> broker relay.
//!
//! - [`ChannelPair`]: the `outgoing`/`incoming` broker channels a relay binds to
//! - [`BridgeError`]: error kinds shared by every adapter
//! - [`BridgeEvent`], [`EventBus`]: lifecycle notifications and the sink they flow through
//! - [`BrokerPort`], [`Subscription`]: the pub/sub capability the relays consume
//! - [`callback`]: panic isolation for user hooks

#![deny(unsafe_code)]

pub mod broker;
pub mod callback;
pub mod channel;
pub mod errors;
pub mod events;
pub mod ids;
pub mod sink;

pub use broker::{BrokerPort, Subscription};
pub use channel::ChannelPair;
pub use errors::{BridgeError, Result};
pub use events::{BridgeEvent, Side};
pub use ids::{ConnectionId, ConnectionIdAllocator};
pub use sink::{EventBus, EventListener};

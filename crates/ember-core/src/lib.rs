//! # ember-core
//!
//! Presence, message routing and burn scheduling for the Ember relay.
//!
//! This crate provides the stateful heart of the relay:
//!
//! - **Connection** - Live socket handles and their outbound queues
//! - **Presence** - Which user is reachable on which connection
//! - **Lifecycle** - Anonymous → Identified → Closed per socket
//! - **Router** - Persist, then deliver, private messages
//! - **Burn** - Deferred deletion of burn messages
//! - **Store** - The persistence gateway the router writes through
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Lifecycle  │────▶│  Presence   │◀────│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                          │         │
//!                                          ▼         ▼
//!                                   ┌──────────┐ ┌──────────┐
//!                                   │  Store   │◀│  Burn    │
//!                                   └──────────┘ └──────────┘
//! ```

pub mod burn;
pub mod channel;
pub mod connection;
pub mod lifecycle;
pub mod message;
pub mod presence;
pub mod router;
pub mod store;

pub use burn::{BurnAudience, BurnConfig, BurnPolicy, BurnScheduler, BurnTimer};
pub use channel::{ChannelDirectory, ChannelError, ChannelKey};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionTable};
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
pub use message::{Message, MessageId, NewMessage, UserId};
pub use presence::PresenceRegistry;
pub use router::{Delivery, MessageRouter, RouterConfig, RouterError, RoutingMode};
pub use store::{MemoryStore, MessageStore, StoreError};

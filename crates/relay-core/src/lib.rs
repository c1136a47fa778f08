//! # relay-core
//!
//! Message routing and history retention for the Relay chat engine.
//!
//! This crate decides who receives a message, how message identity and
//! ordering are assigned, and how bounded history is served:
//!
//! - **Dispatcher** - Validates the sender, builds and routes messages
//! - **History** - Per-channel ordered log of public messages
//! - **Aggregator** - Merges history across channels
//! - **Registry** - The subscription registry seam, plus an in-memory one
//! - **Relay** - Routes tagged requests to the components above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Request   │────▶│ Dispatcher  │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │ Aggregator  │────▶│   History   │
//! └─────────────┘     └─────────────┘
//! ```

pub mod aggregator;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod memory;
pub mod registry;
pub mod sanitize;
pub mod service;

pub use aggregator::HistoryAggregator;
pub use channel::{validate_channel_name, ChannelId};
pub use dispatcher::{Dispatcher, CHAT_SEQUENCE};
pub use error::RelayError;
pub use history::{ChatHistory, HistoryConfig, MemoryChatHistory};
pub use memory::{MemoryRegistry, RegistryConfig, RegistryError, RegistryStats};
pub use registry::{SubscriptionInfo, SubscriptionRegistry};
pub use service::{Relay, RelayConfig, RequestContext};

pub use relay_protocol::{ChatMessage, MessageId, Payload, PushEvent};

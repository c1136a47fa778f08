//! # relay-protocol
//!
//! Wire types for the Relay chat engine.
//!
//! This crate defines everything that crosses a process boundary: the chat
//! message record, the request variants accepted by the relay, and the events
//! pushed to subscribers along with their binary codec.
//!
//! ## Types
//!
//! - `ChatMessage` - A delivered chat message, as stored in history
//! - `Request` / `Response` - Tagged request variants and their results
//! - `PushEvent` - Events pushed to a live subscription
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Payload, PushEvent};
//!
//! let event = PushEvent::notify(Some("cmd.announce"), Payload::raw("lobby", "hi"));
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod message;
pub mod requests;

pub use codec::{decode, encode, ProtocolError};
pub use events::{Payload, PushEvent};
pub use message::{ChatMessage, MessageId};
pub use requests::{GetHistory, HistoryResponse, PostChat, PostRaw, Request, Response};

//! # ember-protocol
//!
//! Wire events exchanged between Ember clients and the relay.
//!
//! Every event travels as an adjacently tagged object:
//!
//! ```json
//! {"event": "private_message", "data": {"senderId": "a", "receiverId": "b", "text": "hi"}}
//! ```
//!
//! ## Events
//!
//! - `login` / `join_room` / `private_message` / `message_seen` - client to server
//! - `receive_message` / `message_burnt` / `get_users` - server to client
//! - `connected` / `ping` / `pong` / `error` - session housekeeping
//!
//! ## Example
//!
//! ```rust
//! use ember_protocol::{codec, ClientEvent};
//!
//! let event: ClientEvent = codec::decode_text(r#"{"event":"login","data":"alice"}"#).unwrap();
//! assert_eq!(event, ClientEvent::Login("alice".to_string()));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_text, encode, encode_text, ProtocolError};
pub use frames::{
    error_code, ChatMessage, ClientEvent, EventKind, RoomRequest, SendRequest, ServerEvent,
    PROTOCOL_VERSION,
};

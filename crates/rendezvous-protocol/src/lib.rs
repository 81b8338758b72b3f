//! # rendezvous-protocol
//!
//! Wire protocol definitions for the Rendezvous signaling relay.
//!
//! This crate defines the events exchanged between peers and the relay,
//! and the codecs used to put them on a WebSocket.
//!
//! ## Events
//!
//! - `register` / `users` - Identity registration and presence broadcast
//! - `call-offer` / `call-answer` - Session negotiation
//! - `ice-candidate` - Network path candidates
//! - `end-call` / `call-ended` - Hang up
//!
//! ## Example
//!
//! ```rust
//! use rendezvous_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::register("alice");
//!
//! let text = codec::encode_json(&event).unwrap();
//! assert_eq!(text, r#"{"event":"register","data":"alice"}"#);
//!
//! let decoded: ClientEvent = codec::decode_json(&text).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use events::{ClientEvent, ServerEvent, SignalKind};

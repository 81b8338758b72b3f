//! # rendezvous-core
//!
//! Presence registry and signal routing for the Rendezvous relay.
//!
//! This crate provides the building blocks the server wires to a transport:
//!
//! - **Router** - Owns live connections and relays signals by identity
//! - **Presence** - Two-way identity ↔ connection registry
//! - **Signal** - A relayed offer, answer, candidate or hang-up
//! - **ConnectionId** - Opaque handle for one client connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ register  ┌─────────────┐  users   ┌─────────────┐
//! │  Connection │──────────▶│   Router    │─────────▶│ every conn  │
//! └─────────────┘  signal   └─────────────┘  signal  └─────────────┘
//!                                  │          ───────▶ recipient conn
//!                                  ▼
//!                           ┌─────────────┐
//!                           │  Presence   │
//!                           └─────────────┘
//! ```

pub mod connection;
pub mod message;
pub mod presence;
pub mod router;

pub use connection::{ConnectionId, Inbox, Outbound};
pub use message::{ForwardOutcome, Inbound, Signal};
pub use presence::{Presence, Registration};
pub use router::{Dispatch, Router, RouterConfig, RouterStats};

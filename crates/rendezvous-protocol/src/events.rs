//! Event types for the Rendezvous signaling protocol.
//!
//! Every event travels as `{"event": <name>, "data": <payload>}`. Inbound
//! and outbound events share some names (`call-offer`, `call-answer`,
//! `ice-candidate`) but not shapes: the server strips the recipient and
//! keeps the sender.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Claim an identity for this connection.
    #[serde(rename = "register")]
    Register(String),

    /// Session offer for `to`.
    #[serde(rename = "call-offer")]
    CallOffer {
        from: String,
        to: String,
        #[serde(default)]
        offer: Value,
    },

    /// Session answer for `to`.
    #[serde(rename = "call-answer")]
    CallAnswer {
        from: String,
        to: String,
        #[serde(default)]
        answer: Value,
    },

    /// Network path candidate for `to`.
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: String,
        to: String,
        #[serde(default)]
        candidate: Value,
    },

    /// Hang up on `to`.
    #[serde(rename = "end-call")]
    EndCall { from: String, to: String },
}

/// Events sent by the relay to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Current presence set, broadcast on every membership change.
    #[serde(rename = "users")]
    Users(Vec<String>),

    #[serde(rename = "call-offer")]
    CallOffer { from: String, offer: Value },

    #[serde(rename = "call-answer")]
    CallAnswer { from: String, answer: Value },

    #[serde(rename = "ice-candidate")]
    IceCandidate { from: String, candidate: Value },

    #[serde(rename = "call-ended")]
    CallEnded { from: String },
}

/// The four relayed signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    EndCall,
}

impl SignalKind {
    /// Name of the inbound event carrying this kind.
    #[must_use]
    pub fn inbound_event(self) -> &'static str {
        match self {
            SignalKind::Offer => "call-offer",
            SignalKind::Answer => "call-answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::EndCall => "end-call",
        }
    }

    /// Name of the event delivered to the recipient.
    #[must_use]
    pub fn outbound_event(self) -> &'static str {
        match self {
            SignalKind::Offer => "call-offer",
            SignalKind::Answer => "call-answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::EndCall => "call-ended",
        }
    }

    /// Build the delivered event for this kind.
    ///
    /// `EndCall` carries no payload, so `payload` is discarded for it.
    #[must_use]
    pub fn deliver(self, from: String, payload: Value) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::CallOffer {
                from,
                offer: payload,
            },
            SignalKind::Answer => ServerEvent::CallAnswer {
                from,
                answer: payload,
            },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                from,
                candidate: payload,
            },
            SignalKind::EndCall => ServerEvent::CallEnded { from },
        }
    }
}

impl ClientEvent {
    /// Get the event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::CallOffer { .. } => SignalKind::Offer.inbound_event(),
            ClientEvent::CallAnswer { .. } => SignalKind::Answer.inbound_event(),
            ClientEvent::IceCandidate { .. } => SignalKind::IceCandidate.inbound_event(),
            ClientEvent::EndCall { .. } => SignalKind::EndCall.inbound_event(),
        }
    }

    /// Create a register event.
    #[must_use]
    pub fn register(identity: impl Into<String>) -> Self {
        ClientEvent::Register(identity.into())
    }

    /// Create a call offer.
    #[must_use]
    pub fn offer(from: impl Into<String>, to: impl Into<String>, offer: Value) -> Self {
        ClientEvent::CallOffer {
            from: from.into(),
            to: to.into(),
            offer,
        }
    }

    /// Create a call answer.
    #[must_use]
    pub fn answer(from: impl Into<String>, to: impl Into<String>, answer: Value) -> Self {
        ClientEvent::CallAnswer {
            from: from.into(),
            to: to.into(),
            answer,
        }
    }

    /// Create an ICE candidate event.
    #[must_use]
    pub fn candidate(from: impl Into<String>, to: impl Into<String>, candidate: Value) -> Self {
        ClientEvent::IceCandidate {
            from: from.into(),
            to: to.into(),
            candidate,
        }
    }

    /// Create an end-call event.
    #[must_use]
    pub fn end_call(from: impl Into<String>, to: impl Into<String>) -> Self {
        ClientEvent::EndCall {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl ServerEvent {
    /// Get the event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Users(_) => "users",
            ServerEvent::CallOffer { .. } => SignalKind::Offer.outbound_event(),
            ServerEvent::CallAnswer { .. } => SignalKind::Answer.outbound_event(),
            ServerEvent::IceCandidate { .. } => SignalKind::IceCandidate.outbound_event(),
            ServerEvent::CallEnded { .. } => SignalKind::EndCall.outbound_event(),
        }
    }
}

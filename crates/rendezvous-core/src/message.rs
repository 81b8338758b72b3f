//! Signal messages relayed between peers.

use rendezvous_protocol::{ClientEvent, ServerEvent, SignalKind};
use serde_json::Value;

/// A signaling message addressed to one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Signal kind.
    pub kind: SignalKind,
    /// Sender identity as asserted by the client.
    pub from: String,
    /// Recipient identity.
    pub to: String,
    /// Opaque payload (`Null` for end-call).
    pub payload: Value,
}

impl Signal {
    /// Create a new signal.
    #[must_use]
    pub fn new(
        kind: SignalKind,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    /// The event the recipient receives.
    #[must_use]
    pub fn into_delivery(self) -> ServerEvent {
        self.kind.deliver(self.from, self.payload)
    }
}

/// An inbound event, split by how the router handles it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Identity registration.
    Register(String),
    /// Signal to relay.
    Signal(Signal),
}

impl From<ClientEvent> for Inbound {
    fn from(event: ClientEvent) -> Self {
        let signal = match event {
            ClientEvent::Register(identity) => return Inbound::Register(identity),
            ClientEvent::CallOffer { from, to, offer } => {
                Signal::new(SignalKind::Offer, from, to, offer)
            }
            ClientEvent::CallAnswer { from, to, answer } => {
                Signal::new(SignalKind::Answer, from, to, answer)
            }
            ClientEvent::IceCandidate {
                from,
                to,
                candidate,
            } => Signal::new(SignalKind::IceCandidate, from, to, candidate),
            ClientEvent::EndCall { from, to } => {
                Signal::new(SignalKind::EndCall, from, to, Value::Null)
            }
        };
        Inbound::Signal(signal)
    }
}

/// Result of forwarding a signal.
///
/// Only used for logging and metrics; senders are never told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Handed to the recipient's outbound queue.
    Delivered,
    /// No connection is registered under the recipient identity.
    UnknownRecipient,
    /// The recipient's connection closed before delivery.
    RecipientGone,
    /// `from` does not match the sender's registered identity.
    SenderMismatch,
}

impl ForwardOutcome {
    /// Whether the signal reached the recipient's queue.
    #[must_use]
    pub fn is_delivered(self) -> bool {
        self == ForwardOutcome::Delivered
    }

    /// Short label for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardOutcome::Delivered => "delivered",
            ForwardOutcome::UnknownRecipient => "unknown_recipient",
            ForwardOutcome::RecipientGone => "recipient_gone",
            ForwardOutcome::SenderMismatch => "sender_mismatch",
        }
    }
}

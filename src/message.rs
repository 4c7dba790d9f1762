//! The message envelope exchanged between agents, and the reserved control kinds.

use bytes::Bytes;

use crate::identifier::Identifier;

/// `VALID_REQUEST`: a communication-partner validation request. Payload is
/// arbitrary validation-request bytes.
pub const VALID_REQUEST: i32 = -1;

/// `VALID`: reply to a `VALID_REQUEST`. Payload is exactly one byte, 0 or 1.
pub const VALID: i32 = -2;

/// `COM_MAIN_END`: signals that the sender has finished the main communication
/// phase. Payload is empty.
pub const COM_MAIN_END: i32 = -3;

/// `COM_STATE_UPDATE`: a model agent's new state, emitted to observers at the end
/// of the state-update phase. Payload is the new state bytes.
pub const COM_STATE_UPDATE: i32 = -4;

/// `META_UPDATE_MODEL`: a meta-agent pushing a new state down to one of its
/// subsumed model agents. Payload is the new model state bytes; `recipient` is
/// the target model agent.
pub const META_UPDATE_MODEL: i32 = -5;

/// `META_STATE_UPDATE`: a meta-agent's state-update notification to observers.
/// Payload is empty.
pub const META_STATE_UPDATE: i32 = -6;

/// Returns `true` if `kind` is one of the six reserved control kinds.
///
/// Positive kinds, and `0`, are available for user-defined message types.
#[must_use]
pub fn is_reserved_kind(kind: i32) -> bool {
    (-6..=-1).contains(&kind)
}

/// A message exchanged between two agents, or broadcast with no single recipient.
///
/// `recipient` is absent for broadcasts: the runtime fills in the actual
/// destination per-copy when fanning a broadcast out to a recipient list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Identifier,
    recipient: Option<Identifier>,
    kind: i32,
    data: Bytes,
}

impl Message {
    /// Builds a new message. `sender` must be a real, registered agent identifier
    /// — the runtime's broadcast primitives treat a message with no sender as a
    /// programmer contract violation (see [`crate::error::PlatformError::ContractViolation`]).
    #[must_use]
    pub fn new(sender: Identifier, recipient: Option<Identifier>, kind: i32, data: Bytes) -> Self {
        Self {
            sender,
            recipient,
            kind,
            data,
        }
    }

    /// Builds a copy of this message addressed to a different recipient, used when
    /// fanning a broadcast out to an explicit recipient list.
    #[must_use]
    pub fn with_recipient(&self, recipient: Identifier) -> Self {
        Self {
            recipient: Some(recipient),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn sender(&self) -> Identifier {
        self.sender
    }

    #[must_use]
    pub fn recipient(&self) -> Option<Identifier> {
        self.recipient
    }

    #[must_use]
    pub fn kind(&self) -> i32 {
        self.kind
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Reads the first byte of a `VALID` message's payload as a bool.
    ///
    /// # Panics
    /// Panics if `data` is empty — an empty `VALID` payload is a programmer
    /// contract violation per spec §7, not a recoverable error.
    #[must_use]
    pub fn valid_payload(&self) -> bool {
        assert!(
            !self.data.is_empty(),
            "VALID message with empty data — did you compose the message?"
        );
        self.data[0] != 0
    }

    /// Builds a `VALID` reply payload from a bool result.
    #[must_use]
    pub fn valid_bytes(is_valid: bool) -> Bytes {
        Bytes::from_static(if is_valid { &[1u8] } else { &[0u8] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_kinds_are_exactly_the_six_negative_constants() {
        for kind in [
            VALID_REQUEST,
            VALID,
            COM_MAIN_END,
            COM_STATE_UPDATE,
            META_UPDATE_MODEL,
            META_STATE_UPDATE,
        ] {
            assert!(is_reserved_kind(kind));
        }
        assert!(!is_reserved_kind(0));
        assert!(!is_reserved_kind(1));
        assert!(!is_reserved_kind(-7));
    }

    #[test]
    #[should_panic(expected = "VALID message with empty data")]
    fn empty_valid_payload_is_fatal() {
        let sender = Identifier::generate();
        let msg = Message::new(sender, None, VALID, Bytes::new());
        let _ = msg.valid_payload();
    }

    #[test]
    fn with_recipient_preserves_everything_else() {
        let sender = Identifier::generate();
        let other = Identifier::generate();
        let msg = Message::new(sender, None, 42, Bytes::from_static(b"hi"));
        let addressed = msg.with_recipient(other);
        assert_eq!(addressed.recipient(), Some(other));
        assert_eq!(addressed.sender(), sender);
        assert_eq!(addressed.kind(), 42);
        assert_eq!(addressed.data(), msg.data());
    }
}

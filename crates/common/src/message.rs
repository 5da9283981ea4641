//! Protocol message exchanged over the simulated network.

use crate::types::ParticipantId;

/// A unit of protocol communication.
///
/// The phase a message belongs to is not part of the message: it is implied
/// by the network session it is sent on. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: ParticipantId,
    to: Option<ParticipantId>,
    payload: Vec<u8>,
}

impl Message {
    /// Message for every other live participant.
    pub fn broadcast(from: ParticipantId, payload: Vec<u8>) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    /// Message for exactly one participant.
    pub fn direct(from: ParticipantId, to: ParticipantId, payload: Vec<u8>) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    pub fn sender(&self) -> &ParticipantId {
        &self.from
    }

    /// Recipient, `None` for broadcast.
    pub fn recipient(&self) -> Option<&ParticipantId> {
        self.to.as_ref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_and_direct() {
        let b = Message::broadcast("a1".into(), vec![1, 2, 3]);
        assert!(b.is_broadcast());
        assert_eq!(b.recipient(), None);
        assert_eq!(b.len(), 3);

        let d = Message::direct("a1".into(), "a2".into(), vec![]);
        assert!(!d.is_broadcast());
        assert_eq!(d.recipient(), Some(&ParticipantId::from("a2")));
        assert!(d.is_empty());
    }
}

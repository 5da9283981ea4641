//! Round messages of the bundled suite and their `bincode` envelope.

use serde::{Deserialize, Serialize};

use common::{Message, ParticipantId};

use super::math::{point_from_bytes, point_to_bytes, scalar_from_bytes, scalar_to_bytes, Pt, Sc};
use crate::error::ProtocolError;

/// Round-tagged payload. Points and scalars travel in their canonical byte
/// encodings and are parsed on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Envelope {
    Liveness { contribution: [u8; 32] },
    Commitments { points: Vec<Vec<u8>> },
    Share { scalar: Vec<u8> },
    Nonce { point: Vec<u8> },
    Partial { scalar: Vec<u8> },
}

impl Envelope {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Envelope::Liveness { .. } => "liveness",
            Envelope::Commitments { .. } => "commitments",
            Envelope::Share { .. } => "share",
            Envelope::Nonce { .. } => "nonce",
            Envelope::Partial { .. } => "partial",
        }
    }

    pub(crate) fn commitments(points: &[Pt]) -> Self {
        Envelope::Commitments {
            points: points.iter().map(point_to_bytes).collect(),
        }
    }

    pub(crate) fn share(share: &Sc) -> Self {
        Envelope::Share {
            scalar: scalar_to_bytes(share),
        }
    }

    pub(crate) fn nonce(commitment: &Pt) -> Self {
        Envelope::Nonce {
            point: point_to_bytes(commitment),
        }
    }

    pub(crate) fn partial(z: &Sc) -> Self {
        Envelope::Partial {
            scalar: scalar_to_bytes(z),
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        // Serialising an enum of byte vectors into a Vec cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    pub(crate) fn decode(msg: &Message) -> Result<Self, ProtocolError> {
        bincode::deserialize(msg.payload()).map_err(|e| ProtocolError::Decode {
            sender: msg.sender().clone(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn to_broadcast(&self, from: &ParticipantId) -> Message {
        Message::broadcast(from.clone(), self.encode())
    }

    pub(crate) fn to_direct(&self, from: &ParticipantId, to: &ParticipantId) -> Message {
        Message::direct(from.clone(), to.clone(), self.encode())
    }
}

/// Reject a round that arrived with the wrong delivery mode.
pub(crate) fn expect_broadcast(msg: &Message, round: &'static str) -> Result<(), ProtocolError> {
    if msg.is_broadcast() {
        Ok(())
    } else {
        Err(ProtocolError::ExpectedBroadcast {
            sender: msg.sender().clone(),
            round,
        })
    }
}

pub(crate) fn expect_direct(msg: &Message, round: &'static str) -> Result<(), ProtocolError> {
    if msg.is_broadcast() {
        Err(ProtocolError::ExpectedDirect {
            sender: msg.sender().clone(),
            round,
        })
    } else {
        Ok(())
    }
}

pub(crate) fn unexpected(msg: &Message, envelope: &Envelope) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        sender: msg.sender().clone(),
        kind: envelope.kind(),
    }
}

pub(crate) fn parse_point(sender: &ParticipantId, bytes: &[u8]) -> Result<Pt, ProtocolError> {
    point_from_bytes(bytes).ok_or_else(|| ProtocolError::Decode {
        sender: sender.clone(),
        reason: "invalid curve point".into(),
    })
}

pub(crate) fn parse_scalar(sender: &ParticipantId, bytes: &[u8]) -> Result<Sc, ProtocolError> {
    scalar_from_bytes(bytes).ok_or_else(|| ProtocolError::Decode {
        sender: sender.clone(),
        reason: "invalid scalar".into(),
    })
}

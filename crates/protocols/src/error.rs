//! Protocol error types.

use common::{ParticipantId, RosterError};
use thiserror::Error;

use crate::pool::PoolError;

/// Fatal faults raised by a protocol machine.
///
/// Every variant ends the phase for the participant that observed it; there
/// is no retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload could not be decoded.
    #[error("failed to decode message from {sender}: {reason}")]
    Decode {
        sender: ParticipantId,
        reason: String,
    },

    /// Sender is not a participant of this phase.
    #[error("unexpected sender {0}")]
    UnexpectedSender(ParticipantId),

    /// Second message of the same round from one sender.
    #[error("duplicate {round} message from {sender}")]
    Duplicate {
        sender: ParticipantId,
        round: &'static str,
    },

    /// Message kind does not belong to this protocol.
    #[error("unexpected {kind} message from {sender}")]
    UnexpectedMessage {
        sender: ParticipantId,
        kind: &'static str,
    },

    /// A round that must be broadcast arrived point-to-point.
    #[error("{round} message from {sender} must be broadcast")]
    ExpectedBroadcast {
        sender: ParticipantId,
        round: &'static str,
    },

    /// A round that must be point-to-point arrived as broadcast.
    #[error("{round} message from {sender} must be point-to-point")]
    ExpectedDirect {
        sender: ParticipantId,
        round: &'static str,
    },

    /// Malformed commitment vector.
    #[error("invalid commitment from {dealer}: {reason}")]
    InvalidCommitment {
        dealer: ParticipantId,
        reason: String,
    },

    /// Secret share does not match the dealer's commitments.
    #[error("share from {dealer} does not match its commitments")]
    InvalidShare { dealer: ParticipantId },

    /// Partial signature does not match the signer's public share.
    #[error("invalid partial signature from {signer}")]
    InvalidPartial { signer: ParticipantId },

    /// Aggregate nonce commitment is the identity point.
    #[error("aggregate nonce commitment is the identity")]
    ZeroNonce,

    /// Derived secret share disagrees with the derived public share.
    #[error("derived key share is inconsistent with the public shares")]
    InconsistentShare,

    #[error("{0} is not a signer")]
    NotASigner(ParticipantId),

    #[error("protocol has not finished")]
    NotFinished,

    #[error("protocol result already taken")]
    AlreadyTaken,

    #[error("bad parameters: {0}")]
    BadParameters(String),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_participant() {
        let err = ProtocolError::InvalidShare {
            dealer: ParticipantId::from("a3"),
        };
        assert_eq!(err.to_string(), "share from a3 does not match its commitments");

        let err = ProtocolError::Duplicate {
            sender: ParticipantId::from("a2"),
            round: "nonce",
        };
        assert_eq!(err.to_string(), "duplicate nonce message from a2");
    }

    #[test]
    fn test_roster_error_converts() {
        let err: ProtocolError = RosterError::Empty.into();
        assert_eq!(err, ProtocolError::Roster(RosterError::Empty));
    }
}

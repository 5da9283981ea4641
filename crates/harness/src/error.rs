//! Harness error types.

use std::time::Duration;

use thiserror::Error;

use common::{ParticipantId, RosterError, SessionId};
use protocols::ProtocolError;

/// Errors raised by the simulated network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("participant {0} is not on the roster")]
    UnknownParticipant(ParticipantId),

    /// The receiving participant itself has withdrawn.
    #[error("participant {0} has withdrawn")]
    Withdrawn(ParticipantId),

    #[error("{participant} received nothing on {session} within {after:?}")]
    Timeout {
        participant: ParticipantId,
        session: SessionId,
        after: Duration,
    },

    /// A peer the phase depends on left the network before it started.
    #[error("participant {peer} withdrew before the phase started")]
    PeerWithdrawn { peer: ParticipantId },

    #[error("{actual} attempted to send as {claimed}")]
    ForgedSender {
        claimed: ParticipantId,
        actual: ParticipantId,
    },
}

/// Why a single phase run stopped before producing a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("network error: {0}")]
    Network(NetworkError),

    #[error("timed out on {session} after {after:?}")]
    Timeout { session: SessionId, after: Duration },

    #[error("phase panicked")]
    Panicked,
}

impl From<NetworkError> for RunError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Timeout { session, after, .. } => RunError::Timeout { session, after },
            other => RunError::Network(other),
        }
    }
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout { .. })
    }
}

/// Rejected harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one participant is required")]
    NoParticipants,

    #[error("threshold {threshold} must be below the participant count {participants}")]
    ThresholdTooLarge {
        threshold: usize,
        participants: usize,
    },

    #[error("receive timeout must be positive")]
    ZeroTimeout,

    #[error(transparent)]
    Roster(#[from] RosterError),
}

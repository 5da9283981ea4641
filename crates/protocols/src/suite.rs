//! Phase constructors consumed by the harness orchestrator.

use std::sync::Arc;

use common::{ParticipantId, Roster};

use crate::error::ProtocolError;
use crate::machine::ProtocolMachine;
use crate::pool::Pool;
use crate::types::{KeyShare, LivenessDigest, PreSignature, Signature};

/// A family of protocol machines, one constructor per phase.
///
/// Constructors only set up state and queue the first round of messages;
/// all I/O happens in the harness run loop.
pub trait ProtocolSuite: Send + Sync + 'static {
    type Liveness: ProtocolMachine<Output = LivenessDigest>;
    type Keygen: ProtocolMachine<Output = KeyShare>;
    type Refresh: ProtocolMachine<Output = KeyShare>;
    type Sign: ProtocolMachine<Output = Signature>;
    type Presign: ProtocolMachine<Output = PreSignature>;
    type PresignOnline: ProtocolMachine<Output = Signature>;

    /// Suite name used in logs.
    fn name(&self) -> &'static str;

    fn liveness(&self, id: &ParticipantId, roster: &Roster)
        -> Result<Self::Liveness, ProtocolError>;

    fn keygen(
        &self,
        id: &ParticipantId,
        roster: &Roster,
        threshold: usize,
        pool: Arc<Pool>,
    ) -> Result<Self::Keygen, ProtocolError>;

    fn refresh(&self, share: &KeyShare, pool: Arc<Pool>) -> Result<Self::Refresh, ProtocolError>;

    fn sign(
        &self,
        share: &KeyShare,
        signers: &Roster,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<Self::Sign, ProtocolError>;

    fn presign(
        &self,
        share: &KeyShare,
        signers: &Roster,
        pool: Arc<Pool>,
    ) -> Result<Self::Presign, ProtocolError>;

    fn presign_online(
        &self,
        share: &KeyShare,
        presignature: &PreSignature,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<Self::PresignOnline, ProtocolError>;
}

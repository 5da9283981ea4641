//! Two-phase signing: a message-independent presign round followed by a
//! single online round once the message is known.

use std::sync::Arc;

use rand::rngs::OsRng;
use tracing::debug;

use common::{Message, ParticipantId, Roster};

use super::inbox::Inbox;
use super::math::{generator_mul, sum_points, Pt, Sc};
use super::sign::{check_signers, collect_nonces, Combiner, NONCE_ROUND, PARTIAL_ROUND};
use super::wire::{expect_broadcast, parse_point, parse_scalar, unexpected, Envelope};
use crate::error::ProtocolError;
use crate::machine::{Progress, ProtocolMachine};
use crate::pool::Pool;
use crate::types::{KeyShare, PreSignature, Signature};

/// Offline round: exchange nonce commitments.
pub struct Presign {
    id: ParticipantId,
    signers: Roster,
    nonce: Sc,
    nonce_commitment: Pt,
    nonces: Inbox<Pt>,
    outgoing: Vec<Message>,
    progress: Progress<PreSignature>,
}

impl Presign {
    pub fn new(share: &KeyShare, signers: &Roster) -> Result<Self, ProtocolError> {
        check_signers(share, signers)?;

        let nonce = Sc::random(&mut OsRng);
        let nonce_commitment = generator_mul(&nonce);

        let mut outgoing = Vec::new();
        if signers.len() > 1 {
            outgoing.push(Envelope::nonce(&nonce_commitment).to_broadcast(&share.id));
        }

        let mut machine = Self {
            id: share.id.clone(),
            signers: signers.clone(),
            nonce,
            nonce_commitment,
            nonces: Inbox::new(NONCE_ROUND, signers, &share.id),
            outgoing,
            progress: Progress::Running,
        };
        machine.try_finish();
        Ok(machine)
    }

    fn handle(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let sender = msg.sender();
        match Envelope::decode(msg)? {
            Envelope::Nonce { point } => {
                expect_broadcast(msg, NONCE_ROUND)?;
                let point = parse_point(sender, &point)?;
                self.nonces.insert(sender, point)
            }
            other => Err(unexpected(msg, &other)),
        }
    }

    fn try_finish(&mut self) {
        if !self.nonces.is_complete() {
            return;
        }

        let result = collect_nonces(&self.signers, &self.id, self.nonce_commitment, &self.nonces)
            .map(|commitments| PreSignature {
                id: self.id.clone(),
                signers: self.signers.clone(),
                nonce: self.nonce,
                r: sum_points(&commitments),
                commitments,
            });
        if result.is_ok() {
            debug!(participant = %self.id, "Pre-signature assembled");
        }
        self.progress.finish(result);
    }
}

impl ProtocolMachine for Presign {
    type Output = PreSignature;

    fn outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.progress.is_terminal() {
            return Ok(());
        }
        self.handle(&msg).map_err(|e| self.progress.fail(e))?;
        self.try_finish();
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }

    fn result(&mut self) -> Result<PreSignature, ProtocolError> {
        self.progress.take()
    }
}

/// Online round: exchange partial signatures over a known message.
pub struct PresignOnline {
    id: ParticipantId,
    combiner: Combiner,
    own: Sc,
    pool: Arc<Pool>,
    partials: Inbox<Sc>,
    outgoing: Vec<Message>,
    progress: Progress<Signature>,
}

impl PresignOnline {
    pub fn new(
        share: &KeyShare,
        presignature: &PreSignature,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<Self, ProtocolError> {
        if presignature.id != share.id {
            return Err(ProtocolError::BadParameters(format!(
                "pre-signature of {} used by {}",
                presignature.id, share.id
            )));
        }
        let signers = &presignature.signers;
        check_signers(share, signers)?;

        let combiner = Combiner::new(share, signers, presignature.commitments.clone(), message)?;
        let own = combiner.partial(share, &presignature.nonce)?;

        let mut outgoing = Vec::new();
        if signers.len() > 1 {
            outgoing.push(Envelope::partial(&own).to_broadcast(&share.id));
        }

        let mut machine = Self {
            id: share.id.clone(),
            combiner,
            own,
            pool,
            partials: Inbox::new(PARTIAL_ROUND, signers, &share.id),
            outgoing,
            progress: Progress::Running,
        };
        machine.try_finish()?;
        Ok(machine)
    }

    fn handle(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let sender = msg.sender();
        match Envelope::decode(msg)? {
            Envelope::Partial { scalar } => {
                expect_broadcast(msg, PARTIAL_ROUND)?;
                let z = parse_scalar(sender, &scalar)?;
                self.partials.insert(sender, z)
            }
            other => Err(unexpected(msg, &other)),
        }
    }

    fn try_finish(&mut self) -> Result<(), ProtocolError> {
        if !self.partials.is_complete() {
            return Ok(());
        }
        let signature = self
            .combiner
            .combine(&self.id, self.own, &self.partials, &self.pool)?;
        debug!(participant = %self.id, "Online signature combined");
        self.progress.finish(Ok(signature));
        Ok(())
    }
}

impl ProtocolMachine for PresignOnline {
    type Output = Signature;

    fn outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.progress.is_terminal() {
            return Ok(());
        }
        self.handle(&msg)
            .and_then(|_| self.try_finish())
            .map_err(|e| self.progress.fail(e))
    }

    fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }

    fn result(&mut self) -> Result<Signature, ProtocolError> {
        self.progress.take()
    }
}

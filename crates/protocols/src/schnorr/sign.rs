//! Two-round threshold Schnorr signing.
//!
//! Round 1 broadcasts a nonce commitment `R_i = k_i·G`. Round 2 broadcasts
//! the partial `z_i = k_i + c·λ_i·x_i` with `c = H(R ‖ P ‖ m)`. Partials are
//! checked against the signers' public shares before they are summed.

use std::sync::Arc;

use rand::rngs::OsRng;
use tracing::debug;

use common::{Message, ParticipantId, Roster};

use super::inbox::Inbox;
use super::math::{challenge, generator_mul, lagrange_at_zero, sum_points, Pt, Sc};
use super::wire::{expect_broadcast, parse_point, parse_scalar, unexpected, Envelope};
use crate::error::ProtocolError;
use crate::machine::{Progress, ProtocolMachine};
use crate::pool::Pool;
use crate::types::{KeyShare, Signature};

pub(crate) const NONCE_ROUND: &str = "nonce";
pub(crate) const PARTIAL_ROUND: &str = "partial";

/// Check that `signers` can sign with `share` and that `share`'s owner is
/// one of them.
pub(crate) fn check_signers(share: &KeyShare, signers: &Roster) -> Result<(), ProtocolError> {
    if !signers.contains(&share.id) {
        return Err(ProtocolError::NotASigner(share.id.clone()));
    }
    if !signers.is_subset_of(&share.roster) {
        return Err(ProtocolError::BadParameters(format!(
            "signers {} are not all key holders",
            signers
        )));
    }
    if signers.len() <= share.threshold {
        return Err(ProtocolError::BadParameters(format!(
            "{} signers cannot meet threshold {}",
            signers.len(),
            share.threshold
        )));
    }
    Ok(())
}

/// Nonce commitment of every signer, in signer order.
pub(crate) fn collect_nonces(
    signers: &Roster,
    me: &ParticipantId,
    own: Pt,
    received: &Inbox<Pt>,
) -> Result<Vec<Pt>, ProtocolError> {
    signers
        .iter()
        .map(|id| {
            if id == me {
                Ok(own)
            } else {
                received.get(id).copied().ok_or(ProtocolError::NotFinished)
            }
        })
        .collect()
}

/// Signer term of the combination: nonce commitment, public share and
/// Lagrange coefficient.
#[derive(Clone, Copy)]
struct Term {
    nonce: Pt,
    public_share: Pt,
    lambda: Sc,
}

/// Verifies and sums partial signatures once the aggregate nonce is fixed.
pub(crate) struct Combiner {
    signers: Roster,
    terms: Vec<Term>,
    r: Pt,
    c: Sc,
}

impl Combiner {
    /// `nonces` are the signers' commitments in signer order.
    pub(crate) fn new(
        share: &KeyShare,
        signers: &Roster,
        nonces: Vec<Pt>,
        message: &[u8],
    ) -> Result<Self, ProtocolError> {
        let r = sum_points(&nonces);
        if r.is_zero() {
            return Err(ProtocolError::ZeroNonce);
        }
        let c = challenge(&r, &share.public_key, message);

        let xs = signers
            .iter()
            .map(|id| share.evaluation_point_of(id))
            .collect::<Result<Vec<Sc>, _>>()?;

        let mut terms = Vec::with_capacity(signers.len());
        for ((id, x), nonce) in signers.iter().zip(&xs).zip(nonces) {
            let public_share = share
                .public_share_point(id)
                .ok_or_else(|| ProtocolError::NotASigner(id.clone()))?;
            terms.push(Term {
                nonce,
                public_share,
                lambda: lagrange_at_zero(x, &xs)?,
            });
        }

        Ok(Self {
            signers: signers.clone(),
            terms,
            r,
            c,
        })
    }

    /// This signer's partial signature.
    pub(crate) fn partial(&self, share: &KeyShare, nonce: &Sc) -> Result<Sc, ProtocolError> {
        let own = self
            .signers
            .position(&share.id)
            .ok_or_else(|| ProtocolError::NotASigner(share.id.clone()))?;
        Ok(*nonce + self.c * self.terms[own].lambda * share.secret)
    }

    /// Verify every peer partial in the pool and sum them with `own`.
    pub(crate) fn combine(
        &self,
        me: &ParticipantId,
        own: Sc,
        partials: &Inbox<Sc>,
        pool: &Pool,
    ) -> Result<Signature, ProtocolError> {
        let mut checks = Vec::with_capacity(self.terms.len());
        for (id, term) in self.signers.iter().zip(&self.terms) {
            if id == me {
                continue;
            }
            let z = partials
                .get(id)
                .copied()
                .ok_or_else(|| ProtocolError::InvalidPartial { signer: id.clone() })?;
            checks.push((id.clone(), *term, z));
        }

        let c = self.c;
        let verdicts = pool.map(checks, move |(id, term, z)| {
            let expected = term.nonce + term.public_share * (c * term.lambda);
            (id, z, generator_mul(&z) == expected)
        })?;

        let mut z = own;
        for (signer, partial, ok) in verdicts {
            if !ok {
                return Err(ProtocolError::InvalidPartial { signer });
            }
            z = z + partial;
        }

        Ok(Signature { r: self.r, z })
    }
}

/// Interactive signing machine.
pub struct Sign {
    share: KeyShare,
    signers: Roster,
    message: Vec<u8>,
    pool: Arc<Pool>,
    nonce: Sc,
    nonce_commitment: Pt,
    nonces: Inbox<Pt>,
    partials: Inbox<Sc>,
    /// Set once round 2 has been sent.
    combiner: Option<(Combiner, Sc)>,
    outgoing: Vec<Message>,
    progress: Progress<Signature>,
}

impl Sign {
    pub fn new(
        share: &KeyShare,
        signers: &Roster,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<Self, ProtocolError> {
        check_signers(share, signers)?;

        let nonce = Sc::random(&mut OsRng);
        let nonce_commitment = generator_mul(&nonce);

        let mut outgoing = Vec::new();
        if signers.len() > 1 {
            outgoing.push(Envelope::nonce(&nonce_commitment).to_broadcast(&share.id));
        }

        let mut machine = Self {
            share: share.clone(),
            signers: signers.clone(),
            message: message.to_vec(),
            pool,
            nonce,
            nonce_commitment,
            nonces: Inbox::new(NONCE_ROUND, signers, &share.id),
            partials: Inbox::new(PARTIAL_ROUND, signers, &share.id),
            combiner: None,
            outgoing,
            progress: Progress::Running,
        };
        machine.advance()?;
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
            Envelope::Partial { scalar } => {
                expect_broadcast(msg, PARTIAL_ROUND)?;
                let z = parse_scalar(sender, &scalar)?;
                self.partials.insert(sender, z)
            }
            other => Err(unexpected(msg, &other)),
        }
    }

    fn advance(&mut self) -> Result<(), ProtocolError> {
        if self.combiner.is_none() && self.nonces.is_complete() {
            let nonces = collect_nonces(
                &self.signers,
                &self.share.id,
                self.nonce_commitment,
                &self.nonces,
            )?;

            let combiner = Combiner::new(&self.share, &self.signers, nonces, &self.message)?;
            let own = combiner.partial(&self.share, &self.nonce)?;
            if self.signers.len() > 1 {
                self.outgoing
                    .push(Envelope::partial(&own).to_broadcast(&self.share.id));
            }
            debug!(participant = %self.share.id, "Nonces collected, partial signature sent");
            self.combiner = Some((combiner, own));
        }

        if let Some((combiner, own)) = &self.combiner {
            if self.partials.is_complete() {
                let signature = combiner.combine(&self.share.id, *own, &self.partials, &self.pool)?;
                debug!(participant = %self.share.id, "Signature combined");
                self.progress.finish(Ok(signature));
            }
        }

        Ok(())
    }
}

impl ProtocolMachine for Sign {
    type Output = Signature;

    fn outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.progress.is_terminal() {
            return Ok(());
        }
        self.handle(&msg)
            .and_then(|_| self.advance())
            .map_err(|e| self.progress.fail(e))
    }

    fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }

    fn result(&mut self) -> Result<Signature, ProtocolError> {
        self.progress.take()
    }
}

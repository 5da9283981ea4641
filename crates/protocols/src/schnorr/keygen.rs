//! Feldman-VSS distributed key generation and proactive refresh.
//!
//! Every dealer samples a degree-`t` polynomial, broadcasts commitments to its
//! coefficients and sends every peer its evaluation point-to-point. Both
//! messages leave in the first flush, so the two logical rounds complete in a
//! single network round trip.
//!
//! Refresh runs the same exchange with a zero constant term: the constant
//! commitment is implicit (the identity) and never sent, so the joint public
//! key cannot move.

use std::sync::Arc;

use tracing::{debug, warn};

use common::{Message, ParticipantId, Roster};

use super::inbox::Inbox;
use super::math::{
    evaluate, evaluate_commitments, evaluation_point, generator_mul, random_polynomial, Pt, Sc,
};
use super::wire::{expect_broadcast, expect_direct, parse_point, parse_scalar, unexpected, Envelope};
use crate::error::ProtocolError;
use crate::machine::{Progress, ProtocolMachine};
use crate::pool::Pool;
use crate::types::KeyShare;

const COMMITMENT_ROUND: &str = "commitments";
const SHARE_ROUND: &str = "share";

enum Mode {
    Fresh,
    Refresh(Box<KeyShare>),
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Fresh => "keygen",
            Mode::Refresh(_) => "refresh",
        }
    }
}

/// Key generation machine; [`KeyRefresh`] shares the implementation.
pub struct KeyGen {
    id: ParticipantId,
    roster: Roster,
    threshold: usize,
    mode: Mode,
    pool: Arc<Pool>,
    /// Full commitment vector of this dealer, constant term included.
    own_commitments: Vec<Pt>,
    own_share: Sc,
    commitments: Inbox<Vec<Pt>>,
    shares: Inbox<Sc>,
    outgoing: Vec<Message>,
    progress: Progress<KeyShare>,
}

/// Proactive share refresh; output has the same public key as its input.
pub struct KeyRefresh(KeyGen);

impl KeyGen {
    pub fn new(
        id: &ParticipantId,
        roster: &Roster,
        threshold: usize,
        pool: Arc<Pool>,
    ) -> Result<Self, ProtocolError> {
        Self::start(id, roster, threshold, Mode::Fresh, pool)
    }

    fn start(
        id: &ParticipantId,
        roster: &Roster,
        threshold: usize,
        mode: Mode,
        pool: Arc<Pool>,
    ) -> Result<Self, ProtocolError> {
        if threshold >= roster.len() {
            return Err(common::RosterError::ThresholdOutOfRange {
                threshold,
                size: roster.len(),
            }
            .into());
        }
        let own_point = evaluation_point(roster, id)?;

        let refresh = matches!(mode, Mode::Refresh(_));
        let polynomial = random_polynomial(threshold, refresh);
        let own_commitments: Vec<Pt> = polynomial.iter().map(generator_mul).collect();
        let own_share = evaluate(&polynomial, &own_point);

        let broadcast = if refresh {
            &own_commitments[1..]
        } else {
            &own_commitments[..]
        };

        let mut outgoing = Vec::with_capacity(roster.len());
        if roster.len() > 1 {
            outgoing.push(Envelope::commitments(broadcast).to_broadcast(id));
        }
        for peer in roster.iter().filter(|p| *p != id) {
            let share = evaluate(&polynomial, &evaluation_point(roster, peer)?);
            outgoing.push(Envelope::share(&share).to_direct(id, peer));
        }

        debug!(
            participant = %id,
            protocol = mode.name(),
            threshold,
            parties = roster.len(),
            "Dealt shares"
        );

        let mut machine = Self {
            id: id.clone(),
            roster: roster.clone(),
            threshold,
            mode,
            pool,
            own_commitments,
            own_share,
            commitments: Inbox::new(COMMITMENT_ROUND, roster, id),
            shares: Inbox::new(SHARE_ROUND, roster, id),
            outgoing,
            progress: Progress::Running,
        };
        machine.try_finish();
        Ok(machine)
    }

    fn handle(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let sender = msg.sender();
        match Envelope::decode(msg)? {
            Envelope::Commitments { points } => {
                expect_broadcast(msg, COMMITMENT_ROUND)?;
                let mut parsed = points
                    .iter()
                    .map(|bytes| parse_point(sender, bytes))
                    .collect::<Result<Vec<Pt>, _>>()?;

                if matches!(self.mode, Mode::Refresh(_)) {
                    parsed.insert(0, Pt::zero());
                }
                if parsed.len() != self.threshold + 1 {
                    return Err(ProtocolError::InvalidCommitment {
                        dealer: sender.clone(),
                        reason: format!(
                            "expected {} coefficients, got {}",
                            self.threshold + 1,
                            parsed.len()
                        ),
                    });
                }
                self.commitments.insert(sender, parsed)
            }
            Envelope::Share { scalar } => {
                expect_direct(msg, SHARE_ROUND)?;
                let share = parse_scalar(sender, &scalar)?;
                self.shares.insert(sender, share)
            }
            other => Err(unexpected(msg, &other)),
        }
    }

    fn try_finish(&mut self) {
        if self.progress.is_terminal() || !self.commitments.is_complete() || !self.shares.is_complete()
        {
            return;
        }
        let result = self.finish();
        if let Err(err) = &result {
            warn!(participant = %self.id, protocol = self.mode.name(), error = %err, "Key derivation failed");
        }
        self.progress.finish(result);
    }

    fn finish(&mut self) -> Result<KeyShare, ProtocolError> {
        let own_point = evaluation_point(&self.roster, &self.id)?;

        // Every dealer's commitment vector, in roster order.
        let mut dealers: Vec<(ParticipantId, Vec<Pt>)> = Vec::with_capacity(self.roster.len());
        for id in self.roster.iter() {
            if *id == self.id {
                dealers.push((id.clone(), self.own_commitments.clone()));
            } else if let Some(commitments) = self.commitments.get(id) {
                dealers.push((id.clone(), commitments.clone()));
            }
        }

        let checks: Vec<(ParticipantId, Vec<Pt>, Sc)> = self
            .shares
            .iter()
            .filter_map(|(dealer, share)| {
                self.commitments
                    .get(dealer)
                    .map(|c| (dealer.clone(), c.clone(), *share))
            })
            .collect();
        let verdicts = self.pool.map(checks, move |(dealer, commitments, share)| {
            let ok = generator_mul(&share) == evaluate_commitments(&commitments, &own_point);
            (dealer, ok)
        })?;
        if let Some((dealer, _)) = verdicts.into_iter().find(|(_, ok)| !ok) {
            return Err(ProtocolError::InvalidShare { dealer });
        }

        let mut secret = self.own_share;
        for (_, share) in self.shares.iter() {
            secret = secret + *share;
        }

        let mut aggregate = vec![Pt::zero(); self.threshold + 1];
        for (_, commitments) in &dealers {
            for (acc, c) in aggregate.iter_mut().zip(commitments) {
                *acc = *acc + *c;
            }
        }

        let points = self
            .roster
            .iter()
            .map(|id| evaluation_point(&self.roster, id))
            .collect::<Result<Vec<Sc>, _>>()?;
        let shared_aggregate = Arc::new(aggregate.clone());
        let mut public_shares = self.pool.map(points, move |x| {
            evaluate_commitments(&shared_aggregate, &x)
        })?;

        let public_key = match &self.mode {
            Mode::Fresh => aggregate[0],
            Mode::Refresh(previous) => {
                secret = secret + previous.secret;
                for (share, old) in public_shares.iter_mut().zip(&previous.public_shares) {
                    *share = *share + *old;
                }
                previous.public_key
            }
        };

        let own_index = self
            .roster
            .position(&self.id)
            .ok_or_else(|| ProtocolError::UnexpectedSender(self.id.clone()))?;
        if generator_mul(&secret) != public_shares[own_index] {
            return Err(ProtocolError::InconsistentShare);
        }

        debug!(participant = %self.id, protocol = self.mode.name(), "Key share derived");

        Ok(KeyShare {
            id: self.id.clone(),
            threshold: self.threshold,
            roster: self.roster.clone(),
            secret,
            public_key,
            public_shares,
        })
    }
}

impl ProtocolMachine for KeyGen {
    type Output = KeyShare;

    fn outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.progress.is_terminal() {
            return Ok(());
        }
        self.handle(&msg).map_err(|e| self.progress.fail(e))?;
        self.try_finish();
        match &self.progress {
            Progress::Finished(Err(err)) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }

    fn result(&mut self) -> Result<KeyShare, ProtocolError> {
        self.progress.take()
    }
}

impl KeyRefresh {
    pub fn new(share: &KeyShare, pool: Arc<Pool>) -> Result<Self, ProtocolError> {
        KeyGen::start(
            &share.id,
            &share.roster,
            share.threshold,
            Mode::Refresh(Box::new(share.clone())),
            pool,
        )
        .map(Self)
    }
}

impl ProtocolMachine for KeyRefresh {
    type Output = KeyShare;

    fn outgoing(&mut self) -> Vec<Message> {
        self.0.outgoing()
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        self.0.deliver(msg)
    }

    fn is_terminal(&self) -> bool {
        self.0.is_terminal()
    }

    fn result(&mut self) -> Result<KeyShare, ProtocolError> {
        self.0.result()
    }
}

//! Threshold Schnorr over secp256k1.
//!
//! Keys come from a Feldman-VSS DKG where participant `i` holds the evaluation
//! of the joint polynomial at its roster position plus one. Any `t + 1` key
//! holders can sign.

mod inbox;
mod keygen;
mod liveness;
pub(crate) mod math;
mod presign;
mod sign;
mod wire;

use std::sync::Arc;

use common::{ParticipantId, Roster};

pub use keygen::{KeyGen, KeyRefresh};
pub use liveness::Liveness;
pub use presign::{Presign, PresignOnline};
pub use sign::Sign;

use crate::error::ProtocolError;
use crate::pool::Pool;
use crate::suite::ProtocolSuite;
use crate::types::{KeyShare, PreSignature};

/// The bundled protocol suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdSchnorr;

impl ProtocolSuite for ThresholdSchnorr {
    type Liveness = Liveness;
    type Keygen = KeyGen;
    type Refresh = KeyRefresh;
    type Sign = Sign;
    type Presign = Presign;
    type PresignOnline = PresignOnline;

    fn name(&self) -> &'static str {
        "threshold-schnorr-secp256k1"
    }

    fn liveness(&self, id: &ParticipantId, roster: &Roster) -> Result<Liveness, ProtocolError> {
        Liveness::new(id, roster)
    }

    fn keygen(
        &self,
        id: &ParticipantId,
        roster: &Roster,
        threshold: usize,
        pool: Arc<Pool>,
    ) -> Result<KeyGen, ProtocolError> {
        KeyGen::new(id, roster, threshold, pool)
    }

    fn refresh(&self, share: &KeyShare, pool: Arc<Pool>) -> Result<KeyRefresh, ProtocolError> {
        KeyRefresh::new(share, pool)
    }

    fn sign(
        &self,
        share: &KeyShare,
        signers: &Roster,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<Sign, ProtocolError> {
        Sign::new(share, signers, message, pool)
    }

    fn presign(
        &self,
        share: &KeyShare,
        signers: &Roster,
        _pool: Arc<Pool>,
    ) -> Result<Presign, ProtocolError> {
        Presign::new(share, signers)
    }

    fn presign_online(
        &self,
        share: &KeyShare,
        presignature: &PreSignature,
        message: &[u8],
        pool: Arc<Pool>,
    ) -> Result<PresignOnline, ProtocolError> {
        PresignOnline::new(share, presignature, message, pool)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use common::Message;

    use super::math::{generator_mul, Sc};
    use super::wire::Envelope;
    use super::*;
    use crate::machine::ProtocolMachine;
    use crate::types::Signature;

    /// Route messages between machines in one thread until nothing moves.
    fn drive_with<M: ProtocolMachine>(
        machines: &mut [(ParticipantId, M)],
        mut tamper: impl FnMut(Message) -> Option<Message>,
    ) -> Vec<Result<M::Output, ProtocolError>> {
        let ids: Vec<ParticipantId> = machines.iter().map(|(id, _)| id.clone()).collect();
        let mut queues: HashMap<ParticipantId, VecDeque<Message>> = HashMap::new();

        loop {
            let mut moved = false;

            for (_, machine) in machines.iter_mut() {
                for msg in machine.outgoing() {
                    moved = true;
                    let Some(msg) = tamper(msg) else { continue };
                    let targets: Vec<ParticipantId> = match msg.recipient() {
                        Some(to) => vec![to.clone()],
                        None => ids.iter().filter(|id| *id != msg.sender()).cloned().collect(),
                    };
                    for target in targets {
                        queues.entry(target).or_default().push_back(msg.clone());
                    }
                }
            }

            for (id, machine) in machines.iter_mut() {
                while let Some(msg) = queues.get_mut(id).and_then(VecDeque::pop_front) {
                    moved = true;
                    if !machine.is_terminal() {
                        let _ = machine.deliver(msg);
                    }
                }
            }

            if !moved {
                break;
            }
        }

        machines.iter_mut().map(|(_, m)| m.result()).collect()
    }

    fn drive<M: ProtocolMachine>(
        mut machines: Vec<(ParticipantId, M)>,
    ) -> Vec<Result<M::Output, ProtocolError>> {
        drive_with(&mut machines, Some)
    }

    fn pool() -> Arc<Pool> {
        Arc::new(Pool::new(2).unwrap())
    }

    fn keygen_all(parties: usize, threshold: usize) -> Vec<KeyShare> {
        let roster = Roster::numbered("a", parties).unwrap();
        let pool = pool();
        let machines = roster
            .iter()
            .map(|id| {
                let m = ThresholdSchnorr
                    .keygen(id, &roster, threshold, Arc::clone(&pool))
                    .unwrap();
                (id.clone(), m)
            })
            .collect();
        drive(machines).into_iter().map(Result::unwrap).collect()
    }

    fn sign_all(shares: &[KeyShare], signers: &Roster, message: &[u8]) -> Vec<Signature> {
        let pool = pool();
        let machines = shares
            .iter()
            .filter(|s| signers.contains(s.id()))
            .map(|s| {
                let m = ThresholdSchnorr
                    .sign(s, signers, message, Arc::clone(&pool))
                    .unwrap();
                (s.id().clone(), m)
            })
            .collect();
        drive(machines).into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn test_liveness_digest_is_shared() {
        let roster = Roster::numbered("a", 4).unwrap();
        let machines = roster
            .iter()
            .map(|id| (id.clone(), ThresholdSchnorr.liveness(id, &roster).unwrap()))
            .collect();

        let digests: Vec<_> = drive(machines).into_iter().map(Result::unwrap).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_single_participant_liveness_finishes_immediately() {
        let roster = Roster::numbered("a", 1).unwrap();
        let mut machine = ThresholdSchnorr.liveness(&"a1".into(), &roster).unwrap();
        assert!(machine.outgoing().is_empty());
        assert!(machine.is_terminal());
        assert!(machine.result().is_ok());
        assert_eq!(machine.result(), Err(ProtocolError::AlreadyTaken));
    }

    #[test]
    fn test_keygen_agrees_on_public_key() {
        let shares = keygen_all(4, 1);

        let pk = shares[0].public_key();
        assert!(shares.iter().all(|s| s.public_key() == pk));
        for share in &shares {
            assert!(generator_mul(&share.secret) == shares[0].public_share_point(share.id()).unwrap());
        }
    }

    #[test]
    fn test_refresh_preserves_public_key() {
        let shares = keygen_all(4, 2);
        let pool = pool();
        let machines = shares
            .iter()
            .map(|s| (s.id().clone(), ThresholdSchnorr.refresh(s, Arc::clone(&pool)).unwrap()))
            .collect();
        let refreshed: Vec<KeyShare> = drive(machines).into_iter().map(Result::unwrap).collect();

        for (old, new) in shares.iter().zip(&refreshed) {
            assert_eq!(old.public_key(), new.public_key());
            assert!(old.secret != new.secret);
        }

        let signers = refreshed[0].roster().signer_subset(2).unwrap();
        let signatures = sign_all(&refreshed, &signers, b"after refresh");
        assert!(signatures.iter().all(|s| refreshed[0].public_key().verify(b"after refresh", s)));
    }

    #[test]
    fn test_sign_verifies_and_binds_message() {
        let shares = keygen_all(5, 2);
        let signers = shares[0].roster().signer_subset(2).unwrap();
        let signatures = sign_all(&shares, &signers, b"test");

        assert_eq!(signatures.len(), 3);
        let pk = shares[0].public_key();
        for signature in &signatures {
            assert!(pk.verify(b"test", signature));
            assert!(!pk.verify(b"tesu", signature));
        }
    }

    #[test]
    fn test_any_qualified_subset_signs() {
        let shares = keygen_all(5, 1);
        let signers = Roster::new(["a5", "a2"].map(ParticipantId::from)).unwrap();
        let signatures = sign_all(&shares, &signers, b"test");
        assert!(signatures.iter().all(|s| shares[0].public_key().verify(b"test", s)));
    }

    #[test]
    fn test_presign_then_online_verifies() {
        let shares = keygen_all(4, 1);
        let signers = shares[0].roster().signer_subset(1).unwrap();
        let pool = pool();

        let machines = shares[..2]
            .iter()
            .map(|s| (s.id().clone(), ThresholdSchnorr.presign(s, &signers, Arc::clone(&pool)).unwrap()))
            .collect();
        let presignatures: Vec<PreSignature> = drive(machines).into_iter().map(Result::unwrap).collect();
        for presignature in &presignatures {
            presignature.validate().unwrap();
        }
        assert_eq!(presignatures[0].nonce_commitment(), presignatures[1].nonce_commitment());

        let machines = shares[..2]
            .iter()
            .zip(&presignatures)
            .map(|(s, p)| {
                let m = ThresholdSchnorr
                    .presign_online(s, p, b"test", Arc::clone(&pool))
                    .unwrap();
                (s.id().clone(), m)
            })
            .collect();
        let signatures: Vec<Signature> = drive(machines).into_iter().map(Result::unwrap).collect();
        assert!(signatures.iter().all(|s| shares[0].public_key().verify(b"test", s)));
    }

    #[test]
    fn test_non_signer_is_rejected() {
        let shares = keygen_all(3, 1);
        let signers = shares[0].roster().signer_subset(1).unwrap();
        let err = ThresholdSchnorr
            .sign(&shares[2], &signers, b"test", pool())
            .err()
            .unwrap();
        assert_eq!(err, ProtocolError::NotASigner("a3".into()));
    }

    #[test]
    fn test_too_few_signers_are_rejected() {
        let shares = keygen_all(3, 1);
        let signers = Roster::numbered("a", 1).unwrap();
        let result = ThresholdSchnorr.sign(&shares[0], &signers, b"test", pool());
        assert!(matches!(result, Err(ProtocolError::BadParameters(_))));
    }

    #[test]
    fn test_duplicate_message_is_fatal() {
        let roster = Roster::numbered("a", 3).unwrap();
        let mut a1 = ThresholdSchnorr.liveness(&"a1".into(), &roster).unwrap();
        let mut a2 = ThresholdSchnorr.liveness(&"a2".into(), &roster).unwrap();

        let msg = a1.outgoing().pop().unwrap();
        a2.deliver(msg.clone()).unwrap();
        let err = a2.deliver(msg).unwrap_err();

        assert!(matches!(err, ProtocolError::Duplicate { .. }));
        assert!(a2.is_terminal());
        assert_eq!(a2.result(), Err(err));
    }

    #[test]
    fn test_unknown_sender_is_fatal() {
        let roster = Roster::numbered("a", 3).unwrap();
        let outsider = Roster::numbered("b", 1).unwrap();
        let mut a1 = ThresholdSchnorr.liveness(&"a1".into(), &roster).unwrap();
        let mut b1 = ThresholdSchnorr.liveness(&"b1".into(), &outsider).unwrap();

        let _ = b1.outgoing();
        let forged = Message::broadcast(
            "b1".into(),
            Envelope::Liveness {
                contribution: [0u8; 32],
            }
            .encode(),
        );
        assert_eq!(
            a1.deliver(forged),
            Err(ProtocolError::UnexpectedSender("b1".into()))
        );
    }

    #[test]
    fn test_share_must_arrive_point_to_point() {
        let roster = Roster::numbered("a", 3).unwrap();
        let mut a2 = ThresholdSchnorr.keygen(&"a2".into(), &roster, 1, pool()).unwrap();

        let leaked = Envelope::share(&Sc::random(&mut rand::rngs::OsRng)).to_broadcast(&"a1".into());
        assert!(matches!(
            a2.deliver(leaked),
            Err(ProtocolError::ExpectedDirect { .. })
        ));
    }

    #[test]
    fn test_tampered_share_is_detected() {
        let roster = Roster::numbered("a", 3).unwrap();
        let pool = pool();
        let mut machines: Vec<_> = roster
            .iter()
            .map(|id| (id.clone(), ThresholdSchnorr.keygen(id, &roster, 1, Arc::clone(&pool)).unwrap()))
            .collect();

        let victim = ParticipantId::from("a2");
        let results = drive_with(&mut machines, |msg| {
            if msg.sender().as_str() == "a1" && msg.recipient() == Some(&victim) {
                let forged = Sc::random(&mut rand::rngs::OsRng);
                return Some(Envelope::share(&forged).to_direct(&"a1".into(), &victim));
            }
            Some(msg)
        });

        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().err(),
            Some(&ProtocolError::InvalidShare { dealer: "a1".into() })
        );
    }
}

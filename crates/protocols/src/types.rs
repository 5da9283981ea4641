//! Phase outputs produced by the protocol machines.

use std::fmt;

use common::{ParticipantId, Roster};

use crate::error::ProtocolError;
use crate::schnorr::math::{
    challenge, evaluation_point, generator_mul, point_from_bytes, point_to_bytes,
    scalar_from_bytes, scalar_to_bytes, sum_points, Pt, Sc,
};

/// Length of a compressed secp256k1 point.
pub const POINT_LEN: usize = 33;

/// Length of an encoded [`Signature`].
pub const SIGNATURE_LEN: usize = POINT_LEN + 32;

/// XOR of every participant's liveness contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LivenessDigest(pub [u8; 32]);

impl LivenessDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Joint public key of a key generation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub(crate) Pt);

impl PublicKey {
    /// Compressed SEC1 encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        point_to_bytes(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        point_from_bytes(bytes).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Check a Schnorr signature on `message` under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        signature.verify(self, message)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// Schnorr signature `(R, z)` with `z·G = R + H(R ‖ P ‖ m)·P`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub(crate) r: Pt,
    pub(crate) z: Sc,
}

impl Signature {
    pub fn verify(&self, public_key: &PublicKey, message: &[u8]) -> bool {
        if self.r.is_zero() {
            return false;
        }
        let c = challenge(&self.r, &public_key.0, message);
        generator_mul(&self.z) == self.r + public_key.0 * c
    }

    /// `R` compressed followed by `z` big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = point_to_bytes(&self.r);
        out.extend_from_slice(&scalar_to_bytes(&self.z));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return None;
        }
        let r = point_from_bytes(&bytes[..POINT_LEN])?;
        let z = scalar_from_bytes(&bytes[POINT_LEN..])?;
        Some(Self { r, z })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_hex()).finish()
    }
}

/// One participant's share of a threshold key.
#[derive(Clone)]
pub struct KeyShare {
    pub(crate) id: ParticipantId,
    pub(crate) threshold: usize,
    pub(crate) roster: Roster,
    pub(crate) secret: Sc,
    pub(crate) public_key: Pt,
    /// Public share of every roster member, in roster order.
    pub(crate) public_shares: Vec<Pt>,
}

impl KeyShare {
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Roster the key was generated for.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public_key)
    }

    /// Compressed public share of `id`.
    pub fn public_share(&self, id: &ParticipantId) -> Option<Vec<u8>> {
        self.public_share_point(id).map(|p| point_to_bytes(&p))
    }

    pub(crate) fn public_share_point(&self, id: &ParticipantId) -> Option<Pt> {
        self.roster
            .position(id)
            .and_then(|pos| self.public_shares.get(pos).copied())
    }

    pub(crate) fn evaluation_point_of(&self, id: &ParticipantId) -> Result<Sc, ProtocolError> {
        evaluation_point(&self.roster, id)
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("id", &self.id)
            .field("threshold", &self.threshold)
            .field("roster", &self.roster.to_string())
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Message-independent signing state of one signer.
#[derive(Clone)]
pub struct PreSignature {
    pub(crate) id: ParticipantId,
    pub(crate) signers: Roster,
    pub(crate) nonce: Sc,
    /// Nonce commitment of every signer, in signer order.
    pub(crate) commitments: Vec<Pt>,
    pub(crate) r: Pt,
}

impl PreSignature {
    pub fn signers(&self) -> &Roster {
        &self.signers
    }

    /// Compressed aggregate nonce commitment `R`.
    pub fn nonce_commitment(&self) -> Vec<u8> {
        point_to_bytes(&self.r)
    }

    /// Structural validity: `R = Σ R_i`, `R ≠ 0`, and the own nonce opens the
    /// own commitment.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.commitments.len() != self.signers.len() {
            return Err(ProtocolError::BadParameters(format!(
                "{} nonce commitments for {} signers",
                self.commitments.len(),
                self.signers.len()
            )));
        }
        if self.r.is_zero() {
            return Err(ProtocolError::ZeroNonce);
        }
        if sum_points(&self.commitments) != self.r {
            return Err(ProtocolError::BadParameters(
                "aggregate nonce does not match commitments".into(),
            ));
        }

        let own = self
            .signers
            .position(&self.id)
            .ok_or_else(|| ProtocolError::NotASigner(self.id.clone()))?;
        if generator_mul(&self.nonce) != self.commitments[own] {
            return Err(ProtocolError::BadParameters(
                "own nonce does not open its commitment".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "test-util")]
impl PreSignature {
    /// Copy whose aggregate nonce no longer matches its commitments.
    pub fn with_shifted_aggregate(&self) -> Self {
        let mut shifted = self.clone();
        shifted.r = shifted.r + generator_mul(&Sc::one());
        shifted
    }
}

impl fmt::Debug for PreSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreSignature")
            .field("id", &self.id)
            .field("signers", &self.signers.to_string())
            .field("r", &hex::encode(self.nonce_commitment()))
            .finish_non_exhaustive()
    }
}

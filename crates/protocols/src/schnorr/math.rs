//! Polynomial, interpolation and challenge helpers over secp256k1.

use generic_ec::curves::Secp256k1;
use generic_ec::{Point, Scalar};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use common::{ParticipantId, Roster};

use crate::error::ProtocolError;

pub(crate) type Sc = Scalar<Secp256k1>;
pub(crate) type Pt = Point<Secp256k1>;

const CHALLENGE_TAG: &[u8] = b"mpc-harness/schnorr/challenge/v1";

pub(crate) fn generator_mul(scalar: &Sc) -> Pt {
    Point::<Secp256k1>::generator() * *scalar
}

/// Scalar for a small non-negative integer.
pub(crate) fn scalar_from_u64(value: u64) -> Sc {
    Scalar::<Secp256k1>::from_be_bytes_mod_order(&value.to_be_bytes())
}

/// Shamir evaluation point of `id`: its roster position plus one.
pub(crate) fn evaluation_point(roster: &Roster, id: &ParticipantId) -> Result<Sc, ProtocolError> {
    roster
        .position(id)
        .map(|pos| scalar_from_u64(pos as u64 + 1))
        .ok_or_else(|| ProtocolError::UnexpectedSender(id.clone()))
}

/// Random polynomial of the given degree. With `zero_constant` the constant
/// term is zero, which re-shares the secret zero.
pub(crate) fn random_polynomial(degree: usize, zero_constant: bool) -> Vec<Sc> {
    let mut rng = OsRng;
    (0..=degree)
        .map(|k| {
            if k == 0 && zero_constant {
                Scalar::<Secp256k1>::zero()
            } else {
                Scalar::<Secp256k1>::random(&mut rng)
            }
        })
        .collect()
}

/// Horner evaluation of `coefficients` at `x`.
pub(crate) fn evaluate(coefficients: &[Sc], x: &Sc) -> Sc {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::<Secp256k1>::zero(), |acc, c| acc * *x + *c)
}

/// Horner evaluation "in the exponent": `Σ commitments[k] · x^k`.
pub(crate) fn evaluate_commitments(commitments: &[Pt], x: &Sc) -> Pt {
    commitments
        .iter()
        .rev()
        .fold(Point::<Secp256k1>::zero(), |acc, c| acc * *x + *c)
}

pub(crate) fn sum_points<'a>(points: impl IntoIterator<Item = &'a Pt>) -> Pt {
    points
        .into_iter()
        .fold(Point::<Secp256k1>::zero(), |acc, p| acc + *p)
}

/// Lagrange coefficient at zero for `x_i` over the evaluation points `xs`.
pub(crate) fn lagrange_at_zero(x_i: &Sc, xs: &[Sc]) -> Result<Sc, ProtocolError> {
    let mut numerator = Scalar::<Secp256k1>::one();
    let mut denominator = Scalar::<Secp256k1>::one();

    for x_j in xs.iter().filter(|x_j| *x_j != x_i) {
        numerator = numerator * *x_j;
        denominator = denominator * (*x_j - *x_i);
    }

    let inverse = denominator
        .invert()
        .ok_or_else(|| ProtocolError::BadParameters("repeated evaluation point".into()))?;
    Ok(numerator * inverse)
}

/// Fiat-Shamir challenge `H(R ‖ P ‖ m)` reduced modulo the group order.
pub(crate) fn challenge(r: &Pt, public_key: &Pt, message: &[u8]) -> Sc {
    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_TAG);
    hasher.update(r.to_bytes(true).as_ref());
    hasher.update(public_key.to_bytes(true).as_ref());
    hasher.update(message);
    let digest = hasher.finalize();
    Scalar::<Secp256k1>::from_be_bytes_mod_order(digest.as_slice())
}

pub(crate) fn point_to_bytes(point: &Pt) -> Vec<u8> {
    point.to_bytes(true).as_ref().to_vec()
}

pub(crate) fn scalar_to_bytes(scalar: &Sc) -> Vec<u8> {
    scalar.to_be_bytes().as_ref().to_vec()
}

pub(crate) fn point_from_bytes(bytes: &[u8]) -> Option<Pt> {
    Point::<Secp256k1>::from_bytes(bytes).ok()
}

pub(crate) fn scalar_from_bytes(bytes: &[u8]) -> Option<Sc> {
    Scalar::<Secp256k1>::from_be_bytes(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitments_match_polynomial() {
        let poly = random_polynomial(3, false);
        let commitments: Vec<Pt> = poly.iter().map(generator_mul).collect();

        for i in 1..=5u64 {
            let x = scalar_from_u64(i);
            assert!(generator_mul(&evaluate(&poly, &x)) == evaluate_commitments(&commitments, &x));
        }
    }

    #[test]
    fn test_zero_constant_polynomial() {
        let poly = random_polynomial(2, true);
        assert!(evaluate(&poly, &Scalar::<Secp256k1>::zero()) == Scalar::<Secp256k1>::zero());
    }

    #[test]
    fn test_lagrange_interpolation_recovers_secret() {
        let poly = random_polynomial(2, false);
        let xs: Vec<Sc> = [1u64, 3, 4].iter().map(|i| scalar_from_u64(*i)).collect();

        let mut secret = Scalar::<Secp256k1>::zero();
        for x in &xs {
            secret = secret + lagrange_at_zero(x, &xs).unwrap() * evaluate(&poly, x);
        }
        assert!(secret == poly[0]);
    }

    #[test]
    fn test_challenge_binds_message() {
        let r = generator_mul(&scalar_from_u64(7));
        let p = generator_mul(&scalar_from_u64(11));
        assert!(challenge(&r, &p, b"test") == challenge(&r, &p, b"test"));
        assert!(challenge(&r, &p, b"test") != challenge(&r, &p, b"tesu"));
    }

    #[test]
    fn test_byte_encodings() {
        let s = scalar_from_u64(42);
        let p = generator_mul(&s);

        assert_eq!(point_to_bytes(&p).len(), 33);
        assert!(point_from_bytes(&point_to_bytes(&p)) == Some(p));
        assert!(scalar_from_bytes(&scalar_to_bytes(&s)) == Some(s));
        assert!(point_from_bytes(&[0u8; 5]).is_none());
    }
}

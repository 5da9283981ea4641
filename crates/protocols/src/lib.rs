//! Protocol capabilities consumed by the execution harness.
//!
//! - [`ProtocolMachine`]: one participant's run of one phase.
//! - [`ProtocolSuite`]: constructors for every phase machine.
//! - [`Pool`]: bounded worker pool for CPU-heavy sub-computations.
//! - [`schnorr::ThresholdSchnorr`]: the bundled suite, threshold Schnorr
//!   over secp256k1 with a Feldman-VSS key generation.

pub mod bench;
pub mod error;
pub mod machine;
pub mod pool;
pub mod schnorr;
pub mod suite;
pub mod types;

pub use error::ProtocolError;
pub use machine::ProtocolMachine;
pub use pool::{Pool, PoolError};
pub use suite::ProtocolSuite;
pub use types::{KeyShare, LivenessDigest, PreSignature, PublicKey, Signature};

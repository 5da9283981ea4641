//! Phases, per-phase results and per-participant outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use common::ParticipantId;
use protocols::bench::BenchmarkReport;
use protocols::{KeyShare, LivenessDigest, PreSignature, PublicKey, Signature};

use crate::error::RunError;

/// The fixed phase sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Liveness,
    KeyGen,
    Refresh,
    Signing,
    Presign,
    PresignOnline,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Liveness,
        Phase::KeyGen,
        Phase::Refresh,
        Phase::Signing,
        Phase::Presign,
        Phase::PresignOnline,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Liveness => "liveness",
            Phase::KeyGen => "keygen",
            Phase::Refresh => "refresh",
            Phase::Signing => "signing",
            Phase::Presign => "presign",
            Phase::PresignOnline => "presign_online",
        }
    }

    /// Signing phases run on the signer subset only.
    pub fn is_signing(self) -> bool {
        matches!(self, Phase::Signing | Phase::Presign | Phase::PresignOnline)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Class of a harness-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    Protocol(String),
    Network(String),
    Timeout,
    Panicked,
}

impl From<&RunError> for ProtocolErrorKind {
    fn from(err: &RunError) -> Self {
        match err {
            RunError::Protocol(e) => ProtocolErrorKind::Protocol(e.to_string()),
            RunError::Network(e) => ProtocolErrorKind::Network(e.to_string()),
            RunError::Timeout { .. } => ProtocolErrorKind::Timeout,
            RunError::Panicked => ProtocolErrorKind::Panicked,
        }
    }
}

/// Final outcome of one participant's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every phase completed and verified.
    Success,
    /// A phase completed but its output failed verification.
    VerificationFailed { phase: Phase },
    /// A phase aborted.
    ProtocolError { phase: Phase, kind: ProtocolErrorKind },
    /// Not selected for signing; left after key refresh. Not an error.
    VoluntaryWithdrawal,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    /// True for `VerificationFailed` and `ProtocolError`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunOutcome::VerificationFailed { .. } | RunOutcome::ProtocolError { .. }
        )
    }

    /// Phase that ended the run, for failures.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            RunOutcome::VerificationFailed { phase } | RunOutcome::ProtocolError { phase, .. } => {
                Some(*phase)
            }
            _ => None,
        }
    }

    /// Short label used for tallies.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::VerificationFailed { .. } => "verification_failed",
            RunOutcome::ProtocolError { .. } => "protocol_error",
            RunOutcome::VoluntaryWithdrawal => "voluntary_withdrawal",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::VerificationFailed { phase } => write!(f, "verification failed in {}", phase),
            RunOutcome::ProtocolError { phase, kind } => {
                write!(f, "protocol error in {}: {:?}", phase, kind)
            }
            RunOutcome::VoluntaryWithdrawal => write!(f, "voluntary withdrawal"),
        }
    }
}

/// Output of one completed phase. Never mutated after creation.
#[derive(Debug, Clone)]
pub enum PhaseResult {
    Liveness(LivenessDigest),
    KeyGen(KeyShare),
    Refresh(KeyShare),
    Signing(Signature),
    Presign(PreSignature),
    PresignOnline(Signature),
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::Liveness(_) => Phase::Liveness,
            PhaseResult::KeyGen(_) => Phase::KeyGen,
            PhaseResult::Refresh(_) => Phase::Refresh,
            PhaseResult::Signing(_) => Phase::Signing,
            PhaseResult::Presign(_) => Phase::Presign,
            PhaseResult::PresignOnline(_) => Phase::PresignOnline,
        }
    }

    pub fn key_share(&self) -> Option<&KeyShare> {
        match self {
            PhaseResult::KeyGen(share) | PhaseResult::Refresh(share) => Some(share),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            PhaseResult::Signing(sig) | PhaseResult::PresignOnline(sig) => Some(sig),
            _ => None,
        }
    }
}

/// Everything one participant produced during a run.
#[derive(Debug, Clone)]
pub struct ParticipantReport {
    pub id: ParticipantId,
    pub outcome: RunOutcome,
    /// Results of the phases that completed, in phase order.
    pub results: Vec<PhaseResult>,
    pub timings: BenchmarkReport,
}

impl ParticipantReport {
    pub fn result(&self, phase: Phase) -> Option<&PhaseResult> {
        self.results.iter().find(|r| r.phase() == phase)
    }

    pub fn liveness(&self) -> Option<&LivenessDigest> {
        match self.result(Phase::Liveness) {
            Some(PhaseResult::Liveness(digest)) => Some(digest),
            _ => None,
        }
    }

    /// Latest key share: the refreshed one if refresh completed.
    pub fn key_share(&self) -> Option<&KeyShare> {
        self.result(Phase::Refresh)
            .or_else(|| self.result(Phase::KeyGen))
            .and_then(PhaseResult::key_share)
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.key_share().map(KeyShare::public_key)
    }

    pub fn signature(&self, phase: Phase) -> Option<&Signature> {
        self.result(phase).and_then(PhaseResult::signature)
    }

    pub fn presignature(&self) -> Option<&PreSignature> {
        match self.result(Phase::Presign) {
            Some(PhaseResult::Presign(p)) => Some(p),
            _ => None,
        }
    }

    /// Phases that produced a result, in order.
    pub fn completed_phases(&self) -> Vec<Phase> {
        self.results.iter().map(PhaseResult::phase).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocols::ProtocolError;

    #[test]
    fn test_phase_order_and_names() {
        let names: Vec<&str> = Phase::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["liveness", "keygen", "refresh", "signing", "presign", "presign_online"]
        );
        assert!(Phase::KeyGen < Phase::Signing);
        assert!(Phase::Presign.is_signing());
        assert!(!Phase::Refresh.is_signing());
    }

    #[test]
    fn test_outcome_classification() {
        assert!(RunOutcome::Success.is_success());
        assert!(!RunOutcome::VoluntaryWithdrawal.is_failure());

        let failed = RunOutcome::ProtocolError {
            phase: Phase::KeyGen,
            kind: ProtocolErrorKind::Timeout,
        };
        assert!(failed.is_failure());
        assert_eq!(failed.failed_phase(), Some(Phase::KeyGen));
        assert_eq!(failed.label(), "protocol_error");
    }

    #[test]
    fn test_run_error_kinds() {
        let err = RunError::Protocol(ProtocolError::InconsistentShare);
        assert!(matches!(ProtocolErrorKind::from(&err), ProtocolErrorKind::Protocol(_)));
        assert_eq!(ProtocolErrorKind::from(&RunError::Panicked), ProtocolErrorKind::Panicked);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = RunOutcome::VerificationFailed {
            phase: Phase::Signing,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"outcome":"verification_failed","phase":"signing"}"#);
    }
}

//! Progress hooks injected into the orchestrator and run loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use common::{EventType, LogEvent, ParticipantId, ProtocolMetrics};

use crate::outcome::{Phase, ProtocolErrorKind, RunOutcome};

/// Receives progress notifications. Every method defaults to a no-op.
///
/// Called from participant tasks concurrently; implementations must not
/// block.
pub trait PhaseObserver: Send + Sync {
    fn phase_started(&self, _participant: &ParticipantId, _phase: Phase) {}

    /// `outcome` is `Success` when the phase produced a verified result.
    fn phase_finished(
        &self,
        _participant: &ParticipantId,
        _phase: Phase,
        _outcome: &RunOutcome,
        _elapsed: Duration,
    ) {
    }

    fn message_sent(&self, _participant: &ParticipantId, _phase: Phase, _bytes: usize) {}

    fn message_received(&self, _participant: &ParticipantId, _phase: Phase, _bytes: usize) {}

    /// `voluntary` is false when the participant left after a failure.
    fn withdrawn(&self, _participant: &ParticipantId, _voluntary: bool) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PhaseObserver for NoopObserver {}

/// Human-readable progress lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PhaseObserver for TracingObserver {
    fn phase_started(&self, participant: &ParticipantId, phase: Phase) {
        info!(participant = %participant, phase = %phase, "Phase started");
    }

    fn phase_finished(
        &self,
        participant: &ParticipantId,
        phase: Phase,
        outcome: &RunOutcome,
        elapsed: Duration,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if outcome.is_success() {
            info!(participant = %participant, phase = %phase, elapsed_ms, "Phase completed");
        } else {
            warn!(participant = %participant, phase = %phase, elapsed_ms, outcome = %outcome, "Phase failed");
        }
    }

    fn message_sent(&self, participant: &ParticipantId, phase: Phase, bytes: usize) {
        trace!(participant = %participant, phase = %phase, bytes, "Sent");
    }

    fn message_received(&self, participant: &ParticipantId, phase: Phase, bytes: usize) {
        trace!(participant = %participant, phase = %phase, bytes, "Received");
    }

    fn withdrawn(&self, participant: &ParticipantId, voluntary: bool) {
        LogEvent::new(EventType::ParticipantWithdrawn)
            .with_participant(participant.as_str())
            .with_context("voluntary", voluntary.to_string())
            .emit();
    }
}

/// Feeds [`ProtocolMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsObserver {
    metrics: Arc<ProtocolMetrics>,
}

impl MetricsObserver {
    pub fn new(metrics: Arc<ProtocolMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<ProtocolMetrics> {
        &self.metrics
    }
}

impl PhaseObserver for MetricsObserver {
    fn phase_started(&self, _participant: &ParticipantId, _phase: Phase) {
        self.metrics.inc_phases_started();
    }

    fn phase_finished(
        &self,
        _participant: &ParticipantId,
        phase: Phase,
        outcome: &RunOutcome,
        elapsed: Duration,
    ) {
        match outcome {
            RunOutcome::Success => {
                self.metrics.inc_phases_completed();
                self.metrics.record_phase_duration(phase.name(), elapsed);
            }
            RunOutcome::VerificationFailed { .. } => {
                self.metrics.inc_phases_failed();
                self.metrics.inc_verification_failures();
            }
            RunOutcome::ProtocolError {
                kind: ProtocolErrorKind::Timeout,
                ..
            } => self.metrics.inc_phases_timeout(),
            RunOutcome::ProtocolError { .. } => self.metrics.inc_phases_failed(),
            RunOutcome::VoluntaryWithdrawal => {}
        }
    }

    fn message_sent(&self, _participant: &ParticipantId, _phase: Phase, bytes: usize) {
        self.metrics.inc_messages_sent(bytes as u64);
    }

    fn message_received(&self, _participant: &ParticipantId, _phase: Phase, bytes: usize) {
        self.metrics.inc_messages_received(bytes as u64);
    }

    fn withdrawn(&self, _participant: &ParticipantId, _voluntary: bool) {
        self.metrics.inc_withdrawals();
    }
}

/// Fans every notification out to several observers, in order.
#[derive(Clone, Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PhaseObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl PhaseObserver for CompositeObserver {
    fn phase_started(&self, participant: &ParticipantId, phase: Phase) {
        for o in &self.observers {
            o.phase_started(participant, phase);
        }
    }

    fn phase_finished(
        &self,
        participant: &ParticipantId,
        phase: Phase,
        outcome: &RunOutcome,
        elapsed: Duration,
    ) {
        for o in &self.observers {
            o.phase_finished(participant, phase, outcome, elapsed);
        }
    }

    fn message_sent(&self, participant: &ParticipantId, phase: Phase, bytes: usize) {
        for o in &self.observers {
            o.message_sent(participant, phase, bytes);
        }
    }

    fn message_received(&self, participant: &ParticipantId, phase: Phase, bytes: usize) {
        for o in &self.observers {
            o.message_received(participant, phase, bytes);
        }
    }

    fn withdrawn(&self, participant: &ParticipantId, voluntary: bool) {
        for o in &self.observers {
            o.withdrawn(participant, voluntary);
        }
    }
}

//! Phase orchestration for every participant of a run.
//!
//! ```text
//!   liveness ─► keygen ─► refresh ─► signer subset ─┬─► signing ─► presign ─► presign online
//!                                                   └─► withdraw (non-signers)
//! ```
//!
//! Each participant runs the sequence in its own task and stops at its first
//! failure. Every phase needs its whole quorum (the roster up to refresh, the
//! signers afterwards) live when it starts, so a peer that already left fails
//! the phase at once instead of after a receive deadline. Every participant
//! leaves the network when its sequence ends; only failures and non-selection
//! are reported to the observer.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

use common::{ParticipantId, Roster, RosterError, SessionId};
use protocols::bench::{BenchmarkRecorder, BenchmarkReport, StepTimer};
use protocols::{Pool, ProtocolError, ProtocolMachine, ProtocolSuite};

use crate::config::HarnessConfig;
use crate::error::{ConfigError, RunError};
use crate::network::{Network, NetworkHandle};
use crate::observer::{NoopObserver, PhaseObserver};
use crate::outcome::{ParticipantReport, Phase, PhaseResult, ProtocolErrorKind, RunOutcome};
use crate::run_loop::run_protocol;

/// Drives every roster member through the fixed phase sequence.
pub struct Orchestrator<S: ProtocolSuite> {
    suite: Arc<S>,
    network: Arc<Network>,
    roster: Roster,
    threshold: usize,
    message: Vec<u8>,
    pool_workers: usize,
    receive_timeout: Duration,
    observer: Arc<dyn PhaseObserver>,
    run_id: String,
}

impl<S: ProtocolSuite> Orchestrator<S> {
    /// Validate `config` and build the roster and network for one run.
    pub fn new(suite: S, config: &HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let roster = config.roster()?;

        Ok(Self {
            suite: Arc::new(suite),
            network: Network::new(roster.clone()),
            roster,
            threshold: config.threshold,
            message: config.message_bytes().to_vec(),
            pool_workers: config.pool_workers,
            receive_timeout: config.receive_timeout(),
            observer: Arc::new(NoopObserver),
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the per-receive deadline (finer than the config's seconds).
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn suite(&self) -> &S {
        &self.suite
    }

    /// The first `t + 1` roster members.
    pub fn select_signers(&self) -> Result<Roster, RosterError> {
        self.roster.signer_subset(self.threshold)
    }

    fn session(&self, phase: Phase) -> SessionId {
        SessionId::new(format!("{}/{}", self.run_id, phase.name()))
    }

    /// Run every participant concurrently and wait for all of them.
    ///
    /// Reports come back in roster order. A participant task that dies is
    /// reported as a panicked protocol error.
    pub async fn run_all(self: Arc<Self>) -> Vec<ParticipantReport> {
        info!(
            run_id = %self.run_id,
            suite = self.suite.name(),
            participants = self.roster.len(),
            threshold = self.threshold,
            "Starting run"
        );

        let tasks: Vec<_> = self
            .roster
            .iter()
            .map(|id| {
                let orchestrator = Arc::clone(&self);
                let task_id = id.clone();
                let task = tokio::spawn(async move { orchestrator.run_participant(task_id).await });
                (id.clone(), task)
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(participant = %id, error = %err, "Participant task died");
                    self.network.withdraw(&id);
                    self.observer.withdrawn(&id, false);
                    reports.push(ParticipantReport {
                        outcome: RunOutcome::ProtocolError {
                            // Panics inside a phase are caught there; anything
                            // else is attributed to the first phase.
                            phase: Phase::Liveness,
                            kind: ProtocolErrorKind::Panicked,
                        },
                        results: Vec::new(),
                        timings: BenchmarkReport {
                            protocol: self.suite.name().to_string(),
                            participant: id.to_string(),
                            run_id: self.run_id.clone(),
                            ..BenchmarkReport::default()
                        },
                        id,
                    });
                }
            }
        }

        info!(run_id = %self.run_id, "All participants finished");
        reports
    }

    /// Run the full phase sequence for one participant.
    pub async fn run_participant(&self, id: ParticipantId) -> ParticipantReport {
        let recorder = Arc::new(Mutex::new(BenchmarkRecorder::new(
            self.suite.name(),
            id.as_str(),
            &self.run_id,
        )));
        let mut results = Vec::new();

        let outcome = match (self.network.handle(&id), Pool::new(self.pool_workers)) {
            (Ok(handle), Ok(pool)) => {
                let pool = Arc::new(pool);
                let outcome = match self.run_phases(&handle, &pool, &recorder, &mut results).await {
                    Ok(()) => RunOutcome::Success,
                    Err(outcome) => outcome,
                };
                pool.teardown();

                handle.withdraw();
                if outcome.is_failure() {
                    self.observer.withdrawn(&id, false);
                }
                outcome
            }
            (Err(err), _) => RunOutcome::ProtocolError {
                phase: Phase::Liveness,
                kind: ProtocolErrorKind::Network(err.to_string()),
            },
            (_, Err(err)) => {
                self.network.withdraw(&id);
                RunOutcome::ProtocolError {
                    phase: Phase::Liveness,
                    kind: ProtocolErrorKind::Protocol(err.to_string()),
                }
            }
        };

        let timings = match recorder.lock() {
            Ok(mut rec) => {
                rec.complete();
                rec.report()
            }
            Err(poisoned) => poisoned.into_inner().report(),
        };

        match &outcome {
            RunOutcome::Success | RunOutcome::VoluntaryWithdrawal => {
                info!(participant = %id, outcome = %outcome, "Participant finished")
            }
            _ => warn!(participant = %id, outcome = %outcome, "Participant finished"),
        }

        ParticipantReport {
            id,
            outcome,
            results,
            timings,
        }
    }

    /// The phase sequence; `Err` carries the outcome that ended it early.
    async fn run_phases(
        &self,
        handle: &NetworkHandle,
        pool: &Arc<Pool>,
        recorder: &Arc<Mutex<BenchmarkRecorder>>,
        results: &mut Vec<PhaseResult>,
    ) -> Result<(), RunOutcome> {
        let id = handle.id();
        let suite = &self.suite;
        let message = self.message.as_slice();
        let roster = &self.roster;

        let digest = self
            .phase(
                handle,
                Phase::Liveness,
                roster,
                recorder,
                || suite.liveness(id, roster),
                |_| true,
            )
            .await?;
        results.push(PhaseResult::Liveness(digest));

        let share = self
            .phase(
                handle,
                Phase::KeyGen,
                roster,
                recorder,
                || suite.keygen(id, roster, self.threshold, Arc::clone(pool)),
                |_| true,
            )
            .await?;
        results.push(PhaseResult::KeyGen(share.clone()));

        let public_key = share.public_key();
        let share = self
            .phase(
                handle,
                Phase::Refresh,
                roster,
                recorder,
                || suite.refresh(&share, Arc::clone(pool)),
                |refreshed| refreshed.public_key() == public_key,
            )
            .await?;
        results.push(PhaseResult::Refresh(share.clone()));

        let signers = self.select_signers().map_err(|err| RunOutcome::ProtocolError {
            phase: Phase::Signing,
            kind: ProtocolErrorKind::Protocol(ProtocolError::from(err).to_string()),
        })?;
        if !signers.contains(id) {
            info!(participant = %id, signers = %signers, "Not selected for signing, withdrawing");
            handle.withdraw();
            self.observer.withdrawn(id, true);
            return Err(RunOutcome::VoluntaryWithdrawal);
        }

        let signature = self
            .phase(
                handle,
                Phase::Signing,
                &signers,
                recorder,
                || suite.sign(&share, &signers, message, Arc::clone(pool)),
                |sig| public_key.verify(message, sig),
            )
            .await?;
        results.push(PhaseResult::Signing(signature));

        let presignature = self
            .phase(
                handle,
                Phase::Presign,
                &signers,
                recorder,
                || suite.presign(&share, &signers, Arc::clone(pool)),
                |presig| presig.validate().is_ok(),
            )
            .await?;
        results.push(PhaseResult::Presign(presignature.clone()));

        let online = self
            .phase(
                handle,
                Phase::PresignOnline,
                &signers,
                recorder,
                || suite.presign_online(&share, &presignature, message, Arc::clone(pool)),
                |sig| public_key.verify(message, sig),
            )
            .await?;
        results.push(PhaseResult::PresignOnline(online));

        Ok(())
    }

    /// Start one machine, run it to completion and check its output.
    ///
    /// Fails with [`crate::error::NetworkError::PeerWithdrawn`] without starting the machine
    /// when a member of `quorum` has already left.
    async fn phase<M, F, C>(
        &self,
        handle: &NetworkHandle,
        phase: Phase,
        quorum: &Roster,
        recorder: &Arc<Mutex<BenchmarkRecorder>>,
        start: F,
        check: C,
    ) -> Result<M::Output, RunOutcome>
    where
        M: ProtocolMachine,
        F: FnOnce() -> Result<M, ProtocolError>,
        C: FnOnce(&M::Output) -> bool,
    {
        let id = handle.id();
        let session = self.session(phase);
        self.observer.phase_started(id, phase);
        let timer = StepTimer::new(phase.name(), Arc::clone(recorder));

        let run = async {
            if let Err(err) = handle.require_live(quorum) {
                return Err(RunError::Network(err));
            }
            match start() {
                Ok(machine) => {
                    run_protocol(
                        machine,
                        handle,
                        &session,
                        phase,
                        self.observer.as_ref(),
                        self.receive_timeout,
                    )
                    .await
                }
                Err(err) => Err(RunError::Protocol(err)),
            }
        };
        let result = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!(participant = %id, phase = %phase, "Phase panicked");
                Err(RunError::Panicked)
            }
        };
        let elapsed = timer.stop();

        let (result, outcome) = match result {
            Ok(output) if check(&output) => (Ok(output), RunOutcome::Success),
            Ok(_) => {
                warn!(participant = %id, phase = %phase, "Phase output failed verification");
                let outcome = RunOutcome::VerificationFailed { phase };
                (Err(outcome.clone()), outcome)
            }
            Err(err) => {
                let outcome = RunOutcome::ProtocolError {
                    phase,
                    kind: ProtocolErrorKind::from(&err),
                };
                (Err(outcome.clone()), outcome)
            }
        };

        self.observer.phase_finished(id, phase, &outcome, elapsed);
        result
    }
}

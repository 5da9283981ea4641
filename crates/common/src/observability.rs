//! Observability primitives for the protocol harness.
//!
//! - **Structured tracing**: [`LogEvent`]s serialised to JSON and emitted via
//!   `tracing`, with the session id as correlation id.
//! - **Metrics**: [`ProtocolMetrics`], lock-free counters plus bounded
//!   duration buckets per phase, readable as a [`MetricsSnapshot`].
//!
//! - **Session spans**: [`SessionSpan`] follows one participant through one
//!   phase run and emits the lifecycle events.
//!
//! Participants are the source of truth: every counter is fed from a
//! participant's own run loop, never inferred from the network.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Maximum number of duration samples kept per metrics instance.
const MAX_DURATION_SAMPLES: usize = 1000;

/// Standardized event types for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Phase lifecycle
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    PhaseTimeout,

    // Messaging
    MessageSent,
    MessageReceived,

    // Participation
    ParticipantWithdrawn,
    RunCompleted,

    // Errors
    ProtocolError,
    VerificationFailed,
}

impl EventType {
    /// Whether this event should be logged at warn level.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::PhaseFailed | Self::PhaseTimeout | Self::ProtocolError | Self::VerificationFailed
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::PhaseFailed => "phase_failed",
            Self::PhaseTimeout => "phase_timeout",
            Self::MessageSent => "message_sent",
            Self::MessageReceived => "message_received",
            Self::ParticipantWithdrawn => "participant_withdrawn",
            Self::RunCompleted => "run_completed",
            Self::ProtocolError => "protocol_error",
            Self::VerificationFailed => "verification_failed",
        };
        write!(f, "{}", s)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A structured log event with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event type for filtering.
    pub event_type: EventType,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Correlation ID (the network session id).
    pub correlation_id: Option<String>,
    /// Participant that generated this event.
    pub participant: Option<String>,
    /// Phase name (liveness, keygen, ...).
    pub phase: Option<String>,
    /// Duration in milliseconds if applicable.
    pub duration_ms: Option<u64>,
    /// Additional context as key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Error message if this is an error event.
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp_ms: now_ms(),
            correlation_id: None,
            participant: None,
            phase: None,
            duration_ms: None,
            context: HashMap::new(),
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Emit this event using tracing.
    pub fn emit(&self) {
        let json = serde_json::to_string(&self).unwrap_or_default();

        if self.event_type.is_failure() {
            tracing::warn!(event = %json, "observability_event");
        } else if matches!(
            self.event_type,
            EventType::MessageSent | EventType::MessageReceived
        ) {
            tracing::trace!(event = %json, "observability_event");
        } else {
            tracing::info!(event = %json, "observability_event");
        }
    }
}

/// A duration sample for one phase run.
#[derive(Debug, Clone)]
struct DurationSample {
    phase: String,
    duration_ms: u64,
}

/// Thread-safe metrics for protocol execution.
#[derive(Debug)]
pub struct ProtocolMetrics {
    /// Scope label (run id or participant id).
    pub scope: String,

    phases_started: AtomicU64,
    phases_completed: AtomicU64,
    phases_failed: AtomicU64,
    phases_timeout: AtomicU64,

    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_bytes_sent: AtomicU64,
    messages_bytes_received: AtomicU64,

    withdrawals: AtomicU64,
    verification_failures: AtomicU64,

    phase_durations: RwLock<Vec<DurationSample>>,
}

impl ProtocolMetrics {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            phases_started: AtomicU64::new(0),
            phases_completed: AtomicU64::new(0),
            phases_failed: AtomicU64::new(0),
            phases_timeout: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_bytes_sent: AtomicU64::new(0),
            messages_bytes_received: AtomicU64::new(0),
            withdrawals: AtomicU64::new(0),
            verification_failures: AtomicU64::new(0),
            phase_durations: RwLock::new(Vec::new()),
        }
    }

    // Counter increments

    pub fn inc_phases_started(&self) {
        self.phases_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_phases_completed(&self) {
        self.phases_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_phases_failed(&self) {
        self.phases_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_phases_timeout(&self) {
        self.phases_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_sent(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.messages_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_messages_received(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.messages_bytes_received
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_withdrawals(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verification_failures(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one participant spent in one phase.
    pub fn record_phase_duration(&self, phase: &str, duration: Duration) {
        let sample = DurationSample {
            phase: phase.to_string(),
            duration_ms: duration.as_millis() as u64,
        };

        if let Ok(mut durations) = self.phase_durations.write() {
            durations.push(sample);
            if durations.len() > MAX_DURATION_SAMPLES {
                durations.remove(0);
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let durations = self
            .phase_durations
            .read()
            .map(|d| d.clone())
            .unwrap_or_default();

        let mut sums: HashMap<String, (u64, u64)> = HashMap::new(); // (sum, count)
        for sample in &durations {
            let entry = sums.entry(sample.phase.clone()).or_insert((0, 0));
            entry.0 += sample.duration_ms;
            entry.1 += 1;
        }

        let phase_duration_avg_ms = sums
            .into_iter()
            .map(|(k, (sum, count))| (k, sum as f64 / count as f64))
            .collect();

        MetricsSnapshot {
            scope: self.scope.clone(),
            timestamp_ms: now_ms(),
            phases_started: self.phases_started.load(Ordering::Relaxed),
            phases_completed: self.phases_completed.load(Ordering::Relaxed),
            phases_failed: self.phases_failed.load(Ordering::Relaxed),
            phases_timeout: self.phases_timeout.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_bytes_sent: self.messages_bytes_sent.load(Ordering::Relaxed),
            messages_bytes_received: self.messages_bytes_received.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            verification_failures: self.verification_failures.load(Ordering::Relaxed),
            phase_duration_avg_ms,
        }
    }
}

/// A snapshot of current metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scope: String,
    pub timestamp_ms: u64,

    // Counters
    pub phases_started: u64,
    pub phases_completed: u64,
    pub phases_failed: u64,
    pub phases_timeout: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_bytes_sent: u64,
    pub messages_bytes_received: u64,
    pub withdrawals: u64,
    pub verification_failures: u64,

    // phase -> avg ms
    pub phase_duration_avg_ms: HashMap<String, f64>,
}

/// Lifecycle tracker for one participant in one phase run.
///
/// Emits [`EventType::PhaseStarted`] on creation and exactly one terminal
/// event when consumed by [`complete`](Self::complete) or
/// [`fail`](Self::fail).
#[derive(Debug)]
pub struct SessionSpan {
    session_id: String,
    phase: String,
    participant: String,
    start_time: Instant,
    messages_sent: u64,
    messages_received: u64,
}

impl SessionSpan {
    pub fn new(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        participant: impl Into<String>,
    ) -> Self {
        let span = Self {
            session_id: session_id.into(),
            phase: phase.into(),
            participant: participant.into(),
            start_time: Instant::now(),
            messages_sent: 0,
            messages_received: 0,
        };

        span.event(EventType::PhaseStarted).emit();
        span
    }

    fn event(&self, event_type: EventType) -> LogEvent {
        LogEvent::new(event_type)
            .with_correlation_id(&self.session_id)
            .with_phase(&self.phase)
            .with_participant(&self.participant)
    }

    /// Record a message sent; `to` is `None` for broadcast.
    pub fn record_message_sent(&mut self, to: Option<&str>, bytes: usize) {
        self.messages_sent += 1;
        self.event(EventType::MessageSent)
            .with_context("to", to.unwrap_or("broadcast"))
            .with_context("bytes", bytes.to_string())
            .emit();
    }

    pub fn record_message_received(&mut self, from: &str, bytes: usize) {
        self.messages_received += 1;
        self.event(EventType::MessageReceived)
            .with_context("from", from)
            .with_context("bytes", bytes.to_string())
            .emit();
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Complete the phase successfully.
    pub fn complete(self) -> Duration {
        let duration = self.start_time.elapsed();
        self.event(EventType::PhaseCompleted)
            .with_duration(duration)
            .with_context("messages_sent", self.messages_sent.to_string())
            .with_context("messages_received", self.messages_received.to_string())
            .emit();
        duration
    }

    /// Mark the phase as failed. `timed_out` selects the timeout event.
    pub fn fail(self, error: impl Into<String>, timed_out: bool) -> Duration {
        let duration = self.start_time.elapsed();
        let event_type = if timed_out {
            EventType::PhaseTimeout
        } else {
            EventType::PhaseFailed
        };
        self.event(event_type)
            .with_duration(duration)
            .with_error(error)
            .emit();
        duration
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Fails if a subscriber is
/// already installed (e.g. called twice in one process).
pub fn init_tracing(level: &str, json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}

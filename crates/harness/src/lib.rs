//! Execution harness for multi-party protocols.
//!
//! Drives every participant of a roster through liveness, key generation,
//! key refresh, threshold signing and two-phase pre-signing over an
//! in-memory network, one tokio task per participant.

pub mod config;
pub mod error;
pub mod network;
pub mod observer;
pub mod orchestrator;
pub mod outcome;
pub mod run_loop;

pub use config::HarnessConfig;
pub use error::{ConfigError, NetworkError, RunError};
pub use network::{Network, NetworkHandle};
pub use observer::{CompositeObserver, MetricsObserver, NoopObserver, PhaseObserver, TracingObserver};
pub use orchestrator::Orchestrator;
pub use outcome::{ParticipantReport, Phase, PhaseResult, ProtocolErrorKind, RunOutcome};
pub use run_loop::run_protocol;

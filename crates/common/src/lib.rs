//! Common types shared between the protocol suite and the execution harness.

pub mod message;
pub mod observability;
pub mod types;

pub use message::Message;
pub use observability::{
    init_tracing, EventType, LogEvent, MetricsSnapshot, ProtocolMetrics, SessionSpan,
};
pub use types::{ParticipantId, Roster, RosterError, SessionId};

/// Default roster size used by the harness runner.
pub const DEFAULT_PARTICIPANTS: usize = 15;

/// Default signing threshold (`t`); `t + 1` participants sign.
pub const DEFAULT_THRESHOLD: usize = 5;

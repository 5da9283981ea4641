//! Pumps one protocol machine against the network until it is terminal.

use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;
use tracing::debug;

use common::{Message, SessionId, SessionSpan};
use protocols::{ProtocolError, ProtocolMachine};

use crate::error::RunError;
use crate::network::NetworkHandle;
use crate::observer::PhaseObserver;
use crate::outcome::Phase;

/// Run `machine` for the participant behind `handle` on `session`.
///
/// Each iteration forwards every queued outgoing message, then stops if the
/// machine is terminal, otherwise waits for one inbound message (bounded by
/// `receive_timeout`) and delivers it. A delivery error ends the phase
/// immediately. The participant's mailbox for `session` is closed on exit.
pub async fn run_protocol<M: ProtocolMachine>(
    mut machine: M,
    handle: &NetworkHandle,
    session: &SessionId,
    phase: Phase,
    observer: &dyn PhaseObserver,
    receive_timeout: Duration,
) -> Result<M::Output, RunError> {
    let mut span = SessionSpan::new(session.as_str(), phase.name(), handle.id().as_str());

    let result = pump(
        &mut machine,
        handle,
        session,
        phase,
        observer,
        receive_timeout,
        &mut span,
    )
    .await;
    handle.close_session(session);

    match &result {
        Ok(_) => {
            span.complete();
        }
        Err(err) => {
            debug!(participant = %handle.id(), phase = %phase, error = %err, "Run loop stopped");
            span.fail(err.to_string(), err.is_timeout());
        }
    }
    result
}

async fn pump<M: ProtocolMachine>(
    machine: &mut M,
    handle: &NetworkHandle,
    session: &SessionId,
    phase: Phase,
    observer: &dyn PhaseObserver,
    receive_timeout: Duration,
    span: &mut SessionSpan,
) -> Result<M::Output, RunError> {
    let me = handle.id();

    loop {
        for msg in machine.outgoing() {
            let bytes = msg.len();
            let to = msg.recipient().map(|p| p.as_str().to_owned());
            handle.send(session, msg)?;
            span.record_message_sent(to.as_deref(), bytes);
            observer.message_sent(me, phase, bytes);
        }

        if machine.is_terminal() {
            return Ok(machine.result()?);
        }

        let msg = handle.receive(session, receive_timeout).await?;
        span.record_message_received(msg.sender().as_str(), msg.len());
        observer.message_received(me, phase, msg.len());
        deliver(machine, msg)?;
    }
}

/// Deliver one message. Delivery may block on the participant's pool, so on
/// a multi-thread runtime it runs under `block_in_place` and the worker's
/// other tasks move to another thread in the meantime.
fn deliver<M: ProtocolMachine>(machine: &mut M, msg: Message) -> Result<(), ProtocolError> {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => block_in_place(|| machine.deliver(msg)),
        _ => machine.deliver(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use common::{ParticipantId, Roster};

    use super::*;
    use crate::network::Network;
    use crate::observer::NoopObserver;

    /// Finishes after receiving `expect` messages; broadcasts one on start.
    struct Counter {
        id: ParticipantId,
        expect: usize,
        seen: Vec<u8>,
        outgoing: Vec<Message>,
        fail_on: Option<u8>,
        /// Blocking work done by every delivery.
        busy: Duration,
    }

    impl Counter {
        fn new(id: &str, expect: usize, payload: u8) -> Self {
            let id = ParticipantId::from(id);
            Self {
                outgoing: vec![Message::broadcast(id.clone(), vec![payload])],
                id,
                expect,
                seen: Vec::new(),
                fail_on: None,
                busy: Duration::ZERO,
            }
        }
    }

    impl ProtocolMachine for Counter {
        type Output = Vec<u8>;

        fn outgoing(&mut self) -> Vec<Message> {
            std::mem::take(&mut self.outgoing)
        }

        fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
            std::thread::sleep(self.busy);
            let byte = msg.payload()[0];
            if Some(byte) == self.fail_on {
                return Err(ProtocolError::BadParameters(format!("{} rejects {}", self.id, byte)));
            }
            self.seen.push(byte);
            Ok(())
        }

        fn is_terminal(&self) -> bool {
            self.seen.len() >= self.expect
        }

        fn result(&mut self) -> Result<Vec<u8>, ProtocolError> {
            let mut seen = std::mem::take(&mut self.seen);
            seen.sort_unstable();
            Ok(seen)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_loop_exchanges_broadcasts() {
        let roster = Roster::numbered("a", 3).unwrap();
        let network = Network::new(roster.clone());
        let session = SessionId::new("test/counter");

        let mut tasks = Vec::new();
        for (i, id) in roster.iter().enumerate() {
            let handle = network.handle(id).unwrap();
            let session = session.clone();
            let machine = Counter::new(id.as_str(), 2, i as u8);
            tasks.push(tokio::spawn(async move {
                run_protocol(machine, &handle, &session, Phase::Liveness, &NoopObserver, Duration::from_secs(5))
                    .await
            }));
        }

        let mut outputs = Vec::new();
        for task in tasks {
            outputs.push(task.await.unwrap().unwrap());
        }
        assert_eq!(outputs, vec![vec![1, 2], vec![0, 2], vec![0, 1]]);
    }

    #[tokio::test]
    async fn test_delivery_error_is_fatal() {
        let roster = Roster::numbered("a", 2).unwrap();
        let network = Network::new(roster);
        let session = SessionId::new("test/counter");

        let sender = network.handle(&"a1".into()).unwrap();
        sender
            .send(&session, Message::broadcast("a1".into(), vec![7]))
            .unwrap();

        let mut machine = Counter::new("a2", 1, 0);
        machine.fail_on = Some(7);
        let handle = network.handle(&"a2".into()).unwrap();
        let err = run_protocol(machine, &handle, &session, Phase::KeyGen, &NoopObserver, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Protocol(ProtocolError::BadParameters(_))));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let roster = Roster::numbered("a", 2).unwrap();
        let network = Network::new(roster);
        let handle = network.handle(&"a1".into()).unwrap();

        let err = run_protocol(
            Counter::new("a1", 1, 0),
            &handle,
            &SessionId::new("test/counter"),
            Phase::Signing,
            &NoopObserver,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_withdrawn_participant_stops() {
        let roster = Roster::numbered("a", 2).unwrap();
        let network = Network::new(roster);
        let handle = network.handle(&"a1".into()).unwrap();
        handle.withdraw();

        let err = run_protocol(
            Counter::new("a1", 1, 0),
            &handle,
            &SessionId::new("test/counter"),
            Phase::Signing,
            &NoopObserver,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Network(_)));
        assert!(!network.is_live(&"a1".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_slow_delivery_does_not_stall_other_tasks() {
        let roster = Roster::numbered("a", 2).unwrap();
        let network = Network::new(roster);
        let session = SessionId::new("test/counter");

        network
            .handle(&"a1".into())
            .unwrap()
            .send(&session, Message::broadcast("a1".into(), vec![1]))
            .unwrap();

        let start = Instant::now();
        let mut machine = Counter::new("a2", 1, 0);
        machine.busy = Duration::from_millis(600);
        let handle = network.handle(&"a2".into()).unwrap();
        let slow = tokio::spawn(async move {
            run_protocol(machine, &handle, &session, Phase::KeyGen, &NoopObserver, Duration::from_secs(5))
                .await
        });
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            start.elapsed()
        });

        let ticked_after = ticker.await.unwrap();
        assert!(ticked_after < Duration::from_millis(400), "ticker stalled for {:?}", ticked_after);
        assert_eq!(slow.await.unwrap().unwrap(), vec![1]);
    }
}

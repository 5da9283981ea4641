//! In-memory routing fabric shared by every participant of a run.
//!
//! Every (session, participant) pair owns an unbounded FIFO mailbox, created
//! on first use. A sender's messages to one receiver therefore arrive in send
//! order, and a participant that already moved on to the next phase never
//! consumes messages meant for a slower peer's current phase.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tracing::{debug, trace};

use common::{Message, ParticipantId, Roster, SessionId};

use crate::error::NetworkError;

type MailboxKey = (SessionId, ParticipantId);

struct Mailbox {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Mailbox {
    fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }
}

#[derive(Default)]
struct NetworkState {
    live: BTreeSet<ParticipantId>,
    mailboxes: HashMap<MailboxKey, Mailbox>,
    /// Mailboxes whose owner finished the session; late traffic is dropped.
    closed: HashSet<MailboxKey>,
}

impl NetworkState {
    fn deliver(&mut self, session: &SessionId, to: &ParticipantId, msg: Message) {
        let key = (session.clone(), to.clone());
        if self.closed.contains(&key) {
            trace!(%session, to = %to, "Dropping message for closed mailbox");
            return;
        }
        let mailbox = self.mailboxes.entry(key).or_insert_with(Mailbox::new);
        // Unbounded: only fails when closed, which means the target left.
        let _ = mailbox.tx.try_send(msg);
    }
}

/// Process-wide message router.
///
/// Always used behind an `Arc`; participants talk to it through a
/// [`NetworkHandle`].
pub struct Network {
    roster: Roster,
    state: Mutex<NetworkState>,
}

impl Network {
    /// Network with every roster member live.
    pub fn new(roster: Roster) -> Arc<Self> {
        let state = NetworkState {
            live: roster.iter().cloned().collect(),
            ..NetworkState::default()
        };
        Arc::new(Self {
            roster,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Bind `id` to this network.
    pub fn handle(self: &Arc<Self>, id: &ParticipantId) -> Result<NetworkHandle, NetworkError> {
        if !self.roster.contains(id) {
            return Err(NetworkError::UnknownParticipant(id.clone()));
        }
        Ok(NetworkHandle {
            id: id.clone(),
            network: Arc::clone(self),
        })
    }

    pub fn is_live(&self, id: &ParticipantId) -> bool {
        self.lock().live.contains(id)
    }

    /// Live participants in roster order.
    pub fn live_participants(&self) -> Vec<ParticipantId> {
        let state = self.lock();
        self.roster
            .iter()
            .filter(|id| state.live.contains(*id))
            .cloned()
            .collect()
    }

    /// Fail with the first member of `members` that is no longer live.
    pub fn require_live(&self, members: &Roster) -> Result<(), NetworkError> {
        let state = self.lock();
        match members.iter().find(|id| !state.live.contains(*id)) {
            Some(peer) => Err(NetworkError::PeerWithdrawn { peer: peer.clone() }),
            None => Ok(()),
        }
    }

    /// Mailboxes and closed-session markers currently held for `id`.
    pub fn tracked_sessions(&self, id: &ParticipantId) -> usize {
        let state = self.lock();
        let open = state.mailboxes.keys().filter(|(_, owner)| owner == id).count();
        let closed = state.closed.iter().filter(|(_, owner)| owner == id).count();
        open + closed
    }

    /// Route `msg` on `session`. Never blocks.
    ///
    /// Point-to-point messages reach only a live target; broadcasts reach
    /// every other live participant. Messages for withdrawn participants are
    /// dropped silently.
    pub fn send(&self, session: &SessionId, msg: Message) -> Result<(), NetworkError> {
        if !self.roster.contains(msg.sender()) {
            return Err(NetworkError::UnknownParticipant(msg.sender().clone()));
        }

        let mut state = self.lock();
        match msg.recipient().cloned() {
            Some(to) => {
                if !self.roster.contains(&to) {
                    return Err(NetworkError::UnknownParticipant(to));
                }
                if state.live.contains(&to) {
                    state.deliver(session, &to, msg);
                } else {
                    trace!(%session, to = %to, "Target withdrawn, dropping message");
                }
            }
            None => {
                let targets: Vec<ParticipantId> = state
                    .live
                    .iter()
                    .filter(|id| *id != msg.sender())
                    .cloned()
                    .collect();
                for to in targets {
                    state.deliver(session, &to, msg.clone());
                }
            }
        }
        Ok(())
    }

    /// Wait for the next message for `id` on `session`.
    pub async fn receive(
        &self,
        session: &SessionId,
        id: &ParticipantId,
        timeout: Duration,
    ) -> Result<Message, NetworkError> {
        let rx = {
            let mut state = self.lock();
            if !state.live.contains(id) {
                return Err(NetworkError::Withdrawn(id.clone()));
            }
            let key = (session.clone(), id.clone());
            state.closed.remove(&key);
            state
                .mailboxes
                .entry(key)
                .or_insert_with(Mailbox::new)
                .rx
                .clone()
        };

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(NetworkError::Withdrawn(id.clone())),
            Err(_) => Err(NetworkError::Timeout {
                participant: id.clone(),
                session: session.clone(),
                after: timeout,
            }),
        }
    }

    /// Drop `id`'s mailbox for `session`; later messages for it are discarded.
    pub fn close_session(&self, session: &SessionId, id: &ParticipantId) {
        let key = (session.clone(), id.clone());
        let mut state = self.lock();
        if let Some(mailbox) = state.mailboxes.remove(&key) {
            mailbox.tx.close();
        }
        state.closed.insert(key);
    }

    /// Remove `id` from all future fan-out and drop its queued messages.
    ///
    /// Idempotent. A receive pending for `id` wakes with
    /// [`NetworkError::Withdrawn`].
    pub fn withdraw(&self, id: &ParticipantId) {
        let mut state = self.lock();
        if !state.live.remove(id) {
            return;
        }

        let keys: Vec<MailboxKey> = state
            .mailboxes
            .keys()
            .filter(|(_, owner)| owner == id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mailbox) = state.mailboxes.remove(&key) {
                mailbox.tx.close();
            }
        }
        state.closed.retain(|(_, owner)| owner != id);

        debug!(participant = %id, live = state.live.len(), "Participant withdrawn");
    }
}

/// A participant's view of the [`Network`]: it can only send as, and
/// receive for, its own id.
#[derive(Clone)]
pub struct NetworkHandle {
    id: ParticipantId,
    network: Arc<Network>,
}

impl NetworkHandle {
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn send(&self, session: &SessionId, msg: Message) -> Result<(), NetworkError> {
        if msg.sender() != &self.id {
            return Err(NetworkError::ForgedSender {
                claimed: msg.sender().clone(),
                actual: self.id.clone(),
            });
        }
        self.network.send(session, msg)
    }

    pub async fn receive(
        &self,
        session: &SessionId,
        timeout: Duration,
    ) -> Result<Message, NetworkError> {
        self.network.receive(session, &self.id, timeout).await
    }

    pub fn close_session(&self, session: &SessionId) {
        self.network.close_session(session, &self.id)
    }

    pub fn withdraw(&self) {
        self.network.withdraw(&self.id)
    }

    pub fn is_live(&self) -> bool {
        self.network.is_live(&self.id)
    }

    pub fn require_live(&self, members: &Roster) -> Result<(), NetworkError> {
        self.network.require_live(members)
    }
}

impl std::fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    fn setup(n: usize) -> (Arc<Network>, Vec<NetworkHandle>) {
        let roster = Roster::numbered("a", n).unwrap();
        let network = Network::new(roster.clone());
        let handles = roster.iter().map(|id| network.handle(id).unwrap()).collect();
        (network, handles)
    }

    fn session() -> SessionId {
        SessionId::new("test/liveness")
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let (_, handles) = setup(3);
        handles[0]
            .send(&session(), Message::broadcast("a1".into(), vec![1]))
            .unwrap();

        for handle in &handles[1..] {
            let msg = handle.receive(&session(), WAIT).await.unwrap();
            assert_eq!(msg.sender().as_str(), "a1");
            assert_eq!(msg.payload(), &[1]);
        }
        let own = handles[0].receive(&session(), Duration::from_millis(20)).await;
        assert!(matches!(own, Err(NetworkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_direct_message_reaches_only_target() {
        let (_, handles) = setup(3);
        handles[0]
            .send(&session(), Message::direct("a1".into(), "a3".into(), vec![9]))
            .unwrap();

        assert_eq!(handles[2].receive(&session(), WAIT).await.unwrap().payload(), &[9]);
        let other = handles[1].receive(&session(), Duration::from_millis(20)).await;
        assert!(matches!(other, Err(NetworkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_per_sender_order_is_preserved() {
        let (_, handles) = setup(2);
        for i in 0..50u8 {
            handles[0]
                .send(&session(), Message::direct("a1".into(), "a2".into(), vec![i]))
                .unwrap();
        }
        for i in 0..50u8 {
            let msg = handles[1].receive(&session(), WAIT).await.unwrap();
            assert_eq!(msg.payload(), &[i]);
        }
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (_, handles) = setup(2);
        let keygen = SessionId::new("test/keygen");
        handles[0]
            .send(&keygen, Message::broadcast("a1".into(), vec![2]))
            .unwrap();
        handles[0]
            .send(&session(), Message::broadcast("a1".into(), vec![1]))
            .unwrap();

        assert_eq!(handles[1].receive(&session(), WAIT).await.unwrap().payload(), &[1]);
        assert_eq!(handles[1].receive(&keygen, WAIT).await.unwrap().payload(), &[2]);
    }

    #[tokio::test]
    async fn test_withdraw_is_idempotent_and_skips_fanout() {
        let (network, handles) = setup(3);
        handles[1].withdraw();
        handles[1].withdraw();
        network.withdraw(&"a2".into());

        assert!(!network.is_live(&"a2".into()));
        assert_eq!(network.live_participants().len(), 2);

        handles[0]
            .send(&session(), Message::broadcast("a1".into(), vec![5]))
            .unwrap();
        handles[0]
            .send(&session(), Message::direct("a1".into(), "a2".into(), vec![6]))
            .unwrap();

        assert_eq!(handles[2].receive(&session(), WAIT).await.unwrap().payload(), &[5]);
        assert_eq!(
            handles[1].receive(&session(), WAIT).await.unwrap_err(),
            NetworkError::Withdrawn("a2".into())
        );
    }

    #[tokio::test]
    async fn test_withdraw_drops_queued_messages_and_wakes_receiver() {
        let (network, handles) = setup(2);
        handles[0]
            .send(&session(), Message::broadcast("a1".into(), vec![1]))
            .unwrap();

        let waiter = {
            let handle = handles[1].clone();
            tokio::spawn(async move {
                // Consume the queued message, then block on an empty mailbox.
                let _ = handle.receive(&session(), Duration::from_secs(5)).await;
                handle.receive(&session(), Duration::from_secs(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        network.withdraw(&"a2".into());

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), NetworkError::Withdrawn("a2".into()));
    }

    #[tokio::test]
    async fn test_forged_sender_is_rejected() {
        let (_, handles) = setup(2);
        let err = handles[0]
            .send(&session(), Message::broadcast("a2".into(), vec![]))
            .unwrap_err();
        assert!(matches!(err, NetworkError::ForgedSender { .. }));
    }

    #[tokio::test]
    async fn test_unknown_participants_are_rejected() {
        let (network, handles) = setup(2);
        assert!(matches!(
            network.handle(&"z9".into()),
            Err(NetworkError::UnknownParticipant(_))
        ));
        assert!(matches!(
            handles[0].send(&session(), Message::direct("a1".into(), "z9".into(), vec![])),
            Err(NetworkError::UnknownParticipant(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_session_discards_late_messages() {
        let (_, handles) = setup(2);
        handles[1].close_session(&session());
        handles[0]
            .send(&session(), Message::broadcast("a1".into(), vec![1]))
            .unwrap();

        // Reopening the session starts from an empty mailbox.
        let late = handles[1].receive(&session(), Duration::from_millis(20)).await;
        assert!(matches!(late, Err(NetworkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_require_live_names_the_missing_peer() {
        let (network, handles) = setup(3);
        let roster = network.roster().clone();
        assert_eq!(handles[0].require_live(&roster), Ok(()));

        handles[2].withdraw();
        assert_eq!(
            handles[0].require_live(&roster),
            Err(NetworkError::PeerWithdrawn { peer: "a3".into() })
        );
        assert_eq!(handles[0].require_live(&roster.prefix(2).unwrap()), Ok(()));
    }

    #[tokio::test]
    async fn test_withdraw_forgets_closed_sessions() {
        let (network, handles) = setup(2);
        let keygen = SessionId::new("test/keygen");
        handles[0]
            .send(&keygen, Message::broadcast("a1".into(), vec![1]))
            .unwrap();
        handles[1].close_session(&session());
        assert_eq!(network.tracked_sessions(&"a2".into()), 2);

        handles[1].withdraw();
        assert_eq!(network.tracked_sessions(&"a2".into()), 0);
    }
}

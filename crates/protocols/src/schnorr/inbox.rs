//! Per-round message store.

use std::collections::BTreeMap;

use common::{ParticipantId, Roster};

use crate::error::ProtocolError;

/// Collects exactly one value from every expected peer for one round.
///
/// Values for a round the machine has not reached yet are stored here too,
/// which is how early messages are buffered.
#[derive(Debug)]
pub(crate) struct Inbox<T> {
    round: &'static str,
    expected: Vec<ParticipantId>,
    received: BTreeMap<ParticipantId, T>,
}

impl<T> Inbox<T> {
    /// Inbox expecting every member of `members` except `me`.
    pub(crate) fn new(round: &'static str, members: &Roster, me: &ParticipantId) -> Self {
        Self {
            round,
            expected: members.iter().filter(|id| *id != me).cloned().collect(),
            received: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, sender: &ParticipantId, value: T) -> Result<(), ProtocolError> {
        if !self.expected.contains(sender) {
            return Err(ProtocolError::UnexpectedSender(sender.clone()));
        }
        if self.received.contains_key(sender) {
            return Err(ProtocolError::Duplicate {
                sender: sender.clone(),
                round: self.round,
            });
        }
        self.received.insert(sender.clone(), value);
        Ok(())
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    pub(crate) fn get(&self, sender: &ParticipantId) -> Option<&T> {
        self.received.get(sender)
    }

    /// Received values paired with their sender, in membership order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &T)> {
        self.expected
            .iter()
            .filter_map(|id| self.received.get(id).map(|value| (id, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_collects_every_peer_once() {
        let roster = Roster::numbered("a", 3).unwrap();
        let me = ParticipantId::from("a1");
        let mut inbox = Inbox::new("nonce", &roster, &me);

        inbox.insert(&"a3".into(), 3).unwrap();
        assert!(!inbox.is_complete());
        inbox.insert(&"a2".into(), 2).unwrap();
        assert!(inbox.is_complete());

        let senders: Vec<&str> = inbox.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(senders, vec!["a2", "a3"]);
    }

    #[test]
    fn test_inbox_rejects_duplicates_and_strangers() {
        let roster = Roster::numbered("a", 3).unwrap();
        let me = ParticipantId::from("a1");
        let mut inbox = Inbox::new("nonce", &roster, &me);

        inbox.insert(&"a2".into(), 2).unwrap();
        assert!(matches!(
            inbox.insert(&"a2".into(), 2),
            Err(ProtocolError::Duplicate { .. })
        ));
        assert!(matches!(
            inbox.insert(&"a1".into(), 1),
            Err(ProtocolError::UnexpectedSender(_))
        ));
        assert!(matches!(
            inbox.insert(&"a9".into(), 9),
            Err(ProtocolError::UnexpectedSender(_))
        ));
    }

    #[test]
    fn test_single_member_inbox_is_complete() {
        let roster = Roster::numbered("a", 1).unwrap();
        let inbox: Inbox<u8> = Inbox::new("nonce", &roster, &"a1".into());
        assert!(inbox.is_complete());
    }
}

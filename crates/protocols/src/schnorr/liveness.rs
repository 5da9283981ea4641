//! One-round liveness check.

use rand::RngCore;
use tracing::debug;

use common::{Message, ParticipantId, Roster};

use super::inbox::Inbox;
use super::wire::{expect_broadcast, unexpected, Envelope};
use crate::error::ProtocolError;
use crate::machine::{Progress, ProtocolMachine};
use crate::types::LivenessDigest;

const ROUND: &str = "liveness";

/// Every participant broadcasts 32 random bytes; the output is the XOR of
/// all contributions, identical for every participant.
pub struct Liveness {
    id: ParticipantId,
    own: [u8; 32],
    inbox: Inbox<[u8; 32]>,
    outgoing: Vec<Message>,
    progress: Progress<LivenessDigest>,
}

impl Liveness {
    pub fn new(id: &ParticipantId, roster: &Roster) -> Result<Self, ProtocolError> {
        if !roster.contains(id) {
            return Err(ProtocolError::UnexpectedSender(id.clone()));
        }

        let mut own = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut own);

        let outgoing = if roster.len() > 1 {
            vec![Envelope::Liveness { contribution: own }.to_broadcast(id)]
        } else {
            Vec::new()
        };

        let mut machine = Self {
            id: id.clone(),
            own,
            inbox: Inbox::new(ROUND, roster, id),
            outgoing,
            progress: Progress::Running,
        };
        machine.try_finish();
        Ok(machine)
    }

    fn try_finish(&mut self) {
        if !self.inbox.is_complete() {
            return;
        }

        let mut digest = self.own;
        for (_, contribution) in self.inbox.iter() {
            for (byte, other) in digest.iter_mut().zip(contribution) {
                *byte ^= other;
            }
        }

        debug!(participant = %self.id, digest = %hex::encode(digest), "Liveness digest computed");
        self.progress.finish(Ok(LivenessDigest(digest)));
    }

    fn handle(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        match Envelope::decode(msg)? {
            Envelope::Liveness { contribution } => {
                expect_broadcast(msg, ROUND)?;
                self.inbox.insert(msg.sender(), contribution)
            }
            other => Err(unexpected(msg, &other)),
        }
    }
}

impl ProtocolMachine for Liveness {
    type Output = LivenessDigest;

    fn outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        if self.progress.is_terminal() {
            return Ok(());
        }
        self.handle(&msg).map_err(|e| self.progress.fail(e))?;
        self.try_finish();
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        self.progress.is_terminal()
    }

    fn result(&mut self) -> Result<LivenessDigest, ProtocolError> {
        self.progress.take()
    }
}

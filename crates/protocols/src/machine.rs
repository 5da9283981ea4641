//! The protocol state machine capability.

use common::Message;

use crate::error::ProtocolError;

/// One participant's run of one protocol phase.
///
/// The machine never blocks: it consumes messages through [`deliver`],
/// produces messages through [`outgoing`], and reports its state through
/// [`is_terminal`]. The harness run loop owns the I/O.
///
/// [`deliver`]: ProtocolMachine::deliver
/// [`outgoing`]: ProtocolMachine::outgoing
/// [`is_terminal`]: ProtocolMachine::is_terminal
pub trait ProtocolMachine: Send {
    type Output: Send + 'static;

    /// Drain the messages produced since the last call.
    fn outgoing(&mut self) -> Vec<Message>;

    /// Feed one inbound message.
    ///
    /// An `Err` is fatal: the machine becomes terminal and [`result`]
    /// returns the same error.
    ///
    /// [`result`]: ProtocolMachine::result
    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError>;

    /// True once the machine produced its result or failed.
    fn is_terminal(&self) -> bool;

    /// Take the result. Succeeds at most once, and only in a terminal state.
    fn result(&mut self) -> Result<Self::Output, ProtocolError>;
}

impl<M: ProtocolMachine + ?Sized> ProtocolMachine for Box<M> {
    type Output = M::Output;

    fn outgoing(&mut self) -> Vec<Message> {
        (**self).outgoing()
    }

    fn deliver(&mut self, msg: Message) -> Result<(), ProtocolError> {
        (**self).deliver(msg)
    }

    fn is_terminal(&self) -> bool {
        (**self).is_terminal()
    }

    fn result(&mut self) -> Result<Self::Output, ProtocolError> {
        (**self).result()
    }
}

/// Terminal-state bookkeeping shared by the bundled machines.
#[derive(Debug)]
pub(crate) enum Progress<T> {
    Running,
    Finished(Result<T, ProtocolError>),
    Taken,
}

impl<T> Progress<T> {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, Progress::Running)
    }

    pub(crate) fn finish(&mut self, result: Result<T, ProtocolError>) {
        if !self.is_terminal() {
            *self = Progress::Finished(result);
        }
    }

    /// Record a fatal error and hand it back to the caller.
    pub(crate) fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.finish(Err(err.clone()));
        err
    }

    pub(crate) fn take(&mut self) -> Result<T, ProtocolError> {
        match std::mem::replace(self, Progress::Taken) {
            Progress::Running => {
                *self = Progress::Running;
                Err(ProtocolError::NotFinished)
            }
            Progress::Finished(result) => result,
            Progress::Taken => Err(ProtocolError::AlreadyTaken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_take_once() {
        let mut progress: Progress<u32> = Progress::Running;
        assert_eq!(progress.take(), Err(ProtocolError::NotFinished));
        assert!(!progress.is_terminal());

        progress.finish(Ok(7));
        assert!(progress.is_terminal());
        assert_eq!(progress.take(), Ok(7));
        assert_eq!(progress.take(), Err(ProtocolError::AlreadyTaken));
    }

    #[test]
    fn test_progress_first_outcome_wins() {
        let mut progress: Progress<u32> = Progress::Running;
        let err = progress.fail(ProtocolError::InconsistentShare);
        progress.finish(Ok(1));

        assert_eq!(err, ProtocolError::InconsistentShare);
        assert_eq!(progress.take(), Err(ProtocolError::InconsistentShare));
    }
}

//! Packets exchanged between composition logic and the front end of a run

use tokio::sync::oneshot;

/// What the front end supplied for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Value(String),
    /// Take the prompt's default value
    Default,
}

/// Single-assignment response slot of a prompt.
///
/// Every completion method consumes the slot, so it is fulfilled or failed at
/// most once. Dropping it unanswered releases the waiting producer with an
/// error.
#[derive(Debug)]
pub struct ResponseSlot {
    tx: oneshot::Sender<Result<Answer, String>>,
}

pub(crate) type SlotReceiver = oneshot::Receiver<Result<Answer, String>>;

impl ResponseSlot {
    pub(crate) fn pair() -> (Self, SlotReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn fulfill(self, answer: Answer) {
        // The producer may already be gone if its worker was aborted.
        let _ = self.tx.send(Ok(answer));
    }

    pub fn answer(self, value: impl Into<String>) {
        self.fulfill(Answer::Value(value.into()));
    }

    pub fn fulfill_default(self) {
        self.fulfill(Answer::Default);
    }

    /// Releases the producer with an explicit failure.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }

    /// Whether nobody is waiting for this slot anymore.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct Prompt {
    /// Sequence number of the prompt within its run
    pub id: u64,
    pub text: String,
    pub default_value: Option<String>,
    pub slot: ResponseSlot,
}

#[derive(Debug)]
pub enum Packet {
    Prompt(Prompt),
    Message { text: String, error: bool },
    Close,
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Prompt(_) => "prompt",
            Packet::Message { .. } => "message",
            Packet::Close => "close",
        }
    }
}

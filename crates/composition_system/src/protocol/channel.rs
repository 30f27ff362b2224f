//! Per-run packet queue
//!
//! Every pipeline run owns one bounded queue. The producer half is the
//! [`Interaction`] handle given to composition logic, the consumer half is the
//! [`PacketStream`] drained by the run's front end. Packets arrive in emission
//! order. Dropping the stream fails every prompt still queued in it, so a run
//! never leaks unanswered slots into the next one.

use super::packet::{Answer, Packet, Prompt, ResponseSlot};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identifier of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates the queue of a run. `capacity` is clamped to at least one packet.
pub fn channel(run: RunId, capacity: usize) -> (Interaction, PacketStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let interaction = Interaction {
        run,
        tx,
        next_prompt: Arc::new(AtomicU64::new(1)),
    };
    (interaction, PacketStream { run, rx })
}

/// Producer handle used by composition logic to talk to the front end.
#[derive(Debug, Clone)]
pub struct Interaction {
    run: RunId,
    tx: mpsc::Sender<Packet>,
    next_prompt: Arc<AtomicU64>,
}

impl Interaction {
    pub fn run_id(&self) -> RunId {
        self.run
    }

    /// Asks the front end a question and waits for the answer.
    ///
    /// # Arguments
    ///
    /// * `text` - Question shown to the user
    /// * `default` - Value used when the front end takes the default path
    ///
    /// # Returns
    ///
    /// The value the front end supplied, or `default` when it took the
    /// default path.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::PromptUnanswerable`] when nobody is
    /// draining the run, when the front end fails or drops the slot, or when
    /// the default path is taken for a prompt without a default.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use composition_system::{Interaction, ProtocolResult};
    /// # async fn ask(io: &Interaction) -> ProtocolResult<()> {
    /// let port: u16 = io
    ///     .prompt("Host port", Some("25565"))
    ///     .await?
    ///     .parse()
    ///     .unwrap_or(25565);
    /// io.message(format!("Binding host port {port}")).await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn prompt(&self, text: impl Into<String>, default: Option<&str>) -> ProtocolResult<String> {
        let text = text.into();
        let id = self.next_prompt.fetch_add(1, Ordering::Relaxed);
        let (slot, response) = ResponseSlot::pair();
        let packet = Packet::Prompt(Prompt {
            id,
            text: text.clone(),
            default_value: default.map(str::to_string),
            slot,
        });

        if self.tx.send(packet).await.is_err() {
            return Err(ProtocolError::PromptUnanswerable {
                prompt: text,
                reason: format!("no front end is attached to run {}", self.run),
            });
        }

        match response.await {
            Ok(Ok(Answer::Value(value))) => Ok(value),
            Ok(Ok(Answer::Default)) => default.map(str::to_string).ok_or_else(|| {
                ProtocolError::PromptUnanswerable {
                    prompt: text,
                    reason: "no value given and the prompt has no default".to_string(),
                }
            }),
            Ok(Err(reason)) => Err(ProtocolError::PromptUnanswerable { prompt: text, reason }),
            Err(_) => Err(ProtocolError::PromptUnanswerable {
                prompt: text,
                reason: "the front end went away before answering".to_string(),
            }),
        }
    }

    /// Sends an informational line to the front end.
    pub async fn message(&self, text: impl Into<String>) {
        self.emit(Packet::Message {
            text: text.into(),
            error: false,
        })
        .await;
    }

    /// Sends an error line to the front end.
    pub async fn error(&self, text: impl Into<String>) {
        self.emit(Packet::Message {
            text: text.into(),
            error: true,
        })
        .await;
    }

    /// Tells the front end that the run is over.
    pub async fn close(&self) {
        self.emit(Packet::Close).await;
    }

    /// Whether the consumer side of the run has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn emit(&self, packet: Packet) {
        if let Err(mpsc::error::SendError(packet)) = self.tx.send(packet).await {
            match packet {
                Packet::Message { text, error } => {
                    debug!(run = %self.run, error, "Dropping message after front end detached: {}", text);
                }
                other => debug!(run = %self.run, "Dropping {} packet after front end detached", other.kind()),
            }
        }
    }
}

/// Consumer half of a run's queue.
#[derive(Debug)]
pub struct PacketStream {
    run: RunId,
    rx: mpsc::Receiver<Packet>,
}

impl PacketStream {
    pub fn run_id(&self) -> RunId {
        self.run
    }

    /// Next packet in emission order, `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Refuses further packets. Already queued packets can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

//! Front end adapters
//!
//! A [`FrontEnd`] renders the packets of one run and supplies answers for its
//! prompts. [`drain_packets`] is the consumer loop the pipeline spawns for
//! every run; adapters only decide how text is shown and where answers come
//! from.

mod json;
mod scripted;

pub use json::JsonFrontEnd;
pub use scripted::{DefaultsFrontEnd, ScriptedFrontEnd, Transcript};

use crate::error::ProtocolResult;
use crate::protocol::{Answer, Packet, PacketStream, Prompt};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[async_trait]
pub trait FrontEnd: Send {
    /// Shows a message line. Must not wait for user input.
    async fn render(&mut self, text: &str, error: bool) -> ProtocolResult<()>;

    /// Obtains an answer for a prompt.
    ///
    /// Return `PromptUnanswerable` when no input can be obtained; any other
    /// error also ends the run's drain loop.
    async fn solicit(&mut self, id: u64, text: &str, default: Option<&str>) -> ProtocolResult<Answer>;

    /// Called once after the run stopped draining.
    async fn finish(&mut self) -> ProtocolResult<()> {
        Ok(())
    }
}

/// Drains one run's packets into `front`.
///
/// Signals `ready` before receiving the first packet. Returns when a `Close`
/// packet arrives, when every producer is gone, or on the first fatal
/// protocol error. Prompts still queued at that point fail when the stream is
/// dropped.
pub async fn drain_packets(
    mut stream: PacketStream,
    mut front: Box<dyn FrontEnd>,
    ready: oneshot::Sender<()>,
) -> ProtocolResult<()> {
    let run = stream.run_id();
    if ready.send(()).is_err() {
        debug!(run = %run, "Pipeline stopped waiting before the drain loop started");
    }

    let mut outcome = Ok(());
    while let Some(packet) = stream.recv().await {
        match packet {
            Packet::Message { text, error } => {
                if let Err(e) = front.render(&text, error).await {
                    if e.is_fatal() {
                        outcome = Err(e);
                        break;
                    }
                    warn!(run = %run, "Failed to render message: {}", e);
                }
            }
            Packet::Prompt(Prompt { id, text, slot, .. }) if slot.is_abandoned() => {
                debug!(run = %run, id, "Skipping prompt nobody waits for: {}", text);
            }
            Packet::Prompt(Prompt {
                id,
                text,
                default_value,
                slot,
            }) => match front.solicit(id, &text, default_value.as_deref()).await {
                Ok(answer) => slot.fulfill(answer),
                Err(e) => {
                    slot.fail(e.to_string());
                    if e.is_fatal() {
                        outcome = Err(e);
                        break;
                    }
                }
            },
            Packet::Close => break,
        }
    }
    stream.close();

    if let Err(e) = front.finish().await {
        warn!(run = %run, "Front end did not finish cleanly: {}", e);
    }
    debug!(run = %run, "Drain loop stopped");
    outcome
}

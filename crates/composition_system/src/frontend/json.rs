//! JSON envelope relay for socket-style transports

use super::FrontEnd;
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{Answer, Inbound, Outbound};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;

/// Relays packets as JSON envelopes over a text frame sink and reads answers
/// from a text frame stream.
///
/// Answers must come back in prompt order; an answer for any other prompt id
/// ends the run.
pub struct JsonFrontEnd<W, R> {
    outgoing: W,
    incoming: R,
}

impl<W, R> JsonFrontEnd<W, R> {
    pub fn new(outgoing: W, incoming: R) -> Self {
        Self { outgoing, incoming }
    }
}

impl<W, R, E> JsonFrontEnd<W, R>
where
    W: Sink<String, Error = E> + Unpin + Send,
    E: Display,
{
    async fn send(&mut self, frame: Outbound) -> ProtocolResult<()> {
        let text = frame.encode()?;
        self.outgoing
            .send(text)
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }
}

#[async_trait]
impl<W, R, E> FrontEnd for JsonFrontEnd<W, R>
where
    W: Sink<String, Error = E> + Unpin + Send,
    R: Stream<Item = String> + Unpin + Send,
    E: Display,
{
    async fn render(&mut self, text: &str, error: bool) -> ProtocolResult<()> {
        self.send(Outbound::Message {
            text: text.to_string(),
            error,
        })
        .await
    }

    async fn solicit(&mut self, id: u64, text: &str, default: Option<&str>) -> ProtocolResult<Answer> {
        self.send(Outbound::Prompt {
            id,
            text: text.to_string(),
            default: default.map(str::to_string),
        })
        .await?;

        let frame = self.incoming.next().await.ok_or(ProtocolError::Disconnected)?;
        let inbound = Inbound::decode(&frame)?;
        if inbound.id() != id {
            return Err(ProtocolError::UnexpectedAnswer {
                expected: id,
                got: inbound.id(),
            });
        }

        match inbound {
            Inbound::Answer { value: Some(value), .. } => Ok(Answer::Value(value)),
            Inbound::Answer { value: None, .. } => Ok(Answer::Default),
            Inbound::Reject { reason, .. } => Err(ProtocolError::PromptUnanswerable {
                prompt: text.to_string(),
                reason,
            }),
        }
    }

    async fn finish(&mut self) -> ProtocolResult<()> {
        self.send(Outbound::Close {}).await
    }
}

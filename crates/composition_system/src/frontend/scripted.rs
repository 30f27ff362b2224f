//! Non-interactive front ends

use super::FrontEnd;
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::Answer;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Takes the default of every prompt. Prompts without a default are
/// unanswerable.
#[derive(Debug, Default)]
pub struct DefaultsFrontEnd;

impl DefaultsFrontEnd {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrontEnd for DefaultsFrontEnd {
    async fn render(&mut self, text: &str, error: bool) -> ProtocolResult<()> {
        if error {
            warn!("{}", text);
        } else {
            info!("{}", text);
        }
        Ok(())
    }

    async fn solicit(&mut self, _id: u64, text: &str, default: Option<&str>) -> ProtocolResult<Answer> {
        match default {
            Some(_) => Ok(Answer::Default),
            None => Err(ProtocolError::PromptUnanswerable {
                prompt: text.to_string(),
                reason: "input is disabled and the prompt has no default".to_string(),
            }),
        }
    }
}

/// Lines shown by a [`ScriptedFrontEnd`], shared so they can be read after
/// the front end moved into a run.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<String>>>);

impl Transcript {
    pub async fn lines(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }

    async fn push(&self, line: String) {
        self.0.lock().await.push(line);
    }
}

/// Answers prompts from a fixed queue and records everything it shows.
///
/// `None` entries take the prompt's default. Once the queue is empty every
/// prompt is unanswerable.
#[derive(Debug, Default)]
pub struct ScriptedFrontEnd {
    answers: VecDeque<Option<String>>,
    transcript: Transcript,
}

impl ScriptedFrontEnd {
    pub fn new(answers: impl IntoIterator<Item = Option<String>>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            transcript: Transcript::default(),
        }
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

#[async_trait]
impl FrontEnd for ScriptedFrontEnd {
    async fn render(&mut self, text: &str, error: bool) -> ProtocolResult<()> {
        let line = if error { format!("error: {text}") } else { text.to_string() };
        self.transcript.push(line).await;
        Ok(())
    }

    async fn solicit(&mut self, id: u64, text: &str, default: Option<&str>) -> ProtocolResult<Answer> {
        let question = match default {
            Some(default) => format!("? #{id} {text} [{default}]"),
            None => format!("? #{id} {text}"),
        };
        self.transcript.push(question).await;

        match self.answers.pop_front() {
            Some(Some(value)) => {
                self.transcript.push(format!("> {value}")).await;
                Ok(Answer::Value(value))
            }
            Some(None) => {
                self.transcript.push(">".to_string()).await;
                Ok(Answer::Default)
            }
            None => Err(ProtocolError::PromptUnanswerable {
                prompt: text.to_string(),
                reason: "no scripted answer left".to_string(),
            }),
        }
    }
}

//! Interactive terminal front end
//!
//! Prompts are written to stderr and answered from stdin. An empty line takes
//! the prompt's default; end of input makes every further prompt
//! unanswerable.

use async_trait::async_trait;
use composition_system::{Answer, FrontEnd, ProtocolError, ProtocolResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stderr, Stdout};

pub struct TerminalFrontEnd<R, W, E> {
    input: Lines<R>,
    output: W,
    errors: E,
    exhausted: bool,
}

impl TerminalFrontEnd<BufReader<Stdin>, Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            tokio::io::stderr(),
        )
    }
}

impl<R, W, E> TerminalFrontEnd<R, W, E>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    /// Messages go to `output`, prompts and errors to `errors`.
    pub fn new(input: R, output: W, errors: E) -> Self {
        Self {
            input: input.lines(),
            output,
            errors,
            exhausted: false,
        }
    }

    #[cfg(test)]
    pub fn into_writers(self) -> (W, E) {
        (self.output, self.errors)
    }

    async fn write_line(target: &mut (impl AsyncWrite + Unpin), text: &str) -> ProtocolResult<()> {
        target
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        target.flush().await.map_err(|e| ProtocolError::Transport(e.to_string()))
    }
}

#[async_trait]
impl<R, W, E> FrontEnd for TerminalFrontEnd<R, W, E>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    async fn render(&mut self, text: &str, error: bool) -> ProtocolResult<()> {
        if error {
            Self::write_line(&mut self.errors, &format!("error: {text}")).await
        } else {
            Self::write_line(&mut self.output, text).await
        }
    }

    async fn solicit(&mut self, _id: u64, text: &str, default: Option<&str>) -> ProtocolResult<Answer> {
        let unanswerable = |reason: &str| ProtocolError::PromptUnanswerable {
            prompt: text.to_string(),
            reason: reason.to_string(),
        };
        if self.exhausted {
            return Err(unanswerable("standard input is closed"));
        }

        let question = match default {
            Some(default) => format!("{text} [{default}]: "),
            None => format!("{text}: "),
        };
        self.errors
            .write_all(question.as_bytes())
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        self.errors
            .flush()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        match self.input.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => Ok(Answer::Default),
            Ok(Some(line)) => Ok(Answer::Value(line.trim().to_string())),
            Ok(None) => {
                self.exhausted = true;
                Err(unanswerable("standard input is closed"))
            }
            Err(e) => Err(ProtocolError::Transport(e.to_string())),
        }
    }
}

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::interrupt;

/// Result of waiting at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// One line, newline stripped.
    Line(String),
    /// End of input.
    Eof,
    /// Ctrl-C while waiting.
    Interrupted,
}

/// Line-oriented user input.
#[async_trait]
pub trait LineInput: Send {
    /// Waits for the next line.
    ///
    /// # Errors
    /// Returns an error if reading from the underlying source fails.
    async fn read_line(&mut self) -> Result<InputEvent>;
}

/// Reads lines from process stdin, racing each read against Ctrl-C.
///
/// The read itself runs on the blocking pool. When Ctrl-C wins the race the
/// read stays parked there, so the runtime must be shut down with a timeout.
#[derive(Debug, Default)]
pub struct StdinLines;

impl StdinLines {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LineInput for StdinLines {
    async fn read_line(&mut self) -> Result<InputEvent> {
        interrupt::reset();
        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            let n = io::stdin().lock().read_line(&mut line)?;
            Ok::<_, io::Error>((n, line))
        });

        tokio::select! {
            () = interrupt::wait_for_interrupt() => Ok(InputEvent::Interrupted),
            joined = read => {
                let (n, line) = joined
                    .context("stdin reader task failed")?
                    .context("Failed to read from stdin")?;
                if n == 0 {
                    return Ok(InputEvent::Eof);
                }
                Ok(InputEvent::Line(strip_newline(line)))
            }
        }
    }
}

fn strip_newline(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned input, then reports end of input.
    #[derive(Debug, Default)]
    pub struct ScriptedLines {
        events: VecDeque<InputEvent>,
    }

    impl ScriptedLines {
        pub fn new<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
            Self {
                events: lines
                    .into_iter()
                    .map(|l| InputEvent::Line(l.to_string()))
                    .collect(),
            }
        }

        pub fn then(mut self, event: InputEvent) -> Self {
            self.events.push_back(event);
            self
        }
    }

    #[async_trait]
    impl LineInput for ScriptedLines {
        async fn read_line(&mut self) -> Result<InputEvent> {
            Ok(self.events.pop_front().unwrap_or(InputEvent::Eof))
        }
    }
}

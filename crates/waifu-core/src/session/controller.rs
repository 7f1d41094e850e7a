//! The turn loop: prompt, render, interrupt, repeat.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::input::{InputEvent, LineInput};
use super::stream::{DisplayToken, Responder, ResponseEvent, ResponseStream};
use super::turn::{
    ASK_PROFILE_REQUEST, Turn, TurnOutcome, TurnRequest, first_request_text, is_exit_command,
};
use crate::audio::AudioPlaybackQueue;
use crate::presentation::{Faces, Palette};
use crate::terminal::{InterruptSignal, InterruptWatcher, TerminalIo};

const GOODBYE: &str = "👋\n";
const INTERRUPTED_MESSAGE: &str = "Response interrupted";

/// How often the keyboard is checked while no event is ready.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Persona name for the assistant label.
    pub assistant_name: Option<String>,
    /// Delay between rendered characters; zero disables pacing.
    pub character_interval: Duration,
    pub faces: Faces,
    pub palette: Palette,
    /// Sent as the first turn when the user profile is already known.
    pub on_start_message_prompt: Option<String>,
    pub poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            assistant_name: None,
            character_interval: Duration::ZERO,
            faces: Faces::default(),
            palette: Palette::plain(),
            on_start_message_prompt: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Conversation state updated by replies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub context_id: Option<String>,
    pub user_name: Option<String>,
    pub relation: Option<String>,
}

impl SessionState {
    fn profile_known(&self) -> bool {
        self.user_name.is_some() && self.relation.is_some()
    }
}

/// Why the session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Input reached end of file.
    InputClosed,
    /// The user typed an exit command.
    ExitCommand,
    /// Ctrl-C at the prompt.
    PromptInterrupted,
    /// Ctrl-C while a reply was rendering.
    Cancelled,
}

/// Drives one interactive session.
pub struct SessionController<'t, T, W, R, L>
where
    T: TerminalIo,
    W: Write,
    R: Responder,
    L: LineInput,
{
    terminal: &'t T,
    output: W,
    responder: R,
    input: L,
    audio: Option<AudioPlaybackQueue>,
    options: SessionOptions,
    state: SessionState,
    ctrl_c: CancellationToken,
    goodbye_printed: bool,
    first_request_pending: bool,
    next_turn_id: u64,
}

impl<'t, T, W, R, L> SessionController<'t, T, W, R, L>
where
    T: TerminalIo,
    W: Write,
    R: Responder,
    L: LineInput,
{
    pub fn new(
        terminal: &'t T,
        output: W,
        responder: R,
        input: L,
        options: SessionOptions,
        state: SessionState,
    ) -> Self {
        Self {
            terminal,
            output,
            responder,
            input,
            audio: None,
            options,
            state,
            ctrl_c: CancellationToken::new(),
            goodbye_printed: false,
            first_request_pending: true,
            next_turn_id: 1,
        }
    }

    /// Plays voice clips through `audio`. Without a queue clips are dropped.
    #[must_use]
    pub fn with_audio(mut self, audio: AudioPlaybackQueue) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Ends the session when `ctrl_c` is cancelled, e.g. by a real SIGINT
    /// while the terminal is not in cbreak mode.
    #[must_use]
    pub fn with_ctrl_c(mut self, ctrl_c: CancellationToken) -> Self {
        self.ctrl_c = ctrl_c;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs turns until the user leaves.
    ///
    /// # Errors
    /// Returns an error if writing to the output or reading input fails.
    pub async fn run(&mut self) -> Result<SessionEnd> {
        let mut pending = self.on_start_request();

        loop {
            if self.ctrl_c.is_cancelled() {
                self.print_goodbye(false)?;
                return Ok(SessionEnd::Cancelled);
            }
            let line = match pending.take() {
                Some(request) => request,
                None => {
                    self.print_user_label()?;
                    match self.input.read_line().await? {
                        InputEvent::Line(line) => line,
                        InputEvent::Eof => {
                            writeln!(self.output)?;
                            self.output.flush()?;
                            return Ok(SessionEnd::InputClosed);
                        }
                        InputEvent::Interrupted => {
                            self.print_goodbye(true)?;
                            return Ok(SessionEnd::PromptInterrupted);
                        }
                    }
                }
            };

            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if is_exit_command(text) {
                self.print_goodbye(false)?;
                return Ok(SessionEnd::ExitCommand);
            }

            let turn = Turn::new(self.next_turn_id, text);
            self.next_turn_id += 1;
            let request_text = if self.first_request_pending {
                self.first_request_pending = false;
                first_request_text(&turn.input_text, turn.started_at)
            } else {
                turn.input_text.clone()
            };

            if self.run_turn(&turn, request_text).await? == TurnOutcome::ExitRequested {
                return Ok(SessionEnd::Cancelled);
            }
        }
    }

    fn on_start_request(&self) -> Option<String> {
        if !self.state.profile_known() {
            return Some(ASK_PROFILE_REQUEST.to_string());
        }
        self.options
            .on_start_message_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
    }

    fn print_user_label(&mut self) -> Result<()> {
        let p = &self.options.palette;
        let name = self.state.user_name.as_deref().unwrap_or("User");
        write!(self.output, "{}{}{name}{}: ", p.bold, p.user_label, p.reset)?;
        self.output.flush().context("Failed to flush output")
    }

    fn print_goodbye(&mut self, newline_first: bool) -> Result<()> {
        if self.goodbye_printed {
            return Ok(());
        }
        self.goodbye_printed = true;
        if newline_first {
            writeln!(self.output)?;
        }
        self.output.write_all(GOODBYE.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }

    fn stop_audio(&self) {
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }

    async fn run_turn(&mut self, turn: &Turn, text: String) -> Result<TurnOutcome> {
        self.stop_audio();

        let p = &self.options.palette;
        let name = self.options.assistant_name.as_deref().unwrap_or("Waifu");
        write!(
            self.output,
            "{}{}{name}{}: ",
            p.bold, p.assistant_label, p.reset
        )?;
        self.output.flush()?;

        debug!(turn_id = turn.id, "turn started");
        let stream = self.responder.respond(TurnRequest {
            turn_id: turn.id,
            text,
            context_id: self.state.context_id.clone(),
        });

        let outcome = {
            let mut renderer = TurnRenderer {
                watcher: InterruptWatcher::new(self.terminal),
                output: &mut self.output,
                audio: self.audio.as_ref(),
                state: &mut self.state,
                options: &self.options,
                ctrl_c: &self.ctrl_c,
            };
            let outcome = renderer.render(stream).await;
            renderer.watcher.release();
            outcome?
        };
        info!(turn_id = turn.id, ?outcome, "turn finished");

        match outcome {
            TurnOutcome::ExitRequested => {
                writeln!(self.output)?;
                self.stop_audio();
                self.print_goodbye(false)?;
            }
            TurnOutcome::Interrupted => {
                self.stop_audio();
                let p = &self.options.palette;
                writeln!(
                    self.output,
                    "\n{}{}[{INTERRUPTED_MESSAGE}]{}",
                    p.bold, p.interrupted, p.reset
                )?;
                self.output.flush()?;
            }
            TurnOutcome::Completed => {
                writeln!(self.output)?;
                self.output.flush()?;
            }
        }
        Ok(outcome)
    }
}

/// Rendering phase of one turn; holds cbreak mode while alive.
struct TurnRenderer<'a, 't, T: TerminalIo, W: Write> {
    watcher: InterruptWatcher<'t, T>,
    output: &'a mut W,
    audio: Option<&'a AudioPlaybackQueue>,
    state: &'a mut SessionState,
    options: &'a SessionOptions,
    ctrl_c: &'a CancellationToken,
}

impl<T: TerminalIo, W: Write> TurnRenderer<'_, '_, T, W> {
    async fn render(&mut self, mut stream: ResponseStream) -> Result<TurnOutcome> {
        loop {
            if let Some(outcome) = self.check_interrupt() {
                stream.abandon();
                return Ok(outcome);
            }

            let event = tokio::select! {
                event = stream.next() => event,
                () = self.ctrl_c.cancelled() => continue,
                () = tokio::time::sleep(self.options.poll_interval) => continue,
            };
            let Some(event) = event else {
                return Ok(TurnOutcome::Completed);
            };

            if let Some(outcome) = self.apply(event).await? {
                stream.abandon();
                return Ok(outcome);
            }
        }
    }

    fn check_interrupt(&mut self) -> Option<TurnOutcome> {
        if self.ctrl_c.is_cancelled() {
            return Some(TurnOutcome::ExitRequested);
        }
        match self.watcher.poll() {
            InterruptSignal::None => None,
            InterruptSignal::CancelTurn => Some(TurnOutcome::Interrupted),
            InterruptSignal::CancelSession => Some(TurnOutcome::ExitRequested),
        }
    }

    /// Renders or applies one event. `Some` means an interrupt arrived mid-way.
    async fn apply(&mut self, event: ResponseEvent) -> Result<Option<TurnOutcome>> {
        let p = &self.options.palette;
        match event {
            ResponseEvent::Token(DisplayToken::TextFragment { text }) => {
                return self.type_out(&text).await;
            }
            ResponseEvent::Token(DisplayToken::Face { expression }) => {
                match self.options.faces.get(&expression) {
                    Some(glyph) => {
                        write!(self.output, "{}{}{glyph}{} ", p.bold, p.face, p.reset)?;
                        self.output.flush()?;
                    }
                    None => trace!(%expression, "no glyph for face"),
                }
            }
            ResponseEvent::Token(DisplayToken::StatusLine { text }) => {
                writeln!(
                    self.output,
                    "{}{}{}{text}{}",
                    p.bold, p.italic, p.status, p.reset
                )?;
                self.output.flush()?;
            }
            ResponseEvent::Token(DisplayToken::ErrorLine { text }) => {
                writeln!(self.output, "{}{}{text}{}", p.bold, p.error, p.reset)?;
                self.output.flush()?;
            }
            ResponseEvent::Voice(clip) => match self.audio {
                Some(audio) => audio.add(clip),
                None => trace!(sequence_no = clip.sequence_no, "voice disabled; clip dropped"),
            },
            ResponseEvent::ContextChanged(context_id) => {
                debug!(%context_id, "context updated");
                self.state.context_id = Some(context_id);
            }
            ResponseEvent::ProfileChanged {
                user_name,
                relation,
            } => {
                debug!(?user_name, ?relation, "profile updated");
                if user_name.is_some() {
                    self.state.user_name = user_name;
                }
                if relation.is_some() {
                    self.state.relation = relation;
                }
            }
        }
        Ok(None)
    }

    async fn type_out(&mut self, text: &str) -> Result<Option<TurnOutcome>> {
        let interval = self.options.character_interval;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            if let Some(outcome) = self.check_interrupt() {
                return Ok(Some(outcome));
            }
            self.output.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
            self.output.flush()?;
            if !interval.is_zero() {
                tokio::select! {
                    () = self.ctrl_c.cancelled() => {}
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }
        Ok(None)
    }
}

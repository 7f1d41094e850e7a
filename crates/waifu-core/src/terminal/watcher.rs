use tracing::debug;

use super::{RawModeScope, TerminalIo};

/// Escape key.
pub const ESC: u8 = 0x1b;
/// Ctrl-C (ETX) as delivered with signal generation disabled.
pub const CTRL_C: u8 = 0x03;

/// Keystroke classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptSignal {
    #[default]
    None,
    /// Abandon the current response, keep the session.
    CancelTurn,
    /// End the whole session.
    CancelSession,
}

impl InterruptSignal {
    pub fn is_none(self) -> bool {
        matches!(self, InterruptSignal::None)
    }
}

/// Maps one input byte to a signal. Unrecognized bytes are ignored.
pub fn classify_byte(byte: u8) -> InterruptSignal {
    match byte {
        CTRL_C => InterruptSignal::CancelSession,
        ESC => InterruptSignal::CancelTurn,
        _ => InterruptSignal::None,
    }
}

/// Non-blocking keystroke watcher, live for the duration of one response.
///
/// Holds cbreak mode through a [`RawModeScope`]; when input is not a
/// terminal every poll reports [`InterruptSignal::None`].
pub struct InterruptWatcher<'t, T: TerminalIo> {
    scope: RawModeScope<'t, T>,
}

impl<'t, T: TerminalIo> InterruptWatcher<'t, T> {
    pub fn new(terminal: &'t T) -> Self {
        Self {
            scope: RawModeScope::acquire(terminal),
        }
    }

    /// Returns false for the null watcher (no terminal).
    pub fn is_active(&self) -> bool {
        self.scope.is_raw()
    }

    /// Checks pending input without waiting.
    ///
    /// Consumes at most one byte, except after ESC where every immediately
    /// available byte is drained so escape-sequence tails do not leak into
    /// the next prompt.
    pub fn poll(&mut self) -> InterruptSignal {
        if !self.scope.is_raw() {
            return InterruptSignal::None;
        }
        let terminal = self.scope.terminal();

        match terminal.input_ready() {
            Ok(true) => {}
            Ok(false) => return InterruptSignal::None,
            Err(err) => {
                debug!(error = %err, "input readiness check failed");
                return InterruptSignal::None;
            }
        }

        let byte = match terminal.read_byte() {
            Ok(Some(byte)) => byte,
            Ok(None) => return InterruptSignal::None,
            Err(err) => {
                debug!(error = %err, "failed to read input byte");
                return InterruptSignal::None;
            }
        };

        let signal = classify_byte(byte);
        if signal == InterruptSignal::CancelTurn {
            drain(terminal);
        }
        signal
    }

    /// Restores the terminal early; dropping the watcher does the same.
    pub fn release(&mut self) {
        self.scope.release();
    }
}

fn drain<T: TerminalIo>(terminal: &T) {
    while let Ok(true) = terminal.input_ready() {
        match terminal.read_byte() {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
}

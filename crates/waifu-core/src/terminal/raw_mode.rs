use tracing::{debug, warn};

use super::TerminalIo;

/// Scoped cbreak mode for terminal input.
///
/// Acquiring snapshots the current attributes and switches input to
/// character-at-a-time, no-echo mode. The snapshot is restored exactly once,
/// either by [`RawModeScope::release`] or on drop (including unwinding).
/// When input is not a terminal the scope is inert.
///
/// Nothing here returns an error: a terminal that cannot be switched simply
/// yields an inert scope, and a failed restore is logged.
pub struct RawModeScope<'t, T: TerminalIo> {
    terminal: &'t T,
    saved: Option<T::Attributes>,
}

impl<'t, T: TerminalIo> RawModeScope<'t, T> {
    pub fn acquire(terminal: &'t T) -> Self {
        let inert = Self {
            terminal,
            saved: None,
        };
        if !terminal.is_tty() {
            return inert;
        }

        let saved = match terminal.attributes() {
            Ok(attrs) => attrs,
            Err(err) => {
                warn!(error = %err, "failed to read terminal attributes; interrupts disabled");
                return inert;
            }
        };
        if let Err(err) = terminal.set_attributes(&T::cbreak(&saved)) {
            warn!(error = %err, "failed to enter cbreak mode; interrupts disabled");
            return inert;
        }

        debug!("terminal switched to cbreak mode");
        Self {
            terminal,
            saved: Some(saved),
        }
    }

    /// Returns true while cbreak mode is held.
    pub fn is_raw(&self) -> bool {
        self.saved.is_some()
    }

    pub fn terminal(&self) -> &'t T {
        self.terminal
    }

    /// Restores the saved attributes. Safe to call more than once.
    pub fn release(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        match self.terminal.set_attributes(&saved) {
            Ok(()) => debug!("terminal attributes restored"),
            Err(err) => warn!(error = %err, "failed to restore terminal attributes"),
        }
    }
}

impl<T: TerminalIo> Drop for RawModeScope<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::testing::{FakeAttrs, ScriptedTerminal};

    fn original() -> FakeAttrs {
        FakeAttrs {
            cbreak: false,
            generation: 7,
        }
    }

    #[test]
    fn test_acquire_switches_to_cbreak_and_drop_restores_once() {
        let terminal = ScriptedTerminal::tty();
        {
            let scope = RawModeScope::acquire(&terminal);
            assert!(scope.is_raw());
            assert!(terminal.current().cbreak);
        }
        assert_eq!(terminal.current(), original());

        let restores: Vec<_> = terminal
            .set_calls()
            .into_iter()
            .filter(|attrs| !attrs.cbreak)
            .collect();
        assert_eq!(restores, vec![original()]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let terminal = ScriptedTerminal::tty();
        let mut scope = RawModeScope::acquire(&terminal);
        scope.release();
        scope.release();
        drop(scope);

        // One switch into cbreak, one restore.
        assert_eq!(terminal.set_calls().len(), 2);
        assert_eq!(terminal.current(), original());
    }

    #[test]
    fn test_restore_on_panic_unwind() {
        let terminal = ScriptedTerminal::tty();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = RawModeScope::acquire(&terminal);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(terminal.current(), original());
        assert_eq!(terminal.set_calls().len(), 2);
    }

    #[test]
    fn test_not_a_tty_is_noop() {
        let terminal = ScriptedTerminal::not_tty();
        let mut scope = RawModeScope::acquire(&terminal);
        assert!(!scope.is_raw());
        scope.release();
        assert!(terminal.set_calls().is_empty());
    }

    #[test]
    fn test_restore_failure_is_swallowed() {
        let terminal = ScriptedTerminal::tty();
        terminal.state.lock().unwrap().fail_restore = true;
        let mut scope = RawModeScope::acquire(&terminal);
        scope.release();
        scope.release();
        // Attempted exactly once even though it failed.
        assert_eq!(terminal.set_calls().len(), 2);
    }
}

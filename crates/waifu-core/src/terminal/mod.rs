//! Terminal input plumbing for keystroke interrupts.
//!
//! The session loop only needs three things from the terminal while a
//! response is rendering: a zero-wait readiness check, a single-byte read,
//! and a way to snapshot/restore input attributes. [`TerminalIo`] captures
//! exactly that surface so the rest of the crate can be exercised against a
//! scripted terminal in tests.

mod raw_mode;
mod watcher;

use std::io;

pub use raw_mode::RawModeScope;
pub use watcher::{CTRL_C, ESC, InterruptSignal, InterruptWatcher, classify_byte};

/// Terminal input operations used by [`RawModeScope`] and [`InterruptWatcher`].
pub trait TerminalIo {
    /// Saved input attributes (e.g. `termios` on unix).
    type Attributes: Clone;

    /// Returns true when input is an interactive terminal.
    fn is_tty(&self) -> bool;

    /// Reads the current input attributes.
    ///
    /// # Errors
    /// Returns an error if the attributes cannot be read.
    fn attributes(&self) -> io::Result<Self::Attributes>;

    /// Applies input attributes.
    ///
    /// # Errors
    /// Returns an error if the attributes cannot be applied.
    fn set_attributes(&self, attrs: &Self::Attributes) -> io::Result<()>;

    /// Derives character-at-a-time, no-echo attributes from a snapshot.
    fn cbreak(attrs: &Self::Attributes) -> Self::Attributes;

    /// Checks whether at least one byte can be read without blocking.
    ///
    /// # Errors
    /// Returns an error if the readiness check fails.
    fn input_ready(&self) -> io::Result<bool>;

    /// Reads exactly one byte. `Ok(None)` means end of input.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    fn read_byte(&self) -> io::Result<Option<u8>>;
}

#[cfg(unix)]
mod stdin {
    use std::io::{self, IsTerminal};
    use std::mem::MaybeUninit;
    use std::os::fd::{AsRawFd, RawFd};

    use super::TerminalIo;

    /// Process stdin as a [`TerminalIo`], backed by `termios` and `poll(2)`.
    #[derive(Debug, Clone, Copy)]
    pub struct StdinTerminal {
        fd: RawFd,
        tty: bool,
    }

    impl StdinTerminal {
        pub fn new() -> Self {
            let stdin = io::stdin();
            Self {
                fd: stdin.as_raw_fd(),
                tty: stdin.is_terminal(),
            }
        }
    }

    impl Default for StdinTerminal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TerminalIo for StdinTerminal {
        type Attributes = libc::termios;

        fn is_tty(&self) -> bool {
            self.tty
        }

        fn attributes(&self) -> io::Result<libc::termios> {
            let mut attrs = MaybeUninit::<libc::termios>::uninit();
            // SAFETY: tcgetattr fully initializes `attrs` when it returns 0.
            let rc = unsafe { libc::tcgetattr(self.fd, attrs.as_mut_ptr()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: checked rc above.
            Ok(unsafe { attrs.assume_init() })
        }

        fn set_attributes(&self, attrs: &libc::termios) -> io::Result<()> {
            // SAFETY: `attrs` is a valid termios obtained from tcgetattr.
            let rc = unsafe { libc::tcsetattr(self.fd, libc::TCSADRAIN, attrs) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn cbreak(attrs: &libc::termios) -> libc::termios {
            let mut raw = *attrs;
            // ISIG off so Ctrl-C arrives as a byte; OPOST stays on so "\n" still
            // returns the carriage while we print.
            raw.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ISIG);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;
            raw
        }

        fn input_ready(&self) -> io::Result<bool> {
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd, zero timeout.
            let rc = unsafe { libc::poll(&raw mut pfd, 1, 0) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(err);
            }
            Ok(rc > 0 && (pfd.revents & libc::POLLIN) != 0)
        }

        fn read_byte(&self) -> io::Result<Option<u8>> {
            let mut byte = 0u8;
            // SAFETY: reading at most one byte into a valid one-byte buffer.
            let n = unsafe { libc::read(self.fd, (&raw mut byte).cast(), 1) };
            match n {
                1 => Ok(Some(byte)),
                0 => Ok(None),
                _ => Err(io::Error::last_os_error()),
            }
        }
    }
}

#[cfg(not(unix))]
mod stdin {
    use std::io;

    use super::TerminalIo;

    /// Non-unix stdin: no cbreak support, so interrupts are never reported.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct StdinTerminal;

    impl StdinTerminal {
        pub fn new() -> Self {
            Self
        }
    }

    impl TerminalIo for StdinTerminal {
        type Attributes = ();

        fn is_tty(&self) -> bool {
            false
        }

        fn attributes(&self) -> io::Result<()> {
            Ok(())
        }

        fn set_attributes(&self, _attrs: &()) -> io::Result<()> {
            Ok(())
        }

        fn cbreak(_attrs: &()) {}

        fn input_ready(&self) -> io::Result<bool> {
            Ok(false)
        }

        fn read_byte(&self) -> io::Result<Option<u8>> {
            Ok(None)
        }
    }
}

pub use stdin::StdinTerminal;

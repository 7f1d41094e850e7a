//! Process-wide SIGINT handling for the line prompt.
//!
//! While a response renders, the terminal runs with signal generation off
//! and Ctrl-C arrives as a byte (see [`crate::terminal`]). At the prompt the
//! terminal is in normal mode, so Ctrl-C is a real SIGINT and lands here.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_NOTIFY: OnceLock<Notify> = OnceLock::new();
static RESTORE_HOOK: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// Installs the Ctrl+C handler.
///
/// The handler only sets a flag and wakes waiters; the session loop decides
/// what to print.
///
/// # Errors
/// Returns an error if a handler is already installed or registration fails.
pub fn init() -> Result<()> {
    ctrlc::set_handler(trigger_ctrl_c).context("Failed to set Ctrl+C handler")
}

fn notify_waiters() {
    INTERRUPT_NOTIFY.get_or_init(Notify::new).notify_waiters();
}

/// Records a Ctrl+C, force-exiting on the second one.
pub fn trigger_ctrl_c() {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        // process::exit skips Drop, so restore the terminal here.
        if let Some(hook) = RESTORE_HOOK.get() {
            hook();
        }
        std::process::exit(130);
    }
    notify_waiters();
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Waits until an interrupt is triggered.
pub async fn wait_for_interrupt() {
    loop {
        let notified = INTERRUPT_NOTIFY.get_or_init(Notify::new).notified();
        if is_interrupted() {
            return;
        }
        notified.await;
    }
}

/// Returns a token cancelled by the next Ctrl+C, or at once if one is
/// already pending.
///
/// Unlike the flag, the token survives [`reset`], so a press that lands
/// while a reply renders is not lost when the prompt re-arms.
/// Must be called inside a Tokio runtime.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_interrupt() => cancel.cancel(),
            () = cancel.cancelled() => {}
        }
    });
    token
}

pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Registers a hook run on the second Ctrl+C, before exiting.
pub fn set_restore_hook<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let _ = RESTORE_HOOK.set(Box::new(hook));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    // Single test: the flag is process-wide and a second trigger exits.
    #[tokio::test]
    async fn test_wait_for_interrupt_wakes_on_trigger() {
        reset();
        let token = ctrl_c_token();
        let waiter = tokio::spawn(wait_for_interrupt());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert!(!token.is_cancelled());

        trigger_ctrl_c();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(is_interrupted());
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token cancelled");

        reset();
        assert!(!is_interrupted());
        assert!(token.is_cancelled());
    }
}

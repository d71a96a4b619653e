//! Termination signals (SIGINT, SIGTERM, SIGHUP) as a polled flag.
//!
//! `ctrlc` allows one handler per process, so it is installed once and only
//! raises a flag. Commands that supervise a child poll [`raised`] between
//! `try_wait` calls and run their teardown on the main thread, where `Drop`
//! and the sync daemon's shutdown sequence behave normally.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static RAISED: AtomicBool = AtomicBool::new(false);
static INSTALLED: OnceLock<Result<(), String>> = OnceLock::new();

/// Install the process-wide handler. Later calls return the first outcome.
pub fn install() -> anyhow::Result<()> {
    INSTALLED
        .get_or_init(|| {
            ctrlc::set_handler(|| RAISED.store(true, Ordering::SeqCst)).map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| anyhow::anyhow!("installing termination handler: {e}"))
}

/// Install the handler, or warn that `what` will not survive a signal.
pub fn install_or_warn(what: &str) {
    if let Err(e) = install() {
        tracing::warn!(error = %e, "termination signals will not trigger {what}");
    }
}

/// Whether a termination signal has arrived.
pub fn raised() -> bool {
    RAISED.load(Ordering::SeqCst)
}

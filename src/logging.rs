//! Root logger construction and the runtime debug switch.
//!
//! The stage logs through slog with a compact terminal drain behind an
//! async worker. The drain sits behind an atomic switch so the embedding
//! host can raise or lower the level at runtime without rebuilding the
//! logger tree.

use std::sync::OnceLock;

use slog::{o, Drain, Level, Logger};
use slog_atomic::{AtomicSwitch, AtomicSwitchCtrl};

fn terminal_drain(debug: bool) -> slog::Fuse<slog_async::Async> {
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let level = if debug { Level::Debug } else { Level::Info };
    let drain = slog::LevelFilter::new(drain, level).fuse();
    slog_async::Async::new(drain).build().fuse()
}

/// Handle for flipping the debug level of a running stage.
pub struct LogControl {
    ctrl: AtomicSwitchCtrl<(), slog::Never>,
}

impl LogControl {
    pub fn set_debug(&self, debug: bool) {
        self.ctrl.set(terminal_drain(debug));
    }
}

/// Build the stage's root logger and its runtime control handle.
pub fn stage_logger(debug: bool) -> (Logger, LogControl) {
    let drain = AtomicSwitch::new(terminal_drain(debug));
    let ctrl = drain.ctrl();
    let root = Logger::root(
        drain.fuse(),
        o!("pkg-version" => env!("CARGO_PKG_VERSION")),
    );
    (root, LogControl { ctrl })
}

// Value types (Ticket, Response) have no logger of their own; contract
// violations on them report through this discard-by-default logger so they
// never panic a data path.
static FALLBACK: OnceLock<Logger> = OnceLock::new();

pub(crate) fn fallback() -> &'static Logger {
    FALLBACK.get_or_init(|| Logger::root(slog::Discard, o!()))
}

/// Route value-type contract violations to a real logger. Intended to be
/// called once at stage construction; later calls are ignored.
pub(crate) fn set_fallback(log: Logger) {
    let _ = FALLBACK.set(log);
}

//! Per-call observability settings.
//!
//! The `verbose` and `quiet` switches travel with each update call instead
//! of living in process-wide state, so repeated or concurrent calls never
//! see each other's settings. They gate which `tracing` events the library
//! emits; they never change control flow or the returned result.

use std::fmt;

use tracing::{debug, error, info, warn};

/// Observability switches for one update call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    /// Trace every request, state transition and byte count
    pub verbose: bool,
    /// Suppress all output, including diagnostics
    pub quiet: bool,
}

impl Context {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Context that emits nothing at all.
    pub fn silent() -> Self {
        Self::new(false, true)
    }

    /// Whether progress narration is emitted
    pub fn narrates(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Whether warnings and failure diagnostics are emitted
    pub fn diagnoses(&self) -> bool {
        !self.quiet
    }

    /// Fine-grained tracing (verbose only).
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        if self.narrates() {
            debug!("{}", args);
        }
    }

    /// Progress narration (verbose only).
    pub fn progress(&self, args: fmt::Arguments<'_>) {
        if self.narrates() {
            info!("{}", args);
        }
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        if self.diagnoses() {
            warn!("{}", args);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        if self.diagnoses() {
            error!("{}", args);
        }
    }
}

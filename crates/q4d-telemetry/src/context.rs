//! Process-wide tracing span.
//!
//! Every log line emitted while the guard is held carries the process mode
//! (`bootstrap`, `running`, `stopping`) and the build identifier.

use once_cell::sync::OnceCell;
use tracing::field::Empty;
use tracing::{Span, span::Entered};

use crate::init::build_sha;

static PROCESS_SPAN: OnceCell<Span> = OnceCell::new();

fn process_span() -> &'static Span {
    PROCESS_SPAN.get_or_init(|| tracing::info_span!("q4d", mode = Empty, build = %build_sha()))
}

/// Keeps the process span entered on the current thread.
pub struct ProcessSpanGuard {
    _entered: Entered<'static>,
}

impl ProcessSpanGuard {
    /// Enter the process span in `mode`.
    #[must_use]
    pub fn enter(mode: &str) -> Self {
        let span = process_span();
        span.record("mode", mode);
        Self {
            _entered: span.enter(),
        }
    }
}

/// Update the mode shown on the process span.
pub fn record_mode(mode: &str) {
    process_span().record("mode", mode);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_can_be_reentered_with_new_modes() {
        let first = ProcessSpanGuard::enter("bootstrap");
        record_mode("running");
        drop(first);
        let second = ProcessSpanGuard::enter("stopping");
        drop(second);
    }
}

//! Sink for non-fatal operational errors.

use std::error::Error;

/// Receives errors that are absorbed rather than propagated.
pub trait Reporter: Send + Sync {
    fn report(&self, error: &(dyn Error + 'static));
}

/// Logs reported errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, error: &(dyn Error + 'static)) {
        tracing::error!("error: {}", error_chain(error));
    }
}

/// Render an error followed by every `source()` cause not already part of
/// the message, outermost first.
pub fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }

    out
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records the rendered chain of every reported error.
    #[derive(Debug, Default)]
    pub struct CapturingReporter {
        reports: Mutex<Vec<String>>,
    }

    impl CapturingReporter {
        pub fn reports(&self) -> Vec<String> {
            self.reports.lock().clone()
        }
    }

    impl Reporter for CapturingReporter {
        fn report(&self, error: &(dyn Error + 'static)) {
            self.reports.lock().push(error_chain(error));
        }
    }
}

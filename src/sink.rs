//! Destination for failures that escape isolated callbacks.
//!
//! Work items and event handlers run on background threads where nobody waits
//! for their result. When one of them panics the failure is captured and handed
//! to the [`ErrorSink`] the owning component was built with. The sink is passed
//! explicitly to every component; there is no per-thread hook.

use std::sync::Arc;

use crate::error::CallbackFailure;

/// Receives failures that escaped a work item or an event handler.
///
/// Implementations are called from the worker or delivery thread and must not
/// panic themselves. Any `Fn(CallbackFailure)` closure is a sink.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: CallbackFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(CallbackFailure) + Send + Sync,
{
    fn report(&self, failure: CallbackFailure) {
        self(failure);
    }
}

/// Default sink: logs the failure and carries on.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, failure: CallbackFailure) {
        tracing::error!(
            origin = %failure.origin(),
            message = failure.message(),
            "unhandled callback failure"
        );
    }
}

pub(crate) fn default_sink() -> Arc<dyn ErrorSink> {
    Arc::new(LogSink)
}

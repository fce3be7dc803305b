/// Sink for the messages a `NatsServer` emits in verbose mode.
///
/// Diagnostic lines of the broker and lifecycle transitions go to `log`.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Default logger, forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "nats_server", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "nats_server", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "nats_server", "{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "nats_server", "{message}");
    }
}

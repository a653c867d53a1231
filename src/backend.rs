use crate::{BackendError, Completion, TracePayload};

/// A source of instrumentation connections.
///
/// Every capture opens its own connection, so one `Backend` may serve several
/// captures at once if the underlying system allows it.
pub trait Backend {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection, BackendError>;
}

/// One open connection to an instrumentation backend.
///
/// `enable`, `start` and `stop` report their outcome through the supplied
/// [`Completion`], from any thread, at any later point. Only the first result
/// delivered through a completion is observed.
pub trait Connection {
    fn enable(&mut self, done: Completion<()>);

    fn start(&mut self, done: Completion<()>);

    /// Ends sampling and hands back the collected profile.
    fn stop(&mut self, done: Completion<TracePayload>);

    /// Closes the connection. Must be idempotent, and must also halt a
    /// sampling session that was started but never stopped.
    fn disconnect(&mut self) -> Result<(), BackendError>;
}

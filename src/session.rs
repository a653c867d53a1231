use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bridge::completion;
use crate::{Backend, BackendError, Connection, Stage, TracePayload};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Enabled,
    Profiling,
    Stopped,
    Failed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connected => "connected",
            SessionState::Enabled => "enabled",
            SessionState::Profiling => "profiling",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One connection to an instrumentation backend, driven through
/// connect, enable, start, stop and close.
///
/// Dropping a session that was not closed disconnects it, which also halts any
/// sampling still in progress.
pub struct Session<C: Connection> {
    id: u64,
    label: String,
    state: SessionState,
    failure: Option<(Stage, String)>,
    connection: C,
}

impl<C: Connection> Session<C> {
    pub fn open<B>(backend: &B, label: &str) -> Result<Self, BackendError>
    where
        B: Backend<Connection = C>,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let connection = backend.connect().inspect_err(|e| {
            tracing::debug!(session = id, name = label, error = %e, "connect failed");
        })?;
        tracing::debug!(session = id, name = label, "connected");

        Ok(Self {
            id,
            label: label.to_string(),
            state: SessionState::Connected,
            failure: None,
            connection,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The first failure recorded on this session.
    pub fn failure(&self) -> Option<(Stage, &str)> {
        self.failure.as_ref().map(|(stage, msg)| (*stage, msg.as_str()))
    }

    pub async fn enable(&mut self) -> Result<(), BackendError> {
        self.expect(SessionState::Connected, "enable")?;
        let (done, pending) = completion();
        self.connection.enable(done);
        let result = pending.await;
        self.advance(Stage::Enable, result, SessionState::Enabled)
    }

    pub async fn start(&mut self) -> Result<(), BackendError> {
        self.expect(SessionState::Enabled, "start")?;
        let (done, pending) = completion();
        self.connection.start(done);
        let result = pending.await;
        self.advance(Stage::Start, result, SessionState::Profiling)
    }

    pub async fn stop(&mut self) -> Result<TracePayload, BackendError> {
        self.expect(SessionState::Profiling, "stop")?;
        let (done, pending) = completion();
        self.connection.stop(done);
        let result = pending.await;
        self.advance(Stage::Stop, result, SessionState::Stopped)
    }

    /// Stops sampling after the work failed and throws the profile away.
    ///
    /// A failing stop is logged; the session ends up `Failed` either way.
    pub async fn abandon(&mut self, cause: Stage, reason: &str) {
        if self.state == SessionState::Profiling {
            let (done, pending) = completion::<TracePayload>();
            self.connection.stop(done);
            match pending.await {
                Ok(payload) => tracing::debug!(
                    session = self.id,
                    bytes = payload.len(),
                    "discarded profile of failed work"
                ),
                Err(e) => tracing::warn!(
                    session = self.id,
                    stage = %Stage::Stop,
                    error = %e,
                    "stop failed while abandoning session"
                ),
            }
        }
        if self.state != SessionState::Closed {
            self.fail(cause, reason.to_string());
        }
    }

    /// Disconnects. Returns false if the session was already closed.
    ///
    /// A disconnect error is logged and otherwise ignored.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let prior = self.state;
        self.state = SessionState::Closed;

        match self.connection.disconnect() {
            Ok(()) => tracing::debug!(session = self.id, from = %prior, "disconnected"),
            Err(e) => tracing::warn!(
                session = self.id,
                from = %prior,
                error = %e,
                "disconnect failed"
            ),
        }
        true
    }

    fn expect(&self, state: SessionState, operation: &str) -> Result<(), BackendError> {
        if self.state == state {
            Ok(())
        } else {
            Err(BackendError::out_of_order(operation, self.state))
        }
    }

    fn advance<T>(
        &mut self,
        stage: Stage,
        result: Result<T, BackendError>,
        next: SessionState,
    ) -> Result<T, BackendError> {
        match &result {
            Ok(_) => {
                tracing::trace!(session = self.id, from = %self.state, to = %next, "transition");
                self.state = next;
            }
            Err(e) => self.fail(stage, e.to_string()),
        }
        result
    }

    fn fail(&mut self, stage: Stage, reason: String) {
        tracing::debug!(session = self.id, %stage, error = %reason, "session failed");
        self.state = SessionState::Failed;
        self.failure.get_or_insert((stage, reason));
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            tracing::debug!(session = self.id, state = %self.state, "closing abandoned session");
            self.close();
        }
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

use std::fmt;
use std::io;

use thiserror::Error;

/// The pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Enable,
    Start,
    Work,
    Stop,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Enable => "enable",
            Stage::Start => "start",
            Stage::Work => "work",
            Stage::Stop => "stop",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by an instrumentation backend.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn out_of_order(operation: &str, state: impl fmt::Display) -> Self {
        Self::new(format!("cannot {operation} a session in the {state} state"))
    }
}

/// Why a capture failed.
///
/// Each variant carries the first error encountered, unchanged. `Display`
/// forwards to that error so its message survives; use [`CaptureError::stage`]
/// for the stage it came from. Errors raised while cleaning up are logged and
/// never show up here.
#[derive(Debug, Error)]
pub enum CaptureError<E> {
    #[error("trace name must not be empty")]
    InvalidName,

    #[error("profiling backend is busy ({capacity} session slot(s) in use)")]
    Busy { capacity: usize },

    #[error("{0}")]
    Connect(#[source] BackendError),

    #[error("{0}")]
    Enable(#[source] BackendError),

    #[error("{0}")]
    Start(#[source] BackendError),

    #[error("{0}")]
    Work(E),

    #[error("{0}")]
    Stop(#[source] BackendError),

    #[error("{0}")]
    Persist(#[source] io::Error),
}

impl<E> CaptureError<E> {
    /// The stage that failed, or `None` if the capture was rejected before
    /// contacting the backend.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CaptureError::InvalidName | CaptureError::Busy { .. } => None,
            CaptureError::Connect(_) => Some(Stage::Connect),
            CaptureError::Enable(_) => Some(Stage::Enable),
            CaptureError::Start(_) => Some(Stage::Start),
            CaptureError::Work(_) => Some(Stage::Work),
            CaptureError::Stop(_) => Some(Stage::Stop),
            CaptureError::Persist(_) => Some(Stage::Persist),
        }
    }

    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            CaptureError::Connect(e)
            | CaptureError::Enable(e)
            | CaptureError::Start(e)
            | CaptureError::Stop(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the work function's own error, if that is what failed.
    pub fn into_work_error(self) -> Option<E> {
        match self {
            CaptureError::Work(e) => Some(e),
            _ => None,
        }
    }
}

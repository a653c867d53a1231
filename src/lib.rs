//! Wraps a unit of async work in a profiling session and persists the trace.
//!
//! A [`SessionManager`] drives one session per call through
//! connect, enable, start, the work itself, stop and disconnect, then hands the
//! profile to an [`ArtifactWriter`]. A trace is written only when every stage
//! succeeds, the backend connection is closed on every path, and the error
//! returned is always the first one that happened.

mod artifact;
mod backend;
mod bridge;
mod config;
mod error;
mod manager;
mod meter;
mod session;
mod slots;

#[cfg(feature = "subscriber")]
mod span_recorder;

pub use artifact::{ArtifactWriter, FileArtifactWriter, TraceArtifact, TracePayload};
pub use backend::{Backend, Connection};
pub use bridge::Completion;
pub use config::CaptureConfig;
pub use error::{BackendError, CaptureError, Stage};
pub use manager::SessionManager;
pub use meter::*;
pub use session::{Session, SessionState};
pub use slots::{SessionSlots, SlotGuard, SlotId, SlotsExhausted};

#[cfg(feature = "subscriber")]
pub use span_recorder::{RecorderConnection, SpanRecorder, SpanRecorderLayer};

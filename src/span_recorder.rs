//! An in-process backend that samples `tracing` spans.
//!
//! Install [`SpanRecorder::layer`] on a subscriber, then hand the recorder to a
//! [`SessionManager`](crate::SessionManager). While a session is profiling,
//! every span enter and exit is buffered; `stop` returns them in the Chrome
//! trace-event JSON format that Perfetto and chrome://tracing load.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::span;

use crate::{Backend, BackendError, Completion, Connection, TracePayload};

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: Cell<u64> = const { Cell::new(0) };
}

fn current_tid() -> u64 {
    TID.with(|tid| {
        if tid.get() == 0 {
            tid.set(NEXT_TID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct TraceEvent {
    name: String,
    cat: &'static str,
    ph: &'static str,
    /// microseconds since `start`
    ts: u64,
    pid: u32,
    tid: u64,
}

#[derive(Serialize)]
struct TraceFile<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [TraceEvent],
}

#[derive(Debug, Default)]
struct RecorderState {
    connected: bool,
    enabled: bool,
    sampling_since: Option<Instant>,
    events: Vec<TraceEvent>,
}

impl RecorderState {
    fn record(&mut self, name: &str, ph: &'static str) {
        let Some(since) = self.sampling_since else {
            return;
        };
        self.events.push(TraceEvent {
            name: name.to_string(),
            cat: "span",
            ph,
            ts: since.elapsed().as_micros() as u64,
            pid: std::process::id(),
            tid: current_tid(),
        });
    }

    fn reset(&mut self) {
        self.connected = false;
        self.enabled = false;
        self.sampling_since = None;
        self.events.clear();
    }
}

/// Records span activity while a profiling session is running.
///
/// Only one connection may be open at a time; a second `connect` fails until
/// the first one is disconnected.
#[derive(Debug, Clone, Default)]
pub struct SpanRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl SpanRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The subscriber layer feeding this recorder.
    pub fn layer(&self) -> SpanRecorderLayer {
        SpanRecorderLayer {
            state: self.state.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_sampling(&self) -> bool {
        self.state.lock().sampling_since.is_some()
    }
}

impl Backend for SpanRecorder {
    type Connection = RecorderConnection;

    fn connect(&self) -> Result<RecorderConnection, BackendError> {
        let mut state = self.state.lock();
        if state.connected {
            return Err(BackendError::new("span recorder already has an open session"));
        }
        state.connected = true;
        Ok(RecorderConnection {
            state: self.state.clone(),
            open: true,
        })
    }
}

pub struct RecorderConnection {
    state: Arc<Mutex<RecorderState>>,
    open: bool,
}

impl RecorderConnection {
    fn closed_error(&self) -> Option<BackendError> {
        (!self.open).then(|| BackendError::new("span recorder connection is closed"))
    }
}

impl Connection for RecorderConnection {
    fn enable(&mut self, done: Completion<()>) {
        if let Some(e) = self.closed_error() {
            done.fail(e);
            return;
        }
        self.state.lock().enabled = true;
        done.succeed(());
    }

    fn start(&mut self, done: Completion<()>) {
        if let Some(e) = self.closed_error() {
            done.fail(e);
            return;
        }
        let result = {
            let mut state = self.state.lock();
            if !state.enabled {
                Err(BackendError::new("span recorder is not enabled"))
            } else if state.sampling_since.is_some() {
                Err(BackendError::new("span recorder is already sampling"))
            } else {
                state.events.clear();
                state.sampling_since = Some(Instant::now());
                Ok(())
            }
        };
        done.complete(result);
    }

    fn stop(&mut self, done: Completion<TracePayload>) {
        if let Some(e) = self.closed_error() {
            done.fail(e);
            return;
        }
        let events = {
            let mut state = self.state.lock();
            match state.sampling_since.take() {
                Some(_) => Ok(std::mem::take(&mut state.events)),
                None => Err(BackendError::new("span recorder is not sampling")),
            }
        };
        let result = events.and_then(|events| {
            serde_json::to_vec(&TraceFile {
                trace_events: &events,
            })
            .map(TracePayload::from)
            .map_err(|e| BackendError::with_source("failed to encode trace events", e))
        });
        done.complete(result);
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        if std::mem::replace(&mut self.open, false) {
            self.state.lock().reset();
        }
        Ok(())
    }
}

impl Drop for RecorderConnection {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Forwards span enters and exits to a [`SpanRecorder`].
pub struct SpanRecorderLayer {
    state: Arc<Mutex<RecorderState>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanRecorderLayer
where
    S: tracing::Subscriber,
    S: for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_enter(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            self.state.lock().record(span.name(), "B");
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            self.state.lock().record(span.name(), "E");
        }
    }
}

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use trace_capture::{
    ArtifactWriter, Backend, BackendError, Completion, Connection, TracePayload, WorkMetrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Connect,
    Enable,
    Start,
    StartAcked,
    Work,
    Stop,
    StopAcked,
    Disconnect,
    Persist,
}

#[derive(Default)]
struct Script {
    fail_connect: Option<&'static str>,
    fail_enable: Option<&'static str>,
    fail_start: Option<&'static str>,
    fail_stop: Option<&'static str>,
    fail_disconnect: Option<&'static str>,
    fail_persist: Option<&'static str>,
    // complete from a helper thread instead of inline
    deferred: bool,
    // fire every completion a second time with an error
    double_fire: bool,
    // drop the enable completion without firing it
    drop_enable: bool,
}

/// A backend whose every call is logged and whose failures are scripted.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<Mutex<Script>>,
    captures: Arc<Mutex<u32>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(self, msg: &'static str) -> Self {
        self.script.lock().fail_connect = Some(msg);
        self
    }

    pub fn fail_enable(self, msg: &'static str) -> Self {
        self.script.lock().fail_enable = Some(msg);
        self
    }

    pub fn fail_start(self, msg: &'static str) -> Self {
        self.script.lock().fail_start = Some(msg);
        self
    }

    pub fn fail_stop(self, msg: &'static str) -> Self {
        self.script.lock().fail_stop = Some(msg);
        self
    }

    pub fn fail_disconnect(self, msg: &'static str) -> Self {
        self.script.lock().fail_disconnect = Some(msg);
        self
    }

    pub fn fail_persist(self, msg: &'static str) -> Self {
        self.script.lock().fail_persist = Some(msg);
        self
    }

    pub fn deferred(self) -> Self {
        self.script.lock().deferred = true;
        self
    }

    pub fn double_fire(self) -> Self {
        self.script.lock().double_fire = true;
        self
    }

    pub fn drop_enable(self) -> Self {
        self.script.lock().drop_enable = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Marks the point where the work ran.
    pub fn work_ran(&self) {
        self.calls.lock().push(Call::Work);
    }

    /// A writer sharing this backend's call log.
    pub fn writer(&self) -> RecordingWriter {
        RecordingWriter {
            backend: self.clone(),
            persisted: Arc::default(),
        }
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    /// Fires `done`, logging `ack` at the moment the callback is delivered.
    fn settle<T: Send + 'static>(
        &self,
        ack: Option<Call>,
        done: Completion<T>,
        result: Result<T, BackendError>,
    ) {
        let (deferred, double_fire) = {
            let script = self.script.lock();
            (script.deferred, script.double_fire)
        };
        let calls = self.calls.clone();
        let fire = move || {
            if let Some(ack) = ack {
                calls.lock().push(ack);
            }
            done.complete(result);
            if double_fire {
                done.fail(BackendError::new("second callback"));
            }
        };
        if deferred {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                fire();
            });
        } else {
            fire();
        }
    }
}

fn scripted<T>(failure: Option<&'static str>, value: T) -> Result<T, BackendError> {
    match failure {
        Some(msg) => Err(BackendError::new(msg)),
        None => Ok(value),
    }
}

impl Backend for ScriptedBackend {
    type Connection = ScriptedConnection;

    fn connect(&self) -> Result<ScriptedConnection, BackendError> {
        self.push(Call::Connect);
        let failure = self.script.lock().fail_connect;
        scripted(failure, ()).map(|_| ScriptedConnection {
            backend: self.clone(),
        })
    }
}

pub struct ScriptedConnection {
    backend: ScriptedBackend,
}

impl Connection for ScriptedConnection {
    fn enable(&mut self, done: Completion<()>) {
        self.backend.push(Call::Enable);
        let (failure, drop_it) = {
            let script = self.backend.script.lock();
            (script.fail_enable, script.drop_enable)
        };
        if drop_it {
            drop(done);
            return;
        }
        self.backend.settle(None, done, scripted(failure, ()));
    }

    fn start(&mut self, done: Completion<()>) {
        self.backend.push(Call::Start);
        let failure = self.backend.script.lock().fail_start;
        self.backend.settle(Some(Call::StartAcked), done, scripted(failure, ()));
    }

    fn stop(&mut self, done: Completion<TracePayload>) {
        self.backend.push(Call::Stop);
        let failure = self.backend.script.lock().fail_stop;
        let n = {
            let mut captures = self.backend.captures.lock();
            *captures += 1;
            *captures
        };
        let payload = TracePayload::from(format!("profile-{n}").into_bytes());
        self.backend.settle(Some(Call::StopAcked), done, scripted(failure, payload));
    }

    fn disconnect(&mut self) -> Result<(), BackendError> {
        self.backend.push(Call::Disconnect);
        let failure = self.backend.script.lock().fail_disconnect;
        scripted(failure, ())
    }
}

/// What [`RecordingWriter`] was handed for one capture.
#[derive(Debug, Clone)]
pub struct Persisted {
    pub name: String,
    pub payload: TracePayload,
    pub metrics: WorkMetrics,
}

/// Keeps persisted payloads in memory and hands out fake paths.
#[derive(Clone)]
pub struct RecordingWriter {
    backend: ScriptedBackend,
    persisted: Arc<Mutex<Vec<Persisted>>>,
}

impl RecordingWriter {
    pub fn persisted(&self) -> Vec<Persisted> {
        self.persisted.lock().clone()
    }
}

impl ArtifactWriter for RecordingWriter {
    fn persist(
        &self,
        name: &str,
        payload: &TracePayload,
        metrics: &WorkMetrics,
        _timestamp: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        self.backend.push(Call::Persist);
        if let Some(msg) = self.backend.script.lock().fail_persist {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, msg));
        }
        let mut persisted = self.persisted.lock();
        persisted.push(Persisted {
            name: name.to_string(),
            payload: payload.clone(),
            metrics: *metrics,
        });
        Ok(PathBuf::from(format!("/traces/{name}-{}.json", persisted.len())))
    }
}

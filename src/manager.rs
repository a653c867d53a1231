use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use futures::FutureExt;

use crate::slots::SlotGuard;
use crate::{
    ArtifactWriter, Backend, CaptureError, PollMeter, Session, SessionSlots, Stage, Timed,
    TraceArtifact, TracePayload, WallClockMeter, WorkMetrics,
};

/// Why the profiled part of a capture did not produce a payload.
enum Interrupted<E> {
    Failed(CaptureError<E>),
    Panicked(Box<dyn Any + Send>),
}

/// Runs units of work inside profiling sessions and persists the resulting
/// traces.
///
/// Each call to [`capture_trace`](Self::capture_trace) opens its own
/// connection to the backend and always closes it before returning.
pub struct SessionManager<B, W, M = WallClockMeter>
where
    B: Backend,
    W: ArtifactWriter,
    M: PollMeter,
{
    backend: B,
    writer: W,
    slots: Option<SessionSlots>,
    _meter: PhantomData<fn() -> M>,
}

impl<B, W> SessionManager<B, W, WallClockMeter>
where
    B: Backend,
    W: ArtifactWriter,
{
    pub fn new(backend: B, writer: W) -> Self {
        Self {
            backend,
            writer,
            slots: None,
            _meter: PhantomData,
        }
    }
}

impl<B, W, M> SessionManager<B, W, M>
where
    B: Backend,
    W: ArtifactWriter,
    M: PollMeter,
{
    /// Limits live sessions to the capacity of `slots`. A capture that finds
    /// no free slot fails with [`CaptureError::Busy`] without touching the
    /// backend.
    pub fn with_slots(mut self, slots: SessionSlots) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn with_meter<N: PollMeter>(self) -> SessionManager<B, W, N> {
        SessionManager {
            backend: self.backend,
            writer: self.writer,
            slots: self.slots,
            _meter: PhantomData,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Profiles `work` and persists the trace under `name`.
    ///
    /// The backend is started before `work` is called and stopped after it
    /// settles. If `work` fails or panics the profile is discarded; the panic
    /// is resumed once the session is closed. On every path the connection is
    /// closed before this returns, and the error returned is the first one
    /// that occurred.
    ///
    /// The meter `M` watches every poll of `work`; its [`WorkMetrics`] are
    /// handed to the writer with the payload.
    ///
    /// There is no timeout: if `work` never settles neither does this.
    pub async fn capture_trace<F, Fut, E>(
        &self,
        name: &str,
        work: F,
    ) -> Result<PathBuf, CaptureError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if name.trim().is_empty() {
            return Err(CaptureError::InvalidName);
        }
        let _slot = self.acquire_slot::<E>()?;

        let mut session = Session::open(&self.backend, name).map_err(CaptureError::<E>::Connect)?;
        let outcome = self.record(&mut session, work).await;
        session.close();

        let (payload, metrics) = match outcome {
            Ok(recorded) => recorded,
            Err(Interrupted::Failed(err)) => {
                tracing::info!(
                    session = session.id(),
                    name,
                    stage = ?err.stage(),
                    "capture failed"
                );
                return Err(err);
            }
            Err(Interrupted::Panicked(panic)) => panic::resume_unwind(panic),
        };

        let mut artifact = TraceArtifact::new(name, payload, metrics);
        let path = artifact
            .persist(&self.writer)
            .map_err(CaptureError::<E>::Persist)?
            .to_path_buf();

        tracing::info!(
            session = session.id(),
            name,
            bytes = artifact.payload().len(),
            polls = metrics.polls,
            path = %path.display(),
            "trace captured"
        );
        Ok(path)
    }

    fn acquire_slot<E>(&self) -> Result<Option<SlotGuard>, CaptureError<E>> {
        match &self.slots {
            Some(slots) => slots
                .try_acquire()
                .map(Some)
                .map_err(|e| CaptureError::Busy {
                    capacity: e.capacity,
                }),
            None => Ok(None),
        }
    }

    async fn record<F, Fut, E>(
        &self,
        session: &mut Session<B::Connection>,
        work: F,
    ) -> Result<(TracePayload, WorkMetrics), Interrupted<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        session
            .enable()
            .await
            .map_err(|e| Interrupted::<E>::Failed(CaptureError::Enable(e)))?;
        session
            .start()
            .await
            .map_err(|e| Interrupted::<E>::Failed(CaptureError::Start(e)))?;

        // `work` is called inside the guarded future so a panic while building
        // it is caught as well
        let mut timed = Timed::<_, M>::new(session.label(), async move { work().await });
        let settled = AssertUnwindSafe(&mut timed).catch_unwind().await;
        let metrics = timed.metrics();
        drop(timed);

        match settled {
            Ok(Ok(())) => session
                .stop()
                .await
                .map(|payload| (payload, metrics))
                .map_err(|e| Interrupted::Failed(CaptureError::Stop(e))),
            Ok(Err(e)) => {
                session.abandon(Stage::Work, "work failed").await;
                Err(Interrupted::Failed(CaptureError::Work(e)))
            }
            Err(panic) => {
                session.abandon(Stage::Work, "work panicked").await;
                Err(Interrupted::Panicked(panic))
            }
        }
    }
}

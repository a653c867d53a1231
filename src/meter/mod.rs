//! Per-poll measurements of the work future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

mod wall_clock;
pub use wall_clock::*;

#[cfg(feature = "perf")]
mod instructions;
#[cfg(feature = "perf")]
pub use instructions::*;

/// What was measured while the work future ran. Stored next to the trace.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkMetrics {
    /// Times the work future was polled.
    pub polls: u32,
    /// Time spent inside `poll`.
    pub wake_time: Duration,
    /// Time spent between a `Pending` and the next poll.
    pub idle_time: Duration,
    /// Instructions retired while polling, when a counter is available.
    pub instructions: Option<u64>,
}

pub trait PollMeter {
    fn new() -> Self;
    /// called before poll
    fn prepare(&mut self);
    /// called after poll
    fn update(&mut self, is_ready: bool);
    /// The meter's share of the measurements so far. `polls` is filled in by
    /// [`Timed`].
    fn metrics(&self) -> WorkMetrics;
}

/// Wraps a future and feeds a [`PollMeter`] around every poll.
pub struct Timed<T, M>
where
    T: Future,
    M: PollMeter,
{
    label: String,
    meter: M,
    polls: u32,
    settled: bool,
    // boxed so the wrapper itself is Unpin
    future: Pin<Box<T>>,
}

impl<T, M> Timed<T, M>
where
    T: Future,
    M: PollMeter,
{
    pub fn new<S: Into<String>>(label: S, future: T) -> Self {
        Self {
            label: label.into(),
            meter: M::new(),
            polls: 0,
            settled: false,
            future: Box::pin(future),
        }
    }

    pub fn meter(&self) -> &M {
        &self.meter
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn metrics(&self) -> WorkMetrics {
        WorkMetrics {
            polls: self.polls,
            ..self.meter.metrics()
        }
    }
}

// the inner future is pinned on the heap and nothing else is structurally pinned
impl<T, M> Unpin for Timed<T, M>
where
    T: Future,
    M: PollMeter,
{
}

impl<T, M> Drop for Timed<T, M>
where
    T: Future,
    M: PollMeter,
{
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                name = %self.label,
                polls = self.polls,
                "work was not polled to completion"
            );
        }
    }
}

impl<T, M> Future for Timed<T, M>
where
    T: Future,
    M: PollMeter,
{
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        this.polls = this.polls.saturating_add(1);
        this.meter.prepare();
        let r = this.future.as_mut().poll(cx);
        let is_ready = r.is_ready();
        this.meter.update(is_ready);

        if is_ready {
            this.settled = true;
            let metrics = this.metrics();
            tracing::debug!(
                name = %this.label,
                polls = metrics.polls,
                wake_ms = metrics.wake_time.as_secs_f64() * 1e3,
                idle_ms = metrics.idle_time.as_secs_f64() * 1e3,
                instructions = metrics.instructions,
                "work settled"
            );
        }

        r
    }
}

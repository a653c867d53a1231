use super::{PollMeter, WorkMetrics};

use perf_event::events::Hardware;
use perf_event::{Builder, Counter};

use std::cell::RefCell;

thread_local! {
    static INSTRUCTIONS: RefCell<Option<Counter>> = RefCell::new(
        Builder::new(Hardware::INSTRUCTIONS)
            .build()
            .map_err(|e| tracing::warn!(error = %e, "instruction counter unavailable"))
            .ok()
    );
}

/// Counts instructions retired on the polling thread while the work future is
/// being polled.
///
/// Reports no count when the counter could not be opened or read.
pub struct InstructionMeter {
    total_instructions: Option<u64>,
}

impl InstructionMeter {
    pub fn instructions(&self) -> Option<u64> {
        self.total_instructions
    }
}

impl PollMeter for InstructionMeter {
    fn new() -> Self {
        Self {
            total_instructions: None,
        }
    }

    fn prepare(&mut self) {
        INSTRUCTIONS.with(|cell| {
            if let Some(counter) = cell.borrow_mut().as_mut() {
                if let Err(e) = counter.reset().and_then(|_| counter.enable()) {
                    tracing::warn!(error = %e, "failed to arm instruction counter");
                }
            }
        });
    }

    fn update(&mut self, _is_ready: bool) {
        INSTRUCTIONS.with(|cell| {
            if let Some(counter) = cell.borrow_mut().as_mut() {
                match counter.disable().and_then(|_| counter.read()) {
                    Ok(count) => *self.total_instructions.get_or_insert(0) += count,
                    Err(e) => tracing::warn!(error = %e, "failed to read instruction counter"),
                }
            }
        });
    }

    fn metrics(&self) -> WorkMetrics {
        WorkMetrics {
            instructions: self.total_instructions,
            ..WorkMetrics::default()
        }
    }
}

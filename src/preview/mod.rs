//! Background preview generation.
//!
//! Every preview-producing mutation schedules a [`PreviewOperation`] for
//! the affected resource. A bounded set of background workers renders one
//! derived image per (resource, language, style) combination; newer
//! requests for a resource supersede older ones, cancelling their workers
//! cooperatively instead of running duplicate derivations.

pub mod generator;
pub mod paths;
pub(crate) mod styles;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::domain::{ImageStyle, Language, Resource};

/// Default output format for generated previews.
pub const PREVIEW_FORMAT: &str = "png";

/// All state needed to render the previews of one resource.
///
/// Operations are ephemeral: they live in the scheduler's pending map and
/// queue until a worker completes them or a newer operation supersedes
/// them.
pub(crate) struct PreviewOperation {
    pub resource: Resource,
    pub languages: Vec<Language>,
    pub styles: Vec<ImageStyle>,
    pub format: String,
    cancelled: AtomicBool,
    worker_assigned: AtomicBool,
}

impl PreviewOperation {
    pub fn new(
        resource: Resource,
        languages: Vec<Language>,
        styles: Vec<ImageStyle>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            languages,
            styles,
            format: format.into(),
            cancelled: AtomicBool::new(false),
            worker_assigned: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.resource.identifier()
    }

    /// Request cooperative cancellation. The worker checks the flag
    /// between language and style iterations; the current image encode
    /// finishes before the flag is observed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn assign_worker(&self) {
        self.worker_assigned.store(true, Ordering::SeqCst);
    }

    pub fn has_worker(&self) -> bool {
        self.worker_assigned.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SchedulerState {
    /// Latest requested operation per resource, possibly not yet started
    pending: HashMap<Uuid, Arc<PreviewOperation>>,
    /// Operations waiting for a free worker slot
    queue: VecDeque<Arc<PreviewOperation>>,
    /// Operations currently executing, at most `max_slots`
    in_flight: Vec<Arc<PreviewOperation>>,
}

/// Bookkeeping for the bounded preview workers.
///
/// A single mutex protects all three structures; it is never held while
/// performing file or network I/O. The scheduler only manages state; the
/// repository spawns the actual worker tasks for the operations returned
/// by [`schedule`](Self::schedule) and [`complete`](Self::complete).
pub(crate) struct PreviewScheduler {
    max_slots: usize,
    state: Mutex<SchedulerState>,
}

impl PreviewScheduler {
    pub fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_slots((parallelism / 2).max(1))
    }

    pub fn with_slots(max_slots: usize) -> Self {
        Self {
            max_slots: max_slots.max(1),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Register a new operation.
    ///
    /// Returns the operation when a worker should be spawned for it right
    /// away. Otherwise the operation supersedes the resource's pending
    /// entry and waits in the queue; a running worker for the same
    /// resource is flagged cancelled since its output is now stale.
    pub fn schedule(&self, op: PreviewOperation) -> Option<Arc<PreviewOperation>> {
        let op = Arc::new(op);
        let id = op.identifier();
        let mut state = self.state.lock().expect("scheduler lock poisoned");

        if let Some(existing) = state.pending.get(&id) {
            if existing.has_worker() {
                debug!(
                    "Cancelling superseded preview generation for {}",
                    op.resource.uri()
                );
                existing.cancel();
            }
        }
        state.pending.insert(id, op.clone());

        let resource_in_flight = state.in_flight.iter().any(|o| o.identifier() == id);
        if resource_in_flight || state.in_flight.len() >= self.max_slots {
            debug!("Queueing preview generation for {}", op.resource.uri());
            state.queue.push_back(op);
            return None;
        }

        op.assign_worker();
        state.in_flight.push(op.clone());
        Some(op)
    }

    /// Record the completion of an operation and pick the next one.
    ///
    /// Must be called unconditionally when a worker finishes, regardless
    /// of the outcome. Queued entries whose resource is already being
    /// worked on or no longer pending are discarded; for the rest, the
    /// newest pending operation of that resource is started so superseded
    /// requests never run.
    pub fn complete(&self, op: &Arc<PreviewOperation>) -> Option<Arc<PreviewOperation>> {
        let id = op.identifier();
        let mut state = self.state.lock().expect("scheduler lock poisoned");

        state.in_flight.retain(|o| !Arc::ptr_eq(o, op));
        if let Some(pending) = state.pending.get(&id) {
            if Arc::ptr_eq(pending, op) {
                state.pending.remove(&id);
            }
        }

        while state.in_flight.len() < self.max_slots {
            let Some(candidate) = state.queue.pop_front() else {
                break;
            };
            let candidate_id = candidate.identifier();
            if state
                .in_flight
                .iter()
                .any(|o| o.identifier() == candidate_id)
            {
                continue;
            }
            let Some(newest) = state.pending.get(&candidate_id).cloned() else {
                continue;
            };
            newest.assign_worker();
            state.in_flight.push(newest.clone());
            return Some(newest);
        }
        None
    }

    /// Cancel everything; used when the repository disconnects.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        for op in state.in_flight.iter().chain(state.pending.values()) {
            op.cancel();
        }
        state.queue.clear();
        state.pending.clear();
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    #[cfg(test)]
    fn pending_op(&self, id: Uuid) -> Option<Arc<PreviewOperation>> {
        self.state.lock().unwrap().pending.get(&id).cloned()
    }
}

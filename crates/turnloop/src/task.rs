//! Task identity, kinds, and handles.

use crate::coroutine::Resumable;
use crate::error::TaskResult;
use crate::scheduler::Scheduler;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a scheduler instance.
///
/// Handles carry the id of the scheduler that issued them, so a handle
/// presented to the wrong instance is rejected instead of cancelling an
/// unrelated task that happens to share a task id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

impl SchedulerId {
    /// Generate a new unique SchedulerId
    pub fn new() -> Self {
        SchedulerId(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for SchedulerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of a deferred task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// High-priority task, drained to fixpoint before any macrotask
    Microtask,
    /// Macrotask due at a logical clock value
    Timer,
    /// Macrotask that is always due, ordered relative to timers by policy
    Immediate,
}

/// Handle to a pending task, usable for cancellation.
///
/// Returned by every enqueue operation. Cancelling a handle whose task has
/// already run is a no-op; presenting it to a different scheduler instance
/// is an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    scheduler: SchedulerId,
    id: TaskId,
    kind: TaskKind,
}

impl TaskHandle {
    pub(crate) fn new(scheduler: SchedulerId, id: TaskId, kind: TaskKind) -> Self {
        Self {
            scheduler,
            id,
            kind,
        }
    }

    /// The scheduler instance that issued this handle
    pub fn scheduler_id(&self) -> SchedulerId {
        self.scheduler
    }

    /// The task this handle refers to
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The kind of the referenced task
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

/// Boxed one-shot task action
pub(crate) type TaskFn = Box<dyn FnOnce(&mut Scheduler) -> TaskResult>;

/// A queued microtask
pub(crate) struct QueuedTask {
    pub(crate) id: TaskId,
    pub(crate) action: TaskFn,
}

/// Action of an immediate-queue entry
pub(crate) enum ImmediateAction {
    /// Run once and discard
    Once(TaskFn),
    /// Drive a resumable task one step, re-enqueueing while it yields
    Step(Box<dyn Resumable>),
}

/// A queued immediate macrotask
pub(crate) struct ImmediateEntry {
    pub(crate) id: TaskId,
    pub(crate) action: ImmediateAction,
}

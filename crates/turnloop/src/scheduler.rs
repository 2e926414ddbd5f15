//! Cooperative task scheduler: the driver loop.
//!
//! Single logical thread of control. The scheduler owns a microtask queue, an
//! immediate queue, a timer heap, and a logical clock, and drives them under
//! a strict discipline: drain microtasks to fixpoint, run exactly one
//! macrotask, repeat until every queue is empty. All queue mutation happens
//! between task executions, so no locking is involved anywhere.
//!
//! A task that never returns blocks the scheduler forever — there is no
//! preemption. Likewise a microtask that endlessly re-enqueues microtasks
//! starves macrotasks and keeps [`Scheduler::run_until_idle`] from returning,
//! and under [`ImmediatePolicy::AfterDueTimers`] a task that perpetually
//! re-enqueues immediates keeps the clock from ever advancing to a future
//! timer. Both are inherent to the model, not corrected here. Adversarial
//! inputs are exercised through [`Scheduler::run_bounded`].

use crate::clock::LogicalClock;
use crate::coroutine::{Resumable, Step};
use crate::error::{SchedulerError, SchedulerResult, TaskError, TaskResult};
use crate::task::{
    ImmediateAction, ImmediateEntry, QueuedTask, SchedulerId, TaskFn, TaskHandle, TaskId, TaskKind,
};
use crate::timer::{RepeatFn, TimerAction, TimerEntry, TimerHeap};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Callback invoked with the failing task's id, kind, and error
type ErrorSink = Box<dyn FnMut(TaskId, TaskKind, &TaskError)>;

/// Relative ordering of immediates and timers when both are runnable.
///
/// Runtimes disagree on whether an "as soon as possible" macrotask goes
/// before or after a zero-delay timer, so the choice is a configuration
/// point rather than a fixed rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ImmediatePolicy {
    /// Immediates run after timers already due at the current clock, and
    /// before the clock advances to a future timer
    #[default]
    AfterDueTimers,

    /// Immediates always run before any timer in the same pass
    BeforeTimers,
}

/// Scheduler configuration
#[derive(Debug, Copy, Clone, Default)]
pub struct SchedulerConfig {
    /// How immediates interleave with timers
    pub immediate_policy: ImmediatePolicy,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks enqueued
    pub spawned: u64,

    /// Task actions that ran; each interval occurrence and each coroutine
    /// step counts once
    pub executed: u64,

    /// Task actions that returned an error
    pub failed: u64,

    /// Tasks discarded because they were cancelled while pending
    pub cancelled: u64,
}

/// Execution budget for one driver run
struct TaskBudget {
    remaining: Option<usize>,
}

impl TaskBudget {
    fn take(&mut self) -> bool {
        match &mut self.remaining {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

/// Outcome of one macrotask selection pass
enum MacroOutcome {
    Ran,
    Idle,
    OutOfBudget,
}

/// Cooperative single-threaded task scheduler.
///
/// Owns all queues and the logical clock. Task actions receive exclusive
/// access to the scheduler, which is how running tasks enqueue follow-up
/// work; everything they enqueue is deferred until the current task
/// completes. Dropping the scheduler discards all pending work.
pub struct Scheduler {
    /// Instance id, stamped into every handle this scheduler issues
    id: SchedulerId,

    config: SchedulerConfig,

    /// Logical time; advances to the next due timer when nothing earlier runs
    clock: LogicalClock,

    /// FIFO microtask queue, drained to fixpoint between macrotasks
    microtasks: VecDeque<QueuedTask>,

    /// FIFO immediate queue
    immediates: VecDeque<ImmediateEntry>,

    /// Timers ordered by (due, seq)
    timers: TimerHeap,

    /// Enqueue sequence counter, tie-break for equal due times
    seq: u64,

    /// Ids of tasks currently sitting in a queue
    pending: FxHashSet<TaskId>,

    /// Ids of recurring tasks (intervals, resumables) whose handle stays
    /// live across occurrences
    recurring: FxHashSet<TaskId>,

    /// Ids marked cancelled, checked at dequeue and re-arm time
    cancelled: FxHashSet<TaskId>,

    /// Re-entrancy guard for the driver loop
    running: bool,

    stats: SchedulerStats,

    error_sink: Option<ErrorSink>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with a custom configuration
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            id: SchedulerId::new(),
            config,
            clock: LogicalClock::new(),
            microtasks: VecDeque::new(),
            immediates: VecDeque::new(),
            timers: TimerHeap::new(),
            seq: 0,
            pending: FxHashSet::default(),
            recurring: FxHashSet::default(),
            cancelled: FxHashSet::default(),
            running: false,
            stats: SchedulerStats::default(),
            error_sink: None,
        }
    }

    /// Install the error sink.
    ///
    /// The sink is invoked once per failing task with the task's id, kind,
    /// and error. Without a sink, failures are only logged.
    pub fn set_error_sink<F>(&mut self, sink: F)
    where
        F: FnMut(TaskId, TaskKind, &TaskError) + 'static,
    {
        self.error_sink = Some(Box::new(sink));
    }

    /// This scheduler's instance id
    pub fn scheduler_id(&self) -> SchedulerId {
        self.id
    }

    /// Current logical time
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Number of tasks currently sitting in a queue
    pub fn task_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether all queues are empty
    pub fn is_idle(&self) -> bool {
        self.microtasks.is_empty() && self.immediates.is_empty() && self.timers.is_empty()
    }

    /// Execution statistics for this scheduler instance
    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// Execute `action` immediately on the call stack.
    ///
    /// Work enqueued during the execution is deferred, never run inline; a
    /// follow-up [`Scheduler::run_until_idle`] drives it. Errors and panics
    /// raised by `action` propagate to the caller — the scheduler does not
    /// catch them.
    pub fn run_synchronous<R>(&mut self, action: impl FnOnce(&mut Scheduler) -> R) -> R {
        action(self)
    }

    /// Enqueue a microtask.
    ///
    /// Microtasks run before any timer or immediate, in FIFO order, including
    /// microtasks enqueued by other microtasks mid-drain.
    pub fn enqueue_microtask<F>(&mut self, action: F) -> TaskHandle
    where
        F: FnOnce(&mut Scheduler) -> TaskResult + 'static,
    {
        let handle = self.issue_handle(TaskKind::Microtask);
        self.microtasks.push_back(QueuedTask {
            id: handle.id(),
            action: Box::new(action),
        });
        handle
    }

    /// Enqueue a timer due `delay` ticks from the current clock.
    ///
    /// Timers fire in non-decreasing due-time order; equal due times fire in
    /// enqueue order.
    pub fn enqueue_timer<F>(&mut self, action: F, delay: u64) -> TaskHandle
    where
        F: FnOnce(&mut Scheduler) -> TaskResult + 'static,
    {
        let handle = self.issue_handle(TaskKind::Timer);
        let due = self.clock.now().saturating_add(delay);
        let seq = self.next_seq();
        self.timers.push(TimerEntry {
            due,
            seq,
            id: handle.id(),
            action: TimerAction::Once(Box::new(action)),
        });
        handle
    }

    /// Enqueue an immediate macrotask.
    ///
    /// Immediates are always due; their ordering relative to timers follows
    /// the configured [`ImmediatePolicy`].
    pub fn enqueue_immediate<F>(&mut self, action: F) -> TaskHandle
    where
        F: FnOnce(&mut Scheduler) -> TaskResult + 'static,
    {
        let handle = self.issue_handle(TaskKind::Immediate);
        self.immediates.push_back(ImmediateEntry {
            id: handle.id(),
            action: ImmediateAction::Once(Box::new(action)),
        });
        handle
    }

    /// Enqueue a repeating timer that first fires `period` ticks from now and
    /// re-arms itself after each run.
    ///
    /// The returned handle stays valid across occurrences; cancelling it
    /// stops future runs, including when the cancel happens inside the
    /// interval's own callback. An occurrence that returns an error is
    /// reported to the sink and the interval keeps repeating. A zero period
    /// is clamped to one tick so the interval always advances logical time.
    pub fn enqueue_interval<F>(&mut self, action: F, period: u64) -> TaskHandle
    where
        F: FnMut(&mut Scheduler) -> TaskResult + 'static,
    {
        let period = period.max(1);
        let handle = self.issue_handle(TaskKind::Timer);
        self.recurring.insert(handle.id());
        let due = self.clock.now().saturating_add(period);
        let seq = self.next_seq();
        self.timers.push(TimerEntry {
            due,
            seq,
            id: handle.id(),
            action: TimerAction::Repeat {
                action: Box::new(action),
                period,
            },
        });
        handle
    }

    /// Spawn a resumable task, driven one step per immediate macrotask.
    ///
    /// Microtasks drain between steps. The handle stays valid across steps;
    /// cancelling it stops the task at the next step boundary. A step that
    /// returns an error is reported to the sink and aborts the remaining
    /// steps.
    pub fn spawn_resumable<R>(&mut self, resumable: R) -> TaskHandle
    where
        R: Resumable + 'static,
    {
        let handle = self.issue_handle(TaskKind::Immediate);
        self.recurring.insert(handle.id());
        self.immediates.push_back(ImmediateEntry {
            id: handle.id(),
            action: ImmediateAction::Step(Box::new(resumable)),
        });
        handle
    }

    /// Cancel a pending task.
    ///
    /// Pending tasks are discarded at dequeue time without executing.
    /// Recurring tasks stop at their next occurrence or step boundary.
    /// Cancelling a task that already ran is a no-op. A handle issued by a
    /// different scheduler instance is rejected with
    /// [`SchedulerError::InvalidHandle`].
    pub fn cancel(&mut self, handle: TaskHandle) -> SchedulerResult<()> {
        if handle.scheduler_id() != self.id {
            return Err(SchedulerError::InvalidHandle);
        }
        let id = handle.id();
        if self.pending.contains(&id) || self.recurring.contains(&id) {
            self.cancelled.insert(id);
            debug!(task = id.as_u64(), "task marked cancelled");
        }
        Ok(())
    }

    /// Drive all queues to exhaustion.
    ///
    /// Returns once the microtask, timer, and immediate queues are all empty.
    /// Never waits on real time: when only future timers remain, the clock
    /// jumps to the earliest due time. Task failures go to the error sink and
    /// never escape this loop. Calling this from inside a running task is
    /// rejected with [`SchedulerError::ReentrantRun`].
    pub fn run_until_idle(&mut self) -> SchedulerResult<()> {
        self.run_inner(None).map(|_| ())
    }

    /// Drive the queues like [`Scheduler::run_until_idle`], executing at most
    /// `max_tasks` tasks.
    ///
    /// Returns `Ok(true)` if the scheduler went idle within the budget. This
    /// is the external iteration budget for adversarial inputs that would
    /// otherwise never terminate.
    pub fn run_bounded(&mut self, max_tasks: usize) -> SchedulerResult<bool> {
        self.run_inner(Some(max_tasks))
    }

    /// Move the logical clock forward by `amount` ticks without executing
    /// anything.
    ///
    /// Deterministic-testing hook; the driver advances the clock on its own.
    pub fn advance_time(&mut self, amount: u64) {
        self.clock.advance_by(amount);
        trace!(clock = self.clock.now(), "clock advanced externally");
    }

    // ========================================================================
    // Driver loop
    // ========================================================================

    fn run_inner(&mut self, limit: Option<usize>) -> SchedulerResult<bool> {
        if self.running {
            return Err(SchedulerError::ReentrantRun);
        }
        self.running = true;

        let mut budget = TaskBudget { remaining: limit };
        let went_idle = loop {
            if !self.drain_microtasks(&mut budget) {
                break false;
            }
            match self.run_one_macrotask(&mut budget) {
                MacroOutcome::Ran => {}
                MacroOutcome::Idle => break true,
                MacroOutcome::OutOfBudget => break false,
            }
        };

        self.running = false;
        Ok(went_idle)
    }

    /// Drain the microtask queue to fixpoint.
    ///
    /// Returns false if the budget ran out with microtasks still queued.
    fn drain_microtasks(&mut self, budget: &mut TaskBudget) -> bool {
        while let Some(task) = self.microtasks.pop_front() {
            self.pending.remove(&task.id);
            if self.cancelled.remove(&task.id) {
                self.stats.cancelled += 1;
                trace!(task = task.id.as_u64(), "discarded cancelled microtask");
                continue;
            }
            if !budget.take() {
                let id = task.id;
                self.microtasks.push_front(task);
                self.pending.insert(id);
                return false;
            }
            let QueuedTask { id, action } = task;
            self.execute(id, TaskKind::Microtask, action);
        }
        true
    }

    /// Select and run exactly one macrotask.
    fn run_one_macrotask(&mut self, budget: &mut TaskBudget) -> MacroOutcome {
        self.discard_cancelled_timers();
        self.discard_cancelled_immediates();

        let now = self.clock.now();
        let next_due = self.timers.peek().map(|e| e.due);
        let timer_is_due = matches!(next_due, Some(due) if due <= now);
        let has_immediate = !self.immediates.is_empty();

        let pick_timer = match self.config.immediate_policy {
            ImmediatePolicy::AfterDueTimers => {
                timer_is_due || (!has_immediate && next_due.is_some())
            }
            ImmediatePolicy::BeforeTimers => !has_immediate && next_due.is_some(),
        };

        if pick_timer {
            if !budget.take() {
                return MacroOutcome::OutOfBudget;
            }
            self.run_next_timer()
        } else if has_immediate {
            if !budget.take() {
                return MacroOutcome::OutOfBudget;
            }
            self.run_next_immediate()
        } else {
            MacroOutcome::Idle
        }
    }

    fn run_next_timer(&mut self) -> MacroOutcome {
        let Some(entry) = self.timers.pop() else {
            return MacroOutcome::Idle;
        };
        self.pending.remove(&entry.id);
        self.clock.advance_to(entry.due);
        trace!(
            task = entry.id.as_u64(),
            clock = self.clock.now(),
            "running timer"
        );

        match entry.action {
            TimerAction::Once(action) => self.execute(entry.id, TaskKind::Timer, action),
            TimerAction::Repeat { mut action, period } => {
                self.stats.executed += 1;
                if let Err(error) = action(self) {
                    self.report_failure(entry.id, TaskKind::Timer, &error);
                }
                self.rearm_interval(entry.id, action, period);
            }
        }
        MacroOutcome::Ran
    }

    fn run_next_immediate(&mut self) -> MacroOutcome {
        let Some(entry) = self.immediates.pop_front() else {
            return MacroOutcome::Idle;
        };
        self.pending.remove(&entry.id);
        trace!(task = entry.id.as_u64(), "running immediate");

        match entry.action {
            ImmediateAction::Once(action) => self.execute(entry.id, TaskKind::Immediate, action),
            ImmediateAction::Step(mut resumable) => {
                self.stats.executed += 1;
                match resumable.resume(self) {
                    Ok(Step::Yielded) => {
                        if self.cancelled.remove(&entry.id) {
                            self.recurring.remove(&entry.id);
                            debug!(task = entry.id.as_u64(), "resumable cancelled");
                        } else {
                            self.pending.insert(entry.id);
                            self.immediates.push_back(ImmediateEntry {
                                id: entry.id,
                                action: ImmediateAction::Step(resumable),
                            });
                        }
                    }
                    Ok(Step::Complete) => {
                        self.cancelled.remove(&entry.id);
                        self.recurring.remove(&entry.id);
                    }
                    Err(error) => {
                        self.cancelled.remove(&entry.id);
                        self.recurring.remove(&entry.id);
                        self.report_failure(entry.id, TaskKind::Immediate, &error);
                    }
                }
            }
        }
        MacroOutcome::Ran
    }

    /// Re-arm an interval after one occurrence, unless it was cancelled
    /// during its own run.
    fn rearm_interval(&mut self, id: TaskId, action: RepeatFn, period: u64) {
        if self.cancelled.remove(&id) {
            self.recurring.remove(&id);
            debug!(task = id.as_u64(), "interval cancelled");
            return;
        }
        let due = self.clock.now().saturating_add(period);
        let seq = self.next_seq();
        self.pending.insert(id);
        self.timers.push(TimerEntry {
            due,
            seq,
            id,
            action: TimerAction::Repeat { action, period },
        });
    }

    fn execute(&mut self, id: TaskId, kind: TaskKind, action: TaskFn) {
        self.stats.executed += 1;
        if let Err(error) = action(self) {
            self.report_failure(id, kind, &error);
        }
    }

    fn report_failure(&mut self, id: TaskId, kind: TaskKind, error: &TaskError) {
        self.stats.failed += 1;
        debug!(task = id.as_u64(), kind = ?kind, %error, "task failed");
        if let Some(sink) = self.error_sink.as_mut() {
            sink(id, kind, error);
        }
    }

    /// Discard cancelled timers sitting at the top of the heap
    fn discard_cancelled_timers(&mut self) {
        loop {
            let is_cancelled = match self.timers.peek() {
                Some(entry) => self.cancelled.contains(&entry.id),
                None => break,
            };
            if !is_cancelled {
                break;
            }
            if let Some(entry) = self.timers.pop() {
                self.pending.remove(&entry.id);
                self.cancelled.remove(&entry.id);
                self.recurring.remove(&entry.id);
                self.stats.cancelled += 1;
                trace!(task = entry.id.as_u64(), "discarded cancelled timer");
            }
        }
    }

    /// Discard cancelled immediates sitting at the front of the queue
    fn discard_cancelled_immediates(&mut self) {
        loop {
            let is_cancelled = match self.immediates.front() {
                Some(entry) => self.cancelled.contains(&entry.id),
                None => break,
            };
            if !is_cancelled {
                break;
            }
            if let Some(entry) = self.immediates.pop_front() {
                self.pending.remove(&entry.id);
                self.cancelled.remove(&entry.id);
                self.recurring.remove(&entry.id);
                self.stats.cancelled += 1;
                trace!(task = entry.id.as_u64(), "discarded cancelled immediate");
            }
        }
    }

    fn issue_handle(&mut self, kind: TaskKind) -> TaskHandle {
        let id = TaskId::new();
        self.pending.insert(id);
        self.stats.spawned += 1;
        trace!(task = id.as_u64(), kind = ?kind, "task enqueued");
        TaskHandle::new(self.id, id, kind)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

//! Turnloop — a cooperative single-threaded task scheduler.
//!
//! This crate models the task-ordering discipline of an event loop: a FIFO
//! microtask queue drained to fixpoint, a macrotask layer split into
//! due-time-ordered timers and "as soon as possible" immediates, and a
//! logical clock that jumps to the next due timer instead of waiting on real
//! time. On top of the core loop it provides cancellable handles, repeating
//! interval timers, promise-like [`Deferred`] values, and [`Resumable`]
//! coroutine-style tasks driven one step per turn.
//!
//! # Example
//!
//! ```rust,ignore
//! use turnloop::Scheduler;
//!
//! let mut scheduler = Scheduler::new();
//!
//! scheduler.enqueue_timer(|_| { println!("macrotask"); Ok(()) }, 0);
//! scheduler.enqueue_microtask(|_| { println!("microtask"); Ok(()) });
//!
//! // Prints "microtask" then "macrotask": microtasks always drain first.
//! scheduler.run_until_idle().unwrap();
//! ```
//!
//! The scheduler is strictly single-threaded and cooperative: a task runs to
//! completion once started, and everything it enqueues waits until it
//! returns. There is no preemption and no locking anywhere.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod clock;
mod coroutine;
mod deferred;
mod error;
mod scheduler;
mod task;
mod timer;

pub use clock::LogicalClock;
pub use coroutine::{Resumable, Step, StepFn};
pub use deferred::Deferred;
pub use error::{SchedulerError, SchedulerResult, TaskError, TaskResult};
pub use scheduler::{ImmediatePolicy, Scheduler, SchedulerConfig, SchedulerStats};
pub use task::{SchedulerId, TaskHandle, TaskId, TaskKind};
